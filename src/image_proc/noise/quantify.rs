//! Noise level estimation directly from raw frames.
//!
//! Provides two estimators of the per-pixel noise standard deviation, neither
//! of which needs the background to be removed first:
//! - Wavelet MAD: median absolute diagonal detail coefficient of a single
//!   level Daubechies-2 transform, scaled to a Gaussian sigma (Donoho 1994)
//! - Patch covariance: tail eigenvalues of the patch covariance matrix
//!   (Chen, Zhu, Heng - ICCV 2015)

use crate::algo::median;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

/// Errors raised by the noise estimators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NoiseError {
    #[error("Image of {rows}x{cols} pixels is smaller than the minimum {min}x{min}")]
    ImageTooSmall { rows: usize, cols: usize, min: usize },
    #[error("Noise statistic undefined: {0}")]
    Undefined(String),
}

/// Daubechies-2 decomposition high-pass filter
const DB2_DEC_HI: [f64; 4] = [
    -0.482_962_913_144_690_25,
    0.836_516_303_737_469,
    -0.224_143_868_041_857_35,
    -0.129_409_522_550_921_45,
];

/// 75th percentile of the standard normal distribution; converts a median
/// absolute deviation into a Gaussian sigma.
const MAD_TO_SIGMA: f64 = 0.674_489_750_196_081_7;

/// Index into a signal of length `len` with half-sample symmetric extension
/// (`x[-1] = x[0]`, `x[len] = x[len - 1]`).
fn symmetric_index(idx: isize, len: usize) -> usize {
    let period = 2 * len as isize;
    let wrapped = idx.rem_euclid(period);
    if wrapped < len as isize {
        wrapped as usize
    } else {
        (period - 1 - wrapped) as usize
    }
}

/// Single level high-pass analysis of one signal, downsampled by two.
///
/// Produces `(len + filter_len - 1) / 2` coefficients.
fn dwt_detail(signal: &ArrayView1<f64>) -> Array1<f64> {
    let len = signal.len();
    let taps = DB2_DEC_HI.len();
    let out_len = (len + taps - 1) / 2;

    Array1::from_shape_fn(out_len, |o| {
        let centre = 2 * o as isize + 1;
        DB2_DEC_HI
            .iter()
            .enumerate()
            .map(|(j, &h)| h * signal[symmetric_index(centre - j as isize, len)])
            .sum()
    })
}

/// Apply `dwt_detail` to every lane along `axis`.
fn dwt_detail_along(image: &ArrayView2<f64>, axis: Axis) -> Array2<f64> {
    let (rows, cols) = image.dim();
    let lanes: Vec<Array1<f64>> = image.lanes(axis).into_iter().map(|l| dwt_detail(&l)).collect();
    let out_len = lanes.first().map_or(0, |l| l.len());

    if axis == Axis(1) {
        Array2::from_shape_fn((rows, out_len), |(i, j)| lanes[i][j])
    } else {
        Array2::from_shape_fn((out_len, cols), |(i, j)| lanes[j][i])
    }
}

/// Estimate noise standard deviation from wavelet detail coefficients.
///
/// The diagonal detail band of a smooth image is near zero; what remains is
/// noise plus sparse edge responses. The median absolute coefficient is
/// insensitive to those sparse outliers.
///
/// # Arguments
/// * `image` - Raw pixel intensities, at least 2x2
///
/// # Returns
/// Estimated noise sigma in the same units as the image
pub fn estimate_noise_wavelet(image: &ArrayView2<f64>) -> Result<f64, NoiseError> {
    let (rows, cols) = image.dim();
    if rows < 2 || cols < 2 {
        return Err(NoiseError::ImageTooSmall { rows, cols, min: 2 });
    }

    let horizontal = dwt_detail_along(image, Axis(1));
    let diagonal = dwt_detail_along(&horizontal.view(), Axis(0));

    // Exactly zero coefficients come from flat regions (masked or saturated
    // areas) and carry no noise information.
    let magnitudes: Vec<f64> = diagonal
        .iter()
        .filter(|&&c| c != 0.0)
        .map(|c| c.abs())
        .collect();
    if magnitudes.is_empty() {
        return Ok(0.0);
    }
    let mad = median(&magnitudes).map_err(NoiseError::Undefined)?;

    Ok(mad / MAD_TO_SIGMA)
}

/// Transform image to patches for noise estimation
///
/// Converts an image into overlapping patches for statistical analysis.
///
/// # Returns
/// 2D array where each column is one flattened `patch_size x patch_size` patch
fn im2patch(image: &ArrayView2<f64>, patch_size: usize, stride: usize) -> Array2<f64> {
    let (height, width) = image.dim();

    let num_h = ((height - patch_size) / stride) + 1;
    let num_w = ((width - patch_size) / stride) + 1;
    let patch_elements = patch_size * patch_size;

    let mut patches = Array2::<f64>::zeros((patch_elements, num_h * num_w));

    let mut patch_idx = 0;
    for i in (0..=height - patch_size).step_by(stride) {
        for j in (0..=width - patch_size).step_by(stride) {
            let mut flat_idx = 0;
            for pi in 0..patch_size {
                for pj in 0..patch_size {
                    patches[[flat_idx, patch_idx]] = image[[i + pi, j + pj]];
                    flat_idx += 1;
                }
            }
            patch_idx += 1;
        }
    }

    patches
}

/// Estimate noise level using the patch covariance eigenvalue method
///
/// # Algorithm
/// 1. Extract overlapping patches (stride 3)
/// 2. Compute the patch covariance matrix
/// 3. Find its eigenvalues
/// 4. Take the largest tail of eigenvalues whose mean equals their median
///
/// # Arguments
/// * `image` - 2D array of pixel values (any scale)
/// * `patch_size` - Size of square patches, at least 2
///
/// # Returns
/// Estimated noise standard deviation in same units as input
pub fn estimate_noise_patch(image: &ArrayView2<f64>, patch_size: usize) -> Result<f64, NoiseError> {
    use nalgebra::{DMatrix, SymmetricEigen};

    let (rows, cols) = image.dim();
    let min = patch_size.max(2);
    if rows < min || cols < min {
        return Err(NoiseError::ImageTooSmall { rows, cols, min });
    }

    let patches = im2patch(image, min, 3);
    let (d, num_patches) = patches.dim();

    let mu = patches
        .mean_axis(Axis(1))
        .ok_or_else(|| NoiseError::Undefined("no patches extracted".to_string()))?;
    let centred = &patches - &mu.insert_axis(Axis(1));

    let sigma_x = centred.dot(&centred.t()) / num_patches as f64;
    let covariance = DMatrix::from_fn(d, d, |i, j| sigma_x[[i, j]]);

    let mut eigenvalues: Vec<f64> = SymmetricEigen::new(covariance)
        .eigenvalues
        .iter()
        .map(|&v| v.max(0.0))
        .collect();
    eigenvalues.sort_by(f64::total_cmp);

    for i in (1..d).rev() {
        let tail = &eigenvalues[0..i];
        let tau = tail.iter().sum::<f64>() / i as f64;

        let num_greater = tail.iter().filter(|&&v| v > tau).count();
        let num_less = tail.iter().filter(|&&v| v < tau).count();

        if num_greater == num_less {
            return Ok(tau.sqrt());
        }
    }

    let mid = (d / 2).max(1);
    Ok((eigenvalues[0..mid].iter().sum::<f64>() / mid as f64).sqrt())
}
