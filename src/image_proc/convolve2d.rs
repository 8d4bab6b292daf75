//! Separable Gaussian smoothing for background reconstruction
//!
//! The background map is a heavily blurred copy of the image (sigma of tens
//! of pixels), so the 2D kernel is never materialised: a normalised 1D
//! kernel is applied along rows and then along columns. Samples outside the
//! image repeat the nearest edge pixel.

use crate::algo::process_lanes_in_parallel;
use ndarray::{Array2, ArrayView2, ArrayViewMut1, Axis};

/// Kernel half-width in units of sigma
pub const GAUSSIAN_TRUNCATE: f64 = 4.0;

/// Create a normalised 1D Gaussian kernel
///
/// The kernel radius is `round(truncate * sigma)`, giving `2 * radius + 1`
/// taps that sum to one.
///
/// # Arguments
/// * `sigma` - Standard deviation of the Gaussian in pixels (must be > 0)
/// * `truncate` - Number of standard deviations covered on each side
///
/// # Returns
/// * Kernel weights, centre tap at index `radius`
pub fn gaussian_kernel_1d(sigma: f64, truncate: f64) -> Vec<f64> {
    let radius = (truncate * sigma + 0.5) as usize;
    let denom = 2.0 * sigma * sigma;

    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-(x * x) / denom).exp()
        })
        .collect();

    let sum: f64 = kernel.iter().sum();
    if sum > 0.0 {
        kernel.iter_mut().for_each(|w| *w /= sum);
    }

    kernel
}

/// Correlate one lane with the kernel, clamping reads to the lane's edges
fn filter_lane_nearest(mut lane: ArrayViewMut1<f64>, kernel: &[f64]) {
    let len = lane.len();
    if len == 0 {
        return;
    }

    let source = lane.to_vec();
    let radius = (kernel.len() / 2) as isize;
    let last = len as isize - 1;

    for (i, out) in lane.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (k, &w) in kernel.iter().enumerate() {
            let idx = (i as isize + k as isize - radius).clamp(0, last);
            sum += source[idx as usize] * w;
        }
        *out = sum;
    }
}

/// Apply an isotropic Gaussian blur to a 2D image
///
/// # Arguments
/// * `image` - Input image
/// * `sigma` - Standard deviation in pixels; non-positive values return a copy
///
/// # Returns
/// * Smoothed image with the same shape as the input
pub fn gaussian_filter(image: &ArrayView2<f64>, sigma: f64) -> Array2<f64> {
    if sigma <= 0.0 || image.is_empty() {
        return image.to_owned();
    }

    let kernel = gaussian_kernel_1d(sigma, GAUSSIAN_TRUNCATE);

    let rows_done = process_lanes_in_parallel(image.to_owned(), Axis(1), |row| {
        filter_lane_nearest(row, &kernel)
    });
    process_lanes_in_parallel(rows_done, Axis(0), |column| {
        filter_lane_nearest(column, &kernel)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array1};

    #[test]
    fn test_gaussian_kernel_1d() {
        let kernel = gaussian_kernel_1d(1.0, 4.0);

        // radius = round(4 * 1) = 4
        assert_eq!(kernel.len(), 9);

        let sum: f64 = kernel.iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-12);

        // Symmetric, peaked at the centre
        for i in 0..4 {
            assert_relative_eq!(kernel[i], kernel[8 - i], epsilon = 1e-15);
            assert!(kernel[i] < kernel[i + 1]);
        }
    }

    #[test]
    fn test_kernel_radius_scales_with_sigma() {
        assert_eq!(gaussian_kernel_1d(25.0, GAUSSIAN_TRUNCATE).len(), 201);
        assert_eq!(gaussian_kernel_1d(0.1, GAUSSIAN_TRUNCATE).len(), 1);
    }

    #[test]
    fn test_filter_preserves_constant_image() {
        let image = Array2::from_elem((20, 30), 0.42);
        let smoothed = gaussian_filter(&image.view(), 25.0);

        assert_eq!(smoothed.dim(), (20, 30));
        for &v in smoothed.iter() {
            assert_relative_eq!(v, 0.42, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_filter_preserves_mass_of_interior_impulse() {
        let mut image = Array2::zeros((41, 41));
        image[[20, 20]] = 1.0;

        let smoothed = gaussian_filter(&image.view(), 2.0);

        // Kernel radius 8 stays well inside the frame, so nothing is lost
        assert_relative_eq!(smoothed.sum(), 1.0, epsilon = 1e-12);
        assert!(smoothed[[20, 20]] > smoothed[[20, 21]]);
        assert_relative_eq!(smoothed[[19, 20]], smoothed[[21, 20]], epsilon = 1e-15);
        assert_relative_eq!(smoothed[[20, 19]], smoothed[[19, 20]], epsilon = 1e-15);
    }

    #[test]
    fn test_nearest_edge_extension() {
        let mut lane = Array1::from(vec![1.0, 0.0, 0.0]);
        filter_lane_nearest(lane.view_mut(), &[0.25, 0.5, 0.25]);

        // left edge reads [1, 1, 0]
        assert_relative_eq!(lane[0], 0.75);
        assert_relative_eq!(lane[1], 0.25);
        assert_relative_eq!(lane[2], 0.0);
    }

    #[test]
    fn test_zero_sigma_returns_copy() {
        let image = array![[1.0, 2.0], [3.0, 4.0]];
        assert_eq!(gaussian_filter(&image.view(), 0.0), image);
    }

    #[test]
    fn test_larger_sigma_is_smoother() {
        let image = Array2::from_shape_fn((64, 64), |(i, j)| ((i * 7 + j * 13) % 5) as f64);

        let narrow = gaussian_filter(&image.view(), 1.0);
        let wide = gaussian_filter(&image.view(), 4.0);

        let roughness = |a: &Array2<f64>| crate::algo::row_difference_variance(&a.view());
        assert!(roughness(&wide) <= roughness(&narrow));
    }
}
