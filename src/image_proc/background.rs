//! Background estimation and subtraction for fluorescence microscopy frames.
//!
//! Non-specific fluorescence forms a smooth, spatially varying floor under the
//! cells of interest. The estimator reconstructs that floor from the image
//! itself and subtracts it.
//!
//! # Algorithm
//!
//! 1. Estimate the noise sigma of the raw frame.
//! 2. Refine a background threshold with `n_threshold_rounds` of Li
//!    thresholding (see [`refine_background_threshold`]).
//! 3. Measure the contrast `std / mean` of the raw pixels above the threshold,
//!    rounded to two decimals.
//! 4. High-contrast frames (`contrast >= contrast_cutoff`) have real bright
//!    features contaminating the background candidate, so every pixel above
//!    the threshold is clipped to the threshold. Low-contrast frames are
//!    smoothed unclipped.
//! 5. Blur with a Gaussian of sigma `25 * gaussian_scale` and lift by
//!    `noise_sigma * vertical_scale`.
//! 6. Clamp the background to non-negative values, subtract it from the frame
//!    and clamp the result to non-negative values.
//!
//! Frames where no pixel lies above the threshold (e.g. an all-zero frame)
//! have contrast 0 and take the low-contrast branch.

use crate::algo::{mean_and_std, round_to_decimals};
use crate::image_proc::convolve2d::gaussian_filter;
use crate::image_proc::noise::{estimate_noise_sigma, NoiseMethod};
use crate::image_proc::thresholding::{
    clamp_non_negative, clip_above, refine_background_threshold,
};
use log::debug;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base Gaussian smoothing sigma in pixels, multiplied by `gaussian_scale`
pub const BASE_SMOOTHING_SIGMA: f64 = 25.0;

/// Decimals kept when rounding the contrast measure
pub const CONTRAST_DECIMALS: i32 = 2;

/// Smallest accepted frame edge in pixels
pub const MIN_IMAGE_EDGE: usize = 2;

/// Errors raised while estimating a background
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackgroundError {
    #[error("Degenerate image: {0}")]
    DegenerateImage(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Parameters of the background estimator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Li refinement rounds used to isolate the background population
    pub n_threshold_rounds: usize,
    /// Multiplier on the 25 px smoothing sigma
    pub gaussian_scale: f64,
    /// Multiplier on the noise sigma added to the background (sign allowed)
    pub vertical_scale: f64,
    /// Contrast at or above which bright pixels are clipped before smoothing
    pub contrast_cutoff: f64,
    /// Noise sigma estimator
    pub noise_method: NoiseMethod,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            n_threshold_rounds: 2,
            gaussian_scale: 1.0,
            vertical_scale: 2.0,
            contrast_cutoff: 0.1,
            noise_method: NoiseMethod::Wavelet,
        }
    }
}

impl BackgroundConfig {
    /// Reference parameters for the series ceiling pass.
    ///
    /// Wider smoothing and a single-sigma lift, independent of whatever the
    /// rendering pass uses.
    pub fn series_reference() -> Self {
        Self {
            n_threshold_rounds: 2,
            gaussian_scale: 2.0,
            vertical_scale: 1.0,
            contrast_cutoff: 0.1,
            noise_method: NoiseMethod::Wavelet,
        }
    }

    /// Gaussian sigma applied to the background candidate, in pixels
    pub fn smoothing_sigma(&self) -> f64 {
        BASE_SMOOTHING_SIGMA * self.gaussian_scale
    }

    /// Check every parameter is inside its accepted range
    pub fn validate(&self) -> Result<(), BackgroundError> {
        if !self.gaussian_scale.is_finite() || self.gaussian_scale <= 0.0 {
            return Err(BackgroundError::InvalidConfiguration(format!(
                "gaussian_scale must be a positive number, got {}",
                self.gaussian_scale
            )));
        }
        if !self.vertical_scale.is_finite() {
            return Err(BackgroundError::InvalidConfiguration(format!(
                "vertical_scale must be finite, got {}",
                self.vertical_scale
            )));
        }
        if !(0.0..=1.0).contains(&self.contrast_cutoff) {
            return Err(BackgroundError::InvalidConfiguration(format!(
                "contrast_cutoff must lie in [0, 1], got {}",
                self.contrast_cutoff
            )));
        }
        if let NoiseMethod::Patch { patch_size } = self.noise_method {
            if patch_size < 2 {
                return Err(BackgroundError::InvalidConfiguration(format!(
                    "noise patch_size must be at least 2, got {patch_size}"
                )));
            }
        }
        Ok(())
    }
}

/// Subtraction policy selected by the contrast measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContrastClass {
    /// Background variation is noise dominated; smooth without clipping
    Low,
    /// Bright features contaminate the background; clip before smoothing
    High,
}

impl ContrastClass {
    /// `High` when `contrast >= cutoff`, `Low` otherwise
    pub fn classify(contrast: f64, cutoff: f64) -> Self {
        if contrast >= cutoff {
            ContrastClass::High
        } else {
            ContrastClass::Low
        }
    }
}

/// Contrast of a pixel population: `std / mean`, rounded to two decimals.
///
/// An empty population, or one with zero mean, has contrast 0.
pub fn contrast<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    match mean_and_std(values) {
        Some((mean, std)) if mean > 0.0 => round_to_decimals(std / mean, CONTRAST_DECIMALS),
        _ => 0.0,
    }
}

/// Full result of one background estimation
#[derive(Debug, Clone)]
pub struct BackgroundEstimate {
    /// Image minus background, clamped to non-negative
    pub subtracted: Array2<f64>,
    /// Smoothed background approximation, non-negative
    pub background: Array2<f64>,
    /// Estimated noise sigma of the raw image
    pub noise_sigma: f64,
    /// Final background threshold
    pub threshold: f64,
    /// Contrast of the pixels above the threshold
    pub contrast: f64,
    /// Branch taken by the subtraction policy
    pub contrast_class: ContrastClass,
}

impl BackgroundEstimate {
    /// Mean of the subtracted image, the per-frame intensity readout
    pub fn mean_signal(&self) -> f64 {
        self.subtracted.mean().unwrap_or(0.0)
    }
}

/// Background estimator with a validated configuration
#[derive(Debug, Clone)]
pub struct BackgroundEstimator {
    config: BackgroundConfig,
}

impl BackgroundEstimator {
    /// Create an estimator, rejecting out-of-range parameters
    pub fn new(config: BackgroundConfig) -> Result<Self, BackgroundError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    /// Estimate the background of `image` and subtract it.
    ///
    /// The input is never modified; both output maps share its shape.
    ///
    /// # Errors
    /// `DegenerateImage` for frames smaller than 2x2, or containing
    /// non-finite or negative pixels.
    pub fn estimate(&self, image: &ArrayView2<f64>) -> Result<BackgroundEstimate, BackgroundError> {
        validate_image(image)?;

        let noise_sigma = estimate_noise_sigma(image, self.config.noise_method)
            .map_err(|e| BackgroundError::DegenerateImage(e.to_string()))?;

        let pixels: Vec<f64> = image.iter().copied().collect();
        let refinement = refine_background_threshold(&pixels, self.config.n_threshold_rounds)
            .ok_or_else(|| BackgroundError::DegenerateImage("image has no pixels".to_string()))?;
        let threshold = refinement.threshold;

        let contrast = contrast(pixels.iter().copied().filter(|&v| v > threshold));
        let contrast_class = ContrastClass::classify(contrast, self.config.contrast_cutoff);

        debug!(
            "noise_sigma={noise_sigma:.6} threshold={threshold:.6} rounds={} contrast={contrast:.2} class={contrast_class:?}",
            refinement.rounds_completed
        );

        let candidate = match contrast_class {
            ContrastClass::High => clip_above(image, threshold),
            ContrastClass::Low => image.to_owned(),
        };

        let offset = noise_sigma * self.config.vertical_scale;
        let mut background = gaussian_filter(&candidate.view(), self.config.smoothing_sigma());
        background.mapv_inplace(|v| v + offset);
        let background = clamp_non_negative(background);

        let subtracted = clamp_non_negative(image - &background);

        Ok(BackgroundEstimate {
            subtracted,
            background,
            noise_sigma,
            threshold,
            contrast,
            contrast_class,
        })
    }
}

/// Reject frames the estimator cannot produce meaningful statistics for
fn validate_image(image: &ArrayView2<f64>) -> Result<(), BackgroundError> {
    let (rows, cols) = image.dim();
    if rows < MIN_IMAGE_EDGE || cols < MIN_IMAGE_EDGE {
        return Err(BackgroundError::DegenerateImage(format!(
            "image of {rows}x{cols} pixels is smaller than {MIN_IMAGE_EDGE}x{MIN_IMAGE_EDGE}"
        )));
    }

    if let Some(((i, j), v)) = image.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(BackgroundError::DegenerateImage(format!(
            "non-finite pixel {v} at ({i}, {j})"
        )));
    }

    if let Some(((i, j), v)) = image.indexed_iter().find(|(_, &v)| v < 0.0) {
        return Err(BackgroundError::DegenerateImage(format!(
            "negative pixel {v} at ({i}, {j})"
        )));
    }

    Ok(())
}

/// Estimate and subtract the background of one image.
///
/// Convenience wrapper around [`BackgroundEstimator`] using the wavelet
/// noise estimator.
///
/// # Returns
/// `(subtracted_image, background_map)`
pub fn estimate_and_subtract(
    image: &ArrayView2<f64>,
    n_threshold_rounds: usize,
    gaussian_scale: f64,
    vertical_scale: f64,
    contrast_cutoff: f64,
) -> Result<(Array2<f64>, Array2<f64>), BackgroundError> {
    let estimator = BackgroundEstimator::new(BackgroundConfig {
        n_threshold_rounds,
        gaussian_scale,
        vertical_scale,
        contrast_cutoff,
        noise_method: NoiseMethod::Wavelet,
    })?;

    let estimate = estimator.estimate(image)?;
    Ok((estimate.subtracted, estimate.background))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::row_difference_variance;
    use crate::image_proc::test_patterns::{
        fill_rect, gradient_with_bright_square, horizontal_gradient, simple_normal_array,
    };
    use approx::assert_relative_eq;
    use ndarray::array;

    fn noisy_scene(seed: u64) -> Array2<f64> {
        let mut image = horizontal_gradient(64, 64, 0.2, 0.4);
        fill_rect(&mut image, (10, 12), (8, 8), 0.9);
        fill_rect(&mut image, (40, 30), (6, 12), 0.7);
        let noise = simple_normal_array((64, 64), 0.0, 0.01, seed);
        (image + noise).mapv(|v| v.max(0.0))
    }

    #[test]
    fn test_default_config_matches_reference_defaults() {
        let config = BackgroundConfig::default();
        assert_eq!(config.n_threshold_rounds, 2);
        assert_eq!(config.gaussian_scale, 1.0);
        assert_eq!(config.vertical_scale, 2.0);
        assert_eq!(config.contrast_cutoff, 0.1);
        assert_eq!(config.smoothing_sigma(), 25.0);

        let reference = BackgroundConfig::series_reference();
        assert_eq!(reference.smoothing_sigma(), 50.0);
        assert_eq!(reference.vertical_scale, 1.0);
    }

    #[test]
    fn test_invalid_configurations_are_rejected() {
        let bad = [
            BackgroundConfig {
                gaussian_scale: -1.0,
                ..Default::default()
            },
            BackgroundConfig {
                gaussian_scale: 0.0,
                ..Default::default()
            },
            BackgroundConfig {
                contrast_cutoff: 1.5,
                ..Default::default()
            },
            BackgroundConfig {
                contrast_cutoff: f64::NAN,
                ..Default::default()
            },
            BackgroundConfig {
                vertical_scale: f64::INFINITY,
                ..Default::default()
            },
            BackgroundConfig {
                noise_method: NoiseMethod::Patch { patch_size: 1 },
                ..Default::default()
            },
        ];

        for config in bad {
            assert!(
                matches!(
                    BackgroundEstimator::new(config),
                    Err(BackgroundError::InvalidConfiguration(_))
                ),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_negative_vertical_scale_is_allowed() {
        let config = BackgroundConfig {
            vertical_scale: -3.0,
            ..Default::default()
        };
        assert!(BackgroundEstimator::new(config).is_ok());
    }

    #[test]
    fn test_contrast_of_flat_population_is_zero() {
        assert_eq!(contrast(vec![5.0; 100]), 0.0);
        assert_eq!(ContrastClass::classify(0.0, 0.1), ContrastClass::Low);
    }

    #[test]
    fn test_contrast_rounding_and_empty() {
        // std 2, mean 5
        assert_eq!(contrast(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 0.4);
        assert_eq!(contrast(Vec::<f64>::new()), 0.0);
    }

    #[test]
    fn test_cutoff_boundary_is_high_contrast() {
        assert_eq!(ContrastClass::classify(0.1, 0.1), ContrastClass::High);
        assert_eq!(ContrastClass::classify(0.09, 0.1), ContrastClass::Low);
    }

    #[test]
    fn test_flat_bright_region_takes_low_contrast_branch() {
        let mut image = Array2::zeros((32, 32));
        fill_rect(&mut image, (8, 8), (8, 8), 5.0);

        let estimator = BackgroundEstimator::new(BackgroundConfig::default()).unwrap();
        let estimate = estimator.estimate(&image.view()).unwrap();

        assert_eq!(estimate.contrast, 0.0);
        assert_eq!(estimate.contrast_class, ContrastClass::Low);
        assert!(estimate.threshold < 5.0);
    }

    #[test]
    fn test_all_zero_image() {
        let image = Array2::zeros((64, 64));
        let (subtracted, background) =
            estimate_and_subtract(&image.view(), 2, 1.0, 1.0, 0.1).unwrap();

        assert_eq!(subtracted.dim(), (64, 64));
        assert!(subtracted.iter().all(|&v| v == 0.0));
        assert!(background.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_outputs_are_non_negative_and_shape_preserving() {
        for (seed, vertical_scale) in [(1, 2.0), (2, -5.0), (3, 0.0)] {
            let image = noisy_scene(seed);
            let (subtracted, background) =
                estimate_and_subtract(&image.view(), 2, 1.0, vertical_scale, 0.1).unwrap();

            assert_eq!(subtracted.dim(), image.dim());
            assert_eq!(background.dim(), image.dim());
            assert!(subtracted.iter().all(|&v| v >= 0.0));
            assert!(background.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn test_input_is_not_modified() {
        let image = noisy_scene(11);
        let copy = image.clone();
        let _ = estimate_and_subtract(&image.view(), 3, 1.0, 1.0, 0.1).unwrap();
        assert_eq!(image, copy);
    }

    #[test]
    fn test_wider_smoothing_is_not_rougher() {
        let image = noisy_scene(5);

        let roughness = |scale: f64| {
            let (_, background) =
                estimate_and_subtract(&image.view(), 2, scale, 0.0, 0.1).unwrap();
            row_difference_variance(&background.view())
        };

        let narrow = roughness(0.1);
        let medium = roughness(1.0);
        let wide = roughness(2.0);
        assert!(medium <= narrow, "{medium} > {narrow}");
        assert!(wide <= medium + 1e-15, "{wide} > {medium}");
    }

    #[test]
    fn test_vertical_scale_shifts_background_by_noise_sigma() {
        let image = noisy_scene(8);
        let estimator = |vertical_scale| {
            BackgroundEstimator::new(BackgroundConfig {
                vertical_scale,
                ..Default::default()
            })
            .unwrap()
        };

        let flat = estimator(0.0).estimate(&image.view()).unwrap();
        let lifted = estimator(2.0).estimate(&image.view()).unwrap();

        assert!(flat.noise_sigma > 0.0);
        let lift = &lifted.background - &flat.background;
        for &d in lift.iter() {
            assert_relative_eq!(d, 2.0 * flat.noise_sigma, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_high_contrast_clips_bright_features() {
        let image = gradient_with_bright_square();
        let estimator = BackgroundEstimator::new(BackgroundConfig {
            vertical_scale: 1.0,
            ..Default::default()
        })
        .unwrap();

        let estimate = estimator.estimate(&image.view()).unwrap();

        assert_eq!(estimate.contrast_class, ContrastClass::High);
        // Clipped candidate never exceeds the threshold, nor does its blur
        let max_background = estimate.background.iter().cloned().fold(0.0, f64::max);
        assert!(max_background <= estimate.threshold + estimate.noise_sigma + 1e-12);
    }

    #[test]
    fn test_degenerate_images_are_rejected() {
        let tiny = array![[0.5, 0.5]];
        assert!(matches!(
            estimate_and_subtract(&tiny.view(), 2, 1.0, 1.0, 0.1),
            Err(BackgroundError::DegenerateImage(_))
        ));

        let with_nan = array![[0.5, f64::NAN], [0.1, 0.2]];
        assert!(matches!(
            estimate_and_subtract(&with_nan.view(), 2, 1.0, 1.0, 0.1),
            Err(BackgroundError::DegenerateImage(_))
        ));

        let negative = array![[0.5, -0.1], [0.1, 0.2]];
        assert!(matches!(
            estimate_and_subtract(&negative.view(), 2, 1.0, 1.0, 0.1),
            Err(BackgroundError::DegenerateImage(_))
        ));
    }

    #[test]
    fn test_zero_rounds_uses_percentile_threshold() {
        let image = noisy_scene(21);
        let estimator = BackgroundEstimator::new(BackgroundConfig {
            n_threshold_rounds: 0,
            ..Default::default()
        })
        .unwrap();

        let estimate = estimator.estimate(&image.view()).unwrap();
        let pixels: Vec<f64> = image.iter().copied().collect();
        let p99 = crate::algo::percentile(&pixels, 99.0).unwrap();
        assert_relative_eq!(estimate.threshold, p99);
    }
}
