//! Noise floor estimation for fluorescence frames
//!
//! - **quantify**: wavelet and patch-covariance noise estimators

pub mod quantify;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

pub use quantify::{estimate_noise_patch, estimate_noise_wavelet, NoiseError};

/// Method used to estimate the per-image noise sigma
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum NoiseMethod {
    /// Median absolute db2 diagonal detail coefficient
    #[default]
    Wavelet,
    /// Patch covariance eigenvalues with square patches of `patch_size`
    Patch { patch_size: usize },
}

/// Estimate the noise standard deviation of a raw image
pub fn estimate_noise_sigma(image: &ArrayView2<f64>, method: NoiseMethod) -> Result<f64, NoiseError> {
    match method {
        NoiseMethod::Wavelet => estimate_noise_wavelet(image),
        NoiseMethod::Patch { patch_size } => estimate_noise_patch(image, patch_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::test_patterns::simple_normal_array;

    #[test]
    fn test_methods_agree_on_white_noise() {
        let image = simple_normal_array((96, 96), 1.0, 0.1, 3);

        let wavelet = estimate_noise_sigma(&image.view(), NoiseMethod::Wavelet).unwrap();
        let patch =
            estimate_noise_sigma(&image.view(), NoiseMethod::Patch { patch_size: 6 }).unwrap();

        assert!((wavelet - 0.1).abs() < 0.02, "wavelet estimate {wavelet}");
        assert!((patch - 0.1).abs() < 0.03, "patch estimate {patch}");
    }

    #[test]
    fn test_noise_method_serde() {
        let json = serde_json::to_string(&NoiseMethod::Patch { patch_size: 8 }).unwrap();
        assert_eq!(json, r#"{"method":"patch","patch_size":8}"#);

        let parsed: NoiseMethod = serde_json::from_str(r#"{"method":"wavelet"}"#).unwrap();
        assert_eq!(parsed, NoiseMethod::Wavelet);
    }
}
