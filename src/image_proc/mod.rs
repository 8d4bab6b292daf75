//! Image processing pipeline for fluorescence microscopy timelapses.
//!
//! Takes raw frames from disk, removes the smooth non-specific fluorescence
//! floor under the cells, and renders the results on a scale shared by the
//! whole series.
//!
//! # Module Organization
//!
//! ## Core Algorithms
//! - **background**: Background estimation and subtraction
//! - **series**: Shared intensity ceiling for a series of frames
//! - **thresholding**: Li minimum cross entropy thresholding and refinement
//! - **convolve2d**: Separable Gaussian smoothing with nearest edge handling
//! - **noise**: Noise sigma estimation (wavelet and patch covariance)
//!
//! ## Data I/O
//! - **io**: Frame discovery, decoding to [0, 1] arrays, PNG output
//! - **render**: Turbo colour map rendering with a fixed ceiling
//!
//! ## Testing
//! - **test_patterns**: Synthetic gradients, features and noise fields

pub mod background;
pub mod convolve2d;
pub mod io;
pub mod noise;
pub mod render;
pub mod series;
pub mod test_patterns;
pub mod thresholding;

// Re-export key functionality for easier access
pub use background::{
    estimate_and_subtract, BackgroundConfig, BackgroundError, BackgroundEstimate,
    BackgroundEstimator, ContrastClass,
};
pub use convolve2d::gaussian_filter;
pub use io::{list_image_paths, load_image, save_gray16_image, save_rgb_image, ImageIoError};
pub use noise::{estimate_noise_sigma, NoiseMethod};
pub use render::{draw_scale_bar, render_frame, render_turbo, FrameOverlay, ScaleBar};
pub use series::{
    compute_series_ceiling, select_series_reference, select_series_reference_skipping,
    SeriesCeiling, SeriesError, TolerantCeiling,
};
pub use thresholding::{li_threshold, refine_background_threshold};
