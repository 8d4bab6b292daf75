//! Background subtraction and intensity dynamics for fluorescence microscopy.
//!
//! Estimates the smooth non-specific fluorescence floor of each frame,
//! subtracts it, renders the series on one shared colour scale and reduces
//! each frame to a single intensity readout over time.
//!
//! - **algo**: order statistics, moments and parallel lane processing
//! - **image_proc**: background estimation, series ceiling, I/O and rendering
//! - **viz**: background profile and response dynamics plots
//! - **dynamics**: batch analysis of one timelapse series
//! - **config**: JSON run configuration

pub mod algo;
pub mod config;
pub mod dynamics;
pub mod image_proc;
pub mod viz;

pub use config::{FailurePolicy, RunConfig};
pub use dynamics::{analyze_dynamics, DynamicsError, DynamicsSummary, TimepointRecord};
pub use image_proc::{
    compute_series_ceiling, estimate_and_subtract, BackgroundConfig, BackgroundError,
    BackgroundEstimator, SeriesError,
};
