//! Numerical building blocks shared by the image processing pipeline
//!
//! This module provides order statistics, moment calculations and the
//! parallel lane processing used by the separable filters.

pub mod parallel;
pub mod stats;

pub use parallel::process_lanes_in_parallel;
pub use stats::{
    mean_and_std, median, percentile, round_to_decimals, row_difference_variance,
    row_variances,
};
