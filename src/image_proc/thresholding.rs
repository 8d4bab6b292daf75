//! Intensity thresholding for separating background from bright features.
//!
//! Fluorescence frames are dominated by a smooth background population with a
//! minority of bright pixels from cells or debris. The background estimator
//! isolates the background population by repeatedly applying Li's minimum
//! cross-entropy threshold and discarding everything at or above it.
//!
//! # Key Algorithms
//!
//! ## Li Thresholding
//! Iterative minimisation of the cross-entropy between the image and its
//! two-level segmentation (Li & Lee 1993, Li & Tam 1998). Each step moves the
//! threshold to `(μ_b - μ_f) / (ln μ_b - ln μ_f)` where `μ_b`, `μ_f` are the
//! mean background and foreground intensities, until the change falls below
//! half the smallest gap between distinct intensities.
//!
//! ## Iterative Refinement
//! Runs Li thresholding on a shrinking population: after each round only the
//! pixels strictly below the threshold survive into the next round.

use crate::algo::stats::sorted_percentile;
use log::{debug, warn};
use ndarray::{Array2, ArrayView2};

/// Percentile of the raw image used as the threshold when no refinement
/// round runs.
pub const INITIAL_THRESHOLD_PERCENTILE: f64 = 99.0;

/// Upper bound on Li update steps before giving up on convergence
const LI_MAX_ITERATIONS: usize = 10_000;

/// Compute Li's minimum cross-entropy threshold.
///
/// NaN values are ignored. A population of identical values returns that
/// value.
///
/// # Arguments
/// * `values` - Pixel intensities (any order)
///
/// # Returns
/// * `Some(threshold)` for a non-empty population, `None` otherwise
pub fn li_threshold(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    if min == max {
        return Some(min);
    }

    // Half the smallest gap between distinct intensities
    let tolerance = sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&gap| gap > 0.0)
        .fold(f64::INFINITY, f64::min)
        / 2.0;

    // Work on intensities shifted so the minimum is zero; the log terms need
    // non-negative means.
    let shifted: Vec<f64> = sorted.iter().map(|v| v - min).collect();
    let mut t_next = shifted.iter().sum::<f64>() / shifted.len() as f64;
    let mut t_curr = -2.0 * tolerance;

    let mut iterations = 0;
    while (t_next - t_curr).abs() > tolerance {
        if iterations == LI_MAX_ITERATIONS {
            warn!("Li threshold did not converge after {LI_MAX_ITERATIONS} iterations");
            break;
        }
        iterations += 1;
        t_curr = t_next;

        // shifted is sorted, so the foreground is a suffix
        let split = shifted.partition_point(|&v| v <= t_curr);
        let (background, foreground) = shifted.split_at(split);
        if background.is_empty() || foreground.is_empty() {
            break;
        }

        let mean_back = background.iter().sum::<f64>() / background.len() as f64;
        let mean_fore = foreground.iter().sum::<f64>() / foreground.len() as f64;
        if mean_back == 0.0 {
            break;
        }

        t_next = (mean_back - mean_fore) / (mean_back.ln() - mean_fore.ln());
    }

    Some(t_next + min)
}

/// Outcome of iterative threshold refinement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdRefinement {
    /// Final threshold separating background (below) from foreground (above)
    pub threshold: f64,
    /// Number of Li rounds that produced a threshold
    pub rounds_completed: usize,
    /// Size of the surviving background population
    pub population: usize,
}

/// Isolate the background population with repeated Li thresholding.
///
/// Starts from the 99th percentile of `values`. Each round computes the Li
/// threshold of the current population and keeps only values strictly below
/// it. If the population empties, the last threshold that was computed from
/// a non-empty population is kept.
///
/// # Arguments
/// * `values` - Raw pixel intensities, NaN free and non-empty
/// * `rounds` - Number of Li refinement rounds
///
/// # Returns
/// * `None` if `values` is empty
pub fn refine_background_threshold(values: &[f64], rounds: usize) -> Option<ThresholdRefinement> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut threshold = sorted_percentile(&sorted, INITIAL_THRESHOLD_PERCENTILE);

    let mut population = sorted;
    let mut rounds_completed = 0;

    for round in 0..rounds {
        let Some(next) = li_threshold(&population) else {
            debug!("Background population empty before round {round}, keeping threshold {threshold}");
            break;
        };
        threshold = next;
        rounds_completed += 1;

        population.retain(|&v| v < threshold);
    }

    Some(ThresholdRefinement {
        threshold,
        rounds_completed,
        population: population.len(),
    })
}

/// Clip every value above `threshold` down to `threshold`.
pub fn clip_above(image: &ArrayView2<f64>, threshold: f64) -> Array2<f64> {
    image.mapv(|v| if v > threshold { threshold } else { v })
}

/// Replace negative values with zero.
///
/// Applying this twice is the same as applying it once.
pub fn clamp_non_negative(mut image: Array2<f64>) -> Array2<f64> {
    image.mapv_inplace(|v| if v < 0.0 { 0.0 } else { v });
    image
}
