//! Statistical functions for image analysis

use ndarray::{ArrayView2, Axis};

/// Calculate the q-th percentile of a slice of f64 values
///
/// Uses linear interpolation between the two closest ranks, so the result
/// matches the conventional "linear" percentile definition:
/// `rank = q / 100 * (n - 1)`. NaN values are ignored.
///
/// # Arguments
///
/// * `values` - Slice of f64 values
/// * `q` - Percentile in the range [0, 100]
///
/// # Returns
///
/// * `Ok(value)` - The interpolated percentile
/// * `Err(message)` - If `q` is out of range or no valid values remain
pub fn percentile(values: &[f64], q: f64) -> Result<f64, String> {
    if !(0.0..=100.0).contains(&q) {
        return Err(format!("Percentile {q} is outside the range [0, 100]"));
    }

    let mut valid_values: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid_values.is_empty() {
        return Err(format!(
            "Insufficient data points to compute percentile: {} total values, 0 valid",
            values.len()
        ));
    }

    valid_values.sort_by(f64::total_cmp);
    Ok(sorted_percentile(&valid_values, q))
}

/// Percentile of data that is already sorted ascending and NaN free.
///
/// Callers must pass a non-empty slice.
pub(crate) fn sorted_percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;

    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Calculate median of a slice of f64 values
///
/// NaN values are filtered out. For even-length data, returns the average
/// of the two middle values.
pub fn median(values: &[f64]) -> Result<f64, String> {
    percentile(values, 50.0)
}

/// Population mean and standard deviation (divisor `n`)
///
/// Returns `None` for an empty input.
pub fn mean_and_std<I>(values: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = f64>,
{
    // Welford's update keeps the variance stable for large, nearly flat populations
    let mut count = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;

    for value in values {
        count += 1;
        let delta = value - mean;
        mean += delta / count as f64;
        m2 += delta * (value - mean);
    }

    if count == 0 {
        return None;
    }

    Some((mean, (m2 / count as f64).sqrt()))
}

/// Round to a fixed number of decimals, resolving ties to the even neighbour
pub fn round_to_decimals(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

/// Variance of the differences between vertically adjacent pixels.
///
/// A smoothness measure: the smoother an image is, the smaller this value.
/// Returns 0.0 for images with fewer than two rows.
pub fn row_difference_variance(image: &ArrayView2<f64>) -> f64 {
    if image.len_of(Axis(0)) < 2 {
        return 0.0;
    }

    let upper = image.slice(ndarray::s![..-1, ..]);
    let lower = image.slice(ndarray::s![1.., ..]);
    let diffs = &lower - &upper;

    mean_and_std(diffs.iter().copied()).map_or(0.0, |(_, std)| std * std)
}

/// Population variance of every row of an image
pub fn row_variances(image: &ArrayView2<f64>) -> Vec<f64> {
    image
        .axis_iter(Axis(0))
        .map(|row| mean_and_std(row.iter().copied()).map_or(0.0, |(_, std)| std * std))
        .collect()
}
