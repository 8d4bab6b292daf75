//! Parallel processing utilities for 2D arrays
//!
//! Separable image filters touch every row and then every column
//! independently, so each 1D lane can be handed to its own rayon task.

use ndarray::{Array2, ArrayViewMut1, Axis};
use rayon::prelude::*;

/// Process every 1D lane of an Array2 along `axis` in parallel
///
/// With `Axis(1)` the processor receives each row; with `Axis(0)` it
/// receives each column. Lanes are disjoint, so the processor may freely
/// overwrite the lane it is given.
///
/// # Arguments
/// * `array` - The 2D array to process (consumed and returned)
/// * `axis` - Axis the lanes run along
/// * `processor` - Closure applied to each lane
///
/// # Returns
/// The processed array
pub fn process_lanes_in_parallel<F>(mut array: Array2<f64>, axis: Axis, processor: F) -> Array2<f64>
where
    F: Fn(ArrayViewMut1<f64>) + Send + Sync,
{
    let outer = Axis(1 - axis.index());

    array
        .axis_iter_mut(outer)
        .into_par_iter()
        .for_each(|lane| processor(lane));

    array
}
