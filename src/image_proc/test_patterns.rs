//! Synthetic fluorescence frames for validating background subtraction
//!
//! Provides smooth backgrounds, bright rectangular features and
//! reproducible Gaussian noise fields.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Generate a background that ramps linearly from left to right
///
/// # Arguments
/// * `rows` - Height of the pattern
/// * `cols` - Width of the pattern
/// * `start` - Value in the first column
/// * `end` - Value in the last column
pub fn horizontal_gradient(rows: usize, cols: usize, start: f64, end: f64) -> Array2<f64> {
    let span = cols.saturating_sub(1).max(1) as f64;
    Array2::from_shape_fn((rows, cols), |(_, j)| start + (end - start) * j as f64 / span)
}

/// Overwrite a rectangular block with a constant value
///
/// The block is clipped to the image bounds.
///
/// # Arguments
/// * `image` - Image to modify
/// * `top_left` - (row, col) of the block's first pixel
/// * `size` - (height, width) of the block
/// * `value` - Intensity written into the block
pub fn fill_rect(image: &mut Array2<f64>, top_left: (usize, usize), size: (usize, usize), value: f64) {
    let (rows, cols) = image.dim();
    let row_end = (top_left.0 + size.0).min(rows);
    let col_end = (top_left.1 + size.1).min(cols);

    for i in top_left.0.min(rows)..row_end {
        for j in top_left.1.min(cols)..col_end {
            image[[i, j]] = value;
        }
    }
}

/// Generate a 2D array of normally distributed values for testing purposes.
///
/// Deterministic for a given seed, so assertions on estimated statistics
/// stay stable from run to run.
///
/// # Arguments
/// * `size` - Tuple of (height, width) for the output array dimensions
/// * `mean` - Mean value of the normal distribution
/// * `std_dev` - Standard deviation of the normal distribution (> 0)
/// * `seed` - Random seed for deterministic output
pub fn simple_normal_array(size: (usize, usize), mean: f64, std_dev: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal_dist = Normal::new(mean, std_dev)
        .expect("Normal distribution parameters must be valid (std_dev > 0)");
    Array2::from_shape_fn(size, |_| normal_dist.sample(&mut rng))
}

/// Gradient background from 0.1 to 0.3 with a 10x10 block of 1.0 in the middle
///
/// A 100x100 reference frame for end-to-end checks of background subtraction.
pub fn gradient_with_bright_square() -> Array2<f64> {
    let mut image = horizontal_gradient(100, 100, 0.1, 0.3);
    fill_rect(&mut image, (45, 45), (10, 10), 1.0);
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_horizontal_gradient_endpoints() {
        let gradient = horizontal_gradient(3, 11, 0.1, 0.3);

        assert_eq!(gradient.dim(), (3, 11));
        assert_relative_eq!(gradient[[0, 0]], 0.1);
        assert_relative_eq!(gradient[[2, 10]], 0.3);
        assert_relative_eq!(gradient[[1, 5]], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_fill_rect_is_clipped() {
        let mut image = Array2::zeros((4, 4));
        fill_rect(&mut image, (2, 3), (5, 5), 1.0);

        assert_eq!(image.sum(), 2.0);
        assert_eq!(image[[2, 3]], 1.0);
        assert_eq!(image[[3, 3]], 1.0);
    }

    #[test]
    fn test_simple_normal_array_is_reproducible() {
        let a = simple_normal_array((8, 8), 0.0, 1.0, 99);
        let b = simple_normal_array((8, 8), 0.0, 1.0, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn test_gradient_with_bright_square() {
        let image = gradient_with_bright_square();
        assert_eq!(image.dim(), (100, 100));
        assert_eq!(image.iter().filter(|&&v| v == 1.0).count(), 100);
    }
}
