//! End-to-end checks of background subtraction, series ceilings and batch analysis
//!
//! Frames are synthesised in memory or written as 16-bit PNGs into temporary
//! directories, then pushed through the public API the way the CLI does.

use fluorbg::config::RunConfig;
use fluorbg::dynamics::{analyze_dynamics, read_records, TimepointRecord};
use fluorbg::image_proc::background::{
    estimate_and_subtract, BackgroundConfig, BackgroundEstimator, ContrastClass,
};
use fluorbg::image_proc::io::{list_image_paths, load_image, save_gray16_image};
use fluorbg::image_proc::series::{
    ceiling_from_images, compute_series_ceiling, select_series_reference,
};
use fluorbg::image_proc::test_patterns::{
    fill_rect, gradient_with_bright_square, horizontal_gradient,
};
use ndarray::{s, Array2};
use std::path::PathBuf;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn series_frame(peak: f64) -> Array2<f64> {
    let mut image = horizontal_gradient(64, 64, 0.05, 0.2);
    fill_rect(&mut image, (24, 24), (12, 12), peak);
    image
}

fn write_series(dir: &std::path::Path, peaks: &[f64]) -> Vec<PathBuf> {
    peaks
        .iter()
        .enumerate()
        .map(|(i, &peak)| {
            let path = dir.join(format!("{i}.png"));
            save_gray16_image(&series_frame(peak), &path).unwrap();
            path
        })
        .collect()
}

#[test]
fn test_gradient_with_bright_square() {
    init_logging();
    let image = gradient_with_bright_square();

    let config = BackgroundConfig {
        n_threshold_rounds: 2,
        gaussian_scale: 1.0,
        vertical_scale: 1.0,
        contrast_cutoff: 0.1,
        ..BackgroundConfig::default()
    };
    let estimate = BackgroundEstimator::new(config)
        .unwrap()
        .estimate(&image.view())
        .unwrap();

    // The square makes the bright population strongly contrasted
    assert_eq!(estimate.contrast_class, ContrastClass::High);

    let square = estimate.subtracted.slice(s![45..55, 45..55]);
    let square_min = square.iter().copied().fold(f64::INFINITY, f64::min);
    assert!(square_min > 0.8, "square minimum {square_min}");

    let mut outside = estimate.subtracted.clone();
    outside.slice_mut(s![45..55, 45..55]).fill(f64::NAN);
    let rest: Vec<f64> = outside.iter().copied().filter(|v| !v.is_nan()).collect();
    let rest_mean = rest.iter().sum::<f64>() / rest.len() as f64;
    assert!(rest_mean < 0.1, "background region mean {rest_mean}");

    let left_mean = estimate.subtracted.slice(s![.., ..10]).mean().unwrap();
    assert!(left_mean < 0.01, "left edge mean {left_mean}");

    // The clipped square does not leak into the background map
    let background_max = estimate.background.iter().copied().fold(0.0, f64::max);
    assert!(background_max < 0.2, "background maximum {background_max}");
    assert!(estimate.background.iter().all(|&v| v >= 0.0));

    // Wrapper returns the same pair
    let (subtracted, background) = estimate_and_subtract(&image.view(), 2, 1.0, 1.0, 0.1).unwrap();
    assert_eq!(subtracted, estimate.subtracted);
    assert_eq!(background, estimate.background);
}

#[test]
fn test_all_zero_frame() {
    let image = Array2::<f64>::zeros((64, 64));
    let (subtracted, background) = estimate_and_subtract(&image.view(), 2, 1.0, 2.0, 0.1).unwrap();

    assert!(subtracted.iter().all(|&v| v == 0.0));
    assert!(background.iter().all(|&v| v == 0.0));
}

#[test]
fn test_series_ceiling_selects_brightest_file() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let paths = write_series(dir.path(), &[0.4, 0.55, 0.3, 0.95, 0.7]);

    let listed = list_image_paths(dir.path()).unwrap();
    assert_eq!(listed, paths);

    let config = BackgroundConfig::series_reference();
    let selection = select_series_reference(&listed, &config).unwrap();
    assert_eq!(selection.reference_index, 3);

    // Same answer as working on the decoded frames directly
    let frames: Vec<Array2<f64>> = listed.iter().map(|p| load_image(p).unwrap()).collect();
    let direct = ceiling_from_images(&frames, &config).unwrap();
    assert_eq!(direct.reference_index, 3);
    assert_eq!(direct.ceiling, selection.ceiling);

    // No randomness anywhere in the selection
    let again = compute_series_ceiling(&listed, &config).unwrap();
    assert_eq!(again, selection.ceiling);
    assert!(selection.ceiling > 0.5 && selection.ceiling <= 1.0);
}

#[test]
fn test_analyze_dynamics_writes_table() {
    init_logging();
    let root = TempDir::new().unwrap();
    let frames_dir = root.path().join("data").join("imgs");
    std::fs::create_dir_all(&frames_dir).unwrap();
    for (name, peak) in [("3.png", 0.5), ("0.png", 0.9), ("1.5.png", 0.7)] {
        save_gray16_image(&series_frame(peak), frames_dir.join(name)).unwrap();
    }

    let config = RunConfig {
        plot_profiles: false,
        workers: Some(2),
        ..RunConfig::default()
    };
    let summary = analyze_dynamics(root.path(), &config).unwrap();

    let table_path = root.path().join("results").join("y.csv");
    assert_eq!(summary.table_path, table_path);
    let table: Vec<TimepointRecord> = read_records(&table_path).unwrap();
    let ts: Vec<f64> = table.iter().map(|r| r.t).collect();
    assert_eq!(ts, vec![0.0, 1.5, 3.0]);

    // Signal follows the brightness of the square
    assert!(table[0].y > table[1].y && table[1].y > table[2].y);
    assert!(table.iter().all(|r| r.y > 0.0));

    for stem in ["0", "1.5", "3"] {
        let rendered = root.path().join("results").join("imgs").join(format!("{stem}.png"));
        assert!(rendered.exists(), "missing {}", rendered.display());
    }
    assert!(!root.path().join("results").join("bgds").exists());
}
