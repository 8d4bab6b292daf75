//! Batch analysis of one fluorescence timelapse.
//!
//! A series lives under a root directory with a fixed layout:
//!
//! ```text
//! root/
//! ├── data/imgs/        raw frames, file stem = timepoint (e.g. 0.tif, 1.5.tif)
//! └── results/
//!     ├── imgs/         background subtracted frames, turbo colour map
//!     ├── bgds/         background profile plots
//!     └── y.csv         columns t,y: timepoint and mean subtracted intensity
//! ```
//!
//! The colour scale ceiling is computed once for the whole series before any
//! frame is processed, then frames are processed in parallel on a dedicated
//! thread pool. The table is written sorted by timepoint.

use crate::config::{FailurePolicy, RunConfig};
use crate::image_proc::background::{BackgroundError, BackgroundEstimator};
use crate::image_proc::io::{list_image_paths, load_image, save_rgb_image, ImageIoError};
use crate::image_proc::render::{render_frame, FrameOverlay};
use crate::image_proc::series::{
    compute_series_ceiling, select_series_reference_skipping, SeriesError,
};
use crate::viz::{plot_background_profile, select_profile_row, PlotStyle};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by batch analysis and dynamics plotting
#[derive(Error, Debug)]
pub enum DynamicsError {
    #[error(transparent)]
    Series(#[from] SeriesError),
    #[error(transparent)]
    Background(#[from] BackgroundError),
    #[error(transparent)]
    ImageIo(#[from] ImageIoError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Plot error: {0}")]
    Plot(String),
    #[error("File stem of {path} is not a timepoint")]
    Timepoint { path: PathBuf },
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Frame {path} failed: {source}")]
    Frame {
        path: PathBuf,
        #[source]
        source: Box<DynamicsError>,
    },
    #[error("{labels} labels given for {groups} groups")]
    LabelMismatch { labels: usize, groups: usize },
}

/// One row of a `y.csv` table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimepointRecord {
    /// Timepoint parsed from the frame's file stem
    pub t: f64,
    /// Mean intensity of the background subtracted frame
    pub y: f64,
}

/// Directory layout of one series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesLayout {
    pub frames_dir: PathBuf,
    pub rendered_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub table_path: PathBuf,
}

impl SeriesLayout {
    pub fn new(root: &Path) -> Self {
        let results = root.join("results");
        Self {
            frames_dir: root.join("data").join("imgs"),
            rendered_dir: results.join("imgs"),
            profiles_dir: results.join("bgds"),
            table_path: results.join("y.csv"),
        }
    }
}

/// Outcome of [`analyze_dynamics`]
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicsSummary {
    /// Table rows sorted by timepoint
    pub records: Vec<TimepointRecord>,
    /// Colour scale ceiling shared by every rendered frame
    pub ceiling: f64,
    /// Frames left out under [`FailurePolicy::SkipAndLog`]
    pub skipped: Vec<PathBuf>,
    /// Location of the written table
    pub table_path: PathBuf,
}

/// Parse the timepoint encoded in a frame's file stem
pub fn parse_timepoint(path: &Path) -> Result<f64, DynamicsError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.trim().parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .ok_or_else(|| DynamicsError::Timepoint {
            path: path.to_path_buf(),
        })
}

/// Write timepoint records as CSV with a `t,y` header
pub fn write_timepoints(path: &Path, records: &[TimepointRecord]) -> Result<(), DynamicsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read every row of a headed CSV file
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DynamicsError> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader.deserialize().collect::<Result<Vec<T>, _>>()?;
    Ok(records)
}

/// Shared read-only state of one batch
struct FrameContext<'a> {
    estimator: BackgroundEstimator,
    ceiling: f64,
    layout: &'a SeriesLayout,
    config: &'a RunConfig,
    style: PlotStyle,
}

fn process_frame(
    path: &Path,
    index: usize,
    ctx: &FrameContext<'_>,
) -> Result<TimepointRecord, DynamicsError> {
    let t = parse_timepoint(path)?;
    let raw = load_image(path)?;
    let estimate = ctx.estimator.estimate(&raw.view())?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let overlay = FrameOverlay {
        scale_bar: ctx.config.scale_bar,
        timestamp: ctx.config.t_unit.as_ref().map(|unit| format!("{t} {unit}")),
        colorbar: ctx.config.colorbar,
    };
    let rendered = render_frame(&estimate.subtracted.view(), ctx.ceiling, &overlay)
        .map_err(|e| DynamicsError::Plot(e.to_string()))?;
    save_rgb_image(&rendered, ctx.layout.rendered_dir.join(format!("{stem}.png")))?;

    if ctx.config.plot_profiles {
        let mut rng = StdRng::seed_from_u64(ctx.config.profile_seed.wrapping_add(index as u64));
        let row = select_profile_row(&raw.view(), &mut rng);
        plot_background_profile(
            &ctx.layout.profiles_dir.join(format!("{stem}.png")),
            &raw.view(),
            &estimate.background.view(),
            row,
            &ctx.style,
        )
        .map_err(|e| DynamicsError::Plot(e.to_string()))?;
    }

    let y = estimate.mean_signal();
    debug!("Frame {} t={t} y={y:.6}", path.display());
    Ok(TimepointRecord { t, y })
}

/// Process every frame of the series under `root` and write `results/y.csv`.
///
/// # Errors
/// * `Series(EmptySeries)` when `root/data/imgs` holds no images
/// * `Frame` for the first failing frame in series order, unless the
///   failure policy skips failed frames
pub fn analyze_dynamics(root: &Path, config: &RunConfig) -> Result<DynamicsSummary, DynamicsError> {
    config.validate()?;

    let layout = SeriesLayout::new(root);
    let paths = list_image_paths(&layout.frames_dir)?;
    if paths.is_empty() {
        return Err(SeriesError::EmptySeries.into());
    }
    info!(
        "Analyzing {} frames in {}",
        paths.len(),
        layout.frames_dir.display()
    );

    std::fs::create_dir_all(&layout.rendered_dir)?;
    if config.plot_profiles {
        std::fs::create_dir_all(&layout.profiles_dir)?;
    }

    let ceiling = match (config.ceiling, config.failure_policy) {
        (Some(ceiling), _) => ceiling,
        (None, FailurePolicy::Abort) => compute_series_ceiling(&paths, &config.reference)?,
        // Frames left out here fail again below and are skipped there
        (None, FailurePolicy::SkipAndLog) => {
            select_series_reference_skipping(&paths, &config.reference)?
                .selection
                .ceiling
        }
    };

    let ctx = FrameContext {
        estimator: BackgroundEstimator::new(config.background)?,
        ceiling,
        layout: &layout,
        config,
        style: PlotStyle::default(),
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_count())
        .build()?;

    let outcomes: Vec<Result<TimepointRecord, DynamicsError>> = pool.install(|| {
        paths
            .par_iter()
            .enumerate()
            .map(|(index, path)| process_frame(path, index, &ctx))
            .collect()
    });

    let mut records = Vec::with_capacity(outcomes.len());
    let mut skipped = Vec::new();
    for (path, outcome) in paths.iter().zip(outcomes) {
        match (outcome, config.failure_policy) {
            (Ok(record), _) => records.push(record),
            (Err(source), FailurePolicy::Abort) => {
                return Err(DynamicsError::Frame {
                    path: path.clone(),
                    source: Box::new(source),
                });
            }
            (Err(source), FailurePolicy::SkipAndLog) => {
                warn!("Skipping frame {}: {source}", path.display());
                skipped.push(path.clone());
            }
        }
    }

    records.sort_by(|a, b| a.t.total_cmp(&b.t));
    write_timepoints(&layout.table_path, &records)?;
    info!(
        "Wrote {} timepoints to {} ({} skipped)",
        records.len(),
        layout.table_path.display(),
        skipped.len()
    );

    Ok(DynamicsSummary {
        records,
        ceiling,
        skipped,
        table_path: layout.table_path.clone(),
    })
}
