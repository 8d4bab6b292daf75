//! Shared intensity ceiling for rendering a series of frames on one scale.
//!
//! Frames of one timelapse are rendered with a fixed colour range `[0, c]`
//! so their brightness can be compared by eye. The ceiling `c` comes from a
//! single reference frame: the frame whose raw 99.99th percentile is highest
//! is background subtracted, and the 99.99th percentile of the result is the
//! ceiling.
//!
//! Picking the brightest frame before subtraction is a proxy. The frame that
//! is brightest after subtraction may differ, but finding it would need a
//! full extra subtraction pass over the series.

use crate::algo::percentile;
use crate::image_proc::background::{BackgroundConfig, BackgroundError, BackgroundEstimator};
use crate::image_proc::io::{load_image, ImageIoError};
use log::{info, warn};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Percentile used both to rank raw frames and to read the ceiling
pub const CEILING_PERCENTILE: f64 = 99.99;

/// Errors raised while computing a series ceiling
#[derive(Error, Debug)]
pub enum SeriesError {
    #[error("Series contains no images")]
    EmptySeries,
    #[error("Failed to read image {path}: {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: ImageIoError,
    },
    #[error(transparent)]
    Background(#[from] BackgroundError),
}

/// Ceiling of a series together with the frame it was derived from
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesCeiling {
    /// Upper bound of the shared colour scale
    pub ceiling: f64,
    /// Index of the reference frame in the input order
    pub reference_index: usize,
    /// Raw 99.99th percentile of the reference frame
    pub reference_brightness: f64,
}

/// 99.99th percentile of an image's pixel values
pub fn brightness(image: &ArrayView2<f64>) -> Result<f64, BackgroundError> {
    let pixels: Vec<f64> = image.iter().copied().collect();
    percentile(&pixels, CEILING_PERCENTILE).map_err(BackgroundError::DegenerateImage)
}

/// Index of the first maximum; ties resolve to the earliest frame
fn argmax_first(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Subtract the reference frame's background and read the ceiling
fn ceiling_of_reference(
    reference: &ArrayView2<f64>,
    estimator: &BackgroundEstimator,
) -> Result<f64, BackgroundError> {
    let estimate = estimator.estimate(reference)?;
    brightness(&estimate.subtracted.view())
}

/// Compute the shared ceiling for frames already held in memory.
///
/// # Errors
/// * `EmptySeries` when `images` is empty
/// * `Background` for invalid configuration or degenerate frames
pub fn ceiling_from_images(
    images: &[Array2<f64>],
    reference_config: &BackgroundConfig,
) -> Result<SeriesCeiling, SeriesError> {
    let estimator = BackgroundEstimator::new(*reference_config)?;
    if images.is_empty() {
        return Err(SeriesError::EmptySeries);
    }

    let ranked: Vec<f64> = images
        .par_iter()
        .map(|image| brightness(&image.view()))
        .collect::<Result<_, _>>()?;

    let reference_index = argmax_first(&ranked).ok_or(SeriesError::EmptySeries)?;
    let ceiling = ceiling_of_reference(&images[reference_index].view(), &estimator)?;

    Ok(SeriesCeiling {
        ceiling,
        reference_index,
        reference_brightness: ranked[reference_index],
    })
}

fn read_frame(path: &Path) -> Result<Array2<f64>, SeriesError> {
    load_image(path).map_err(|source| SeriesError::ImageRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Raw brightness of every frame, in series order.
///
/// Frames are decoded one at a time and dropped straight away.
fn rank_frames<P>(image_paths: &[P]) -> Vec<Result<f64, SeriesError>>
where
    P: AsRef<Path> + Sync,
{
    image_paths
        .par_iter()
        .map(|path| -> Result<f64, SeriesError> {
            let image = read_frame(path.as_ref())?;
            Ok(brightness(&image.view())?)
        })
        .collect()
}

/// Select the reference frame of a series on disk and compute its ceiling.
///
/// Only the reference frame is decoded a second time for subtraction.
/// Any unreadable frame aborts the computation.
pub fn select_series_reference<P>(
    image_paths: &[P],
    reference_config: &BackgroundConfig,
) -> Result<SeriesCeiling, SeriesError>
where
    P: AsRef<Path> + Sync,
{
    let estimator = BackgroundEstimator::new(*reference_config)?;
    if image_paths.is_empty() {
        return Err(SeriesError::EmptySeries);
    }

    // Every outcome is collected first so the reported error is the first
    // failing frame in series order.
    let ranked: Vec<f64> = rank_frames(image_paths)
        .into_iter()
        .collect::<Result<_, _>>()?;

    let reference_index = argmax_first(&ranked).ok_or(SeriesError::EmptySeries)?;
    let reference_path = image_paths[reference_index].as_ref();
    info!(
        "Series reference frame {} (raw p{CEILING_PERCENTILE} = {:.6})",
        reference_path.display(),
        ranked[reference_index]
    );

    let reference = read_frame(reference_path)?;
    let ceiling = ceiling_of_reference(&reference.view(), &estimator)?;
    info!("Series ceiling {ceiling:.6}");

    Ok(SeriesCeiling {
        ceiling,
        reference_index,
        reference_brightness: ranked[reference_index],
    })
}

/// Series ceiling computed while leaving failing frames out
#[derive(Debug, Clone, PartialEq)]
pub struct TolerantCeiling {
    pub selection: SeriesCeiling,
    /// Frames that could not be ranked or used as the reference
    pub skipped: Vec<PathBuf>,
}

/// Select the reference frame, skipping frames that fail.
///
/// Unreadable or degenerate frames are logged and left out of the ranking.
/// When the brightest frame cannot be background subtracted, the next
/// brightest is tried.
///
/// # Errors
/// * `EmptySeries` when no frame can serve as the reference
/// * `Background` for an invalid configuration
pub fn select_series_reference_skipping<P>(
    image_paths: &[P],
    reference_config: &BackgroundConfig,
) -> Result<TolerantCeiling, SeriesError>
where
    P: AsRef<Path> + Sync,
{
    let estimator = BackgroundEstimator::new(*reference_config)?;

    let mut skipped = Vec::new();
    let mut candidates: Vec<(usize, f64)> = Vec::with_capacity(image_paths.len());
    for (index, outcome) in rank_frames(image_paths).into_iter().enumerate() {
        match outcome {
            Ok(value) => candidates.push((index, value)),
            Err(e) => {
                let path = image_paths[index].as_ref();
                warn!("Leaving {} out of the series ceiling: {e}", path.display());
                skipped.push(path.to_path_buf());
            }
        }
    }

    // Brightest first, earliest frame on ties
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    for (reference_index, reference_brightness) in candidates {
        let path = image_paths[reference_index].as_ref();
        let outcome = read_frame(path).and_then(|reference| {
            Ok(ceiling_of_reference(&reference.view(), &estimator)?)
        });
        match outcome {
            Ok(ceiling) => {
                info!(
                    "Series reference frame {} ceiling {ceiling:.6} ({} frames skipped)",
                    path.display(),
                    skipped.len()
                );
                return Ok(TolerantCeiling {
                    selection: SeriesCeiling {
                        ceiling,
                        reference_index,
                        reference_brightness,
                    },
                    skipped,
                });
            }
            Err(e) => {
                warn!("Frame {} unusable as series reference: {e}", path.display());
                skipped.push(path.to_path_buf());
            }
        }
    }

    Err(SeriesError::EmptySeries)
}

/// Compute the shared colour scale ceiling for a series of image files.
///
/// # Arguments
/// * `image_paths` - Ordered frames of one series
/// * `reference_config` - Background parameters for the reference frame,
///   typically [`BackgroundConfig::series_reference`]
pub fn compute_series_ceiling<P>(
    image_paths: &[P],
    reference_config: &BackgroundConfig,
) -> Result<f64, SeriesError>
where
    P: AsRef<Path> + Sync,
{
    select_series_reference(image_paths, reference_config).map(|selection| selection.ceiling)
}
