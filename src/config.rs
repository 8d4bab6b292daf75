//! Run configuration for batch processing of a timelapse series
//!
//! Persisted as pretty printed JSON. Every field has a default, so partial
//! files only need to name what they change:
//!
//! ```json
//! {
//!   "background": { "n_threshold_rounds": 3, "gaussian_scale": 3.0, "vertical_scale": 0.0 },
//!   "failure_policy": "skip_and_log"
//! }
//! ```

use crate::image_proc::background::{BackgroundConfig, BackgroundError};
use crate::image_proc::render::ScaleBar;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a batch does when one frame cannot be processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the batch and report the first failing frame
    #[default]
    Abort,
    /// Log the failure, leave the frame out of the results and continue
    SkipAndLog,
}

/// Full set of options for one `analyze` run
///
/// The per-frame background defaults to [`RunConfig::frame_background`]
/// (one refinement round, unit Gaussian and vertical scales), the batch
/// defaults of the dynamics analysis. Single-frame subtraction keeps
/// [`BackgroundConfig::default`]. A partial `background` block in a JSON
/// file fills its missing fields from [`BackgroundConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Background parameters for the per-frame subtraction
    pub background: BackgroundConfig,
    /// Background parameters for the series ceiling reference frame
    pub reference: BackgroundConfig,
    /// Fixed colour scale ceiling; computed from the series when absent
    pub ceiling: Option<f64>,
    /// Scale bar drawn on rendered frames
    pub scale_bar: Option<ScaleBar>,
    /// Unit of the timestamp printed on rendered frames; no timestamp when absent
    pub t_unit: Option<String>,
    /// Append a colour bar with ticks at 0 and the ceiling to rendered frames
    pub colorbar: bool,
    /// Failure handling for individual frames
    pub failure_policy: FailurePolicy,
    /// Worker threads; all cores but one when absent
    pub workers: Option<usize>,
    /// Write a background profile plot for every frame
    pub plot_profiles: bool,
    /// Base seed for profile row selection, offset by the frame index
    pub profile_seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            background: Self::frame_background(),
            reference: BackgroundConfig::series_reference(),
            ceiling: None,
            scale_bar: None,
            t_unit: None,
            colorbar: true,
            failure_policy: FailurePolicy::default(),
            workers: None,
            plot_profiles: true,
            profile_seed: 0,
        }
    }
}

impl RunConfig {
    /// Default per-frame background parameters of a batch run
    pub fn frame_background() -> BackgroundConfig {
        BackgroundConfig {
            n_threshold_rounds: 1,
            gaussian_scale: 1.0,
            vertical_scale: 1.0,
            contrast_cutoff: 0.1,
            ..BackgroundConfig::default()
        }
    }

    /// Check both background configurations and the run options
    pub fn validate(&self) -> Result<(), BackgroundError> {
        self.background.validate()?;
        self.reference.validate()?;

        if let Some(ceiling) = self.ceiling {
            if !ceiling.is_finite() || ceiling <= 0.0 {
                return Err(BackgroundError::InvalidConfiguration(format!(
                    "ceiling must be a positive number, got {ceiling}"
                )));
            }
        }
        if let Some(microns) = self.scale_bar.and_then(|bar| bar.microns) {
            if !microns.is_finite() || microns <= 0.0 {
                return Err(BackgroundError::InvalidConfiguration(format!(
                    "scale bar length must be a positive number of microns, got {microns}"
                )));
            }
        }
        if self.workers == Some(0) {
            return Err(BackgroundError::InvalidConfiguration(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker threads to use for per-frame processing
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1)
        })
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
