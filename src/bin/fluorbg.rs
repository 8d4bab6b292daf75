//! Command line front end for fluorescence background processing.
//!
//! Subcommands:
//! - `subtract`: Subtract the background of a single frame
//! - `ceiling`: Compute the shared colour scale ceiling of a frame directory
//! - `analyze`: Process a whole timelapse series and write its `y.csv`
//! - `plot-dynamics`: Plot `y.csv` tables of several groups over time

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fluorbg::config::{FailurePolicy, RunConfig};
use fluorbg::dynamics::analyze_dynamics;
use fluorbg::image_proc::background::{BackgroundConfig, BackgroundEstimator};
use fluorbg::image_proc::io::{list_image_paths, load_image, save_gray16_image};
use fluorbg::image_proc::noise::NoiseMethod;
use fluorbg::image_proc::render::ScaleBar;
use fluorbg::image_proc::series::select_series_reference;
use fluorbg::viz::dynamics::AxisLabels;
use fluorbg::viz::{plot_dynamics, PlotStyle};
use log::info;

/// Background estimation and subtraction for fluorescence microscopy
#[derive(Parser, Debug)]
#[command(name = "fluorbg")]
#[command(version)]
struct Cli {
    /// JSON run configuration; explicit flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Background parameter overrides
#[derive(Args, Debug, Clone, Default)]
struct BackgroundArgs {
    /// Li threshold refinement rounds
    #[arg(long)]
    n_threshold_rounds: Option<usize>,

    /// Multiplier on the 25 px Gaussian smoothing sigma
    #[arg(long)]
    gaussian_scale: Option<f64>,

    /// Multiplier on the noise sigma added to the background
    #[arg(long, allow_negative_numbers = true)]
    vertical_scale: Option<f64>,

    /// Contrast at or above which bright pixels are clipped
    #[arg(long)]
    contrast_cutoff: Option<f64>,

    /// Estimate noise from patch covariance with this patch size instead of wavelets
    #[arg(long)]
    noise_patch_size: Option<usize>,
}

impl BackgroundArgs {
    fn apply(&self, base: BackgroundConfig) -> BackgroundConfig {
        BackgroundConfig {
            n_threshold_rounds: self.n_threshold_rounds.unwrap_or(base.n_threshold_rounds),
            gaussian_scale: self.gaussian_scale.unwrap_or(base.gaussian_scale),
            vertical_scale: self.vertical_scale.unwrap_or(base.vertical_scale),
            contrast_cutoff: self.contrast_cutoff.unwrap_or(base.contrast_cutoff),
            noise_method: self
                .noise_patch_size
                .map(|patch_size| NoiseMethod::Patch { patch_size })
                .unwrap_or(base.noise_method),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subtract the background of a single frame
    Subtract {
        /// Input frame
        input: PathBuf,

        /// Output path for the subtracted frame (16-bit)
        #[arg(short, long)]
        output: PathBuf,

        /// Optional output path for the background map (16-bit)
        #[arg(long)]
        background_output: Option<PathBuf>,

        #[command(flatten)]
        background: BackgroundArgs,
    },

    /// Compute the shared colour scale ceiling of a directory of frames
    Ceiling {
        /// Directory holding the frames of one series
        dir: PathBuf,

        /// Overrides of the reference frame parameters
        #[command(flatten)]
        reference: BackgroundArgs,
    },

    /// Analyze a series laid out as ROOT/data/imgs
    Analyze {
        /// Series root directory
        root: PathBuf,

        #[command(flatten)]
        background: BackgroundArgs,

        /// Fixed colour scale ceiling instead of computing it
        #[arg(long)]
        ceiling: Option<f64>,

        /// Draw a scale bar of this many pixels on rendered frames
        #[arg(long)]
        scale_bar_px: Option<u32>,

        /// Physical length of the scale bar in μm, printed above it
        #[arg(long)]
        scale_bar_microns: Option<f64>,

        /// Print the timepoint with this unit on rendered frames, e.g. "s"
        #[arg(long)]
        t_unit: Option<String>,

        /// Do not append a colour bar to rendered frames
        #[arg(long)]
        no_colorbar: bool,

        /// Skip frames that fail instead of aborting
        #[arg(long)]
        skip_failed: bool,

        /// Worker threads
        #[arg(long)]
        workers: Option<usize>,

        /// Do not write background profile plots
        #[arg(long)]
        no_profiles: bool,

        /// Base seed for profile row selection
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Plot the dynamics of several groups
    PlotDynamics {
        /// Output PNG
        #[arg(short, long, default_value = "dynamics.png")]
        output: PathBuf,

        /// `t,y` table of a group (repeat per group)
        #[arg(long = "y-csv", required = true)]
        y_csv: Vec<PathBuf>,

        /// Legend label of a group (repeat per group, same order)
        #[arg(long = "label", required = true)]
        labels: Vec<String>,

        /// Optional `t,u` stimulus table
        #[arg(long)]
        u_csv: Option<PathBuf>,

        /// X axis description, e.g. "Time (s)"
        #[arg(long, default_value = "Time")]
        xlabel: String,

        /// Y axis description
        #[arg(long, default_value = "AU")]
        ylabel: String,
    },
}

fn load_run_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(RunConfig::default()),
    }
}

fn cmd_subtract(
    base: BackgroundConfig,
    input: &Path,
    output: &Path,
    background_output: Option<&Path>,
    args: &BackgroundArgs,
) -> Result<()> {
    let estimator = BackgroundEstimator::new(args.apply(base))?;
    let image = load_image(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let estimate = estimator.estimate(&image.view())?;

    info!(
        "noise sigma {:.6}, threshold {:.6}, contrast {:.2} ({:?})",
        estimate.noise_sigma, estimate.threshold, estimate.contrast, estimate.contrast_class
    );

    save_gray16_image(&estimate.subtracted, output)?;
    if let Some(path) = background_output {
        save_gray16_image(&estimate.background, path)?;
    }
    println!("{:.6}", estimate.mean_signal());
    Ok(())
}

fn cmd_ceiling(run: &RunConfig, dir: &Path, args: &BackgroundArgs) -> Result<()> {
    let paths = list_image_paths(dir)
        .with_context(|| format!("Failed to list images in {}", dir.display()))?;
    let selection = select_series_reference(&paths, &args.apply(run.reference))?;

    info!(
        "Reference frame {} of {}",
        selection.reference_index,
        paths.len()
    );
    println!("{:.6}", selection.ceiling);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_analyze(
    mut run: RunConfig,
    root: &Path,
    args: &BackgroundArgs,
    ceiling: Option<f64>,
    scale_bar_px: Option<u32>,
    scale_bar_microns: Option<f64>,
    t_unit: Option<String>,
    no_colorbar: bool,
    skip_failed: bool,
    workers: Option<usize>,
    no_profiles: bool,
    seed: Option<u64>,
) -> Result<()> {
    run.background = args.apply(run.background);
    run.ceiling = ceiling.or(run.ceiling);
    if let Some(length_px) = scale_bar_px {
        run.scale_bar = Some(ScaleBar {
            length_px,
            ..run.scale_bar.unwrap_or_default()
        });
    }
    if let Some(microns) = scale_bar_microns {
        run.scale_bar = Some(ScaleBar {
            microns: Some(microns),
            ..run.scale_bar.unwrap_or_default()
        });
    }
    run.t_unit = t_unit.or(run.t_unit.take());
    if no_colorbar {
        run.colorbar = false;
    }
    if skip_failed {
        run.failure_policy = FailurePolicy::SkipAndLog;
    }
    run.workers = workers.or(run.workers);
    if no_profiles {
        run.plot_profiles = false;
    }
    run.profile_seed = seed.unwrap_or(run.profile_seed);

    let summary = analyze_dynamics(root, &run)
        .with_context(|| format!("Failed to analyze {}", root.display()))?;

    println!(
        "{} timepoints, ceiling {:.6}, {} skipped -> {}",
        summary.records.len(),
        summary.ceiling,
        summary.skipped.len(),
        summary.table_path.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let run = load_run_config(cli.config.as_deref())?;

    match cli.command {
        Command::Subtract {
            input,
            output,
            background_output,
            background,
        } => {
            // Without a config file a single frame uses the single-frame defaults
            let base = match cli.config {
                Some(_) => run.background,
                None => BackgroundConfig::default(),
            };
            cmd_subtract(base, &input, &output, background_output.as_deref(), &background)
        }
        Command::Ceiling { dir, reference } => cmd_ceiling(&run, &dir, &reference),
        Command::Analyze {
            root,
            background,
            ceiling,
            scale_bar_px,
            scale_bar_microns,
            t_unit,
            no_colorbar,
            skip_failed,
            workers,
            no_profiles,
            seed,
        } => cmd_analyze(
            run,
            &root,
            &background,
            ceiling,
            scale_bar_px,
            scale_bar_microns,
            t_unit,
            no_colorbar,
            skip_failed,
            workers,
            no_profiles,
            seed,
        ),
        Command::PlotDynamics {
            output,
            y_csv,
            labels,
            u_csv,
            xlabel,
            ylabel,
        } => {
            plot_dynamics(
                &output,
                &y_csv,
                &labels,
                u_csv.as_deref(),
                &AxisLabels {
                    x: xlabel,
                    y: ylabel,
                },
                &PlotStyle::default(),
            )?;
            println!("Dynamics plot saved to {}", output.display());
            Ok(())
        }
    }
}
