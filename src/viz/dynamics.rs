//! Response dynamics across groups of replicate series
//!
//! Each group is one `t,y` table, typically the concatenated `y.csv` files
//! of its replicates; rows sharing a timepoint are replicates of that
//! timepoint. Groups are drawn as a mean line inside a 95% band of
//! `mean ± 1.96 · SE`. An optional `t,u` stimulus table shades every
//! timepoint with `u > 0`.

use super::PlotStyle;
use crate::dynamics::{read_records, DynamicsError, TimepointRecord};
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Normal quantile of a two-sided 95% interval
pub const BAND_Z: f64 = 1.96;

/// One row of a stimulus table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StimulusRecord {
    pub t: f64,
    pub u: f64,
}

/// Replicate statistics of one timepoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicateSummary {
    pub t: f64,
    pub mean: f64,
    /// Half width of the band, `1.96 · SE`
    pub half_width: f64,
    pub count: usize,
}

/// Group `(t, value)` pairs by exact timepoint, ordered by timepoint
fn group_by_timepoint(pairs: impl Iterator<Item = (f64, f64)>) -> Vec<(f64, Vec<f64>)> {
    let mut pairs: Vec<(f64, f64)> = pairs.collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut groups: Vec<(f64, Vec<f64>)> = Vec::new();
    for (t, v) in pairs {
        match groups.last_mut() {
            Some((last_t, values)) if *last_t == t => values.push(v),
            _ => groups.push((t, vec![v])),
        }
    }
    groups
}

/// Mean and 95% band half width per timepoint.
///
/// The standard error uses the sample standard deviation (n - 1); a
/// timepoint with a single replicate has a zero width band.
pub fn aggregate_replicates(records: &[TimepointRecord]) -> Vec<ReplicateSummary> {
    group_by_timepoint(records.iter().map(|r| (r.t, r.y)))
        .into_iter()
        .map(|(t, values)| {
            let n = values.len();
            let mean = values.iter().sum::<f64>() / n as f64;
            let half_width = if n > 1 {
                let variance =
                    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
                BAND_Z * (variance / n as f64).sqrt()
            } else {
                0.0
            };
            ReplicateSummary {
                t,
                mean,
                half_width,
                count: n,
            }
        })
        .collect()
}

/// Time intervals during which the stimulus is on.
///
/// Stimulus values are averaged per timepoint; each timepoint with a
/// positive mean covers `[t, t + dt]` where `dt` is the mean spacing of the
/// timepoints. A table with a single timepoint has zero length intervals.
pub fn stimulus_intervals(records: &[StimulusRecord]) -> Vec<(f64, f64)> {
    let means: Vec<(f64, f64)> = group_by_timepoint(records.iter().map(|r| (r.t, r.u)))
        .into_iter()
        .map(|(t, us)| (t, us.iter().sum::<f64>() / us.len() as f64))
        .collect();

    let dt = match (means.first(), means.last()) {
        (Some(first), Some(last)) if means.len() > 1 => {
            (last.0 - first.0) / (means.len() - 1) as f64
        }
        _ => 0.0,
    };

    means
        .into_iter()
        .filter(|&(_, u)| u > 0.0)
        .map(|(t, _)| (t, t + dt))
        .collect()
}

/// Axis descriptions of a dynamics plot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisLabels {
    pub x: String,
    pub y: String,
}

impl Default for AxisLabels {
    fn default() -> Self {
        Self {
            x: "Time".to_string(),
            y: "AU".to_string(),
        }
    }
}

/// Plot the dynamics of several groups into one PNG.
///
/// # Arguments
/// * `fig_path` - Output PNG path, parent directories are created
/// * `y_csv_paths` - One `t,y` table per group
/// * `group_labels` - Legend entry per group
/// * `u_csv_path` - Optional `t,u` stimulus table
/// * `labels` - Axis descriptions
/// * `style` - Canvas size and colours
pub fn plot_dynamics<P: AsRef<Path>>(
    fig_path: &Path,
    y_csv_paths: &[P],
    group_labels: &[String],
    u_csv_path: Option<&Path>,
    labels: &AxisLabels,
    style: &PlotStyle,
) -> Result<(), DynamicsError> {
    if y_csv_paths.len() != group_labels.len() {
        return Err(DynamicsError::LabelMismatch {
            labels: group_labels.len(),
            groups: y_csv_paths.len(),
        });
    }

    let groups: Vec<Vec<ReplicateSummary>> = y_csv_paths
        .iter()
        .map(|path| read_records::<TimepointRecord>(path.as_ref()).map(|r| aggregate_replicates(&r)))
        .collect::<Result<_, _>>()?;
    let stimulus = match u_csv_path {
        Some(path) => Some(stimulus_intervals(&read_records::<StimulusRecord>(path)?)),
        None => None,
    };

    if let Some(parent) = fig_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    draw_dynamics(fig_path, &groups, group_labels, stimulus.as_deref(), labels, style)
        .map_err(|e| DynamicsError::Plot(e.to_string()))
}

/// Data bounds covering every band and stimulus interval
fn plot_bounds(
    groups: &[Vec<ReplicateSummary>],
    stimulus: Option<&[(f64, f64)]>,
) -> ((f64, f64), (f64, f64)) {
    let mut x = (f64::INFINITY, f64::NEG_INFINITY);
    let mut y = (f64::INFINITY, f64::NEG_INFINITY);

    for s in groups.iter().flatten() {
        x = (x.0.min(s.t), x.1.max(s.t));
        y = (y.0.min(s.mean - s.half_width), y.1.max(s.mean + s.half_width));
    }
    for &(start, end) in stimulus.unwrap_or_default() {
        x = (x.0.min(start), x.1.max(end));
    }

    if !(x.0.is_finite() && x.1.is_finite()) {
        x = (0.0, 1.0);
    }
    if !(y.0.is_finite() && y.1.is_finite()) {
        y = (0.0, 1.0);
    }
    if x.1 <= x.0 {
        x.1 = x.0 + 1.0;
    }
    let pad = if y.1 > y.0 { (y.1 - y.0) * 0.05 } else { 1.0 };
    ((x.0, x.1), (y.0 - pad, y.1 + pad))
}

fn draw_dynamics(
    fig_path: &Path,
    groups: &[Vec<ReplicateSummary>],
    group_labels: &[String],
    stimulus: Option<&[(f64, f64)]>,
    labels: &AxisLabels,
    style: &PlotStyle,
) -> Result<(), Box<dyn std::error::Error>> {
    let ((x_min, x_max), (y_min, y_max)) = plot_bounds(groups, stimulus);

    let root = BitMapBackend::new(fig_path, (style.width, style.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(30)
        .x_label_area_size(80)
        .y_label_area_size(110)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_labels(10)
        .y_labels(10)
        .x_desc(labels.x.as_str())
        .y_desc(labels.y.as_str())
        .label_style(("sans-serif", style.font_size))
        .draw()?;

    let line_width = style.line_width;

    if let Some(intervals) = stimulus {
        let color = style.stimulus_color;
        chart
            .draw_series(intervals.iter().map(|&(start, end)| {
                Rectangle::new([(start, y_min), (end, y_max)], color.mix(0.8).filled())
            }))?
            .label("Input")
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 30, y)], color.mix(0.8).stroke_width(line_width))
            });
    }

    for (index, (summaries, label)) in groups.iter().zip(group_labels).enumerate() {
        let color = style.group_color(index);

        let band: Vec<(f64, f64)> = summaries
            .iter()
            .map(|s| (s.t, s.mean + s.half_width))
            .chain(summaries.iter().rev().map(|s| (s.t, s.mean - s.half_width)))
            .collect();
        chart.draw_series(std::iter::once(Polygon::new(
            band,
            color.mix(style.band_opacity).filled(),
        )))?;

        chart
            .draw_series(LineSeries::new(
                summaries.iter().map(|s| (s.t, s.mean)),
                color.stroke_width(line_width),
            ))?
            .label(label.as_str())
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 30, y)], color.stroke_width(line_width))
            });
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .label_font(("sans-serif", style.font_size))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
