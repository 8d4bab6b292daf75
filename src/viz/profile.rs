//! Background line profile for checking subtraction quality by eye
//!
//! Shows the raw intensity and the estimated background along one row. The
//! row is drawn at random from the rows with the most intensity variation,
//! where a badly fitted background is easiest to spot.

use super::PlotStyle;
use crate::algo::row_variances;
use ndarray::ArrayView2;
use plotters::prelude::*;
use rand::Rng;
use std::path::Path;

/// Number of highest-variance rows considered for the profile
const CANDIDATE_WINDOW: usize = 100;

/// Stride through the candidate window
const CANDIDATE_STRIDE: usize = 10;

/// Rows eligible for a profile plot.
///
/// Rows are ranked by ascending variance; candidates are every tenth rank
/// from the top `CANDIDATE_WINDOW` ranks, excluding the single most variable
/// row.
pub fn profile_candidates(raw: &ArrayView2<f64>) -> Vec<usize> {
    let variances = row_variances(raw);
    let mut order: Vec<usize> = (0..variances.len()).collect();
    order.sort_by(|&a, &b| variances[a].total_cmp(&variances[b]));

    let n = order.len();
    let start = n.saturating_sub(CANDIDATE_WINDOW);
    let end = n.saturating_sub(1);

    order[start..end]
        .iter()
        .step_by(CANDIDATE_STRIDE)
        .copied()
        .collect()
}

/// Pick the row to plot for an image.
///
/// Images with a single row have no candidates and always use row 0.
pub fn select_profile_row<R: Rng>(raw: &ArrayView2<f64>, rng: &mut R) -> usize {
    let candidates = profile_candidates(raw);
    if candidates.is_empty() {
        return 0;
    }
    candidates[rng.gen_range(0..candidates.len())]
}

/// Plot raw and background intensity along `row`.
///
/// # Arguments
/// * `path` - Output PNG path
/// * `raw` - Image before subtraction
/// * `background` - Estimated background, same shape as `raw`
/// * `row` - Row to draw
/// * `style` - Canvas size and line colours
pub fn plot_background_profile(
    path: &Path,
    raw: &ArrayView2<f64>,
    background: &ArrayView2<f64>,
    row: usize,
    style: &PlotStyle,
) -> Result<(), Box<dyn std::error::Error>> {
    if raw.dim() != background.dim() {
        return Err(format!(
            "raw image {:?} and background {:?} differ in shape",
            raw.dim(),
            background.dim()
        )
        .into());
    }
    if row >= raw.nrows() {
        return Err(format!("row {row} outside image of {} rows", raw.nrows()).into());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let raw_row: Vec<(f64, f64)> = raw
        .row(row)
        .iter()
        .enumerate()
        .map(|(x, &v)| (x as f64, v))
        .collect();
    let background_row: Vec<(f64, f64)> = background
        .row(row)
        .iter()
        .enumerate()
        .map(|(x, &v)| (x as f64, v))
        .collect();

    let y_max = raw_row
        .iter()
        .chain(background_row.iter())
        .map(|&(_, v)| v)
        .fold(0.0, f64::max);
    let y_max = if y_max > 0.0 { y_max * 1.05 } else { 1.0 };
    let x_max = raw.ncols().saturating_sub(1).max(1) as f64;

    let raw_color = style.raw_color;
    let background_color = style.background_color;
    let line_width = style.line_width;

    let root = BitMapBackend::new(path, (style.width, style.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Row {row}"), ("sans-serif", style.font_size))
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(90)
        .build_cartesian_2d(0.0..x_max, 0.0..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Column (px)")
        .y_desc("Intensity")
        .y_label_formatter(&|y| format!("{y:.3}"))
        .draw()?;

    chart
        .draw_series(LineSeries::new(raw_row, raw_color.stroke_width(line_width)))?
        .label("Raw")
        .legend(move |(x, y)| {
            PathElement::new(vec![(x, y), (x + 20, y)], raw_color.stroke_width(line_width))
        });

    chart
        .draw_series(LineSeries::new(
            background_row,
            background_color.stroke_width(line_width),
        ))?
        .label("Background")
        .legend(move |(x, y)| {
            PathElement::new(
                vec![(x, y), (x + 20, y)],
                background_color.stroke_width(line_width),
            )
        });

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
