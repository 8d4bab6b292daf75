//! Fixed-range false colour rendering of processed frames
//!
//! Every frame of a series is mapped through the same `[0, ceiling]` range of
//! the turbo colour map, so equal colours mean equal intensities across the
//! series. Intensities above the ceiling saturate at the top colour.
//!
//! [`render_frame`] adds the annotations of a finished frame: a colour bar
//! panel with ticks at 0 and the ceiling, the timestamp and the physical
//! length of the scale bar. Text is drawn with plotters onto the pixel buffer.

use image::{Rgb, RgbImage};
use ndarray::ArrayView2;
use plotters::prelude::{BitMapBackend, IntoDrawingArea, IntoFont, Text, WHITE};
use serde::{Deserialize, Serialize};

/// White bar drawn in the lower left corner marking a physical length
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleBar {
    /// Bar length in pixels
    pub length_px: u32,
    /// Bar thickness in pixels
    pub thickness_px: u32,
    /// Gap between the bar and the image border in pixels
    pub margin_px: u32,
    /// Physical length of the bar, printed above it in μm
    #[serde(default)]
    pub microns: Option<f64>,
}

impl Default for ScaleBar {
    fn default() -> Self {
        Self {
            length_px: 200,
            thickness_px: 20,
            margin_px: 10,
            microns: None,
        }
    }
}

/// Annotations added to a rendered frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOverlay {
    /// Scale bar in the lower left corner
    pub scale_bar: Option<ScaleBar>,
    /// Text printed in the upper left corner, e.g. "12 s"
    pub timestamp: Option<String>,
    /// Append a colour bar panel to the right of the frame
    pub colorbar: bool,
}

/// Pixel layout of the colour bar panel appended to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColorbarLayout {
    panel_width: u32,
    bar_x0: u32,
    bar_x1: u32,
    top: u32,
    bottom: u32,
    label_x: u32,
}

impl ColorbarLayout {
    fn new(frame_width: u32, frame_height: u32) -> Self {
        let panel_width = (frame_width / 6).max(64);
        Self {
            panel_width,
            bar_x0: frame_width + panel_width / 8,
            bar_x1: frame_width + panel_width / 2 - 2,
            top: frame_height / 10,
            bottom: frame_height - frame_height / 10,
            label_x: frame_width + panel_width / 2 + 2,
        }
    }
}

fn label_font_px(height: u32) -> u32 {
    (height / 25).clamp(12, 48)
}

/// Map a value in [0, 1] to the turbo colour map.
///
/// Polynomial fit of Google's turbo map (Mikhailov 2019); inputs outside
/// [0, 1] are clamped.
pub fn turbo(x: f64) -> Rgb<u8> {
    let x = x.clamp(0.0, 1.0);

    let r = 0.135_721_38
        + x * (4.615_392_60
            + x * (-42.660_322_58 + x * (132.131_082_34 + x * (-152.942_393_96 + x * 59.286_379_43))));
    let g = 0.091_402_61
        + x * (2.194_188_39
            + x * (4.842_966_58 + x * (-14.185_033_33 + x * (4.277_298_57 + x * 2.829_566_04))));
    let b = 0.106_673_30
        + x * (12.641_946_08
            + x * (-60.582_048_36 + x * (110.362_767_71 + x * (-89.903_109_12 + x * 27.348_249_73))));

    let to_u8 = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}

/// Normalise an intensity into [0, 1] for a colour range `[0, ceiling]`.
///
/// A non-positive or non-finite ceiling maps everything to 0.
pub fn normalize_to_ceiling(value: f64, ceiling: f64) -> f64 {
    if !(ceiling.is_finite() && ceiling > 0.0) || !value.is_finite() {
        return 0.0;
    }
    (value / ceiling).clamp(0.0, 1.0)
}

/// Render a frame with the turbo colour map over `[0, ceiling]`.
///
/// # Coordinate Mapping
/// Array element [row, col] becomes image pixel (col, row).
pub fn render_turbo(image: &ArrayView2<f64>, ceiling: f64) -> RgbImage {
    let (height, width) = image.dim();

    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        turbo(normalize_to_ceiling(image[[y as usize, x as usize]], ceiling))
    })
}

/// Draw a scale bar in the lower left corner.
///
/// The bar is clipped to the image; nothing is drawn if the margin alone
/// does not fit.
pub fn draw_scale_bar(image: &mut RgbImage, bar: &ScaleBar) {
    let (width, height) = image.dimensions();
    if bar.margin_px >= width || bar.margin_px >= height {
        return;
    }

    let x0 = bar.margin_px;
    let x1 = (x0 + bar.length_px).min(width);
    let y1 = height - bar.margin_px;
    let y0 = y1.saturating_sub(bar.thickness_px);

    for y in y0..y1 {
        for x in x0..x1 {
            image.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
}

/// Copy a frame onto a wider canvas with a turbo colour bar on the right.
///
/// The top of the bar is the ceiling colour and the bottom is 0.
fn attach_colorbar(frame: &RgbImage) -> RgbImage {
    let (width, height) = frame.dimensions();
    let layout = ColorbarLayout::new(width, height);

    let mut canvas = RgbImage::new(width + layout.panel_width, height);
    image::imageops::replace(&mut canvas, frame, 0, 0);

    if layout.bottom > layout.top {
        let span = (layout.bottom - 1 - layout.top).max(1) as f64;
        for y in layout.top..layout.bottom {
            let colour = turbo((layout.bottom - 1 - y) as f64 / span);
            for x in layout.bar_x0..layout.bar_x1 {
                canvas.put_pixel(x, y, colour);
            }
        }
    }
    canvas
}

/// Render a processed frame on the shared scale with its annotations.
///
/// The result is wider than the frame when a colour bar is requested.
pub fn render_frame(
    image: &ArrayView2<f64>,
    ceiling: f64,
    overlay: &FrameOverlay,
) -> Result<RgbImage, Box<dyn std::error::Error>> {
    let mut frame = render_turbo(image, ceiling);
    if let Some(bar) = &overlay.scale_bar {
        draw_scale_bar(&mut frame, bar);
    }

    let (frame_width, height) = frame.dimensions();
    let font_px = label_font_px(height);

    let mut labels: Vec<(String, (i32, i32))> = Vec::new();
    if let Some(timestamp) = &overlay.timestamp {
        labels.push((timestamp.clone(), (10, 10)));
    }
    if let Some(bar) = &overlay.scale_bar {
        if let Some(microns) = bar.microns {
            let y = height as i32 - (bar.margin_px + bar.thickness_px + font_px + 4) as i32;
            labels.push((format!("{microns} μm"), (bar.margin_px as i32, y.max(0))));
        }
    }

    let mut canvas = if overlay.colorbar {
        let layout = ColorbarLayout::new(frame_width, height);
        labels.push((format!("{ceiling:.3}"), (layout.label_x as i32, layout.top as i32)));
        labels.push((
            "0".to_string(),
            (
                layout.label_x as i32,
                (layout.bottom as i32 - font_px as i32).max(0),
            ),
        ));
        attach_colorbar(&frame)
    } else {
        frame
    };

    if labels.is_empty() {
        return Ok(canvas);
    }

    let size = canvas.dimensions();
    {
        let root = BitMapBackend::with_buffer(&mut canvas, size).into_drawing_area();
        let style = ("sans-serif", font_px).into_font().color(&WHITE);
        for (text, position) in &labels {
            root.draw(&Text::new(text.as_str(), *position, style.clone()))?;
        }
        root.present()?;
    }
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_turbo_endpoints() {
        // Dark blue at the bottom, dark red at the top
        let low = turbo(0.0);
        assert_eq!(low, Rgb([35, 23, 27]));
        let high = turbo(1.0);
        assert!(high[0] > 100 && high[1] < 30 && high[2] < 30, "{high:?}");

        // Middle of the map is green dominated
        let mid = turbo(0.5);
        assert!(mid[1] > mid[2], "{mid:?}");
    }

    #[test]
    fn test_turbo_clamps_out_of_range() {
        assert_eq!(turbo(-3.0), turbo(0.0));
        assert_eq!(turbo(7.0), turbo(1.0));
    }

    #[test]
    fn test_normalize_to_ceiling() {
        assert_eq!(normalize_to_ceiling(0.25, 0.5), 0.5);
        assert_eq!(normalize_to_ceiling(2.0, 0.5), 1.0);
        assert_eq!(normalize_to_ceiling(0.3, 0.0), 0.0);
        assert_eq!(normalize_to_ceiling(0.3, f64::NAN), 0.0);
    }

    #[test]
    fn test_render_uses_shared_scale() {
        let image = array![[0.0, 0.5], [1.0, 2.0]];
        let rendered = render_turbo(&image.view(), 1.0);

        assert_eq!(rendered.dimensions(), (2, 2));
        assert_eq!(*rendered.get_pixel(0, 0), turbo(0.0));
        assert_eq!(*rendered.get_pixel(1, 0), turbo(0.5));
        // Above the ceiling saturates
        assert_eq!(rendered.get_pixel(0, 1), rendered.get_pixel(1, 1));
    }

    #[test]
    fn test_draw_scale_bar() {
        let mut image = RgbImage::new(50, 40);
        let bar = ScaleBar {
            length_px: 20,
            thickness_px: 4,
            margin_px: 2,
            microns: None,
        };
        draw_scale_bar(&mut image, &bar);

        let white = image.pixels().filter(|p| **p == Rgb([255, 255, 255])).count();
        assert_eq!(white, 20 * 4);
        assert_eq!(*image.get_pixel(2, 37), Rgb([255, 255, 255]));
        assert_eq!(*image.get_pixel(2, 38), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_scale_bar_is_clipped_on_small_images() {
        let mut image = RgbImage::new(8, 8);
        draw_scale_bar(&mut image, &ScaleBar::default());

        let white = image.pixels().filter(|p| **p == Rgb([255, 255, 255])).count();
        // x in 10.. is outside an 8 px image, so nothing is drawn
        assert_eq!(white, 0);
    }

    fn count_white(image: &RgbImage, x_range: std::ops::Range<u32>, y_range: std::ops::Range<u32>) -> usize {
        let mut count = 0;
        for y in y_range {
            for x in x_range.clone() {
                let p = image.get_pixel(x, y);
                if p[0] > 200 && p[1] > 200 && p[2] > 200 {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn test_colorbar_spans_the_colour_range() {
        let frame = RgbImage::new(120, 100);
        let canvas = attach_colorbar(&frame);
        let layout = ColorbarLayout::new(120, 100);

        assert_eq!(canvas.dimensions(), (120 + 64, 100));
        assert_eq!(*canvas.get_pixel(layout.bar_x0, layout.top), turbo(1.0));
        assert_eq!(*canvas.get_pixel(layout.bar_x0, layout.bottom - 1), turbo(0.0));
        // Outside the bar the panel stays black
        assert_eq!(*canvas.get_pixel(layout.bar_x0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_render_frame_without_annotations_matches_plain_render() {
        let image = ndarray::Array2::from_elem((30, 40), 0.25);
        let rendered = render_frame(&image.view(), 1.0, &FrameOverlay::default()).unwrap();
        assert_eq!(rendered, render_turbo(&image.view(), 1.0));
    }

    #[test]
    fn test_render_frame_draws_labels() {
        let image = ndarray::Array2::<f64>::zeros((200, 300));
        let plain = render_frame(&image.view(), 0.5, &FrameOverlay::default()).unwrap();
        assert_eq!(count_white(&plain, 0..150, 0..40), 0);

        let overlay = FrameOverlay {
            scale_bar: Some(ScaleBar {
                length_px: 60,
                thickness_px: 6,
                margin_px: 10,
                microns: Some(50.0),
            }),
            timestamp: Some("12 s".to_string()),
            colorbar: true,
        };
        let rendered = render_frame(&image.view(), 0.5, &overlay).unwrap();
        let layout = ColorbarLayout::new(300, 200);
        assert_eq!(rendered.dimensions(), (300 + layout.panel_width, 200));

        // Timestamp in the upper left corner
        assert!(count_white(&rendered, 0..150, 0..40) > 0);
        // Scale bar label above the bar
        let label_top = 200 - (10 + 6 + label_font_px(200) + 4);
        assert!(count_white(&rendered, 10..150, label_top..200 - 16) > 0);
        // Tick labels beside the colour bar
        assert!(count_white(&rendered, layout.label_x..rendered.width(), 0..200) > 0);
    }
}
