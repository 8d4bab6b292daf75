//! Quality check and result plots
//!
//! - **profile**: raw vs background intensity along one image row
//! - **dynamics**: mean response over time for several groups of replicates

pub mod dynamics;
pub mod profile;

use plotters::style::RGBColor;

pub use dynamics::{aggregate_replicates, plot_dynamics, stimulus_intervals, ReplicateSummary};
pub use profile::{plot_background_profile, select_profile_row};

/// Group colours, cycled when there are more groups than entries
pub const PALETTE: [RGBColor; 7] = [
    RGBColor(0x80, 0x69, 0xEC),
    RGBColor(0xEA, 0x82, 0x2C),
    RGBColor(0x2E, 0xCC, 0x71),
    RGBColor(0xD1, 0x43, 0xA4),
    RGBColor(0xF1, 0xC4, 0x0F),
    RGBColor(0x34, 0x49, 0x5E),
    RGBColor(0x64, 0x8F, 0xFF),
];

/// Sizes and colours shared by every plot
///
/// Passed explicitly to each plotting function.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotStyle {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Stroke width of data lines in pixels
    pub line_width: u32,
    /// Font size of captions and axis descriptions
    pub font_size: u32,
    /// Colours assigned to groups in order
    pub palette: Vec<RGBColor>,
    /// Raw intensity line in profile plots
    pub raw_color: RGBColor,
    /// Background line in profile plots
    pub background_color: RGBColor,
    /// Shading of stimulus intervals
    pub stimulus_color: RGBColor,
    /// Opacity of the confidence band
    pub band_opacity: f64,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 2400,
            height: 1600,
            line_width: 4,
            font_size: 40,
            palette: PALETTE.to_vec(),
            raw_color: RGBColor(0x64, 0x8F, 0xFF),
            background_color: RGBColor(0x78, 0x5E, 0xF0),
            stimulus_color: RGBColor(0x64, 0x8F, 0xFF),
            band_opacity: 0.2,
        }
    }
}

impl PlotStyle {
    /// Colour of the `index`-th group
    pub fn group_color(&self, index: usize) -> RGBColor {
        if self.palette.is_empty() {
            return PALETTE[index % PALETTE.len()];
        }
        self.palette[index % self.palette.len()]
    }
}
