use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// 8-bit RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color { r, g, b, a }
    }

    /// CSS colour text: `#rrggbb` when opaque, `rgba(...)` otherwise.
    pub fn to_css(&self) -> String {
        if self.a == 255 {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            let alpha = (self.a as f32 / 255.0 * 100.0).round() / 100.0;
            format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, alpha)
        }
    }
}

/// How a single region is drawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStyle {
    pub stroke: Color,
    pub fill: Color,
    pub stroke_width: u32,
    pub dash: Option<Vec<u32>>,
    pub label_font_size: u32,
    pub label_color: Color,
}

impl RegionStyle {
    const fn base(stroke: Color, fill: Color) -> Self {
        RegionStyle {
            stroke,
            fill,
            stroke_width: 2,
            dash: None,
            label_font_size: 26,
            label_color: Color::WHITE,
        }
    }

    fn dashed(mut self, pattern: &[u32]) -> Self {
        self.dash = Some(pattern.to_vec());
        self
    }

    pub fn dash_css(&self) -> Option<String> {
        self.dash.as_ref().filter(|d| !d.is_empty()).map(|d| {
            d.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
        })
    }
}

/// Interchangeable palettes; every id gets a style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StyleCatalog {
    /// Muted purple, dashed outlines.
    #[default]
    Default,
    /// One distinct colour per facial region.
    Colorful,
    /// Thin black outline everywhere.
    Minimal,
}

const PURPLE_FILL: Color = Color::rgba(161, 106, 169, 128);

const COLORFUL_STROKES: [Color; 7] = [
    Color::rgb(0xFF, 0x6B, 0x6B),
    Color::rgb(0x4E, 0xCD, 0xC4),
    Color::rgb(0x45, 0xB7, 0xD1),
    Color::rgb(0x96, 0xCE, 0xB4),
    Color::rgb(0xFF, 0xEA, 0xA7),
    Color::rgb(0xDD, 0xA0, 0xDD),
    Color::rgb(0xF3, 0x9C, 0x12),
];

impl StyleCatalog {
    pub const ALL: [StyleCatalog; 3] = [StyleCatalog::Default, StyleCatalog::Colorful, StyleCatalog::Minimal];

    pub fn name(&self) -> &'static str {
        match self {
            StyleCatalog::Default => "default",
            StyleCatalog::Colorful => "colorful",
            StyleCatalog::Minimal => "minimal",
        }
    }

    /// style_for returns the style of a region id, falling back to `default_style`.
    ///
    /// # Arguments
    /// * `region_id` - segmentation label
    ///
    /// # Returns
    /// * `RegionStyle`
    pub fn style_for(&self, region_id: u32) -> RegionStyle {
        match self {
            StyleCatalog::Default => match region_id {
                1 => RegionStyle::base(Color::rgb(0x9D, 0x57, 0xA7), PURPLE_FILL).dashed(&[5, 5]),
                2..=7 => RegionStyle::base(Color::rgb(0xA1, 0x6A, 0xA9), PURPLE_FILL).dashed(&[5, 5]),
                _ => self.default_style(),
            },
            StyleCatalog::Colorful => match region_id {
                1..=7 => {
                    let stroke = COLORFUL_STROKES[(region_id - 1) as usize];
                    RegionStyle::base(stroke, Color { a: 77, ..stroke })
                }
                _ => self.default_style(),
            },
            StyleCatalog::Minimal => self.default_style(),
        }
    }

    pub fn default_style(&self) -> RegionStyle {
        match self {
            StyleCatalog::Default => {
                RegionStyle::base(Color::BLACK, Color::rgba(0, 0, 0, 51)).dashed(&[5, 5])
            }
            StyleCatalog::Colorful => {
                RegionStyle::base(Color::rgb(0x95, 0xA5, 0xA6), Color::rgba(0x95, 0xA5, 0xA6, 77))
            }
            StyleCatalog::Minimal => RegionStyle {
                stroke_width: 1,
                label_font_size: 20,
                ..RegionStyle::base(Color::BLACK, Color::rgba(0, 0, 0, 26))
            },
        }
    }
}

impl FromStr for StyleCatalog {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(StyleCatalog::Default),
            "colorful" => Ok(StyleCatalog::Colorful),
            "minimal" => Ok(StyleCatalog::Minimal),
            other => Err(PipelineError::invalid(format!(
                "unknown style {other:?}, expected one of default, colorful, minimal"
            ))),
        }
    }
}

impl fmt::Display for StyleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
