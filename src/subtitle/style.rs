use serde::{Deserialize, Serialize};

/// Margin every computed margin starts from.
pub const BASE_MARGIN: i64 = 10;

pub const DEFAULT_FONT_FAMILY: &str = "Noto Sans Myanmar";
pub const DEFAULT_FONT_SIZE: u32 = 36;
pub const DEFAULT_FONT_COLOR: &str = "#FFFFFF";
pub const DEFAULT_Y_AXIS: f64 = 30.0;
pub const DEFAULT_OUTLINE_WIDTH: f64 = 1.0;
pub const DEFAULT_SHADOW_DEPTH: f64 = 0.0;

/// Style snapshot as supplied by clients. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_axis: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_axis: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_background: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_depth: Option<f64>,
}

/// A style with every default applied and margins computed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStyle {
    pub font_family: String,
    pub font_size: u32,
    pub color: Rgb,
    pub bold: bool,
    pub italic: bool,
    pub show_background: bool,
    pub outline_width: f64,
    pub shadow_depth: f64,
    pub margin_l: u32,
    pub margin_r: u32,
    pub margin_v: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb { r: 0xFF, g: 0xFF, b: 0xFF };

    /// Parse `#RRGGBB` (the leading `#` is optional).
    pub fn parse(value: &str) -> Option<Self> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self {
            r: u8::from_str_radix(&hex[0..2], 16).ok()?,
            g: u8::from_str_radix(&hex[2..4], 16).ok()?,
            b: u8::from_str_radix(&hex[4..6], 16).ok()?,
        })
    }

    /// Alpha/blue/green/red order used by ASS styles.
    pub fn to_ass(self) -> String {
        format!("&H00{:02X}{:02X}{:02X}", self.b, self.g, self.r)
    }

    /// `0xRRGGBB` as accepted by ffmpeg color options.
    pub fn to_ffmpeg(self) -> String {
        format!("0x{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl StyleConfig {
    pub fn resolve(&self) -> ResolvedStyle {
        let x = self.x_axis.unwrap_or(0.0).round() as i64;
        let y = self.y_axis.unwrap_or(DEFAULT_Y_AXIS).abs().round() as i64;

        ResolvedStyle {
            font_family: self
                .font_family
                .clone()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string()),
            font_size: self.font_size.filter(|s| *s > 0).unwrap_or(DEFAULT_FONT_SIZE),
            color: self
                .font_color
                .as_deref()
                .and_then(Rgb::parse)
                .unwrap_or(Rgb::WHITE),
            bold: self.bold.unwrap_or(false),
            italic: self.italic.unwrap_or(false),
            show_background: self.show_background.unwrap_or(true),
            outline_width: self.outline_width.unwrap_or(DEFAULT_OUTLINE_WIDTH).max(0.0),
            shadow_depth: self.shadow_depth.unwrap_or(DEFAULT_SHADOW_DEPTH).max(0.0),
            margin_l: clamp_margin(BASE_MARGIN + x),
            margin_r: clamp_margin(BASE_MARGIN - x),
            margin_v: clamp_margin(BASE_MARGIN + y),
        }
    }
}

fn clamp_margin(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}
