//! Colour rules for constraint values.
//!
//! Everything here is a pure function of its inputs plus an optional fixed
//! [`ColorConfig`]. Colours are plain 8-bit RGB triples and render as
//! uppercase `#RRGGBB`.

use serde::{Deserialize, Serialize};

use crate::cell::CellValue;
use crate::constraint::ConstraintRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` or `RRGGBB`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub const WHITE: Rgb = Rgb::new(0xFF, 0xFF, 0xFF);
pub const NEUTRAL: Rgb = Rgb::new(0xCC, 0xCC, 0xCC);
pub const GREEN: Rgb = Rgb::new(0x00, 0xFF, 0x00);
pub const YELLOW: Rgb = Rgb::new(0xFF, 0xFF, 0x00);
pub const ORANGE: Rgb = Rgb::new(0xFF, 0xA5, 0x00);
pub const RED: Rgb = Rgb::new(0xFF, 0x00, 0x00);
pub const BLUE: Rgb = Rgb::new(0x00, 0x00, 0xFF);

/// Deltas within this band render as zero.
const DELTA_EPSILON: f64 = 0.01;
const DELTA_SATURATION: f64 = 100.0;
/// Minimum visible intensity for a non-zero delta.
const DELTA_FLOOR: f64 = 0.05;
/// Actual-vs-expected span (MW) over which the PACTUAL gradient saturates.
const PACTUAL_SPAN: f64 = 50.0;

/// Blend-toward-white range for non-binding constraints.
const MIN_BLEND: f64 = 0.2;
const MAX_BLEND: f64 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub enum ColorConfigError {
    /// `colors.len()` must be `thresholds.len() + 1`.
    LengthMismatch { thresholds: usize, colors: usize },
    /// Thresholds must be finite and strictly ascending.
    UnorderedThresholds,
    /// A colour string is not `#RRGGBB`.
    InvalidColor(String),
}

impl std::fmt::Display for ColorConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthMismatch { thresholds, colors } => write!(
                f,
                "{} threshold(s) need {} colour(s), found {}",
                thresholds,
                thresholds + 1,
                colors
            ),
            Self::UnorderedThresholds => write!(f, "thresholds must be finite and strictly ascending"),
            Self::InvalidColor(c) => write!(f, "invalid colour '{c}' (expected #RRGGBB)"),
        }
    }
}

impl std::error::Error for ColorConfigError {}

/// Ascending thresholds and one more colour than thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorConfig {
    thresholds: Vec<f64>,
    colors: Vec<Rgb>,
}

impl ColorConfig {
    pub fn new(thresholds: Vec<f64>, colors: Vec<Rgb>) -> Result<Self, ColorConfigError> {
        if colors.len() != thresholds.len() + 1 {
            return Err(ColorConfigError::LengthMismatch {
                thresholds: thresholds.len(),
                colors: colors.len(),
            });
        }
        let ascending = thresholds.iter().all(|t| t.is_finite())
            && thresholds.windows(2).all(|w| w[0] < w[1]);
        if !ascending {
            return Err(ColorConfigError::UnorderedThresholds);
        }
        Ok(Self { thresholds, colors })
    }

    /// Same as [`ColorConfig::new`] with colours given as hex strings.
    pub fn from_hex(thresholds: Vec<f64>, colors: &[String]) -> Result<Self, ColorConfigError> {
        let parsed = colors
            .iter()
            .map(|c| Rgb::from_hex(c).ok_or_else(|| ColorConfigError::InvalidColor(c.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(thresholds, parsed)
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![50.0, 100.0, 200.0],
            colors: vec![GREEN, YELLOW, ORANGE, RED],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColorFormatter {
    config: ColorConfig,
}

impl ColorFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ColorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ColorConfig {
        &self.config
    }

    /// Bucket colour for a VIEW value. Negative values clamp to the first
    /// bucket, values at or above every threshold take the last colour.
    pub fn view_color(&self, value: f64) -> Rgb {
        if value.is_nan() {
            return NEUTRAL;
        }
        let bucket = self
            .config
            .thresholds
            .iter()
            .position(|t| value < *t)
            .unwrap_or(self.config.thresholds.len());
        self.config.colors[bucket]
    }

    pub fn prev_color(&self, value: Option<f64>) -> Rgb {
        match value {
            Some(v) => self.view_color(v),
            None => NEUTRAL,
        }
    }

    /// SHORTLIMIT values are negative; their magnitude is bucketed.
    pub fn shortlimit_color(&self, value: Option<f64>) -> Rgb {
        match value {
            Some(v) => self.view_color(v.abs()),
            None => NEUTRAL,
        }
    }

    /// White when actual meets or exceeds expected, otherwise a blue
    /// gradient that saturates once actual trails by 50 MW.
    pub fn pactual_color(&self, actual: f64, expected: f64) -> Rgb {
        let diff = actual - expected;
        if diff.is_nan() || diff.abs() < DELTA_EPSILON || diff > 0.0 {
            return WHITE;
        }
        let ratio = (diff.abs() / PACTUAL_SPAN).min(1.0);
        self.interpolate_color(WHITE, BLUE, ratio)
    }

    pub fn calculate_gradient(&self, value: f64, min: f64, max: f64, start: Rgb, end: Rgb) -> Rgb {
        if max == min {
            return start;
        }
        let ratio = (value - min) / (max - min);
        self.interpolate_color(start, end, ratio)
    }

    /// Linear per-channel interpolation. `ratio` is clamped to `[0, 1]`;
    /// NaN counts as 0.
    pub fn interpolate_color(&self, from: Rgb, to: Rgb, ratio: f64) -> Rgb {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        let mix = |a: u8, b: u8| {
            let v = (a as f64 + (b as f64 - a as f64) * ratio).round();
            v.clamp(0.0, 255.0) as u8
        };
        Rgb::new(mix(from.r, to.r), mix(from.g, to.g), mix(from.b, to.b))
    }

    /// String form of [`ColorFormatter::interpolate_color`]. `None` if
    /// either input is not a hex colour.
    pub fn interpolate_hex(&self, from: &str, to: &str, ratio: f64) -> Option<String> {
        let from = Rgb::from_hex(from)?;
        let to = Rgb::from_hex(to)?;
        Some(self.interpolate_color(from, to, ratio).to_hex())
    }

    /// Blue-white-red scale for RECENT_DELTA.
    ///
    /// Magnitudes saturate at 100. The curve is logarithmic so deltas of a
    /// few MW stay distinguishable, and it increases with |value| on both
    /// sides of zero.
    pub fn format_recent_delta(&self, value: Option<f64>) -> Rgb {
        let Some(value) = value else {
            return WHITE;
        };
        if value.is_nan() || value.abs() <= DELTA_EPSILON {
            return WHITE;
        }
        let clamped = value.clamp(-DELTA_SATURATION, DELTA_SATURATION);
        let magnitude = clamped.abs();
        let ratio = DELTA_FLOOR
            + (1.0 - DELTA_FLOOR) * (1.0 + magnitude).ln() / (1.0 + DELTA_SATURATION).ln();
        let target = if clamped < 0.0 { BLUE } else { RED };
        self.interpolate_color(WHITE, target, ratio.min(1.0))
    }

    /// Red below zero, green above, saturating at ±1.
    pub fn lodf_color(&self, value: f64) -> Rgb {
        if value.is_nan() {
            return NEUTRAL;
        }
        if value < 0.0 {
            self.interpolate_color(WHITE, RED, -value)
        } else {
            self.interpolate_color(WHITE, GREEN, value)
        }
    }

    /// Row colour: the VIEW bucket, at full intensity for binding
    /// constraints and washed toward white as utilisation drops otherwise.
    pub fn constraint_color(&self, row: &ConstraintRow) -> Rgb {
        let base = self.view_color(row.view);
        if row.is_binding() {
            return base;
        }
        let blend = match row.utilization() {
            Some(u) => (MAX_BLEND - u * (MAX_BLEND - MIN_BLEND)).clamp(MIN_BLEND, MAX_BLEND),
            None => MAX_BLEND,
        };
        self.interpolate_color(base, WHITE, blend)
    }

    /// FLOW renders bold when it exceeds the historical maximum.
    pub fn should_bold_flow(&self, flow: f64, max_hist: f64) -> bool {
        max_hist != 0.0 && flow > max_hist
    }

    /// Background colour for one displayed cell.
    pub fn column_color(&self, column: &str, value: &CellValue) -> Rgb {
        let number = value.to_number_lossy();
        let column = column.to_ascii_uppercase();
        match column.as_str() {
            "VIEW" => number.map(|v| self.view_color(v)).unwrap_or(NEUTRAL),
            "SHORTLIMIT" => self.shortlimit_color(number),
            "PREV" => self.prev_color(number),
            "RECENT_DELTA" => self.format_recent_delta(number),
            c if c.starts_with("LODF") => number.map(|v| self.lodf_color(v)).unwrap_or(NEUTRAL),
            _ => NEUTRAL,
        }
    }
}
