//! Colour categories for credit factors and the credit score.
//!
//! Credit summaries print negative factors in red, positive ones in green and
//! informational ones in black. The category is derived from the span's fill
//! colour with simple channel-dominance thresholds; exact shades vary between
//! report vendors, so the thresholds are deliberately loose.

use crate::span::Rgb;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorCategory {
    Red,
    Green,
    Black,
    Neutral,
    /// Only ever produced from an explicit text hint.
    Amber,
}

impl ColorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorCategory::Red => "red",
            ColorCategory::Green => "green",
            ColorCategory::Black => "black",
            ColorCategory::Neutral => "neutral",
            ColorCategory::Amber => "amber",
        }
    }

    /// Case-insensitive lookup of a colour name.
    pub fn from_name(name: &str) -> Option<ColorCategory> {
        match name.trim().to_ascii_lowercase().as_str() {
            "red" => Some(ColorCategory::Red),
            "green" => Some(ColorCategory::Green),
            "black" => Some(ColorCategory::Black),
            "neutral" => Some(ColorCategory::Neutral),
            "amber" => Some(ColorCategory::Amber),
            _ => None,
        }
    }

    /// Category of a `#rrggbb` string, or of a colour name written where a
    /// hex value was expected.
    pub fn from_hex_or_name(value: &str) -> Option<ColorCategory> {
        Rgb::from_hex(value)
            .map(categorize)
            .or_else(|| ColorCategory::from_name(value))
    }
}

impl fmt::Display for ColorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a fill colour.
pub fn categorize(c: Rgb) -> ColorCategory {
    let (r, g, b) = (c.0 as i32, c.1 as i32, c.2 as i32);
    if r > g + 40 && r > b + 40 && r > 100 && g < 120 {
        ColorCategory::Red
    } else if g > r + 40 && g > b + 40 && g > 100 {
        ColorCategory::Green
    } else if r < 80 && g < 80 && b < 80 {
        ColorCategory::Black
    } else {
        ColorCategory::Neutral
    }
}
