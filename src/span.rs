//! Positioned text spans: the input handed over by the PDF text library.
//!
//! Coordinates follow the usual text-extraction convention: origin at the
//! top-left corner of the page, `y` growing downwards, units in PDF points.
//! Spans are immutable once constructed and are consumed once by the builder.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box `(x0, y0)`–`(x1, y1)`.
///
/// Serialised as a four-element array, the shape downstream tooling expects
/// for `*_bbox` keys.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Vertical overlap divided by the smaller of the two heights.
    ///
    /// Two zero-height boxes on the same baseline count as fully overlapping.
    pub fn vertical_overlap_ratio(&self, other: &BBox) -> f32 {
        let overlap = self.y1.min(other.y1) - self.y0.max(other.y0);
        let min_h = self.height().min(other.height());
        if min_h <= f32::EPSILON {
            return if (self.center_y() - other.center_y()).abs() <= 1.0 {
                1.0
            } else {
                0.0
            };
        }
        (overlap / min_h).max(0.0)
    }

    /// Horizontal overlap in points (0 when disjoint).
    pub fn horizontal_overlap(&self, other: &BBox) -> f32 {
        (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0)
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Why the box cannot be placed on a page, if it cannot.
    pub fn validate(&self) -> Result<(), String> {
        if ![self.x0, self.y0, self.x1, self.y1]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err("non-finite coordinate".to_string());
        }
        if self.x0 > self.x1 {
            return Err(format!("x0 ({}) > x1 ({})", self.x0, self.x1));
        }
        if self.y0 > self.y1 {
            return Err(format!("y0 ({}) > y1 ({})", self.y0, self.y1));
        }
        Ok(())
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

/// 8-bit sRGB colour, serialised as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse `#rrggbb` or `rrggbb`. Anything else is `None`.
    pub fn from_hex(hex: &str) -> Option<Rgb> {
        let h = hex.trim().trim_start_matches('#');
        if h.len() != 6 || !h.is_ascii() {
            return None;
        }
        let r = u8::from_str_radix(&h[0..2], 16).ok()?;
        let g = u8::from_str_radix(&h[2..4], 16).ok()?;
        let b = u8::from_str_radix(&h[4..6], 16).ok()?;
        Some(Rgb(r, g, b))
    }

    /// Unpack a `0xRRGGBB` integer, the form most PDF text libraries report.
    pub fn from_packed(value: u32) -> Rgb {
        Rgb(
            ((value >> 16) & 0xff) as u8,
            ((value >> 8) & 0xff) as u8,
            (value & 0xff) as u8,
        )
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl From<[u8; 3]> for Rgb {
    fn from(v: [u8; 3]) -> Self {
        Rgb(v[0], v[1], v[2])
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(c: Rgb) -> Self {
        [c.0, c.1, c.2]
    }
}

/// Optional font and colour information attached to a span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
}

/// A run of text at a known position on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedSpan {
    pub text: String,
    /// 0-indexed page number.
    pub page: usize,
    pub bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<SpanStyle>,
}

impl PositionedSpan {
    pub fn new(text: impl Into<String>, page: usize, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            page,
            bbox,
            style: None,
        }
    }

    pub fn with_style(mut self, style: SpanStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// Set only the fill colour, keeping any font information.
    pub fn with_color(mut self, color: Rgb) -> Self {
        self.style.get_or_insert_with(SpanStyle::default).color = Some(color);
        self
    }

    pub fn color(&self) -> Option<Rgb> {
        self.style.as_ref().and_then(|s| s.color)
    }
}
