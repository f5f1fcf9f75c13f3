//! Credit-factor capture.
//!
//! Factors are the free-text bullet list under the "Credit Factors" heading,
//! one factor per line, coloured red/green/black by the report vendor. The
//! list has no end marker, so capture stops at the next section heading or at
//! the header row of the accounts table that usually follows it.

use crate::pipeline::color::{categorize, ColorCategory};
use crate::pipeline::lines::LineIndex;
use crate::output::FieldLayout;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Lines scanned after the heading before giving up.
const MAX_FACTOR_LINES: usize = 120;

static RE_SECTION_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"credit alerts|public records|categories|late pays|credit report|credit factors")
        .unwrap()
});

static RE_TRAILING_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\b(red|green|black|neutral|amber)\s*$").unwrap());

const TABLE_HEADERS: &[&str] = &[
    "open accounts",
    "closed accounts",
    "revolving accounts",
    "line of credit accounts",
    "real estate accounts",
    "installment accounts",
    "miscellaneous accounts",
    "no revolving accounts",
    "no line of credit accounts",
    "no real estate accounts",
    "no installment accounts",
    "no miscellaneous accounts",
];

/// Lower-cased line that opens another report section.
///
/// Inquiry lines are not headings here: "3 inquiries in 0-6 mo" is a value
/// row inside the inquiries section.
pub fn is_section_heading(lower: &str) -> bool {
    RE_SECTION_HEADING.is_match(lower)
}

fn is_table_header(lower: &str) -> bool {
    TABLE_HEADERS.contains(&lower.trim())
}

/// One factor line as read from the page.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorCapture {
    pub factor: String,
    pub color: Option<ColorCategory>,
    pub hex: Option<String>,
    /// Index of the source line in the [`LineIndex`].
    pub line: usize,
}

impl FactorCapture {
    /// Ground-truth entry `{factor, color?, hex?}`, plus `_page`, `_bbox`
    /// and `_spans` when `include_layout` is set.
    pub fn to_entry(&self, index: &LineIndex, include_layout: bool) -> Value {
        let mut entry = Map::new();
        entry.insert("factor".into(), Value::from(self.factor.clone()));
        if let Some(color) = self.color {
            entry.insert("color".into(), Value::from(color.as_str()));
        }
        if let Some(hex) = &self.hex {
            entry.insert("hex".into(), Value::from(hex.clone()));
        }
        if include_layout {
            if let Some(layout) = FieldLayout::from_spans(&index.line(self.line).spans) {
                layout.write_into(&mut entry, "");
            }
        }
        Value::Object(entry)
    }

    pub fn candidate_score(&self) -> u32 {
        candidate_score(&self.factor, self.color.is_some() || self.hex.is_some())
    }
}

/// Capture the factor list following the first "credit factors" heading.
pub fn capture_factors(index: &LineIndex) -> Vec<FactorCapture> {
    let Some(heading) = index.find(|t| t.contains("credit factors")) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for i in (heading + 1..index.len()).take(MAX_FACTOR_LINES) {
        let text = index.text(i).trim();
        let lower = index.lower(i).trim();
        if text.is_empty() || lower.starts_with("inquir") || is_section_heading(lower) {
            break;
        }
        if is_table_header(lower) {
            break;
        }
        if text == "#" {
            continue;
        }

        let (factor, text_color) = match RE_TRAILING_COLOR.captures(text) {
            Some(caps) => {
                let hint = ColorCategory::from_name(&caps[1]);
                let stripped = text[..caps.get(0).map_or(text.len(), |m| m.start())].trim();
                (stripped.to_string(), hint)
            }
            None => (text.to_string(), None),
        };
        if factor.is_empty() {
            continue;
        }

        let span_rgb = index.line(i).spans.first().and_then(|s| s.color());
        let (color, hex) = match span_rgb {
            Some(rgb) => (Some(categorize(rgb)), Some(rgb.to_hex())),
            None => (text_color, None),
        };
        out.push(FactorCapture {
            factor,
            color,
            hex,
            line: i,
        });
    }
    tracing::debug!(heading, captured = out.len(), "credit factors captured");
    out
}

/// Heuristic plausibility of a factor line: short, numeric, mentions a
/// payoff, carries a colour.
pub fn candidate_score(factor: &str, has_color: bool) -> u32 {
    let lower = factor.to_lowercase();
    let mut score = 0;
    if lower.chars().count() < 40 {
        score += 2;
    }
    if lower.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    }
    if lower.contains("paid") {
        score += 1;
    }
    if has_color {
        score += 3;
    }
    score
}

fn position_of(entry: &Value) -> (usize, f64) {
    let page = ["_page", "page"]
        .iter()
        .find_map(|k| entry.get(*k).and_then(Value::as_u64))
        .map_or(usize::MAX, |p| p as usize);
    let y0 = ["_bbox", "bbox"]
        .iter()
        .find_map(|k| entry.get(*k).and_then(|b| b.get(1)).and_then(Value::as_f64))
        .unwrap_or(f64::INFINITY);
    (page, y0)
}

/// Stable sort of factor entries by `(page, bbox.y0)`. Entries without a
/// position keep their relative order after the positioned ones.
pub fn sort_by_position(entries: &mut [Value]) {
    entries.sort_by(|a, b| {
        let (pa, ya) = position_of(a);
        let (pb, yb) = position_of(b);
        pa.cmp(&pb).then_with(|| ya.total_cmp(&yb))
    });
}
