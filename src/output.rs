//! Record types produced by the two stages.
//!
//! Both records wrap an insertion-ordered `serde_json::Map` (the crate enables
//! serde_json's `preserve_order`), so the order fields were emitted in is the
//! order they serialise in. Records are immutable once built: the
//! canonicalizer reads a [`GroundTruthRecord`] and produces a fresh
//! [`CanonicalRecord`].

use crate::error::{json_kind, SchemaError};
use crate::span::{BBox, PositionedSpan};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Semantic field → value mapping produced by the builder, optionally
/// carrying `<field>_page` / `_bbox` / `_spans` annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroundTruthRecord {
    fields: Map<String, Value>,
}

impl GroundTruthRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an already-parsed JSON document, e.g. a stored ground-truth
    /// file. Anything but an object is rejected.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(SchemaError::UnexpectedShape {
                field: "<record>".into(),
                expected: "an object",
                found: json_kind(&other),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl From<Map<String, Value>> for GroundTruthRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Flat canonical record: scalars, plus the `credit_factors` list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRecord {
    fields: Map<String, Value>,
}

impl CanonicalRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Emission index of `key`.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.fields.keys().position(|k| k == key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Typed view of the factor list under `key`. Malformed entries are
    /// skipped.
    pub fn credit_factors(&self, key: &str) -> Vec<CreditFactorEntry> {
        match self.fields.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Re-read a canonical record as ground truth, e.g. to check that
    /// canonicalisation is idempotent.
    pub fn to_ground_truth(&self) -> GroundTruthRecord {
        GroundTruthRecord::from(self.fields.clone())
    }
}

impl From<Map<String, Value>> for CanonicalRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// One simplified credit factor in the canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditFactorEntry {
    pub factor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    /// Layout sub-fields, kept only when spans are requested.
    #[serde(flatten)]
    pub layout: Map<String, Value>,
}

impl CreditFactorEntry {
    pub fn new(factor: impl Into<String>) -> Self {
        Self {
            factor: factor.into(),
            color: None,
            hex: None,
            layout: Map::new(),
        }
    }
}

/// Page, bounding box and literal spans behind one mapped value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLayout {
    pub page: usize,
    pub bbox: BBox,
    pub spans: Vec<PositionedSpan>,
}

impl FieldLayout {
    /// Layout of a group of spans: the first span's page and the union of
    /// the boxes on that page. `None` for an empty group.
    pub fn from_spans<'a>(spans: impl IntoIterator<Item = &'a PositionedSpan>) -> Option<Self> {
        let spans: Vec<PositionedSpan> = spans.into_iter().cloned().collect();
        let first = spans.first()?;
        let page = first.page;
        let bbox = spans
            .iter()
            .filter(|s| s.page == page)
            .fold(first.bbox, |acc, s| acc.union(&s.bbox));
        Some(Self { page, bbox, spans })
    }

    /// Write `<prefix>_page`, `<prefix>_bbox` and `<prefix>_spans`.
    ///
    /// An empty prefix writes the bare markers used inside nested objects.
    pub fn write_into(&self, map: &mut Map<String, Value>, prefix: &str) {
        map.insert(format!("{prefix}_page"), Value::from(self.page));
        map.insert(
            format!("{prefix}_bbox"),
            serde_json::to_value(self.bbox).unwrap_or(Value::Null),
        );
        map.insert(
            format!("{prefix}_spans"),
            serde_json::to_value(&self.spans).unwrap_or(Value::Null),
        );
    }
}
