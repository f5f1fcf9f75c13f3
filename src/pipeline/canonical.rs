//! Stage 3: canonicalise a ground-truth record into the flat schema.
//!
//! ## Data Flow
//!
//! ```text
//! ground truth ──▶ unwrap ──▶ aliases ──▶ flatten ──▶ defaults ──▶ factors ──▶ required ──▶ order
//! ```
//!
//! 1. unwrap a `{"rec": {…}}` wrapper and drop transient keys
//! 2. resolve alias groups; the canonical key takes the position of the
//!    first group member met in the source
//! 3. flatten nested categories in place, declared field order; flat keys
//!    present in the source win over flattened values
//! 4. append defaults for absent (or null) default fields
//! 5. layout metadata is dropped at every level, lists included, unless
//!    spans are kept
//! 6. simplify `credit_factors` entries to `{factor, color?, hex?}`
//! 7. check required fields
//! 8. enforce the pairwise ordering table and the suffix pairs
//!    (`<p>_open_count` before `<p>_open_total` for any `p`)
//!
//! Every step is driven by the [`CanonicalSchema`] tables. The input record is
//! never mutated. With spans stripped, canonicalising a canonical record
//! returns it unchanged.

use crate::config::{ExtractionConfig, MissingFieldPolicy};
use crate::error::{json_kind, SchemaError};
use crate::output::{CanonicalRecord, CreditFactorEntry, GroundTruthRecord};
use crate::pipeline::color::{categorize, ColorCategory};
use crate::schema::{CanonicalSchema, CategoryRule};
use crate::span::Rgb;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Turns ground-truth records into canonical records.
///
/// Holds only its schema and flags, so one instance can be shared freely
/// across threads.
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    schema: CanonicalSchema,
    include_spans: bool,
    missing_required: MissingFieldPolicy,
}

impl Canonicalizer {
    pub fn new(schema: CanonicalSchema) -> Self {
        Self {
            schema,
            include_spans: false,
            missing_required: MissingFieldPolicy::default(),
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            schema: config.schema.clone(),
            include_spans: config.include_spans,
            missing_required: config.missing_required,
        }
    }

    pub fn include_spans(mut self, v: bool) -> Self {
        self.include_spans = v;
        self
    }

    pub fn missing_required(mut self, policy: MissingFieldPolicy) -> Self {
        self.missing_required = policy;
        self
    }

    pub fn schema(&self) -> &CanonicalSchema {
        &self.schema
    }

    /// Produce the canonical record for `record`.
    pub fn canonicalize(&self, record: &GroundTruthRecord) -> Result<CanonicalRecord, SchemaError> {
        let source = self.unwrap(record.as_map());
        let mut out = Emitter::default();

        for (key, value) in source {
            if self.schema.is_transient(key) {
                continue;
            }
            if self.schema.alias_group(key).is_some() {
                self.resolve_alias(key, source, &mut out);
            } else if let Some((base, suffix)) = self.schema.split_layout_key(key) {
                if self.include_spans {
                    let base = self.canonical_name(base);
                    out.push_derived(format!("{base}{suffix}"), value.clone());
                }
            } else if let Some(rule) = self.schema.category(key) {
                self.flatten_category(rule, value, source, &mut out)?;
            } else if key == &self.schema.factors_key {
                out.push_source(key.clone(), value.clone());
            } else if let Value::Object(obj) = value {
                warn!(field = %key, "unknown nested object, flattening generically");
                self.flatten_generic(key, obj, &mut out);
            } else {
                out.push_source(key.clone(), self.scrub(value));
            }
        }

        for default in &self.schema.defaults {
            if !out.has_value(&default.key) {
                debug!(field = %default.key, "filling default");
                out.set(&default.key, default.value.clone());
            }
        }

        let factors_key = self.schema.factors_key.as_str();
        if let Some(idx) = out.position(factors_key) {
            match self.simplify_factors(&out.entries[idx].1)? {
                Some(list) => out.entries[idx].1 = list,
                None => {
                    out.entries.remove(idx);
                }
            }
        }

        for field in &self.schema.required {
            if out.has_value(field) {
                continue;
            }
            match self.missing_required {
                MissingFieldPolicy::Fail => {
                    return Err(SchemaError::MissingRequiredField {
                        field: field.clone(),
                    })
                }
                MissingFieldPolicy::Null => out.set(field, Value::Null),
            }
        }

        self.enforce_ordering(&mut out);
        Ok(CanonicalRecord::from(
            out.entries.into_iter().collect::<Map<String, Value>>(),
        ))
    }

    fn unwrap<'a>(&self, map: &'a Map<String, Value>) -> &'a Map<String, Value> {
        match self.schema.wrapper_key.as_deref().and_then(|w| map.get(w)) {
            Some(Value::Object(inner)) => {
                debug!("unwrapping record wrapper");
                inner
            }
            _ => map,
        }
    }

    /// Canonical name for a possibly aliased key.
    fn canonical_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.schema
            .alias_group(key)
            .map_or(key, |g| g.canonical.as_str())
    }

    fn resolve_alias(&self, key: &str, source: &Map<String, Value>, out: &mut Emitter) {
        let Some(group) = self.schema.alias_group(key) else {
            return;
        };
        if out.contains(&group.canonical) {
            return;
        }
        let present = |k: &str| source.get(k).filter(|v| !v.is_null());
        let (from, value) = std::iter::once(&group.canonical)
            .chain(&group.aliases)
            .find_map(|k| present(k.as_str()).map(|v| (k.as_str(), v.clone())))
            .unwrap_or((key, Value::Null));
        if from != group.canonical {
            debug!(alias = %from, canonical = %group.canonical, "resolved alias");
        }
        out.push_derived(group.canonical.clone(), self.scrub(&value));
    }

    /// Whether the source supplies `key` itself, directly or through an alias.
    fn source_provides(&self, key: &str, source: &Map<String, Value>) -> bool {
        if source.contains_key(key) {
            return true;
        }
        self.schema
            .alias_group(key)
            .filter(|g| g.canonical == key)
            .is_some_and(|g| g.aliases.iter().any(|a| source.contains_key(a)))
    }

    fn flatten_category(
        &self,
        rule: &CategoryRule,
        value: &Value,
        source: &Map<String, Value>,
        out: &mut Emitter,
    ) -> Result<(), SchemaError> {
        let obj = match value {
            Value::Object(obj) => obj,
            Value::Null => return Ok(()),
            Value::Array(_) => {
                return Err(SchemaError::UnexpectedShape {
                    field: rule.source.clone(),
                    expected: "an object",
                    found: json_kind(value),
                })
            }
            scalar if rule.passes_scalar_through() => {
                out.push_source(rule.source.clone(), scalar.clone());
                return Ok(());
            }
            other => {
                return Err(SchemaError::UnexpectedShape {
                    field: rule.source.clone(),
                    expected: "an object",
                    found: json_kind(other),
                })
            }
        };

        debug!(category = %rule.source, "flattening category");
        for field in &rule.fields {
            if field.key != rule.source && self.source_provides(&field.key, source) {
                continue;
            }
            let found = field
                .from
                .iter()
                .find_map(|sub| obj.get(sub).filter(|v| !v.is_null()));
            if let Some(v) = found {
                out.push_derived(field.key.clone(), self.scrub(v));
            }
        }
        if self.include_spans {
            for (sub, v) in obj {
                if let Some((base, suffix)) = self.schema.split_layout_key(sub) {
                    let name = if base.is_empty() {
                        format!("{}{suffix}", rule.source)
                    } else {
                        format!("{}_{sub}", rule.source)
                    };
                    out.push_derived(name, v.clone());
                }
            }
        }
        Ok(())
    }

    fn flatten_generic(&self, prefix: &str, obj: &Map<String, Value>, out: &mut Emitter) {
        for (sub, v) in obj {
            let name = match self.schema.split_layout_key(sub) {
                Some((base, suffix)) if base.is_empty() => format!("{prefix}{suffix}"),
                _ => format!("{prefix}_{sub}"),
            };
            if self.schema.is_layout_key(sub) && !self.include_spans {
                continue;
            }
            match v {
                Value::Object(inner) => self.flatten_generic(&name, inner, out),
                _ => out.push_derived(name, self.scrub(v)),
            }
        }
    }

    /// `value` without layout markers in any object nested inside it, unless
    /// spans are kept.
    fn scrub(&self, value: &Value) -> Value {
        if self.include_spans {
            return value.clone();
        }
        self.strip_layout(value)
    }

    fn strip_layout(&self, value: &Value) -> Value {
        match value {
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.strip_layout(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(k, _)| !self.schema.is_layout_key(k))
                    .map(|(k, v)| (k.clone(), self.strip_layout(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// `None` when the factor list is null and should be dropped.
    fn simplify_factors(&self, value: &Value) -> Result<Option<Value>, SchemaError> {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => return Ok(None),
            other => {
                return Err(SchemaError::UnexpectedShape {
                    field: self.schema.factors_key.clone(),
                    expected: "a list of objects",
                    found: json_kind(other),
                })
            }
        };

        let mut simplified = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(entry) = item else {
                return Err(SchemaError::UnexpectedShape {
                    field: self.schema.factors_key.clone(),
                    expected: "a list of objects",
                    found: json_kind(item),
                });
            };
            if let Some(factor) = self.simplify_factor(entry) {
                simplified.push(serde_json::to_value(factor)?);
            }
        }
        Ok(Some(Value::Array(simplified)))
    }

    fn simplify_factor(&self, entry: &Map<String, Value>) -> Option<CreditFactorEntry> {
        let text = entry
            .get("factor")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let Some(text) = text else {
            debug!("dropping credit factor without text");
            return None;
        };

        let explicit = entry
            .get("color")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(normalise_color_name);

        // the hex string is kept as written; parsing it only derives a colour
        let raw_hex = entry
            .get("hex")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|h| !h.is_empty());
        let (hex, hex_color) = match raw_hex {
            Some(h) => match ColorCategory::from_name(h) {
                Some(named) => (None, Some(named.as_str().to_string())),
                None => (
                    Some(h.to_string()),
                    Rgb::from_hex(h).map(|rgb| categorize(rgb).as_str().to_string()),
                ),
            },
            None => (None, None),
        };

        let color = explicit.or(hex_color).or_else(|| {
            self.include_spans
                .then(|| span_color(entry))
                .flatten()
                .map(|c| c.as_str().to_string())
        });

        let mut factor = CreditFactorEntry::new(text);
        factor.color = color;
        factor.hex = hex;
        if self.include_spans {
            for (k, v) in entry {
                if self.schema.is_factor_layout_key(k) {
                    factor.layout.insert(k.clone(), v.clone());
                }
            }
        }
        Some(factor)
    }

    /// Table pairs plus every `(p + sa, p + sb)` suffix pair present in `out`.
    fn ordering_pairs(&self, out: &Emitter) -> Vec<(String, String)> {
        let mut pairs = self.schema.ordering.clone();
        for (key, _) in &out.entries {
            for (sa, sb) in &self.schema.suffix_ordering {
                let Some(prefix) = key.strip_suffix(sa.as_str()) else {
                    continue;
                };
                let partner = format!("{prefix}{sb}");
                let listed = pairs.iter().any(|(a, b)| a == key && b == &partner);
                if out.contains(&partner) && !listed {
                    pairs.push((key.clone(), partner));
                }
            }
        }
        pairs
    }

    fn enforce_ordering(&self, out: &mut Emitter) {
        let pairs = self.ordering_pairs(out);
        // moving one key can break a pair already handled; a pass with no
        // moves means every pair holds
        for _ in 0..=pairs.len() {
            let mut moved = false;
            for (a, b) in &pairs {
                if let (Some(pa), Some(pb)) = (out.position(a), out.position(b)) {
                    if pa > pb {
                        let entry = out.entries.remove(pa);
                        out.entries.insert(pb, entry);
                        moved = true;
                    }
                }
            }
            if !moved {
                return;
            }
        }
        warn!("ordering pairs contradict each other; some pairs are left unsatisfied");
    }
}

fn normalise_color_name(name: &str) -> String {
    ColorCategory::from_name(name).map_or_else(|| name.to_string(), |c| c.as_str().to_string())
}

/// Category of the first coloured span in a factor's layout metadata.
///
/// Spans carry their colour as `style.color` (`[r, g, b]`), as `rgb`, or as
/// `hex`, depending on which tool wrote the ground truth.
fn span_color(entry: &Map<String, Value>) -> Option<ColorCategory> {
    let spans = ["_spans", "spans"]
        .iter()
        .find_map(|k| entry.get(*k).and_then(Value::as_array))?;
    spans.iter().find_map(|span| {
        let triple = span
            .get("style")
            .and_then(|s| s.get("color"))
            .or_else(|| span.get("rgb"))
            .and_then(|v| serde_json::from_value::<Rgb>(v.clone()).ok());
        triple
            .or_else(|| span.get("hex").and_then(Value::as_str).and_then(Rgb::from_hex))
            .map(categorize)
    })
}

/// Ordered output under construction.
#[derive(Debug, Default)]
struct Emitter {
    entries: Vec<(String, Value)>,
}

impl Emitter {
    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    fn has_value(&self, key: &str) -> bool {
        self.position(key)
            .is_some_and(|i| !self.entries[i].1.is_null())
    }

    /// Key taken verbatim from the source: replaces a derived value in place.
    fn push_source(&mut self, key: String, value: Value) {
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Key produced by alias resolution or flattening: never overrides.
    fn push_derived(&mut self, key: String, value: Value) {
        if !self.contains(&key) {
            self.entries.push((key, value));
        }
    }

    /// Set in place or append.
    fn set(&mut self, key: &str, value: Value) {
        self.push_source(key.to_string(), value);
    }
}
