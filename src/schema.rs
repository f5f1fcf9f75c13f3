//! Versioned canonical-schema tables.
//!
//! Everything the canonicalizer knows about key names lives here as plain
//! data: legacy aliases, nested categories and how to flatten them, default
//! values, pairwise ordering constraints, required fields and the markers
//! that identify transient layout metadata. Evolving the canonical shape is a
//! matter of editing (or loading) a [`CanonicalSchema`], not of touching the
//! canonicalizer itself.
//!
//! [`CanonicalSchema::default()`] is version 1, the shape downstream training
//! jobs currently ingest.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Version of the built-in tables returned by [`CanonicalSchema::default`].
pub const SCHEMA_VERSION: u32 = 1;

/// Legacy names accepted for one canonical key.
///
/// When the canonical key is absent, the first alias present in the input
/// (in list order) supplies the value. Aliases never reach the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasGroup {
    pub canonical: String,
    pub aliases: Vec<String>,
}

/// One flat output key produced from a nested category object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryField {
    /// Output key, e.g. `revolving_open_count`.
    pub key: String,
    /// Sub-keys of the nested object to read, first present non-null wins.
    pub from: Vec<String>,
}

/// How to flatten one nested category.
///
/// Fields are emitted in declaration order, so count-like sub-keys are
/// declared before total-like ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub source: String,
    pub fields: Vec<CategoryField>,
}

impl CategoryRule {
    /// Whether a flat scalar under `source` is already the canonical value.
    pub fn passes_scalar_through(&self) -> bool {
        self.fields.iter().any(|f| f.key == self.source)
    }
}

/// Value emitted for `key` when the record has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefault {
    pub key: String,
    pub value: Value,
}

/// Alias, flattening, default and ordering tables for the canonicalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSchema {
    pub version: u32,
    #[serde(default)]
    pub aliases: Vec<AliasGroup>,
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
    #[serde(default)]
    pub defaults: Vec<FieldDefault>,
    /// `(a, b)`: when both are present, `a` is emitted before `b`.
    #[serde(default)]
    pub ordering: Vec<(String, String)>,
    /// `(sa, sb)`: for any prefix `p`, `p + sa` is emitted before `p + sb`
    /// when both are present, whether or not `p` is a known category.
    #[serde(default = "default_suffix_ordering")]
    pub suffix_ordering: Vec<(String, String)>,
    #[serde(default)]
    pub required: Vec<String>,
    /// Top-level keys dropped unconditionally.
    #[serde(default)]
    pub transient_keys: Vec<String>,
    /// Suffixes marking per-field layout metadata (`credit_score_bbox`).
    #[serde(default = "default_layout_suffixes")]
    pub layout_suffixes: Vec<String>,
    /// Layout sub-fields of a credit-factor entry. Keys starting with `_`
    /// are always treated as layout markers too.
    #[serde(default = "default_factor_layout_keys")]
    pub factor_layout_keys: Vec<String>,
    #[serde(default = "default_factors_key")]
    pub factors_key: String,
    /// Single-key wrapper object unwrapped before anything else.
    #[serde(default)]
    pub wrapper_key: Option<String>,
}

fn default_layout_suffixes() -> Vec<String> {
    strings(&["_bbox", "_page", "_spans"])
}

fn default_suffix_ordering() -> Vec<(String, String)> {
    vec![("_open_count".into(), "_open_total".into())]
}

fn default_factor_layout_keys() -> Vec<String> {
    strings(&["bbox", "page", "spans", "canonical_key"])
}

fn default_factors_key() -> String {
    "credit_factors".to_string()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn field(key: &str, from: &[&str]) -> CategoryField {
    CategoryField {
        key: key.to_string(),
        from: strings(from),
    }
}

/// `{count, total}` account category flattened under `prefix`.
fn account_category(source: &str, prefix: &str) -> CategoryRule {
    CategoryRule {
        source: source.to_string(),
        fields: vec![
            field(&format!("{prefix}_count"), &["count"]),
            field(&format!("{prefix}_total"), &["total", "amount"]),
        ],
    }
}

impl Default for CanonicalSchema {
    fn default() -> Self {
        let accounts = [
            ("revolving_accounts_open", "revolving_open"),
            ("installment_accounts_open", "installment_open"),
            ("real_estate_open", "real_estate_open"),
            ("line_of_credit_accounts_open", "line_of_credit_accounts_open"),
            ("miscellaneous_accounts_open", "miscellaneous_accounts_open"),
        ];

        let mut categories: Vec<CategoryRule> = accounts
            .iter()
            .map(|(source, prefix)| account_category(source, prefix))
            .collect();
        categories.push(CategoryRule {
            source: "collections".into(),
            fields: vec![
                field("collections_open", &["open"]),
                field("collections_closed", &["closed"]),
            ],
        });
        categories.push(CategoryRule {
            source: "late_pays".into(),
            fields: vec![
                field("late_pays_lt2yr", &["lt2yr", "last_2_years"]),
                field("late_pays_gt2yr", &["gt2yr", "last_over_2_years"]),
            ],
        });
        categories.push(CategoryRule {
            source: "credit_score".into(),
            fields: vec![
                field("credit_score", &["value"]),
                field("credit_score_color", &["color"]),
            ],
        });
        categories.push(CategoryRule {
            source: "credit_card_open_totals".into(),
            fields: vec![
                field("credit_card_open_totals_balance", &["balance"]),
                field("credit_card_open_totals_limit", &["limit"]),
                field("credit_card_open_totals_percent", &["percent", "Percent"]),
                field("credit_card_open_totals_payment", &["payment", "Payment"]),
            ],
        });

        let mut ordering: Vec<(String, String)> = accounts
            .iter()
            .map(|(_, prefix)| (format!("{prefix}_count"), format!("{prefix}_total")))
            .collect();
        ordering.push(("late_pays_lt2yr".into(), "late_pays_gt2yr".into()));

        Self {
            version: SCHEMA_VERSION,
            aliases: vec![
                AliasGroup {
                    canonical: "inquiries_lt6mo".into(),
                    aliases: strings(&["inquiries_last_6_months", "inquiries_6mo"]),
                },
                AliasGroup {
                    canonical: "collections_open".into(),
                    aliases: strings(&["collections_open_count"]),
                },
                AliasGroup {
                    canonical: "collections_closed".into(),
                    aliases: strings(&["collections_closed_count"]),
                },
            ],
            categories,
            defaults: vec![
                FieldDefault {
                    key: "late_pays_lt2yr".into(),
                    value: Value::from(0),
                },
                FieldDefault {
                    key: "late_pays_gt2yr".into(),
                    value: Value::from(0),
                },
            ],
            ordering,
            suffix_ordering: default_suffix_ordering(),
            required: Vec::new(),
            transient_keys: strings(&["pdf_file", "all_lines_obj", "candidate_scores"]),
            layout_suffixes: default_layout_suffixes(),
            factor_layout_keys: default_factor_layout_keys(),
            factors_key: default_factors_key(),
            wrapper_key: Some("rec".into()),
        }
    }
}

impl CanonicalSchema {
    /// Parse a schema document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let schema: CanonicalSchema = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Check the tables for contradictions.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut alias_owner: HashSet<&str> = HashSet::new();
        for group in &self.aliases {
            if group.canonical.is_empty() {
                return Err(SchemaError::InvalidSchema(
                    "alias group with an empty canonical key".into(),
                ));
            }
            if group.aliases.is_empty() {
                return Err(SchemaError::InvalidSchema(format!(
                    "alias group '{}' lists no aliases",
                    group.canonical
                )));
            }
            for alias in &group.aliases {
                if alias == &group.canonical {
                    return Err(SchemaError::InvalidSchema(format!(
                        "'{alias}' is listed as an alias of itself"
                    )));
                }
                if !alias_owner.insert(alias.as_str()) {
                    return Err(SchemaError::InvalidSchema(format!(
                        "alias '{alias}' belongs to more than one group"
                    )));
                }
            }
        }

        let mut sources: HashSet<&str> = HashSet::new();
        let mut outputs: HashSet<&str> = HashSet::new();
        for rule in &self.categories {
            if !sources.insert(rule.source.as_str()) {
                return Err(SchemaError::InvalidSchema(format!(
                    "category '{}' declared twice",
                    rule.source
                )));
            }
            if rule.fields.is_empty() {
                return Err(SchemaError::InvalidSchema(format!(
                    "category '{}' has no fields",
                    rule.source
                )));
            }
            for f in &rule.fields {
                if f.from.is_empty() {
                    return Err(SchemaError::InvalidSchema(format!(
                        "field '{}' of category '{}' reads no sub-keys",
                        f.key, rule.source
                    )));
                }
                if !outputs.insert(f.key.as_str()) {
                    return Err(SchemaError::InvalidSchema(format!(
                        "output key '{}' produced by more than one category",
                        f.key
                    )));
                }
            }
        }

        for (a, b) in &self.ordering {
            if a == b {
                return Err(SchemaError::InvalidSchema(format!(
                    "ordering pair ('{a}', '{a}') orders a key against itself"
                )));
            }
        }
        if let Some(key) = ordering_cycle(&self.ordering) {
            return Err(SchemaError::InvalidSchema(format!(
                "ordering pairs form a cycle through '{key}'"
            )));
        }
        for (a, b) in &self.suffix_ordering {
            let overlapping = a.ends_with(b.as_str()) || b.ends_with(a.as_str());
            if a.is_empty() || b.is_empty() || overlapping {
                return Err(SchemaError::InvalidSchema(format!(
                    "suffix ordering ('{a}', '{b}') cannot order two distinct keys"
                )));
            }
        }

        if self.layout_suffixes.iter().any(|s| s.is_empty()) {
            return Err(SchemaError::InvalidSchema(
                "empty layout suffix would match every key".into(),
            ));
        }
        if self.factors_key.is_empty() {
            return Err(SchemaError::InvalidSchema("empty factors key".into()));
        }
        Ok(())
    }

    pub fn category(&self, key: &str) -> Option<&CategoryRule> {
        self.categories.iter().find(|c| c.source == key)
    }

    /// Alias group that `key` belongs to, as canonical key or as alias.
    pub fn alias_group(&self, key: &str) -> Option<&AliasGroup> {
        self.aliases
            .iter()
            .find(|g| g.canonical == key || g.aliases.iter().any(|a| a == key))
    }

    pub fn default_for(&self, key: &str) -> Option<&Value> {
        self.defaults.iter().find(|d| d.key == key).map(|d| &d.value)
    }

    pub fn is_transient(&self, key: &str) -> bool {
        self.transient_keys.iter().any(|k| k == key)
    }

    /// Split `credit_score_bbox` into `("credit_score", "_bbox")`.
    ///
    /// A bare suffix (`_page`) is a nested layout marker with an empty base.
    pub fn split_layout_key<'a>(&self, key: &'a str) -> Option<(&'a str, &'a str)> {
        self.layout_suffixes
            .iter()
            .find(|s| key.ends_with(s.as_str()))
            .map(|s| key.split_at(key.len() - s.len()))
    }

    pub fn is_layout_key(&self, key: &str) -> bool {
        self.split_layout_key(key).is_some()
    }

    pub fn is_factor_layout_key(&self, key: &str) -> bool {
        key.starts_with('_') || self.factor_layout_keys.iter().any(|k| k == key)
    }
}

/// A key on a cycle of `(before, after)` pairs, if any.
///
/// Repeatedly removes keys with nothing left that must precede them; whatever
/// survives sits on or behind a cycle.
fn ordering_cycle(pairs: &[(String, String)]) -> Option<&str> {
    let mut remaining: Vec<(&str, &str)> =
        pairs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    loop {
        let blocked: HashSet<&str> = remaining.iter().map(|&(_, b)| b).collect();
        let before = remaining.len();
        remaining.retain(|&(a, _)| blocked.contains(a));
        if remaining.is_empty() {
            return None;
        }
        if remaining.len() == before {
            return remaining.first().map(|&(a, _)| a);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_is_valid() {
        let s = CanonicalSchema::default();
        assert_eq!(s.version, SCHEMA_VERSION);
        s.validate().unwrap();
    }

    #[test]
    fn default_tables_cover_known_categories() {
        let s = CanonicalSchema::default();
        let loc = s.category("line_of_credit_accounts_open").unwrap();
        let keys: Vec<&str> = loc.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "line_of_credit_accounts_open_count",
                "line_of_credit_accounts_open_total"
            ]
        );
        assert_eq!(
            s.category("revolving_accounts_open").unwrap().fields[0].key,
            "revolving_open_count"
        );
        assert!(s.category("credit_score").unwrap().passes_scalar_through());
        assert!(!s.category("late_pays").unwrap().passes_scalar_through());
    }

    #[test]
    fn alias_lookup_by_member() {
        let s = CanonicalSchema::default();
        assert_eq!(
            s.alias_group("inquiries_6mo").unwrap().canonical,
            "inquiries_lt6mo"
        );
        assert_eq!(
            s.alias_group("inquiries_lt6mo").unwrap().canonical,
            "inquiries_lt6mo"
        );
        assert!(s.alias_group("age").is_none());
    }

    #[test]
    fn layout_key_split() {
        let s = CanonicalSchema::default();
        assert_eq!(
            s.split_layout_key("credit_score_bbox"),
            Some(("credit_score", "_bbox"))
        );
        assert_eq!(s.split_layout_key("_page"), Some(("", "_page")));
        assert!(!s.is_layout_key("credit_score_color"));
        assert!(s.is_factor_layout_key("_spans"));
        assert!(s.is_factor_layout_key("canonical_key"));
        assert!(!s.is_factor_layout_key("hex"));
    }

    #[test]
    fn from_json_fills_marker_defaults() {
        let s = CanonicalSchema::from_json_str(
            r#"{"version": 2, "aliases": [{"canonical": "a", "aliases": ["b"]}]}"#,
        )
        .unwrap();
        assert_eq!(s.version, 2);
        assert_eq!(s.layout_suffixes, ["_bbox", "_page", "_spans"]);
        assert_eq!(s.factors_key, "credit_factors");
        assert!(s.categories.is_empty());
        assert!(s.wrapper_key.is_none());
        assert_eq!(
            s.suffix_ordering,
            [("_open_count".to_string(), "_open_total".to_string())]
        );
    }

    #[test]
    fn rejects_self_ordering() {
        let mut s = CanonicalSchema::default();
        s.ordering.push(("x".into(), "x".into()));
        assert!(matches!(s.validate(), Err(SchemaError::InvalidSchema(_))));
    }

    #[test]
    fn test_rejects_ordering_cycle() {
        let mut s = CanonicalSchema::default();
        s.ordering.push(("late_pays_gt2yr".into(), "late_pays_lt2yr".into()));
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"), "got: {err}");

        let mut s = CanonicalSchema::default();
        s.ordering = vec![
            ("a".into(), "b".into()),
            ("b".into(), "c".into()),
            ("c".into(), "a".into()),
        ];
        assert!(matches!(s.validate(), Err(SchemaError::InvalidSchema(_))));
    }

    #[test]
    fn test_chains_without_cycle_are_accepted() {
        let mut s = CanonicalSchema::default();
        s.ordering = vec![
            ("a".into(), "b".into()),
            ("b".into(), "c".into()),
            ("a".into(), "c".into()),
        ];
        s.validate().unwrap();
        assert_eq!(ordering_cycle(&s.ordering), None);
    }

    #[test]
    fn test_rejects_degenerate_suffix_ordering() {
        let mut s = CanonicalSchema::default();
        s.suffix_ordering.push(("_total".into(), "_open_total".into()));
        assert!(matches!(s.validate(), Err(SchemaError::InvalidSchema(_))));
    }

    #[test]
    fn rejects_duplicate_output_key() {
        let mut s = CanonicalSchema::default();
        s.categories.push(CategoryRule {
            source: "revolving".into(),
            fields: vec![field("revolving_open_count", &["n"])],
        });
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("revolving_open_count"), "got: {err}");
    }

    #[test]
    fn rejects_empty_alias_list() {
        let err = CanonicalSchema::from_json_str(
            r#"{"version": 1, "aliases": [{"canonical": "a", "aliases": []}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidSchema(_)));
    }

    #[test]
    fn malformed_json_is_json_error() {
        let err = CanonicalSchema::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, SchemaError::Json(_)));
    }

    #[test]
    fn schema_serde_roundtrip() {
        let s = CanonicalSchema::default();
        let text = serde_json::to_string(&s).unwrap();
        assert_eq!(CanonicalSchema::from_json_str(&text).unwrap(), s);
    }
}
