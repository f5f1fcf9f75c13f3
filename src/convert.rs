//! Public entry points: spans → ground truth → canonical record.
//!
//! The two stages are independent. [`GroundTruthBuilder`] turns one
//! document's positioned spans into a [`GroundTruthRecord`];
//! [`Canonicalizer`] turns any ground-truth record, freshly built or loaded
//! from disk, into a [`CanonicalRecord`]. [`extract_to_canonical`] chains
//! them for callers that only want the flat output.
//!
//! Both types are `Send + Sync` and hold no per-document state, so a single
//! instance can serve many documents from many threads.

use crate::config::ExtractionConfig;
use crate::error::{CreditGtError, ExtractionError, SchemaError};
use crate::output::{CanonicalRecord, GroundTruthRecord};
use crate::pipeline::fields::{FieldSink, LabelProximity, SharedGrouping};
use crate::pipeline::lines::{group_lines, LineIndex};
use crate::span::PositionedSpan;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use crate::pipeline::canonical::Canonicalizer;

/// Builds ground-truth records with a pluggable field-grouping strategy.
#[derive(Clone)]
pub struct GroundTruthBuilder {
    config: ExtractionConfig,
    strategy: SharedGrouping,
}

impl fmt::Debug for GroundTruthBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroundTruthBuilder")
            .field("config", &self.config)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

impl GroundTruthBuilder {
    /// Builder using the [`LabelProximity`] strategy.
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            strategy: Arc::new(LabelProximity),
        }
    }

    /// Replace the field-grouping strategy.
    pub fn with_strategy(mut self, strategy: SharedGrouping) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Build the ground-truth record for one document.
    ///
    /// Deterministic: the same spans and configuration always produce the
    /// same record, key order included.
    ///
    /// # Errors
    /// - [`ExtractionError::InvalidSpan`] for a span with a non-finite or
    ///   inverted bounding box
    /// - [`ExtractionError::TooFewFields`] when a non-empty document maps
    ///   fewer than `min_mapped_fields` fields
    pub fn build(&self, spans: &[PositionedSpan]) -> Result<GroundTruthRecord, ExtractionError> {
        let start = Instant::now();

        for (index, span) in spans.iter().enumerate() {
            span.bbox
                .validate()
                .map_err(|reason| ExtractionError::InvalidSpan { index, reason })?;
        }
        if spans.is_empty() {
            debug!("no spans, empty ground truth");
            return Ok(GroundTruthRecord::new());
        }

        let lines = group_lines(spans, self.config.line_tolerance, self.config.max_word_gap);
        let index = LineIndex::new(lines);
        debug!(spans = spans.len(), lines = index.len(), "grouped spans into lines");

        let mut sink = FieldSink::new(
            self.config.include_layout,
            self.config.include_candidate_scores,
        );
        self.strategy.group(&index, &mut sink);

        let mapped = sink.mapped();
        if mapped < self.config.min_mapped_fields {
            warn!(
                mapped,
                required = self.config.min_mapped_fields,
                strategy = self.strategy.name(),
                "too few fields mapped"
            );
            return Err(ExtractionError::TooFewFields {
                mapped,
                required: self.config.min_mapped_fields,
                spans: spans.len(),
            });
        }

        let record = sink.into_record();
        info!(
            mapped,
            keys = record.len(),
            strategy = self.strategy.name(),
            duration_ms = start.elapsed().as_millis() as u64,
            "ground truth built"
        );
        Ok(record)
    }
}

/// Build a ground-truth record with the default strategy.
pub fn build_ground_truth(
    spans: &[PositionedSpan],
    config: &ExtractionConfig,
) -> Result<GroundTruthRecord, ExtractionError> {
    GroundTruthBuilder::new(config.clone()).build(spans)
}

/// Canonicalise a ground-truth record with the configuration's schema,
/// `include_spans` flag and missing-field policy.
pub fn canonicalize(
    record: &GroundTruthRecord,
    config: &ExtractionConfig,
) -> Result<CanonicalRecord, SchemaError> {
    Canonicalizer::from_config(config).canonicalize(record)
}

/// Spans straight to a canonical record.
///
/// The build honours `include_layout` and the canonicalisation honours
/// `include_spans`, so with both off no layout metadata is ever produced.
pub fn extract_to_canonical(
    spans: &[PositionedSpan],
    config: &ExtractionConfig,
) -> Result<CanonicalRecord, CreditGtError> {
    let record = build_ground_truth(spans, config)?;
    let canonical = canonicalize(&record, config)?;
    debug!(keys = canonical.len(), "canonical record ready");
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fields::FieldGrouping;
    use crate::span::{BBox, Rgb};
    use serde_json::json;
    use std::thread;

    fn left(text: &str, row: usize) -> PositionedSpan {
        let y = 60.0 + row as f32 * 16.0;
        PositionedSpan::new(text, 0, BBox::new(40.0, y, 240.0, y + 12.0))
    }

    fn right(text: &str, row: usize) -> PositionedSpan {
        let y = 60.0 + row as f32 * 16.0;
        PositionedSpan::new(text, 0, BBox::new(360.0, y, 480.0, y + 12.0))
    }

    fn small_doc() -> Vec<PositionedSpan> {
        vec![
            left("Credit Score", 0),
            right("712", 0).with_color(Rgb(30, 170, 60)),
            left("Age", 1),
            right("49", 1),
            left("Revolving Accounts (Open)", 2),
            right("3 / $9,000", 2),
        ]
    }

    #[test]
    fn test_build_small_document() {
        let gt = build_ground_truth(&small_doc(), &ExtractionConfig::default()).unwrap();
        assert_eq!(gt.get("age"), Some(&json!(49)));
        assert_eq!(gt.get("credit_score"), Some(&json!(712)));
        assert_eq!(gt.get("credit_score_color"), Some(&json!("green")));
        assert_eq!(
            gt.get("revolving_accounts_open"),
            Some(&json!({"count": 3, "total": 9000}))
        );
    }

    #[test]
    fn test_empty_spans_give_empty_record() {
        let config = ExtractionConfig::builder().min_mapped_fields(5).build().unwrap();
        let gt = build_ground_truth(&[], &config).unwrap();
        assert!(gt.is_empty());
    }

    #[test]
    fn test_too_few_fields() {
        let config = ExtractionConfig::builder().min_mapped_fields(3).build().unwrap();
        let spans = vec![left("Age", 0), right("49", 0)];
        let err = build_ground_truth(&spans, &config).unwrap_err();
        assert_eq!(
            err,
            ExtractionError::TooFewFields {
                mapped: 1,
                required: 3,
                spans: 2
            }
        );
    }

    #[test]
    fn test_unrecognised_document_fails_default_minimum() {
        let spans = vec![left("Quarterly newsletter", 0)];
        let err = build_ground_truth(&spans, &ExtractionConfig::default()).unwrap_err();
        assert!(matches!(err, ExtractionError::TooFewFields { mapped: 0, .. }));
    }

    #[test]
    fn test_invalid_span_reports_index() {
        let mut spans = small_doc();
        spans.push(PositionedSpan::new("bad", 0, BBox::new(10.0, 5.0, 2.0, 9.0)));
        let err = build_ground_truth(&spans, &ExtractionConfig::default()).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidSpan { index: 6, .. }));
    }

    #[test]
    fn test_build_is_deterministic() {
        let config = ExtractionConfig::debug_layout();
        let mut spans = small_doc();
        let a = build_ground_truth(&spans, &config).unwrap();
        spans.reverse();
        let b = build_ground_truth(&spans, &config).unwrap();
        assert_eq!(a.keys().collect::<Vec<_>>(), b.keys().collect::<Vec<_>>());
        assert_eq!(a.get("age"), b.get("age"));
    }

    struct Fixed;

    impl FieldGrouping for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn group(&self, _lines: &LineIndex, sink: &mut FieldSink) {
            sink.set("inquiries_6mo", 4, &[]);
        }
    }

    #[test]
    fn test_custom_strategy_feeds_canonicalizer() {
        let builder = GroundTruthBuilder::new(ExtractionConfig::default()).with_strategy(Arc::new(Fixed));
        assert_eq!(builder.strategy_name(), "fixed");
        assert!(format!("{builder:?}").contains("fixed"));

        let gt = builder.build(&small_doc()).unwrap();
        let canonical = canonicalize(&gt, builder.config()).unwrap();
        assert_eq!(
            canonical.to_value(),
            json!({"inquiries_lt6mo": 4, "late_pays_lt2yr": 0, "late_pays_gt2yr": 0})
        );
    }

    #[test]
    fn test_extract_to_canonical_flattens() {
        let record = extract_to_canonical(&small_doc(), &ExtractionConfig::default()).unwrap();
        assert_eq!(
            record.keys().collect::<Vec<_>>(),
            [
                "age",
                "credit_score",
                "credit_score_color",
                "revolving_open_count",
                "revolving_open_total",
                "late_pays_lt2yr",
                "late_pays_gt2yr"
            ]
        );
    }

    #[test]
    fn test_extract_to_canonical_wraps_errors() {
        let config = ExtractionConfig::builder().min_mapped_fields(10).build().unwrap();
        let err = extract_to_canonical(&small_doc(), &config).unwrap_err();
        assert!(matches!(err, CreditGtError::Extraction(ExtractionError::TooFewFields { .. })));
    }

    #[test]
    fn test_shared_across_threads() {
        let builder = Arc::new(GroundTruthBuilder::new(ExtractionConfig::default()));
        let canonicalizer = Arc::new(Canonicalizer::default());
        let expected = canonicalizer
            .canonicalize(&builder.build(&small_doc()).unwrap())
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let builder = Arc::clone(&builder);
                let canonicalizer = Arc::clone(&canonicalizer);
                thread::spawn(move || {
                    let gt = builder.build(&small_doc()).unwrap();
                    canonicalizer.canonicalize(&gt).unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), expected);
        }
    }
}
