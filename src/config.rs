//! Configuration types for ground-truth extraction and canonicalisation.
//!
//! Both stages read from one [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. A config is plain data: it can be cloned into
//! worker threads, serialised next to a batch's outputs, and compared between
//! runs.

use crate::error::CreditGtError;
use crate::schema::CanonicalSchema;
use serde::{Deserialize, Serialize};

/// Configuration for building and canonicalising ground truth.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use credit_gt::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .include_layout(true)
///     .min_mapped_fields(3)
///     .build()
///     .unwrap();
/// assert!(config.include_layout);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Attach `<field>_page`, `<field>_bbox` and `<field>_spans` to every
    /// value the builder maps. Default: false.
    pub include_layout: bool,

    /// Keep layout metadata in the canonical record instead of stripping it.
    /// Default: false.
    pub include_spans: bool,

    /// Emit `candidate_scores` diagnostics for credit factors. Default: false.
    ///
    /// The canonicalizer always drops them.
    pub include_candidate_scores: bool,

    /// Minimum number of mapped fields for a non-empty document. Default: 1.
    ///
    /// Below this the builder returns
    /// [`crate::error::ExtractionError::TooFewFields`]. Raise it when batches
    /// mix credit summaries with unrelated PDFs.
    pub min_mapped_fields: usize,

    /// Vertical overlap ratio at which two spans share a text row.
    /// Range: 0.05–1.0. Default: 0.5.
    pub line_tolerance: f32,

    /// Horizontal gap, in points, that splits a row into separate column
    /// fragments. Default: 48.0.
    ///
    /// Label/value tables on credit summaries put the value a few hundred
    /// points right of its label; word gaps inside one phrase are well under
    /// 20 points.
    pub max_word_gap: f32,

    /// What to do when a required canonical field cannot be resolved.
    /// Default: [`MissingFieldPolicy::Fail`].
    pub missing_required: MissingFieldPolicy,

    /// Alias, flattening, default and ordering tables. Default: version 1.
    pub schema: CanonicalSchema,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            include_layout: false,
            include_spans: false,
            include_candidate_scores: false,
            min_mapped_fields: 1,
            line_tolerance: 0.5,
            max_word_gap: 48.0,
            missing_required: MissingFieldPolicy::default(),
            schema: CanonicalSchema::default(),
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Layout annotation on for the builder and kept by the canonicalizer.
    pub fn debug_layout() -> Self {
        Self {
            include_layout: true,
            include_spans: true,
            ..Self::default()
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn include_layout(mut self, v: bool) -> Self {
        self.config.include_layout = v;
        self
    }

    pub fn include_spans(mut self, v: bool) -> Self {
        self.config.include_spans = v;
        self
    }

    pub fn include_candidate_scores(mut self, v: bool) -> Self {
        self.config.include_candidate_scores = v;
        self
    }

    pub fn min_mapped_fields(mut self, n: usize) -> Self {
        self.config.min_mapped_fields = n;
        self
    }

    pub fn line_tolerance(mut self, ratio: f32) -> Self {
        self.config.line_tolerance = ratio.clamp(0.05, 1.0);
        self
    }

    pub fn max_word_gap(mut self, points: f32) -> Self {
        self.config.max_word_gap = points;
        self
    }

    pub fn missing_required(mut self, policy: MissingFieldPolicy) -> Self {
        self.config.missing_required = policy;
        self
    }

    pub fn schema(mut self, schema: CanonicalSchema) -> Self {
        self.config.schema = schema;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, CreditGtError> {
        let c = &self.config;
        if !(0.05..=1.0).contains(&c.line_tolerance) {
            return Err(CreditGtError::InvalidConfig(format!(
                "line tolerance must be 0.05–1.0, got {}",
                c.line_tolerance
            )));
        }
        if !c.max_word_gap.is_finite() || c.max_word_gap < 1.0 {
            return Err(CreditGtError::InvalidConfig(format!(
                "max word gap must be ≥ 1 pt, got {}",
                c.max_word_gap
            )));
        }
        c.schema.validate()?;
        Ok(self.config)
    }
}

/// Handling of a required canonical field with no value and no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFieldPolicy {
    /// Return [`crate::error::SchemaError::MissingRequiredField`]. (default)
    #[default]
    Fail,
    /// Emit the field as `null`.
    Null,
}
