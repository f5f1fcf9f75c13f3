//! # credit-gt
//!
//! Build layout-annotated ground truth from the text spans of credit-summary
//! PDFs, and canonicalise it into one stable flat JSON schema for model
//! training.
//!
//! ## Why this crate?
//!
//! Ground truth for credit summaries accumulates over years of tooling: some
//! records nest `{count, total}` per account category, some use
//! `inquiries_6mo` where others say `inquiries_last_6_months`, some carry
//! bounding boxes for every value. Training code wants one shape. This crate
//! produces that shape from either raw spans or any historical record, and
//! canonicalising a canonical record changes nothing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! spans (from any PDF text library)
//!  │
//!  ├─ 1. Lines      group spans into rows and column fragments
//!  ├─ 2. Fields     label-proximity rules → nested ground truth
//!  ├─ 3. Canonical  unwrap, alias, flatten, default, simplify factors
//!  └─ 4. Output     ordered flat JSON record
//! ```
//!
//! Reading the PDF is left to the caller: any library that reports text with
//! a page index and a bounding box can feed [`PositionedSpan`]s in.
//!
//! ## Quick Start
//!
//! ```rust
//! use credit_gt::{extract_to_canonical, BBox, ExtractionConfig, PositionedSpan};
//!
//! let spans = vec![
//!     PositionedSpan::new("Age", 0, BBox::new(40.0, 60.0, 80.0, 72.0)),
//!     PositionedSpan::new("49", 0, BBox::new(360.0, 60.0, 380.0, 72.0)),
//! ];
//! let record = extract_to_canonical(&spans, &ExtractionConfig::default())?;
//! assert_eq!(record.get("age"), Some(&serde_json::json!(49)));
//! assert_eq!(record.get("late_pays_lt2yr"), Some(&serde_json::json!(0)));
//! # Ok::<(), credit_gt::CreditGtError>(())
//! ```
//!
//! Stored ground truth goes through [`Canonicalizer`] alone:
//!
//! ```rust
//! use credit_gt::{Canonicalizer, GroundTruthRecord};
//! use serde_json::json;
//!
//! let gt = GroundTruthRecord::from_value(json!({
//!     "inquiries_6mo": 1,
//!     "line_of_credit_accounts_open": {"count": 3, "total": 9000}
//! }))?;
//! let canonical = Canonicalizer::default().canonicalize(&gt)?;
//! assert_eq!(
//!     canonical.keys().collect::<Vec<_>>(),
//!     [
//!         "inquiries_lt6mo",
//!         "line_of_credit_accounts_open_count",
//!         "line_of_credit_accounts_open_total",
//!         "late_pays_lt2yr",
//!         "late_pays_gt2yr",
//!     ]
//! );
//! # Ok::<(), credit_gt::SchemaError>(())
//! ```
//!
//! ## Logging
//!
//! The library emits [`tracing`] events and never installs a subscriber.
//! `info` marks each built record, `warn` marks rejected documents and
//! generically flattened objects, `debug` traces individual decisions.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod span;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, MissingFieldPolicy};
pub use convert::{
    build_ground_truth, canonicalize, extract_to_canonical, Canonicalizer, GroundTruthBuilder,
};
pub use error::{CreditGtError, ExtractionError, SchemaError};
pub use output::{CanonicalRecord, CreditFactorEntry, FieldLayout, GroundTruthRecord};
pub use pipeline::color::ColorCategory;
pub use pipeline::fields::{FieldGrouping, FieldSink, LabelProximity, SharedGrouping};
pub use pipeline::lines::{LineIndex, TextLine};
pub use schema::{AliasGroup, CanonicalSchema, CategoryField, CategoryRule, FieldDefault, SCHEMA_VERSION};
pub use span::{BBox, PositionedSpan, Rgb, SpanStyle};
