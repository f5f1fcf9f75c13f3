//! Error types for the credit-gt library.
//!
//! Two stages, two error types:
//!
//! * [`ExtractionError`]: the ground-truth builder could not map enough of
//!   the document's text spans onto known fields. The input is most likely not
//!   a supported credit-summary layout.
//!
//! * [`SchemaError`]: the canonicalizer met a ground-truth record it cannot
//!   turn into a well-formed canonical record, or a schema table is
//!   inconsistent.
//!
//! [`CreditGtError`] wraps both for the combined
//! [`crate::convert::extract_to_canonical`] entry point. Neither stage retries
//! or returns partial output; the caller decides what to do with the failure.

use thiserror::Error;

/// Failure while building a ground-truth record from positioned spans.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    /// The document has text but too few spans landed on recognised fields.
    #[error(
        "only {mapped} field(s) mapped from {spans} span(s); at least {required} required\n\
         The document is probably not a supported credit-summary layout."
    )]
    TooFewFields {
        mapped: usize,
        required: usize,
        spans: usize,
    },

    /// A span carried a bounding box that cannot be placed on a page.
    #[error("span #{index} has an invalid bounding box: {reason}")]
    InvalidSpan { index: usize, reason: String },
}

/// Failure while canonicalising a ground-truth record or loading a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A required field has no value after alias resolution and no default.
    #[error("required field '{field}' has no resolvable value and no default")]
    MissingRequiredField { field: String },

    /// A field holds a value of the wrong JSON shape.
    #[error("field '{field}' should be {expected}, found {found}")]
    UnexpectedShape {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The schema tables contradict each other.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// The schema document is not valid JSON for [`crate::schema::CanonicalSchema`].
    #[error("Failed to parse schema: {0}")]
    Json(#[from] serde_json::Error),
}

/// Umbrella error for the end-to-end spans → canonical record path.
#[derive(Debug, Error)]
pub enum CreditGtError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Name of a JSON value's shape, for [`SchemaError::UnexpectedShape`].
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_few_fields_display() {
        let e = ExtractionError::TooFewFields {
            mapped: 0,
            required: 3,
            spans: 41,
        };
        let msg = e.to_string();
        assert!(msg.contains("only 0 field(s)"), "got: {msg}");
        assert!(msg.contains("41 span(s)"), "got: {msg}");
        assert!(msg.contains("at least 3"), "got: {msg}");
    }

    #[test]
    fn missing_field_display() {
        let e = SchemaError::MissingRequiredField {
            field: "credit_score".into(),
        };
        assert!(e.to_string().contains("'credit_score'"));
    }

    #[test]
    fn unexpected_shape_display() {
        let e = SchemaError::UnexpectedShape {
            field: "late_pays".into(),
            expected: "an object",
            found: json_kind(&serde_json::json!([1, 2])),
        };
        assert_eq!(
            e.to_string(),
            "field 'late_pays' should be an object, found an array"
        );
    }

    #[test]
    fn umbrella_is_transparent() {
        let e: CreditGtError = ExtractionError::InvalidSpan {
            index: 4,
            reason: "x0 > x1".into(),
        }
        .into();
        assert_eq!(e.to_string(), "span #4 has an invalid bounding box: x0 > x1");
    }
}
