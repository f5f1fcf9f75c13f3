//! Pipeline stages for span-to-ground-truth extraction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own. The builder and canonicaliser in [`crate::convert`] chain them.
//!
//! ## Data Flow
//!
//! ```text
//! spans ──▶ lines ──▶ fields ──▶ ground truth ──▶ canonical
//!          (rows)   (labels)    (nested JSON)    (flat JSON)
//! ```
//!
//! 1. [`lines`]     group positioned spans into rows and column fragments
//! 2. [`fields`]    map lines onto semantic fields with a pluggable strategy;
//!    [`parse`], [`color`] and [`factors`] are its helpers
//! 3. [`canonical`] flatten, alias, default and order a ground-truth record
//!    according to the canonical schema tables

pub mod canonical;
pub mod color;
pub mod factors;
pub mod fields;
pub mod lines;
pub mod parse;
