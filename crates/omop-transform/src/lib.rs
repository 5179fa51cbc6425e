//! Row Transformer.
//!
//! This crate turns eCRF source records into OMOP CDM row drafts:
//!
//! - **transformer**: per-record rule dispatch, fan-out and completeness checks
//! - **derive**: named pure functions for `derived` rules
//! - **surrogate**: deterministic surrogate keys
//! - **error**: per-record error taxonomy

pub mod derive;
pub mod error;
pub mod surrogate;
pub mod transformer;

pub use error::RecordError;
pub use surrogate::surrogate_key;
pub use transformer::{ConceptLookup, RecordOutcome, RecordOutput, RowTransformer};
