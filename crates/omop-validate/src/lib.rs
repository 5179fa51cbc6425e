//! Validation Gate.
//!
//! Read-only checks over loaded OMOP tables: required columns, primary-key
//! uniqueness, foreign-key satisfaction and date ordering. Violations are
//! reported, never repaired.

mod checks;
mod gate;

pub use gate::ValidationGate;
