//! Shared data model for the eCRF to OMOP CDM pipeline.

pub mod error;
pub mod ids;
pub mod mapping;
pub mod options;
pub mod record;
pub mod report;
pub mod schema;
pub mod value;

pub use error::{ModelError, Result};
pub use ids::{ColumnName, TableName, TrialId, WILDCARD, normalize_field_name};
pub use mapping::{
    Arity, ConceptOutput, Derivation, KEY_SEPARATOR, RUN_SCOPE, RuleTransform, StaticRule,
    StructuralRule, TargetSlot, TransformKind, TrialScope, ValuePattern,
};
pub use options::{RetryPolicy, RunOptions, UnmappedPolicy};
pub use record::{
    DraftsByTable, Provenance, RUN_FIELD_RELEASE_DATE, RUN_FIELD_TRIAL, RowValues, SourceRecord,
    TargetRowDraft,
};
pub use report::{
    CheckKind, FieldCoverage, InputDigests, LoadReport, RecordErrorKind, RecordRejectionSample,
    RowRejection, RunReport, Severity, SourceTableSummary, TableLoadResult, TableStatus,
    UnmappedValue, UnmappedValueCount, ValidationReport, ValidationViolation,
};
pub use schema::{ColumnDef, ColumnType, ForeignKey, TableDef, TargetSchema};
pub use value::Value;
