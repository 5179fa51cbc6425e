//! Per-record errors. A record error rejects that record only; the run
//! continues with the next one.

use omop_model::{ColumnName, ColumnType, RecordErrorKind, TableName, TargetSlot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// A required target column has no value.
    #[error("{target}.{column} is required but no value was produced")]
    Incomplete {
        target: TargetSlot,
        column: ColumnName,
    },

    /// A source value does not fit the target column type.
    #[error("{target}.{column}: cannot use {raw:?} as {column_type}: {message}")]
    Coercion {
        target: TargetSlot,
        column: ColumnName,
        raw: String,
        column_type: ColumnType,
        message: String,
    },

    /// No static rule covers the value and the policy rejects the record.
    #[error("{target}.{column}: no concept mapping for {source_field}={raw_value:?}")]
    UnmappedValue {
        target: TargetSlot,
        column: ColumnName,
        source_field: String,
        raw_value: String,
        /// Placeholder concept the value would have been written as.
        concept_id: i64,
    },

    /// A derivation could not be evaluated on the record's values.
    #[error("{target}.{column}: {derivation} failed: {message}")]
    Derivation {
        target: TargetSlot,
        column: ColumnName,
        derivation: String,
        message: String,
    },
}

impl RecordError {
    pub fn kind(&self) -> RecordErrorKind {
        match self {
            Self::Incomplete { .. } => RecordErrorKind::Incomplete,
            Self::Coercion { .. } => RecordErrorKind::Coercion,
            Self::UnmappedValue { .. } => RecordErrorKind::UnmappedValue,
            Self::Derivation { .. } => RecordErrorKind::Derivation,
        }
    }

    pub fn target(&self) -> &TargetSlot {
        match self {
            Self::Incomplete { target, .. }
            | Self::Coercion { target, .. }
            | Self::UnmappedValue { target, .. }
            | Self::Derivation { target, .. } => target,
        }
    }

    pub fn table(&self) -> &TableName {
        &self.target().table
    }

    pub fn column(&self) -> &ColumnName {
        match self {
            Self::Incomplete { column, .. }
            | Self::Coercion { column, .. }
            | Self::UnmappedValue { column, .. }
            | Self::Derivation { column, .. } => column,
        }
    }
}
