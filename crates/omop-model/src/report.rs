//! Load, validation and run-level reports.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ColumnName, TableName, TrialId};
use crate::options::RunOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    RequiredNull,
    DuplicateKey,
    ForeignKey,
    DateRange,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiredNull => "required_null",
            Self::DuplicateKey => "duplicate_key",
            Self::ForeignKey => "foreign_key",
            Self::DateRange => "date_range",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post-load check failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub table: TableName,
    pub check: CheckKind,
    pub column: ColumnName,
    pub severity: Severity,
    /// Offending rows.
    pub count: usize,
    /// A few offending key values, for diagnosis.
    pub examples: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub tables_checked: Vec<TableName>,
    pub violations: Vec<ValidationViolation>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|violation| violation.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|violation| violation.severity == Severity::Warning)
            .count()
    }

    pub fn by_table(&self) -> BTreeMap<&TableName, Vec<&ValidationViolation>> {
        let mut grouped: BTreeMap<&TableName, Vec<&ValidationViolation>> = BTreeMap::new();
        for violation in &self.violations {
            grouped.entry(&violation.table).or_default().push(violation);
        }
        grouped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    /// All batches committed.
    Committed,
    /// Rolled back after a sink failure.
    Failed,
    /// Not attempted because an earlier table failed or the run was cancelled.
    Skipped,
    /// Rolled back because the run was cancelled mid-table.
    Cancelled,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A draft the coordinator refused to insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRejection {
    pub source_table: String,
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLoadResult {
    pub table: TableName,
    pub attempted: usize,
    pub inserted: usize,
    pub rejected: Vec<RowRejection>,
    /// Identical primary-key duplicates folded into one row.
    pub duplicates_collapsed: usize,
    pub truncated: bool,
    pub status: TableStatus,
    /// Transactions attempted (retries included).
    pub attempts: u32,
    pub error: Option<String>,
    /// SHA-256 of the inserted rows ordered by primary key.
    pub content_digest: Option<String>,
}

impl TableLoadResult {
    pub fn pending(table: TableName, attempted: usize, truncated: bool) -> Self {
        Self {
            table,
            attempted,
            inserted: 0,
            rejected: Vec::new(),
            duplicates_collapsed: 0,
            truncated,
            status: TableStatus::Skipped,
            attempts: 0,
            error: None,
            content_digest: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub truncated: bool,
    /// Set when the truncation transaction failed; nothing was loaded.
    pub truncation_error: Option<String>,
    pub tables: Vec<TableLoadResult>,
}

impl LoadReport {
    pub fn is_success(&self) -> bool {
        self.truncation_error.is_none()
            && self
                .tables
                .iter()
                .all(|result| result.status == TableStatus::Committed)
    }

    pub fn result(&self, table: &TableName) -> Option<&TableLoadResult> {
        self.tables.iter().find(|result| &result.table == table)
    }

    pub fn committed_tables(&self) -> Vec<TableName> {
        self.tables
            .iter()
            .filter(|result| result.status == TableStatus::Committed)
            .map(|result| result.table.clone())
            .collect()
    }

    pub fn failed_tables(&self) -> Vec<&TableLoadResult> {
        self.tables
            .iter()
            .filter(|result| matches!(result.status, TableStatus::Failed | TableStatus::Cancelled))
            .collect()
    }

    pub fn total_inserted(&self) -> usize {
        self.tables.iter().map(|result| result.inserted).sum()
    }
}

/// Per-record error categories counted in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordErrorKind {
    Incomplete,
    Coercion,
    UnmappedValue,
    Derivation,
}

impl RecordErrorKind {
    pub const ALL: [RecordErrorKind; 4] = [
        RecordErrorKind::Incomplete,
        RecordErrorKind::Coercion,
        RecordErrorKind::UnmappedValue,
        RecordErrorKind::Derivation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Coercion => "coercion",
            Self::UnmappedValue => "unmapped_value",
            Self::Derivation => "derivation",
        }
    }
}

impl fmt::Display for RecordErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value resolved to the placeholder concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmappedValue {
    pub table: TableName,
    pub column: ColumnName,
    pub source_field: String,
    pub raw_value: String,
    pub concept_id: i64,
}

/// Distinct unmapped value with its number of occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmappedValueCount {
    pub source_field: String,
    pub raw_value: String,
    pub concept_id: i64,
    pub occurrences: usize,
}

/// Concept lookup outcomes for one source field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCoverage {
    pub source_field: String,
    pub matched: usize,
    pub missing: usize,
    pub unmapped: usize,
}

impl FieldCoverage {
    pub fn total(&self) -> usize {
        self.matched + self.missing + self.unmapped
    }
}

/// Per source table record counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTableSummary {
    pub source_table: String,
    pub path: Option<String>,
    pub records: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub drafts: usize,
    /// Target slots skipped because all their source data was missing.
    pub skipped_empty: usize,
}

/// First rejected records, kept for diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRejectionSample {
    pub source_table: String,
    pub line: usize,
    pub kind: RecordErrorKind,
    pub message: String,
}

/// SHA-256 digests of the run's declarative inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDigests {
    pub schema: String,
    pub structural_mapping: String,
    pub static_mapping: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub trial: TrialId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub options: RunOptions,
    pub inputs: InputDigests,
    pub plan: Vec<TableName>,
    pub missing_source_tables: Vec<String>,
    pub sources: Vec<SourceTableSummary>,
    /// Target table -> error kind -> rejected records.
    pub record_errors: BTreeMap<TableName, BTreeMap<RecordErrorKind, usize>>,
    pub rejection_samples: Vec<RecordRejectionSample>,
    pub unmapped_values: Vec<UnmappedValueCount>,
    /// Target table -> values written as the placeholder concept.
    pub unmapped_warnings: BTreeMap<TableName, usize>,
    pub coverage: Vec<FieldCoverage>,
    pub load: LoadReport,
    pub validation: ValidationReport,
}

impl RunReport {
    pub fn rejected_records(&self) -> usize {
        self.sources.iter().map(|source| source.rejected).sum()
    }

    pub fn rejection_threshold_exceeded(&self) -> bool {
        self.options
            .max_rejected_records
            .is_some_and(|limit| self.rejected_records() > limit)
    }

    pub fn validation_failed(&self) -> bool {
        self.options.fail_on_validation && self.validation.error_count() > 0
    }

    pub fn is_success(&self) -> bool {
        self.load.is_success() && !self.rejection_threshold_exceeded() && !self.validation_failed()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}
