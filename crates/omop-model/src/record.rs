//! Source records and the target row drafts produced from them.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ids::{ColumnName, TableName, TrialId, normalize_field_name};
use crate::mapping::{RUN_SCOPE, TargetSlot};
use crate::value::Value;

/// Field names exposed by the run record.
pub const RUN_FIELD_TRIAL: &str = "trial";
pub const RUN_FIELD_RELEASE_DATE: &str = "release_date";

/// One row of a per-trial source extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub trial: TrialId,
    /// Normalized source table name.
    pub source_table: String,
    /// 1-based data line within the source table (header excluded).
    pub line: usize,
    /// Normalized field name -> raw value. Blank cells are `None`.
    pub fields: BTreeMap<String, Option<String>>,
}

impl SourceRecord {
    pub fn new(trial: TrialId, source_table: &str, line: usize) -> Self {
        Self {
            trial,
            source_table: normalize_field_name(source_table),
            line,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter; blank values are stored as `None`.
    pub fn with_field(mut self, name: &str, value: Option<&str>) -> Self {
        self.insert(name, value.map(str::to_string));
        self
    }

    pub fn insert(&mut self, name: &str, value: Option<String>) {
        let value = value.filter(|raw| !raw.trim().is_empty());
        self.fields.insert(normalize_field_name(name), value);
    }

    /// The synthetic record run-scoped rules are evaluated against.
    pub fn run_record(trial: TrialId, release_date: NaiveDate) -> Self {
        let trial_name = trial.as_str().to_string();
        Self::new(trial, RUN_SCOPE, 1)
            .with_field(RUN_FIELD_TRIAL, Some(&trial_name))
            .with_field(
                RUN_FIELD_RELEASE_DATE,
                Some(&release_date.format("%Y-%m-%d").to_string()),
            )
    }

    /// Trimmed raw value; `None` when the field is absent or blank.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|value| value.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

/// Where a draft came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub trial: TrialId,
    pub source_table: String,
    pub line: usize,
    /// Ids of every rule that wrote a column of the draft, in column order.
    pub rule_ids: Vec<String>,
}

/// A target row produced by the transformer. Immutable once handed off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRowDraft {
    pub target: TargetSlot,
    pub values: BTreeMap<ColumnName, Value>,
    pub provenance: Provenance,
}

impl TargetRowDraft {
    pub fn table(&self) -> &TableName {
        &self.target.table
    }

    pub fn value(&self, column: &ColumnName) -> &Value {
        self.values.get(column).unwrap_or(&Value::Null)
    }
}

/// Column -> value map handed to a sink.
pub type RowValues = BTreeMap<ColumnName, Value>;

/// Accepted drafts grouped by target table, arrival order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftsByTable {
    tables: BTreeMap<TableName, Vec<TargetRowDraft>>,
}

impl DraftsByTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, draft: TargetRowDraft) {
        self.tables
            .entry(draft.table().clone())
            .or_default()
            .push(draft);
    }

    pub fn get(&self, table: &TableName) -> &[TargetRowDraft] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Removes and returns the drafts for `table`.
    pub fn take(&mut self, table: &TableName) -> Vec<TargetRowDraft> {
        self.tables.remove(table).unwrap_or_default()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }

    pub fn row_count(&self, table: &TableName) -> usize {
        self.tables.get(table).map_or(0, Vec::len)
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Extend<TargetRowDraft> for DraftsByTable {
    fn extend<I: IntoIterator<Item = TargetRowDraft>>(&mut self, iter: I) {
        for draft in iter {
            self.push(draft);
        }
    }
}

impl FromIterator<TargetRowDraft> for DraftsByTable {
    fn from_iter<I: IntoIterator<Item = TargetRowDraft>>(iter: I) -> Self {
        let mut drafts = Self::new();
        drafts.extend(iter);
        drafts
    }
}
