//! The relational sink abstraction the loader and validator talk to.

use std::path::PathBuf;

use omop_model::{ColumnName, RowValues, TableName, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    /// Retryable failure such as a dropped connection or a timeout.
    #[error("transient sink failure: {0}")]
    Transient(String),

    #[error("constraint violated in table {table}: {message}")]
    Constraint { table: TableName, message: String },

    #[error("unknown table: {0}")]
    UnknownTable(TableName),

    #[error("no open transaction")]
    NoTransaction,

    #[error("a transaction is already open")]
    TransactionOpen,

    #[error("sink I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }

    pub fn constraint(table: &TableName, message: impl Into<String>) -> Self {
        SinkError::Constraint {
            table: table.clone(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        SinkError::Io {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

/// Row filter understood by every sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    IsNull(ColumnName),
    NotNull(ColumnName),
    Eq(ColumnName, Value),
    /// `left < right`, both non-null and comparable.
    ColumnLess(ColumnName, ColumnName),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, row: &RowValues) -> bool {
        let cell = |column: &ColumnName| row.get(column).unwrap_or(&Value::Null);
        match self {
            Predicate::All => true,
            Predicate::IsNull(column) => cell(column).is_null(),
            Predicate::NotNull(column) => !cell(column).is_null(),
            Predicate::Eq(column, value) => cell(column) == value,
            Predicate::ColumnLess(left, right) => cell(left)
                .compare(cell(right))
                .is_some_and(std::cmp::Ordering::is_lt),
            Predicate::And(parts) => parts.iter().all(|part| part.matches(row)),
        }
    }
}

/// A read against one table. An empty projection returns every column.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: TableName,
    pub predicate: Predicate,
    pub columns: Vec<ColumnName>,
}

impl Query {
    pub fn table(table: TableName) -> Self {
        Self {
            table,
            predicate: Predicate::All,
            columns: Vec::new(),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn select(mut self, columns: impl IntoIterator<Item = ColumnName>) -> Self {
        self.columns = columns.into_iter().collect();
        self
    }

    pub fn project(&self, row: &RowValues) -> RowValues {
        if self.columns.is_empty() {
            return row.clone();
        }
        self.columns
            .iter()
            .map(|column| {
                (
                    column.clone(),
                    row.get(column).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }
}

/// Transactional target store.
///
/// Writes are only legal inside `begin`/`commit`; `rollback` discards every
/// write since `begin`. Reads see committed data plus the open transaction's
/// own writes.
pub trait RelationalSink {
    fn begin(&mut self) -> Result<(), SinkError>;
    fn commit(&mut self) -> Result<(), SinkError>;
    fn rollback(&mut self) -> Result<(), SinkError>;
    fn truncate(&mut self, table: &TableName) -> Result<(), SinkError>;
    fn insert_batch(&mut self, table: &TableName, rows: &[RowValues]) -> Result<(), SinkError>;
    fn query(&self, query: &Query) -> Result<Vec<RowValues>, SinkError>;
    fn count(&self, query: &Query) -> Result<usize, SinkError> {
        self.query(query).map(|rows| rows.len())
    }
}
