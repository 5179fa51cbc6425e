//! Validation check modules.
//!
//! Each module performs one kind of check on one table.

mod date_range;
mod foreign_key;
mod required;
mod unique;

use omop_load::SinkError;
use omop_model::{ColumnName, RowValues, TableDef, ValidationViolation, Value};

use crate::gate::CheckContext;

/// Example keys kept per violation.
pub(crate) const MAX_EXAMPLES: usize = 5;

/// Run all validation checks on a table.
pub(crate) fn run_all(
    context: &CheckContext<'_>,
    table: &TableDef,
) -> Result<Vec<ValidationViolation>, SinkError> {
    let mut violations = Vec::new();

    // 1. Required columns are populated
    violations.extend(required::check(context, table)?);

    // 2. Primary keys are unique
    violations.extend(unique::check(context, table)?);

    // 3. Foreign keys resolve within the loaded tables
    violations.extend(foreign_key::check(context, table)?);

    // 4. Dates do not precede their declared lower bound
    violations.extend(date_range::check(context, table)?);

    Ok(violations)
}

/// Primary-key values of the first offending rows.
fn example_keys(table: &TableDef, rows: &[RowValues]) -> Vec<String> {
    let Some(pk) = table.primary_key() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| row.get(&pk.name))
        .filter(|value| !value.is_null())
        .take(MAX_EXAMPLES)
        .map(Value::render)
        .collect()
}

/// Projection that keeps the primary key plus `columns`.
fn key_and(table: &TableDef, columns: &[&ColumnName]) -> Vec<ColumnName> {
    table
        .primary_key()
        .map(|pk| pk.name.clone())
        .into_iter()
        .chain(columns.iter().map(|column| (*column).clone()))
        .collect()
}
