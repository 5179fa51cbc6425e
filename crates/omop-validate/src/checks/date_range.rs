//! Date ordering sanity, e.g. a period may not end before it starts.

use omop_load::{Predicate, Query, SinkError};
use omop_model::{CheckKind, Severity, TableDef, ValidationViolation};

use super::{example_keys, key_and};
use crate::gate::CheckContext;

pub(super) fn check(
    context: &CheckContext<'_>,
    table: &TableDef,
) -> Result<Vec<ValidationViolation>, SinkError> {
    let mut violations = Vec::new();
    for column in &table.columns {
        let Some(lower_bound) = &column.not_before else {
            continue;
        };
        let query = Query::table(table.name.clone())
            .filter(Predicate::ColumnLess(column.name.clone(), lower_bound.clone()))
            .select(key_and(table, &[&column.name, lower_bound]));
        let rows = context.query(&query)?;
        if rows.is_empty() {
            continue;
        }
        violations.push(ValidationViolation {
            table: table.name.clone(),
            check: CheckKind::DateRange,
            column: column.name.clone(),
            severity: Severity::Warning,
            count: rows.len(),
            examples: example_keys(table, &rows),
            message: format!(
                "{} rows have {} before {lower_bound}",
                rows.len(),
                column.name
            ),
        });
    }
    Ok(violations)
}
