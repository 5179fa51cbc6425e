//! Required (NOT NULL) column checks.

use omop_load::{Predicate, Query, SinkError};
use omop_model::{CheckKind, Severity, TableDef, ValidationViolation};

use super::{example_keys, key_and};
use crate::gate::CheckContext;

pub(super) fn check(
    context: &CheckContext<'_>,
    table: &TableDef,
) -> Result<Vec<ValidationViolation>, SinkError> {
    let mut violations = Vec::new();
    for column in table.required_columns() {
        let query = Query::table(table.name.clone())
            .filter(Predicate::IsNull(column.name.clone()))
            .select(key_and(table, &[]));
        let rows = context.query(&query)?;
        if rows.is_empty() {
            continue;
        }
        violations.push(ValidationViolation {
            table: table.name.clone(),
            check: CheckKind::RequiredNull,
            column: column.name.clone(),
            severity: Severity::Error,
            count: rows.len(),
            examples: example_keys(table, &rows),
            message: format!(
                "{} rows have no value in required column {}",
                rows.len(),
                column.name
            ),
        });
    }
    Ok(violations)
}
