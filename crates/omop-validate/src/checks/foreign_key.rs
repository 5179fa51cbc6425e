//! Cross-table foreign-key satisfaction.

use std::collections::BTreeSet;

use omop_load::{Predicate, Query, SinkError};
use omop_model::{CheckKind, Severity, TableDef, ValidationViolation};
use tracing::debug;

use super::{example_keys, key_and};
use crate::gate::CheckContext;

/// Every non-null foreign key must match a row of the referenced table.
///
/// References into tables outside the expected set are not followed.
pub(super) fn check(
    context: &CheckContext<'_>,
    table: &TableDef,
) -> Result<Vec<ValidationViolation>, SinkError> {
    let mut violations = Vec::new();
    for (column, fk) in table.foreign_keys() {
        if !context.expected.contains(&fk.table) {
            debug!(
                table = %table.name,
                column = %column.name,
                parent = %fk.table,
                "parent not loaded, reference not checked"
            );
            continue;
        }
        let parent_query = Query::table(fk.table.clone())
            .filter(Predicate::NotNull(fk.column.clone()))
            .select([fk.column.clone()]);
        let parent_keys: BTreeSet<String> = context
            .query(&parent_query)?
            .iter()
            .filter_map(|row| row.get(&fk.column))
            .map(omop_model::Value::render)
            .collect();

        let child_query = Query::table(table.name.clone())
            .filter(Predicate::NotNull(column.name.clone()))
            .select(key_and(table, &[&column.name]));
        let orphans: Vec<_> = context
            .query(&child_query)?
            .into_iter()
            .filter(|row| {
                row.get(&column.name)
                    .is_some_and(|value| !parent_keys.contains(&value.render()))
            })
            .collect();
        if orphans.is_empty() {
            continue;
        }

        violations.push(ValidationViolation {
            table: table.name.clone(),
            check: CheckKind::ForeignKey,
            column: column.name.clone(),
            severity: Severity::Error,
            count: orphans.len(),
            examples: example_keys(table, &orphans),
            message: format!(
                "{} rows reference a missing {fk} through {}",
                orphans.len(),
                column.name
            ),
        });
    }
    Ok(violations)
}
