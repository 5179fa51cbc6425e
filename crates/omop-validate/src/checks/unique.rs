//! Primary-key uniqueness.

use std::collections::BTreeMap;

use omop_load::{Predicate, Query, SinkError};
use omop_model::{CheckKind, Severity, TableDef, ValidationViolation};

use super::MAX_EXAMPLES;
use crate::gate::CheckContext;

pub(super) fn check(
    context: &CheckContext<'_>,
    table: &TableDef,
) -> Result<Vec<ValidationViolation>, SinkError> {
    let Some(pk) = table.primary_key() else {
        return Ok(Vec::new());
    };
    let query = Query::table(table.name.clone())
        .filter(Predicate::NotNull(pk.name.clone()))
        .select([pk.name.clone()]);

    let mut occurrences: BTreeMap<String, usize> = BTreeMap::new();
    for row in context.query(&query)? {
        if let Some(value) = row.get(&pk.name) {
            *occurrences.entry(value.render()).or_default() += 1;
        }
    }
    let duplicated: Vec<(String, usize)> = occurrences
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .collect();
    if duplicated.is_empty() {
        return Ok(Vec::new());
    }

    let extra_rows: usize = duplicated.iter().map(|(_, count)| count - 1).sum();
    Ok(vec![ValidationViolation {
        table: table.name.clone(),
        check: CheckKind::DuplicateKey,
        column: pk.name.clone(),
        severity: Severity::Error,
        count: extra_rows,
        examples: duplicated
            .iter()
            .take(MAX_EXAMPLES)
            .map(|(key, _)| key.clone())
            .collect(),
        message: format!(
            "{} primary key values of {} occur more than once",
            duplicated.len(),
            pk.name
        ),
    }])
}
