//! Dependency Planner: orders target tables so parents load before children.

use std::collections::{BTreeMap, BTreeSet};

use omop_model::{TableName, TargetSchema};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Foreign keys among the declared tables form a cycle.
    #[error("foreign keys form a cycle between tables: {}", join(.tables))]
    Cycle { tables: Vec<TableName> },
}

fn join(tables: &[TableName]) -> String {
    tables
        .iter()
        .map(TableName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load order for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLoadPlan {
    tables: Vec<TableName>,
}

impl TableLoadPlan {
    pub fn tables(&self) -> &[TableName] {
        &self.tables
    }

    /// Children before parents.
    pub fn truncation_order(&self) -> Vec<TableName> {
        self.tables.iter().rev().cloned().collect()
    }

    pub fn position(&self, table: &TableName) -> Option<usize> {
        self.tables.iter().position(|candidate| candidate == table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Topologically sorts `declared` over the schema's foreign keys.
///
/// Edges leaving the declared set and self-references impose no order. Among
/// tables that are ready at the same time the lexicographically smallest goes
/// first, so the order is stable across runs.
pub fn plan(
    declared: &BTreeSet<TableName>,
    schema: &TargetSchema,
) -> Result<TableLoadPlan, PlanError> {
    let mut parents: BTreeMap<&TableName, BTreeSet<&TableName>> =
        declared.iter().map(|table| (table, BTreeSet::new())).collect();
    let mut children: BTreeMap<&TableName, BTreeSet<&TableName>> = BTreeMap::new();

    for (child, parent) in schema.dependency_edges() {
        if child == parent {
            continue;
        }
        let (Some(child), Some(parent)) = (declared.get(&child), declared.get(&parent)) else {
            continue;
        };
        if let Some(entry) = parents.get_mut(child) {
            entry.insert(parent);
        }
        children.entry(parent).or_default().insert(child);
    }

    let mut ready: BTreeSet<&TableName> = parents
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(table, _)| *table)
        .collect();
    let mut ordered = Vec::with_capacity(declared.len());

    while let Some(table) = ready.pop_first() {
        ordered.push(table.clone());
        parents.remove(table);
        for child in children.get(table).into_iter().flatten() {
            if let Some(deps) = parents.get_mut(child) {
                deps.remove(table);
                if deps.is_empty() {
                    ready.insert(*child);
                }
            }
        }
    }

    if !parents.is_empty() {
        return Err(PlanError::Cycle {
            tables: parents.keys().map(|table| (*table).clone()).collect(),
        });
    }

    debug!(order = %join(&ordered), "planned table load order");
    Ok(TableLoadPlan { tables: ordered })
}

#[cfg(test)]
mod tests {
    use super::*;
    use omop_model::{ColumnDef, ColumnName, ColumnType, ForeignKey, TableDef};

    fn name(value: &str) -> TableName {
        TableName::new(value).unwrap()
    }

    fn key(table: &str) -> ColumnDef {
        let mut column = ColumnDef::new(
            ColumnName::new(format!("{table}_id")).unwrap(),
            ColumnType::Integer,
        );
        column.primary_key = true;
        column.required = true;
        column
    }

    fn reference(column: &str, table: &str) -> ColumnDef {
        let mut def = ColumnDef::new(ColumnName::new(column).unwrap(), ColumnType::Integer);
        def.references = Some(ForeignKey {
            table: name(table),
            column: ColumnName::new(format!("{table}_id")).unwrap(),
        });
        def
    }

    #[test]
    fn cycle_names_the_tables_involved() {
        let schema = TargetSchema::new([
            TableDef::new(name("a"))
                .with_column(key("a"))
                .with_column(reference("b_ref", "b")),
            TableDef::new(name("b"))
                .with_column(key("b"))
                .with_column(reference("a_ref", "a")),
            TableDef::new(name("c")).with_column(key("c")),
        ]);
        let declared: BTreeSet<_> = [name("a"), name("b"), name("c")].into_iter().collect();
        assert_eq!(
            plan(&declared, &schema),
            Err(PlanError::Cycle {
                tables: vec![name("a"), name("b")]
            })
        );
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        let schema = TargetSchema::new([TableDef::new(name("visit"))
            .with_column(key("visit"))
            .with_column(reference("preceding_visit_id", "visit"))]);
        let declared: BTreeSet<_> = [name("visit")].into_iter().collect();
        assert_eq!(plan(&declared, &schema).unwrap().tables(), &[name("visit")]);
    }
}
