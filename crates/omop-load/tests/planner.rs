//! Tests for the dependency planner.

use std::collections::BTreeSet;

use omop_load::plan;
use omop_model::{ColumnDef, ColumnName, ColumnType, ForeignKey, TableDef, TableName, TargetSchema};
use omop_standards::load_default_schema;
use proptest::prelude::*;

fn names(values: &[&str]) -> BTreeSet<TableName> {
    values
        .iter()
        .map(|value| TableName::new(*value).unwrap())
        .collect()
}

fn order(values: &[TableName]) -> Vec<&str> {
    values.iter().map(TableName::as_str).collect()
}

#[test]
fn person_loads_before_observation_period() {
    let schema = load_default_schema().unwrap();
    let declared = names(&["person", "observation_period", "cdm_source"]);
    let first = plan(&declared, &schema).unwrap();
    assert_eq!(
        order(first.tables()),
        ["cdm_source", "person", "observation_period"]
    );
    // Stable across runs.
    assert_eq!(plan(&declared, &schema).unwrap(), first);
}

#[test]
fn packaged_schema_orders_clinical_tables_after_visits() {
    let schema = load_default_schema().unwrap();
    let declared: BTreeSet<TableName> = schema.table_names().cloned().collect();
    let planned = plan(&declared, &schema).unwrap();
    assert_eq!(
        order(planned.tables()),
        [
            "cdm_source",
            "person",
            "observation_period",
            "visit_occurrence",
            "condition_occurrence",
            "measurement",
        ]
    );
    assert_eq!(
        order(&planned.truncation_order()),
        [
            "measurement",
            "condition_occurrence",
            "visit_occurrence",
            "observation_period",
            "person",
            "cdm_source",
        ]
    );
}

#[test]
fn undeclared_parents_impose_no_order() {
    let schema = load_default_schema().unwrap();
    let declared = names(&["measurement", "condition_occurrence"]);
    let planned = plan(&declared, &schema).unwrap();
    assert_eq!(
        order(planned.tables()),
        ["condition_occurrence", "measurement"]
    );
}

fn table_name(index: usize) -> TableName {
    TableName::new(format!("t{index:02}")).unwrap()
}

/// Table `i` may reference any table `j < i`, so the graph is acyclic.
fn random_schema(size: usize, edges: &[(usize, usize)]) -> TargetSchema {
    TargetSchema::new((0..size).map(|index| {
        let mut key = ColumnDef::new(ColumnName::new("id").unwrap(), ColumnType::Integer);
        key.primary_key = true;
        key.required = true;
        let mut table = TableDef::new(table_name(index)).with_column(key);
        for (child, parent) in edges {
            if *child == index && parent < child {
                let mut column = ColumnDef::new(
                    ColumnName::new(format!("ref_{parent}")).unwrap(),
                    ColumnType::Integer,
                );
                column.references = Some(ForeignKey {
                    table: table_name(*parent),
                    column: ColumnName::new("id").unwrap(),
                });
                table = table.with_column(column);
            }
        }
        table
    }))
}

proptest! {
    #[test]
    fn plan_is_a_topological_order(
        edges in prop::collection::vec((0usize..10, 0usize..10), 0..30),
        declared_mask in prop::collection::vec(any::<bool>(), 10),
    ) {
        let schema = random_schema(10, &edges);
        let declared: BTreeSet<TableName> = (0..10)
            .filter(|index| declared_mask[*index])
            .map(table_name)
            .collect();

        let planned = plan(&declared, &schema).unwrap();
        prop_assert_eq!(planned.len(), declared.len());

        for (child, parent) in schema.dependency_edges() {
            if child == parent || !declared.contains(&child) || !declared.contains(&parent) {
                continue;
            }
            let child_at = planned.position(&child).unwrap();
            let parent_at = planned.position(&parent).unwrap();
            prop_assert!(parent_at < child_at, "{parent} must precede {child}");
        }
    }
}
