//! Tests for the load coordinator against the in-memory sink.

use std::collections::BTreeSet;

use omop_load::{
    CancellationToken, LoadCoordinator, LoadOptions, MemorySink, Query, RelationalSink,
    SinkError, TableLoadPlan, plan,
};
use omop_model::{
    ColumnName, ColumnType, DraftsByTable, LoadReport, Provenance, RetryPolicy, RowValues,
    TableName, TableStatus, TargetRowDraft, TargetSchema, TargetSlot, TrialId, Value,
};
use omop_standards::load_default_schema;

fn table(name: &str) -> TableName {
    TableName::new(name).unwrap()
}

fn draft(target: &str, line: usize, values: &[(&str, Value)]) -> TargetRowDraft {
    TargetRowDraft {
        target: TargetSlot::new(table(target)),
        values: values
            .iter()
            .map(|(column, value)| (ColumnName::new(*column).unwrap(), value.clone()))
            .collect(),
        provenance: Provenance {
            trial: TrialId::new("IMPRESS").unwrap(),
            source_table: "demographics".to_string(),
            line,
            rule_ids: vec![],
        },
    }
}

fn date(raw: &str) -> Value {
    Value::parse_as(raw, ColumnType::Date).unwrap()
}

fn person(id: i64) -> TargetRowDraft {
    draft(
        "person",
        id as usize,
        &[
            ("person_id", Value::Integer(id)),
            ("gender_concept_id", Value::Integer(8507)),
            ("year_of_birth", Value::Integer(1960 + id)),
            ("race_concept_id", Value::Integer(0)),
            ("ethnicity_concept_id", Value::Integer(0)),
        ],
    )
}

fn period(id: i64) -> TargetRowDraft {
    draft(
        "observation_period",
        id as usize,
        &[
            ("observation_period_id", Value::Integer(100 + id)),
            ("person_id", Value::Integer(id)),
            ("observation_period_start_date", date("2021-01-01")),
            ("observation_period_end_date", date("2022-01-01")),
            ("period_type_concept_id", Value::Integer(32817)),
        ],
    )
}

fn measurement(id: i64) -> TargetRowDraft {
    draft(
        "measurement",
        id as usize,
        &[
            ("measurement_id", Value::Integer(1000 + id)),
            ("person_id", Value::Integer(id)),
            ("measurement_concept_id", Value::Integer(4282779)),
            ("measurement_date", date("2021-03-01")),
            ("measurement_type_concept_id", Value::Integer(32817)),
            ("value_as_number", Value::Float(1.0)),
        ],
    )
}

fn drafts(people: i64) -> DraftsByTable {
    (1..=people)
        .flat_map(|id| [person(id), period(id), measurement(id)])
        .collect()
}

fn fixture() -> (TargetSchema, TableLoadPlan) {
    let schema = load_default_schema().unwrap();
    let declared: BTreeSet<TableName> = ["person", "observation_period", "measurement"]
        .into_iter()
        .map(table)
        .collect();
    let planned = plan(&declared, &schema).unwrap();
    (schema, planned)
}

fn options(truncate: bool) -> LoadOptions {
    LoadOptions {
        truncate,
        batch_size: 2,
        retry: RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::none()
        },
    }
}

fn statuses(report: &LoadReport) -> Vec<(&str, TableStatus)> {
    report
        .tables
        .iter()
        .map(|result| (result.table.as_str(), result.status))
        .collect()
}

fn primary_keys(sink: &MemorySink, name: &str, column: &str) -> Vec<i64> {
    let column = ColumnName::new(column).unwrap();
    let mut keys: Vec<i64> = sink
        .rows(&table(name))
        .iter()
        .filter_map(|row| row.get(&column).and_then(Value::as_i64))
        .collect();
    keys.sort_unstable();
    keys
}

#[test]
fn loads_tables_in_plan_order_with_foreign_keys_enforced() {
    let (schema, planned) = fixture();
    let mut sink = MemorySink::new(schema.clone()).with_foreign_keys();
    let report = LoadCoordinator::new(&schema, options(false)).load(&planned, drafts(5), &mut sink);

    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        statuses(&report),
        [
            ("person", TableStatus::Committed),
            ("observation_period", TableStatus::Committed),
            ("measurement", TableStatus::Committed),
        ]
    );
    assert_eq!(report.total_inserted(), 15);
    assert_eq!(sink.row_count(&table("observation_period")), 5);
    assert!(!sink.in_transaction());
}

#[test]
fn truncate_then_load_is_idempotent() {
    let (schema, planned) = fixture();
    let mut sink = MemorySink::new(schema.clone()).with_foreign_keys();
    let coordinator = LoadCoordinator::new(&schema, options(true));

    let first = coordinator.load(&planned, drafts(4), &mut sink);
    let first_keys = primary_keys(&sink, "person", "person_id");
    let second = coordinator.load(&planned, drafts(4), &mut sink);
    let second_keys = primary_keys(&sink, "person", "person_id");

    assert!(first.is_success() && second.is_success());
    assert!(second.truncated);
    assert_eq!(first_keys, second_keys);
    for (a, b) in first.tables.iter().zip(&second.tables) {
        assert_eq!(a.inserted, b.inserted);
        assert_eq!(a.content_digest, b.content_digest);
    }
    assert_eq!(sink.row_count(&table("measurement")), 4);
}

#[test]
fn reload_without_truncate_fails_and_skips_the_rest() {
    let (schema, planned) = fixture();
    let mut sink = MemorySink::new(schema.clone());
    let coordinator = LoadCoordinator::new(&schema, options(false));
    coordinator.load(&planned, drafts(2), &mut sink);

    let report = coordinator.load(&planned, drafts(2), &mut sink);
    assert!(!report.is_success());
    assert_eq!(
        statuses(&report),
        [
            ("person", TableStatus::Failed),
            ("observation_period", TableStatus::Skipped),
            ("measurement", TableStatus::Skipped),
        ]
    );
    let failed = report.result(&table("person")).unwrap();
    assert_eq!(failed.attempts, 1, "constraint errors are not retried");
    assert!(failed.error.as_deref().unwrap().contains("duplicate primary key"));
    assert_eq!(sink.row_count(&table("person")), 2);
}

#[test]
fn transient_errors_are_retried() {
    let (schema, planned) = fixture();
    let mut sink = MemorySink::new(schema.clone());
    sink.fail_transiently(&table("observation_period"), 2);

    let report = LoadCoordinator::new(&schema, options(false)).load(&planned, drafts(3), &mut sink);
    assert!(report.is_success());
    let result = report.result(&table("observation_period")).unwrap();
    assert_eq!(result.attempts, 3);
    assert_eq!(result.inserted, 3);
    assert_eq!(sink.row_count(&table("observation_period")), 3);
}

#[test]
fn exhausted_retries_fail_the_table_and_keep_earlier_commits() {
    let (schema, planned) = fixture();
    let mut sink = MemorySink::new(schema.clone());
    sink.fail_transiently(&table("observation_period"), 10);

    let report = LoadCoordinator::new(&schema, options(false)).load(&planned, drafts(3), &mut sink);
    assert_eq!(
        statuses(&report),
        [
            ("person", TableStatus::Committed),
            ("observation_period", TableStatus::Failed),
            ("measurement", TableStatus::Skipped),
        ]
    );
    assert_eq!(report.result(&table("observation_period")).unwrap().attempts, 3);
    assert_eq!(report.committed_tables(), vec![table("person")]);
    assert_eq!(sink.row_count(&table("person")), 3);
    assert_eq!(sink.row_count(&table("observation_period")), 0);
}

#[test]
fn duplicate_drafts_are_collapsed_or_rejected() {
    let (schema, planned) = fixture();
    let mut sink = MemorySink::new(schema.clone());
    let mut input = drafts(2);
    input.push(person(1));
    let mut conflicting = person(2);
    conflicting
        .values
        .insert(ColumnName::new("year_of_birth").unwrap(), Value::Integer(1900));
    input.push(conflicting);

    let report = LoadCoordinator::new(&schema, options(false)).load(&planned, input, &mut sink);
    assert!(report.is_success());
    let result = report.result(&table("person")).unwrap();
    assert_eq!(result.attempted, 4);
    assert_eq!(result.inserted, 2);
    assert_eq!(result.duplicates_collapsed, 1);
    assert_eq!(result.rejected.len(), 1);
}

#[test]
fn cancelled_before_start_touches_nothing() {
    let (schema, planned) = fixture();
    let mut sink = MemorySink::new(schema.clone());
    let token = CancellationToken::new();
    token.cancel();

    let report = LoadCoordinator::new(&schema, options(true))
        .with_cancellation(token)
        .load(&planned, drafts(2), &mut sink);
    assert!(!report.is_success());
    assert!(!report.truncated);
    assert!(
        report
            .tables
            .iter()
            .all(|result| result.status == TableStatus::Skipped)
    );
    assert!(sink.populated_tables().is_empty());
}

/// Sink that requests cancellation after the first batch of one table.
struct CancelAfterFirstBatch {
    inner: MemorySink,
    table: TableName,
    token: CancellationToken,
}

impl RelationalSink for CancelAfterFirstBatch {
    fn begin(&mut self) -> Result<(), SinkError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), SinkError> {
        self.inner.rollback()
    }

    fn truncate(&mut self, table: &TableName) -> Result<(), SinkError> {
        self.inner.truncate(table)
    }

    fn insert_batch(&mut self, table: &TableName, rows: &[RowValues]) -> Result<(), SinkError> {
        self.inner.insert_batch(table, rows)?;
        if table == &self.table {
            self.token.cancel();
        }
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<Vec<RowValues>, SinkError> {
        self.inner.query(query)
    }
}

#[test]
fn cancellation_mid_table_rolls_that_table_back() {
    let (schema, planned) = fixture();
    let token = CancellationToken::new();
    let mut sink = CancelAfterFirstBatch {
        inner: MemorySink::new(schema.clone()),
        table: table("observation_period"),
        token: token.clone(),
    };

    let report = LoadCoordinator::new(&schema, options(false))
        .with_cancellation(token)
        .load(&planned, drafts(5), &mut sink);
    assert_eq!(
        statuses(&report),
        [
            ("person", TableStatus::Committed),
            ("observation_period", TableStatus::Cancelled),
            ("measurement", TableStatus::Skipped),
        ]
    );
    assert_eq!(sink.inner.row_count(&table("person")), 5);
    assert_eq!(sink.inner.row_count(&table("observation_period")), 0);
    assert!(!sink.inner.in_transaction());
}
