//! Tests for omop-model types.

use chrono::{NaiveDate, TimeZone, Utc};
use omop_model::{
    ColumnDef, ColumnName, ColumnType, DraftsByTable, ForeignKey, InputDigests, LoadReport,
    Provenance, RunOptions, RunReport, TableDef, TableLoadResult, TableName, TableStatus,
    TargetRowDraft, TargetSchema, TargetSlot, TrialId, ValidationReport, Value,
};

fn table(name: &str) -> TableName {
    TableName::new(name).unwrap()
}

fn column(name: &str) -> ColumnName {
    ColumnName::new(name).unwrap()
}

fn draft(target: &str, line: usize) -> TargetRowDraft {
    TargetRowDraft {
        target: TargetSlot::parse(target).unwrap(),
        values: [(column("person_id"), Value::Integer(line as i64))]
            .into_iter()
            .collect(),
        provenance: Provenance {
            trial: TrialId::new("IMPRESS").unwrap(),
            source_table: "demographics".to_string(),
            line,
            rule_ids: vec!["structural:2".to_string()],
        },
    }
}

fn report(load: LoadReport, options: RunOptions) -> RunReport {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    RunReport {
        trial: TrialId::new("IMPRESS").unwrap(),
        started_at: at,
        finished_at: at,
        options,
        inputs: InputDigests::default(),
        plan: vec![table("person")],
        missing_source_tables: vec![],
        sources: vec![omop_model::SourceTableSummary {
            source_table: "demographics".to_string(),
            path: None,
            records: 3,
            accepted: 2,
            rejected: 1,
            drafts: 2,
            skipped_empty: 0,
        }],
        record_errors: Default::default(),
        rejection_samples: vec![],
        unmapped_values: vec![],
        unmapped_warnings: Default::default(),
        coverage: vec![],
        load,
        validation: ValidationReport::default(),
    }
}

#[test]
fn drafts_group_by_table_in_arrival_order() {
    let drafts: DraftsByTable = vec![
        draft("measurement#ecog", 1),
        draft("person", 1),
        draft("measurement#weight", 1),
        draft("person", 2),
    ]
    .into_iter()
    .collect();

    assert_eq!(drafts.row_count(&table("measurement")), 2);
    let people: Vec<usize> = drafts
        .get(&table("person"))
        .iter()
        .map(|draft| draft.provenance.line)
        .collect();
    assert_eq!(people, vec![1, 2]);
    assert_eq!(drafts.total_rows(), 4);
    assert!(drafts.get(&table("visit_occurrence")).is_empty());
}

#[test]
fn schema_dependency_edges_follow_foreign_keys() {
    let person = TableDef::new(table("person")).with_column(ColumnDef {
        primary_key: true,
        required: true,
        ..ColumnDef::new(column("person_id"), ColumnType::Integer)
    });
    let period = TableDef::new(table("observation_period")).with_column(ColumnDef {
        required: true,
        references: Some(ForeignKey {
            table: table("person"),
            column: column("person_id"),
        }),
        ..ColumnDef::new(column("person_id"), ColumnType::Integer)
    });
    let schema = TargetSchema::new([person, period]);
    assert_eq!(
        schema.dependency_edges(),
        vec![(table("observation_period"), table("person"))]
    );
}

#[test]
fn rejected_records_flip_exit_only_above_threshold() {
    let mut person = TableLoadResult::pending(table("person"), 2, false);
    person.status = TableStatus::Committed;
    let load = LoadReport {
        truncated: false,
        truncation_error: None,
        tables: vec![person],
    };

    assert_eq!(report(load.clone(), RunOptions::default()).exit_code(), 0);

    let limited = RunOptions {
        max_rejected_records: Some(0),
        ..RunOptions::default()
    };
    assert_eq!(report(load.clone(), limited).exit_code(), 1);

    let tolerant = RunOptions {
        max_rejected_records: Some(1),
        ..RunOptions::default()
    };
    assert_eq!(report(load, tolerant).exit_code(), 0);
}

#[test]
fn failed_table_fails_run() {
    let mut person = TableLoadResult::pending(table("person"), 2, true);
    person.status = TableStatus::Failed;
    let load = LoadReport {
        truncated: true,
        truncation_error: None,
        tables: vec![person],
    };
    assert_eq!(report(load, RunOptions::default()).exit_code(), 1);
}

#[test]
fn run_options_deserialize_with_defaults() {
    let options: RunOptions =
        serde_json::from_str(r#"{"truncate": true, "unmapped_policy": "reject"}"#).unwrap();
    assert!(options.truncate);
    assert_eq!(options.unmapped_policy, omop_model::UnmappedPolicy::Reject);
    assert_eq!(options.batch_size, 1_000);
    assert_eq!(options.retry.max_retries, 3);
    assert_eq!(options.release_date, None::<NaiveDate>);
}
