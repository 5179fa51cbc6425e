//! End-to-end runs over a small IMPRESS extract with the packaged mappings.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde_json::json;
use tempfile::TempDir;

use omop_cli::pipeline::{self, RunInputs, RunRequest};
use omop_cli::report::{read_run_report, write_run_report};
use omop_load::{DirectorySink, MemorySink};
use omop_model::{
    RecordErrorKind, RunOptions, RunReport, TableName, TableStatus, TrialId, UnmappedPolicy,
};
use omop_standards::load_default_schema;

const DEMOGRAPHICS: &str = "\
patient_id,sex,dob,consent_date,end_of_study_date,last_contact_date
P001,M,1970-05-05,2021-01-10,2021-12-31,
P002,F,1982-11-23,2021-02-01,,2021-01-15
P003,X,1990-01-01,2021-03-01,,
P004,M,not-a-date,2021-03-05,,
";

const VISITS: &str = "\
patient_id,event_id,visit_type,visit_date
P001,V1,screening,2021-01-10
P001,V1,screening,2021-01-10
P001,V2,treatment,2021-02-10
P002,V1,unscheduled,2021-02-01
P004,V1,screening,2021-03-05
";

const TUMOR: &str = "\
patient_id,tumor_type,diagnosis_date
P001,colorectal,2020-12-01
P002,melanoma,2021-01-15
";

const ECOG: &str = "\
patient_id,event_id,assessment_date,ecog_grade,weight_kg
P001,V1,2021-01-10,1,72.5
P001,V2,2021-02-10,0,
P002,V1,2021-02-01,2,61
";

fn trial() -> TrialId {
    TrialId::new("IMPRESS").unwrap()
}

fn table(name: &str) -> TableName {
    TableName::new(name).unwrap()
}

fn extract() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let trial_dir = dir.path().join("IMPRESS");
    fs::create_dir(&trial_dir).unwrap();
    for (name, contents) in [
        ("demographics.csv", DEMOGRAPHICS),
        ("visits.csv", VISITS),
        ("tumor.csv", TUMOR),
        ("ecog.csv", ECOG),
    ] {
        fs::write(trial_dir.join(name), contents).unwrap();
    }
    dir
}

fn request(input: &Path, options: RunOptions) -> RunRequest {
    RunRequest {
        options: RunOptions {
            release_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..options
        },
        ..RunRequest::new(input, trial())
    }
}

fn memory_sink() -> MemorySink {
    MemorySink::new(load_default_schema().unwrap())
}

/// The deterministic parts of a report.
fn summarize(report: &RunReport) -> serde_json::Value {
    json!({
        "plan": report.plan,
        "sources": report.sources,
        "record_errors": report.record_errors,
        "unmapped_values": report.unmapped_values,
        "unmapped_warnings": report.unmapped_warnings,
        "coverage": report.coverage,
        "load": report.load.tables.iter().map(|result| json!({
            "table": result.table,
            "status": result.status,
            "attempted": result.attempted,
            "inserted": result.inserted,
            "duplicates_collapsed": result.duplicates_collapsed,
            "rejected": result.rejected.len(),
        })).collect::<Vec<_>>(),
        "validation": report.validation.violations.iter().map(|violation| json!({
            "table": violation.table,
            "check": violation.check,
            "column": violation.column,
            "severity": violation.severity,
            "count": violation.count,
        })).collect::<Vec<_>>(),
        "exit_code": report.exit_code(),
    })
}

#[test]
fn impress_extract_loads_end_to_end() {
    let input = extract();
    let mut sink = memory_sink();
    let report = pipeline::run(&request(input.path(), RunOptions::default()), &mut sink).unwrap();

    insta::assert_json_snapshot!("impress_run_summary", summarize(&report));

    assert_eq!(sink.row_count(&table("person")), 3);
    assert_eq!(sink.row_count(&table("measurement")), 6);
    assert_eq!(
        report.options.release_date,
        NaiveDate::from_ymd_opt(2024, 3, 1)
    );
    assert_eq!(report.rejection_samples.len(), 1);
    assert_eq!(report.rejection_samples[0].line, 4);
    assert_eq!(report.rejection_samples[0].kind, RecordErrorKind::Derivation);
    assert!(report.finished_at >= report.started_at);
    assert_eq!(report.inputs.structural_mapping.len(), 64);
}

#[test]
fn validation_errors_fail_the_run_when_requested() {
    let input = extract();
    let options = RunOptions {
        fail_on_validation: true,
        ..RunOptions::default()
    };
    let report = pipeline::run(&request(input.path(), options), &mut memory_sink()).unwrap();
    assert!(report.load.is_success());
    assert!(report.validation_failed());
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn reject_policy_counts_unmapped_values_against_the_threshold() {
    let input = extract();
    let options = RunOptions {
        unmapped_policy: UnmappedPolicy::Reject,
        max_rejected_records: Some(1),
        ..RunOptions::default()
    };
    let report = pipeline::run(&request(input.path(), options), &mut memory_sink()).unwrap();

    let person_errors = &report.record_errors[&table("person")];
    assert_eq!(person_errors.get(&RecordErrorKind::UnmappedValue), Some(&1));
    assert_eq!(person_errors.get(&RecordErrorKind::Derivation), Some(&1));
    assert_eq!(report.unmapped_values.len(), 1);
    assert_eq!(report.unmapped_values[0].raw_value, "X");
    assert!(report.unmapped_warnings.is_empty());
    assert_eq!(report.rejected_records(), 2);
    assert!(report.rejection_threshold_exceeded());
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn every_rejected_unmapped_value_reaches_the_report() {
    let input = extract();
    let mut demographics =
        String::from("patient_id,sex,dob,consent_date,end_of_study_date,last_contact_date\n");
    for n in 0..25 {
        demographics.push_str(&format!("Q{n:03},Q{n},1970-05-05,2021-01-10,,\n"));
    }
    fs::write(input.path().join("IMPRESS").join("demographics.csv"), demographics).unwrap();
    let options = RunOptions {
        unmapped_policy: UnmappedPolicy::Reject,
        ..RunOptions::default()
    };
    let report = pipeline::run(&request(input.path(), options), &mut memory_sink()).unwrap();

    assert_eq!(report.rejected_records(), 25);
    assert_eq!(report.rejection_samples.len(), pipeline::MAX_REJECTION_SAMPLES);
    assert_eq!(report.unmapped_values.len(), 25);
    assert!(
        report
            .unmapped_values
            .iter()
            .all(|value| value.source_field == "sex" && value.occurrences == 1)
    );
    let sex = report
        .coverage
        .iter()
        .find(|field| field.source_field == "sex")
        .unwrap();
    assert_eq!(sex.unmapped, 25);
    assert_eq!(
        report.record_errors[&table("person")].get(&RecordErrorKind::UnmappedValue),
        Some(&25)
    );
}

#[test]
fn truncating_reload_reproduces_the_tables() {
    let input = extract();
    let output = tempfile::tempdir().unwrap();
    let schema = load_default_schema().unwrap();
    let options = RunOptions {
        truncate: true,
        ..RunOptions::default()
    };

    let mut first_sink = DirectorySink::open(output.path(), schema.clone()).unwrap();
    let first = pipeline::run(&request(input.path(), options.clone()), &mut first_sink).unwrap();
    let mut second_sink = DirectorySink::open(output.path(), schema).unwrap();
    let second = pipeline::run(&request(input.path(), options), &mut second_sink).unwrap();

    assert!(second.load.is_success());
    for (a, b) in first.load.tables.iter().zip(&second.load.tables) {
        assert_eq!(a.table, b.table);
        assert_eq!(a.inserted, b.inserted);
        assert!(a.content_digest.is_some());
        assert_eq!(a.content_digest, b.content_digest);
    }
    assert_eq!(second_sink.rows(&table("cdm_source")).len(), 1);
    assert_eq!(second_sink.rows(&table("visit_occurrence")).len(), 4);
}

#[test]
fn reload_without_truncate_halts_on_duplicate_keys() {
    let input = extract();
    let output = tempfile::tempdir().unwrap();
    let schema = load_default_schema().unwrap();

    let mut sink = DirectorySink::open(output.path(), schema.clone()).unwrap();
    pipeline::run(&request(input.path(), RunOptions::default()), &mut sink).unwrap();
    let mut reopened = DirectorySink::open(output.path(), schema).unwrap();
    let report = pipeline::run(&request(input.path(), RunOptions::default()), &mut reopened).unwrap();

    let person = report.load.result(&table("person")).unwrap();
    assert_eq!(person.status, TableStatus::Failed);
    let measurement = report.load.result(&table("measurement")).unwrap();
    assert_eq!(measurement.status, TableStatus::Skipped);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(reopened.rows(&table("person")).len(), 3);
}

#[test]
fn malformed_mappings_fail_before_the_sink_is_touched() {
    let input = extract();
    let mappings = tempfile::tempdir().unwrap();
    let structural = mappings.path().join("structural.csv");
    fs::write(
        &structural,
        "trial,source_table,source_field,target_table,target_column,transform_kind,transform_arg\n\
         IMPRESS,demographics,patient_id,person,person_id,hash,\n",
    )
    .unwrap();

    let mut run = request(input.path(), RunOptions::default());
    run.inputs = RunInputs::with_overrides(Some(structural), None);
    let mut sink = memory_sink();
    let error = pipeline::run(&run, &mut sink).unwrap_err();

    let message = format!("{error:#}");
    assert!(message.contains("structural:2"), "{message}");
    assert!(message.contains("transform_kind"), "{message}");
    assert!(sink.populated_tables().is_empty());
    assert!(!sink.in_transaction());
}

#[test]
fn unknown_trial_is_fatal() {
    let error = pipeline::prepare(&TrialId::new("NOPE").unwrap(), &RunInputs::default())
        .err()
        .unwrap();
    assert!(format!("{error:#}").contains("NOPE"));
}

#[test]
fn missing_extract_files_are_reported_not_fatal() {
    let input = extract();
    fs::remove_file(input.path().join("IMPRESS").join("tumor.csv")).unwrap();
    let report = pipeline::run(&request(input.path(), RunOptions::default()), &mut memory_sink()).unwrap();

    assert_eq!(report.missing_source_tables, ["tumor"]);
    let condition = report.load.result(&table("condition_occurrence")).unwrap();
    assert_eq!(condition.attempted, 0);
    assert_eq!(condition.status, TableStatus::Committed);
}

#[test]
fn run_report_is_written_atomically() {
    let input = extract();
    let report = pipeline::run(&request(input.path(), RunOptions::default()), &mut memory_sink()).unwrap();
    let output = tempfile::tempdir().unwrap();
    let path = output.path().join("nested").join("run_report.json");

    write_run_report(&report, &path).unwrap();
    assert!(!path.with_extension("json.tmp").exists());
    assert_eq!(read_run_report(&path).unwrap(), report);
}
