use std::fs;
use std::path::Path;

use omop_model::{ColumnName, ColumnType, TableName};
use omop_standards::{
    StandardsError, default_static_mapping_path, default_structural_mapping_path,
    load_default_schema, load_schema, parse_schema_csv, sha256_file, sha256_hex,
};

fn table(name: &str) -> TableName {
    TableName::new(name).unwrap()
}

fn column(name: &str) -> ColumnName {
    ColumnName::new(name).unwrap()
}

#[test]
fn loads_packaged_schema() {
    let schema = load_default_schema().expect("load packaged schema");
    for name in ["cdm_source", "person", "observation_period", "measurement"] {
        assert!(schema.table(&table(name)).is_some(), "missing {name}");
    }

    let person = schema.table(&table("person")).unwrap();
    assert_eq!(person.primary_key().unwrap().name, column("person_id"));
    assert_eq!(
        person.column(&column("gender_concept_id")).unwrap().column_type,
        ColumnType::Concept
    );

    let period = schema.table(&table("observation_period")).unwrap();
    let end = period.column(&column("observation_period_end_date")).unwrap();
    assert_eq!(
        end.not_before.as_ref(),
        Some(&column("observation_period_start_date"))
    );
    assert!(
        schema
            .dependency_edges()
            .contains(&(table("observation_period"), table("person")))
    );
}

#[test]
fn packaged_mappings_exist() {
    assert!(default_structural_mapping_path().is_file());
    assert!(default_static_mapping_path().is_file());
}

#[test]
fn primary_key_implies_required() {
    let csv = "table,column,type,required,primary_key\nperson,person_id,integer,N,Y\n";
    let schema = parse_schema_csv(csv.as_bytes(), Path::new("inline.csv")).unwrap();
    let pk = schema.column(&table("person"), &column("person_id")).unwrap();
    assert!(pk.required);
}

#[test]
fn unknown_type_names_the_line() {
    let csv = "table,column,type\nperson,person_id,integer\nperson,gender,enum\n";
    let err = parse_schema_csv(csv.as_bytes(), Path::new("inline.csv")).unwrap_err();
    match err {
        StandardsError::InvalidRow { line, message, .. } => {
            assert_eq!(line, 3);
            assert!(message.contains("enum"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn dangling_reference_is_rejected() {
    let csv = "table,column,type,required,primary_key,references\n\
               observation_period,person_id,integer,Y,N,person.person_id\n";
    let err = parse_schema_csv(csv.as_bytes(), Path::new("inline.csv")).unwrap_err();
    assert!(matches!(err, StandardsError::InvalidSchema { .. }));
}

#[test]
fn missing_type_column_is_rejected() {
    let csv = "table,column\nperson,person_id\n";
    let err = parse_schema_csv(csv.as_bytes(), Path::new("inline.csv")).unwrap_err();
    assert!(matches!(err, StandardsError::MissingColumn { column, .. } if column == "type"));
}

#[test]
fn file_digest_matches_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema.csv");
    let contents = "table,column,type\nperson,person_id,integer\n";
    fs::write(&path, contents).unwrap();
    assert_eq!(sha256_file(&path).unwrap(), sha256_hex(contents.as_bytes()));
    assert!(load_schema(&path).is_ok());
}
