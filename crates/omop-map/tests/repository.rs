use std::fs;

use omop_map::{MappingError, MappingRepository, MappingSource};
use omop_model::{ConceptOutput, Derivation, RuleTransform, TableName, TrialId};
use omop_standards::{
    default_static_mapping_path, default_structural_mapping_path, load_default_schema,
};

const HEADER: &str =
    "trial,source_table,source_field,target_table,target_column,transform_kind,transform_arg\n";
const STATIC_HEADER: &str = "trial,source_field,source_value,target_concept_id,target_source_value\n";

fn impress() -> TrialId {
    TrialId::new("IMPRESS").unwrap()
}

fn parse(structural: &str, statics: &str) -> Result<MappingRepository, MappingError> {
    MappingRepository::parse(
        &MappingSource::from_bytes("structural", format!("{HEADER}{structural}")),
        &MappingSource::from_bytes("static", format!("{STATIC_HEADER}{statics}")),
    )
}

#[test]
fn packaged_mappings_load_and_match_schema() {
    let index = MappingRepository::load(
        &default_structural_mapping_path(),
        &default_static_mapping_path(),
        &impress(),
    )
    .expect("load packaged mappings");
    let schema = load_default_schema().expect("load schema");
    index.check_against(&schema).expect("mapping matches schema");
    assert!(index.uncovered_required_columns(&schema).is_empty());

    let tables = index.declared_tables();
    for name in ["cdm_source", "person", "observation_period", "measurement"] {
        assert!(tables.contains(&TableName::new(name).unwrap()), "{name}");
    }
    assert!(index.has_run_rules());
    assert!(index.source_tables().contains("demographics"));
    assert!(!index.source_tables().contains("@run"));
}

#[test]
fn rules_fan_out_from_one_field() {
    let repo = parse(
        "IMPRESS,demographics,patient_id,person,person_id,surrogate_key,\n\
         IMPRESS,demographics,patient_id,observation_period,person_id,surrogate_key,person\n\
         IMPRESS,demographics,sex,person,gender_concept_id,concept-lookup,\n\
         IMPRESS,demographics,sex,person,gender_source_value,concept_lookup,source_value\n",
        "",
    )
    .unwrap();
    let index = repo.index(&impress()).unwrap();

    let by_patient = index.rules_for_field(&impress(), "patient_id");
    assert_eq!(by_patient.len(), 2);
    assert_eq!(by_patient[0].id, "structural:2");

    let sex = index.rules_for_field(&impress(), "sex");
    assert_eq!(
        sex[1].transform,
        RuleTransform::ConceptLookup {
            output: ConceptOutput::SourceValue
        }
    );
    assert!(
        index
            .rules_for_field(&TrialId::new("DRUP").unwrap(), "sex")
            .is_empty()
    );

    let slots = index.slots_for("demographics");
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].target.to_string(), "observation_period");
    assert_eq!(slots[1].rules.len(), 3);
}

#[test]
fn duplicate_target_column_conflicts_naming_both_rows() {
    let err = parse(
        "IMPRESS,demographics,dob,person,birth_datetime,direct,\n\
         IMPRESS,demographics,sex,person,gender_concept_id,concept_lookup,\n\
         IMPRESS,baseline,birth_date,person,birth_datetime,direct,\n",
        "",
    )
    .unwrap_err();
    match err {
        MappingError::Conflicting {
            first_line,
            second_line,
            target,
            ..
        } => {
            assert_eq!((first_line, second_line), (2, 4));
            assert!(target.contains("person.birth_datetime"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn same_column_in_other_trial_or_instance_is_allowed() {
    let repo = parse(
        "IMPRESS,demographics,dob,person,birth_datetime,direct,\n\
         DRUP,patients,dob,person,birth_datetime,direct,\n\
         IMPRESS,ecog,grade,measurement#ecog,value_as_number,direct,\n\
         IMPRESS,ecog,weight,measurement#weight,value_as_number,direct,\n",
        "",
    )
    .unwrap();
    assert_eq!(repo.trials().len(), 2);
}

#[test]
fn unknown_transform_kind_is_malformed() {
    let err = parse("IMPRESS,demographics,dob,person,birth_datetime,copy,\n", "").unwrap_err();
    match err {
        MappingError::Malformed { line, column, .. } => {
            assert_eq!(line, 2);
            assert_eq!(column, "transform_kind");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_required_value_is_malformed() {
    let err = parse("IMPRESS,demographics,,person,birth_datetime,direct,\n", "").unwrap_err();
    assert!(matches!(err, MappingError::Malformed { column, .. } if column == "source_field"));

    let err = parse("IMPRESS,demographics,,person,race_concept_id,constant,\n", "").unwrap_err();
    assert!(matches!(err, MappingError::Malformed { column, .. } if column == "transform_arg"));
}

#[test]
fn missing_header_column_is_malformed() {
    let err = MappingRepository::parse(
        &MappingSource::from_bytes("structural", "trial,source_table\nIMPRESS,x\n"),
        &MappingSource::from_bytes("static", STATIC_HEADER),
    )
    .unwrap_err();
    assert!(matches!(err, MappingError::Malformed { line: 1, .. }));
}

#[test]
fn unknown_derivation_fails_at_load() {
    let err = parse("IMPRESS,demographics,dob,person,year_of_birth,derived,age_at\n", "").unwrap_err();
    assert!(matches!(err, MappingError::Malformed { column, .. } if column == "transform_arg"));

    let repo = parse(
        "IMPRESS,demographics,,observation_period,observation_period_end_date,derived,\"coalesce(eos_date, consent_date)\"\n",
        "",
    )
    .unwrap();
    match &repo.structural_rules()[0].transform {
        RuleTransform::Derived { derivation, inputs } => {
            assert_eq!(*derivation, Derivation::Coalesce);
            assert_eq!(inputs, &vec!["eos_date".to_string(), "consent_date".to_string()]);
        }
        other => panic!("unexpected transform: {other:?}"),
    }
}

#[test]
fn static_duplicates_collapse_but_conflicts_fail() {
    let structural = "IMPRESS,demographics,sex,person,gender_concept_id,concept_lookup,\n";
    let repo = parse(structural, "IMPRESS,sex,M,8507,M\nIMPRESS,sex,M,8507,M\n").unwrap();
    assert_eq!(repo.static_rules().len(), 1);

    let err = parse(structural, "IMPRESS,sex,M,8507,\nIMPRESS,sex,M,8532,\n").unwrap_err();
    assert!(matches!(
        err,
        MappingError::Conflicting {
            first_line: 2,
            second_line: 3,
            ..
        }
    ));

    let err = parse(structural, "IMPRESS,sex,M,male,\n").unwrap_err();
    assert!(matches!(err, MappingError::Malformed { column, .. } if column == "target_concept_id"));
}

#[test]
fn unknown_trial_is_rejected() {
    let repo = parse("IMPRESS,demographics,dob,person,birth_datetime,direct,\n", "").unwrap();
    let err = repo.index(&TrialId::new("DRUP").unwrap()).unwrap_err();
    assert!(matches!(err, MappingError::UnknownTrial { .. }));
}

#[test]
fn rule_targeting_unknown_column_fails_schema_check() {
    let repo = parse("IMPRESS,demographics,dob,person,date_of_birth,direct,\n", "").unwrap();
    let index = repo.index(&impress()).unwrap();
    let schema = load_default_schema().unwrap();
    let err = index.check_against(&schema).unwrap_err();
    assert!(matches!(err, MappingError::UnknownTarget { rule_id, .. } if rule_id == "structural:2"));
}

#[test]
fn rule_ids_use_file_stem() {
    let dir = tempfile::tempdir().unwrap();
    let structural = dir.path().join("impress_structural.csv");
    let statics = dir.path().join("impress_static.csv");
    fs::write(
        &structural,
        format!("{HEADER}IMPRESS,demographics,dob,person,birth_datetime,direct,\n"),
    )
    .unwrap();
    fs::write(&statics, STATIC_HEADER).unwrap();

    let index = MappingRepository::load(&structural, &statics, &impress()).unwrap();
    assert_eq!(index.structural_rules()[0].id, "impress_structural:2");
    assert_eq!(index.structural_digest().len(), 64);
}
