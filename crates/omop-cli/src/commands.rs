use std::path::PathBuf;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};
use tracing::info;

use omop_cli::config::{OptionOverrides, resolve_options};
use omop_cli::pipeline::{self, RunInputs, RunRequest};
use omop_cli::report::write_run_report;
use omop_load::DirectorySink;
use omop_model::{RunReport, TrialId};

use crate::cli::{MappingArgs, RunArgs};
use crate::summary::{apply_table_style, dim_cell, header_cell};

/// Result of `omop-etl run`.
pub struct RunOutcome {
    pub report: RunReport,
    pub tables_dir: PathBuf,
    pub report_path: PathBuf,
}

pub fn run_trial(args: &RunArgs) -> Result<RunOutcome> {
    let trial = parse_trial(&args.mappings.trial)?;
    let overrides = OptionOverrides {
        strict: args.strict,
        truncate: args.truncate,
        unmapped_policy: args.unmapped_policy.map(Into::into),
        batch_size: args.batch_size,
        max_rejected_records: args.max_rejected_records,
        fail_on_validation: args.fail_on_validation,
        release_date: args.release_date,
    };
    let options = resolve_options(args.config.as_deref(), &overrides)?;
    let inputs = mapping_inputs(&args.mappings);

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.input_dir.join("output"));
    let tables_dir = output_dir.join("tables");
    let schema = pipeline::load_target_schema(&inputs.schema)?;
    let mut sink = DirectorySink::open(&tables_dir, schema)
        .with_context(|| format!("open output tables {}", tables_dir.display()))?;

    let request = RunRequest {
        inputs,
        options,
        ..RunRequest::new(&args.input_dir, trial)
    };
    let report = pipeline::run(&request, &mut sink)?;
    let report_path = output_dir.join("run_report.json");
    write_run_report(&report, &report_path)?;
    info!(path = %report_path.display(), "run report written");

    Ok(RunOutcome {
        report,
        tables_dir,
        report_path,
    })
}

pub fn run_plan(args: &MappingArgs) -> Result<()> {
    let trial = parse_trial(&args.trial)?;
    let prepared = pipeline::prepare(&trial, &mapping_inputs(args))?;

    let mut table = Table::new();
    table.set_header(vec![
        header_cell("#"),
        header_cell("Table"),
        header_cell("Depends on"),
    ]);
    apply_table_style(&mut table);
    let edges = prepared.schema.dependency_edges();
    for (position, name) in prepared.plan.tables().iter().enumerate() {
        let parents: Vec<String> = edges
            .iter()
            .filter(|(child, parent)| child == name && parent != name)
            .filter(|(_, parent)| prepared.plan.position(parent).is_some())
            .map(|(_, parent)| parent.to_string())
            .collect();
        let parents_cell = if parents.is_empty() {
            dim_cell("-")
        } else {
            Cell::new(parents.join(", "))
        };
        table.add_row(vec![
            Cell::new(position + 1),
            Cell::new(name),
            parents_cell,
        ]);
    }
    println!("Trial: {trial}");
    println!("{table}");
    Ok(())
}

pub fn run_check_mappings(args: &MappingArgs) -> Result<()> {
    let trial = parse_trial(&args.trial)?;
    let prepared = pipeline::prepare(&trial, &mapping_inputs(args))?;
    let uncovered = prepared.index.uncovered_required_columns(&prepared.schema);

    println!("Trial: {trial}");
    println!(
        "Structural rules: {}",
        prepared.index.structural_rules().len()
    );
    println!("Static rules: {}", prepared.index.static_rule_count());
    println!(
        "Source tables: {}",
        prepared
            .index
            .source_tables()
            .into_iter()
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Target tables: {}", prepared.plan.len());
    if uncovered.is_empty() {
        println!("Mappings are consistent with the target schema.");
    } else {
        let mut table = Table::new();
        table.set_header(vec![header_cell("Slot"), header_cell("Required column")]);
        apply_table_style(&mut table);
        for (slot, column) in uncovered {
            table.add_row(vec![slot.to_string(), column.to_string()]);
        }
        println!("Required columns without a rule:");
        println!("{table}");
    }
    Ok(())
}

pub fn run_tables() -> Result<()> {
    let schema = pipeline::load_target_schema(&RunInputs::default().schema)?;
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Table"),
        header_cell("Columns"),
        header_cell("Primary key"),
        header_cell("References"),
    ]);
    apply_table_style(&mut table);
    for def in schema.tables() {
        let mut parents: Vec<String> = def
            .foreign_keys()
            .map(|(_, key)| key.table.to_string())
            .collect();
        parents.sort();
        parents.dedup();
        table.add_row(vec![
            Cell::new(&def.name),
            Cell::new(def.columns.len()),
            def.primary_key()
                .map_or_else(|| dim_cell("-"), |column| Cell::new(&column.name)),
            if parents.is_empty() {
                dim_cell("-")
            } else {
                Cell::new(parents.join(", "))
            },
        ]);
    }
    println!("{table}");
    Ok(())
}

fn parse_trial(raw: &str) -> Result<TrialId> {
    TrialId::new(raw).with_context(|| format!("invalid trial id {raw:?}"))
}

fn mapping_inputs(args: &MappingArgs) -> RunInputs {
    RunInputs::with_overrides(args.structural_mapping.clone(), args.static_mapping.clone())
}
