//! Run orchestration for one trial.
//!
//! Stages, in order: schema and mappings (fatal on error, before the sink is
//! touched), load planning, streaming transform of every source extract,
//! run-scoped rows, load, validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use omop_ingest::{SourceFile, SourceTableReader, discover_source_tables};
use omop_load::{CancellationToken, LoadCoordinator, LoadOptions, RelationalSink, TableLoadPlan};
use omop_map::{ConceptCoverage, ConceptResolver, MappingIndex, MappingRepository, ResolverPolicy};
use omop_model::{
    DraftsByTable, InputDigests, RUN_SCOPE, RecordErrorKind, RecordRejectionSample, RunOptions,
    RunReport, SourceTableSummary, TableName, TargetSchema, TrialId,
};
use omop_standards::{
    default_schema_path, default_static_mapping_path, default_structural_mapping_path,
    load_schema, sha256_file,
};
use omop_transform::{RecordError, RecordOutput, RowTransformer};
use omop_validate::ValidationGate;
use tracing::{debug, info, info_span, warn};

use crate::logging::redact_value;

/// Rejected records kept verbatim in the run report.
pub const MAX_REJECTION_SAMPLES: usize = 20;

/// Declarative inputs of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInputs {
    pub schema: PathBuf,
    pub structural_mapping: PathBuf,
    pub static_mapping: PathBuf,
}

impl Default for RunInputs {
    fn default() -> Self {
        Self {
            schema: default_schema_path(),
            structural_mapping: default_structural_mapping_path(),
            static_mapping: default_static_mapping_path(),
        }
    }
}

impl RunInputs {
    pub fn with_overrides(structural: Option<PathBuf>, statics: Option<PathBuf>) -> Self {
        let defaults = Self::default();
        Self {
            schema: defaults.schema,
            structural_mapping: structural.unwrap_or(defaults.structural_mapping),
            static_mapping: statics.unwrap_or(defaults.static_mapping),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Directory holding the extract, or a `<trial>` subdirectory of it.
    pub input_dir: PathBuf,
    pub trial: TrialId,
    pub inputs: RunInputs,
    pub options: RunOptions,
    pub cancellation: CancellationToken,
}

impl RunRequest {
    pub fn new(input_dir: impl Into<PathBuf>, trial: TrialId) -> Self {
        Self {
            input_dir: input_dir.into(),
            trial,
            inputs: RunInputs::default(),
            options: RunOptions::default(),
            cancellation: CancellationToken::new(),
        }
    }
}

/// Schema, validated mappings and load order for a trial.
pub struct PreparedRun {
    pub schema: TargetSchema,
    pub index: MappingIndex,
    pub plan: TableLoadPlan,
    pub digests: InputDigests,
}

pub fn load_target_schema(path: &Path) -> Result<TargetSchema> {
    load_schema(path).with_context(|| format!("load target schema {}", path.display()))
}

/// Loads and checks everything a run needs before any data is read.
pub fn prepare(trial: &TrialId, inputs: &RunInputs) -> Result<PreparedRun> {
    let _span = info_span!("mapping", trial = %trial).entered();
    let schema = load_target_schema(&inputs.schema)?;
    let index = MappingRepository::load(&inputs.structural_mapping, &inputs.static_mapping, trial)
        .with_context(|| format!("load mappings for trial {trial}"))?;
    index
        .check_against(&schema)
        .context("mappings do not match the target schema")?;
    for (slot, column) in index.uncovered_required_columns(&schema) {
        warn!(
            slot = %slot,
            column = %column,
            "required column has no rule, every row of this slot will be rejected"
        );
    }
    let plan = omop_load::plan(&index.declared_tables(), &schema).context("plan load order")?;
    let digests = InputDigests {
        schema: sha256_file(&inputs.schema).context("hash target schema")?,
        structural_mapping: index.structural_digest().to_string(),
        static_mapping: index.static_digest().to_string(),
    };
    info!(
        structural_rules = index.structural_rules().len(),
        static_rules = index.static_rule_count(),
        tables = plan.len(),
        "mappings loaded"
    );
    Ok(PreparedRun {
        schema,
        index,
        plan,
        digests,
    })
}

/// Runs one trial end to end against `sink`.
///
/// Mapping problems are returned as errors before the sink is used. Record,
/// table and validation problems are reported in the [`RunReport`].
pub fn run(request: &RunRequest, sink: &mut dyn RelationalSink) -> Result<RunReport> {
    let _span = info_span!("run", trial = %request.trial).entered();
    let started_at = Utc::now();
    let prepared = prepare(&request.trial, &request.inputs)?;

    let mut options = request.options.clone();
    let release_date = options
        .release_date
        .unwrap_or_else(|| started_at.date_naive());
    options.release_date = Some(release_date);

    let discovery = discover_source_tables(
        &request.input_dir,
        &request.trial,
        &prepared.index.source_tables(),
    )
    .with_context(|| format!("discover extract files in {}", request.input_dir.display()))?;

    let resolver = ConceptResolver::new(&prepared.index, ResolverPolicy::from(&options));
    let transformer = RowTransformer::new(
        &prepared.index,
        &prepared.schema,
        &resolver,
        options.unmapped_policy,
    )
    .context("compile mapping rules")?;

    let mut tally = TransformTally::default();
    for file in &discovery.files {
        tally.transform_file(&transformer, file, &request.trial, &request.input_dir)?;
    }
    if prepared.index.has_run_rules() {
        tally.transform_run_record(&transformer, release_date);
    }
    info!(
        rows = tally.drafts.total_rows(),
        rejected = tally.sources.iter().map(|source| source.rejected).sum::<usize>(),
        "transform finished"
    );

    let coordinator = LoadCoordinator::new(&prepared.schema, LoadOptions::from(&options))
        .with_cancellation(request.cancellation.clone());
    let load = coordinator.load(&prepared.plan, tally.drafts, sink);

    let validation = ValidationGate::new(&prepared.schema)
        .with_retry(options.retry.clone())
        .validate(&*sink, &load.committed_tables())
        .context("validate loaded tables")?;

    Ok(RunReport {
        trial: request.trial.clone(),
        started_at,
        finished_at: Utc::now(),
        options,
        inputs: prepared.digests,
        plan: prepared.plan.tables().to_vec(),
        missing_source_tables: discovery.missing,
        sources: tally.sources,
        record_errors: tally.record_errors,
        rejection_samples: tally.samples,
        unmapped_values: tally.coverage.unmapped_values(),
        unmapped_warnings: tally.unmapped_warnings,
        coverage: tally.coverage.fields(),
        load,
        validation,
    })
}

/// Accumulates transform results across source tables.
#[derive(Default)]
struct TransformTally {
    drafts: DraftsByTable,
    sources: Vec<SourceTableSummary>,
    record_errors: BTreeMap<TableName, BTreeMap<RecordErrorKind, usize>>,
    samples: Vec<RecordRejectionSample>,
    coverage: ConceptCoverage,
    unmapped_warnings: BTreeMap<TableName, usize>,
}

impl TransformTally {
    fn transform_file(
        &mut self,
        transformer: &RowTransformer<'_>,
        file: &SourceFile,
        trial: &TrialId,
        input_dir: &Path,
    ) -> Result<()> {
        let _span = info_span!("transform", source_table = %file.source_table).entered();
        let started = Instant::now();
        let mut reader = SourceTableReader::open(&file.path, trial.clone(), &file.source_table)
            .with_context(|| format!("open extract {}", file.path.display()))?;
        let relative = file.path.strip_prefix(input_dir).unwrap_or(&file.path);
        let mut summary = SourceTableSummary {
            source_table: file.source_table.clone(),
            path: Some(relative.display().to_string()),
            ..SourceTableSummary::default()
        };

        let mut read_error = None;
        let records = reader
            .by_ref()
            .map_while(|record| record.map_err(|error| read_error = Some(error)).ok());
        for outcome in transformer.transform_all(records) {
            summary.records += 1;
            match outcome.result {
                Ok(output) => self.accept(&mut summary, output),
                Err(error) => self.reject(&mut summary, outcome.line, &error),
            }
        }
        if let Some(error) = read_error {
            return Err(error).with_context(|| format!("read extract {}", file.path.display()));
        }

        info!(
            records = summary.records,
            accepted = summary.accepted,
            rejected = summary.rejected,
            rows = summary.drafts,
            blank_lines = reader.skipped_blank(),
            duration_ms = started.elapsed().as_millis() as u64,
            "source table transformed"
        );
        self.sources.push(summary);
        Ok(())
    }

    fn transform_run_record(&mut self, transformer: &RowTransformer<'_>, release_date: NaiveDate) {
        let mut summary = SourceTableSummary {
            source_table: RUN_SCOPE.to_string(),
            records: 1,
            ..SourceTableSummary::default()
        };
        match transformer.transform_run(release_date) {
            Ok(output) => self.accept(&mut summary, output),
            Err(error) => self.reject(&mut summary, 1, &error),
        }
        self.sources.push(summary);
    }

    fn accept(&mut self, summary: &mut SourceTableSummary, output: RecordOutput) {
        summary.accepted += 1;
        summary.drafts += output.drafts.len();
        summary.skipped_empty += output.skipped_empty;
        for lookup in &output.lookups {
            self.coverage.record(
                &lookup.source_field,
                lookup.raw_value.as_deref(),
                &lookup.resolved,
            );
        }
        for warning in &output.warnings {
            *self
                .unmapped_warnings
                .entry(warning.table.clone())
                .or_default() += 1;
            debug!(
                table = %warning.table,
                column = %warning.column,
                source_field = %warning.source_field,
                raw_value = redact_value(&warning.raw_value),
                "value written as the unmapped concept"
            );
        }
        for draft in output.drafts {
            self.drafts.push(draft);
        }
    }

    fn reject(&mut self, summary: &mut SourceTableSummary, line: usize, error: &RecordError) {
        summary.rejected += 1;
        *self
            .record_errors
            .entry(error.table().clone())
            .or_default()
            .entry(error.kind())
            .or_default() += 1;
        if let RecordError::UnmappedValue {
            source_field,
            raw_value,
            concept_id,
            ..
        } = error
        {
            self.coverage
                .record_unmapped(source_field, raw_value, *concept_id);
        }
        warn!(
            source_table = %summary.source_table,
            line,
            kind = %error.kind(),
            table = %error.table(),
            column = %error.column(),
            "record rejected"
        );
        if self.samples.len() < MAX_REJECTION_SAMPLES {
            self.samples.push(RecordRejectionSample {
                source_table: summary.source_table.clone(),
                line,
                kind: error.kind(),
                message: error.to_string(),
            });
        }
    }
}
