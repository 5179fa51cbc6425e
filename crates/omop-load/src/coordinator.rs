//! Load Coordinator: truncates and loads planned tables, one transaction each.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use omop_model::{
    DraftsByTable, LoadReport, RetryPolicy, RowRejection, RowValues, RunOptions, TableDef,
    TableLoadResult, TableName, TableStatus, TargetRowDraft, TargetSchema,
};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, info_span, warn};

use crate::planner::TableLoadPlan;
use crate::retry::with_retry;
use crate::sink::{RelationalSink, SinkError};

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub truncate: bool,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::from(&RunOptions::default())
    }
}

impl From<&RunOptions> for LoadOptions {
    fn from(options: &RunOptions) -> Self {
        Self {
            truncate: options.truncate,
            batch_size: options.effective_batch_size(),
            retry: options.retry.clone(),
        }
    }
}

/// Shared flag an operator interrupt can set to stop a load between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum TableOutcome {
    Inserted(usize),
    Cancelled,
}

/// Rows ready for insertion after primary-key de-duplication.
struct PreparedTable {
    rows: Vec<RowValues>,
    rejected: Vec<RowRejection>,
    duplicates_collapsed: usize,
    /// Rendered primary key per row, parallel to `rows`.
    keys: Vec<String>,
}

pub struct LoadCoordinator<'a> {
    schema: &'a TargetSchema,
    options: LoadOptions,
    cancellation: CancellationToken,
}

impl<'a> LoadCoordinator<'a> {
    pub fn new(schema: &'a TargetSchema, options: LoadOptions) -> Self {
        Self {
            schema,
            options,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Loads every planned table in order.
    ///
    /// Tables committed before a failure stay committed. The first failed or
    /// cancelled table halts the plan and the remaining tables are reported
    /// as skipped.
    pub fn load(
        &self,
        plan: &TableLoadPlan,
        mut drafts: DraftsByTable,
        sink: &mut dyn RelationalSink,
    ) -> LoadReport {
        let _span = info_span!("load", tables = plan.len(), truncate = self.options.truncate)
            .entered();
        let mut report = LoadReport {
            truncated: false,
            truncation_error: None,
            tables: Vec::with_capacity(plan.len()),
        };

        if self.options.truncate {
            if self.cancellation.is_cancelled() {
                report.tables = skip_all(plan.tables(), &mut drafts, false, "run cancelled");
                return report;
            }
            let retried = with_retry(&self.options.retry, "truncate", || {
                in_transaction(sink, |sink| {
                    for table in plan.truncation_order() {
                        sink.truncate(&table)?;
                    }
                    Ok(())
                })
            });
            if let Err(e) = retried.result {
                error!(error = %e, "truncation failed, nothing loaded");
                report.truncation_error = Some(e.to_string());
                report.tables = skip_all(plan.tables(), &mut drafts, false, "truncation failed");
                return report;
            }
            info!(tables = plan.len(), "truncated planned tables");
            report.truncated = true;
        }

        let mut halted: Option<String> = None;
        for table in plan.tables() {
            let table_drafts = drafts.take(table);
            if let Some(reason) = &halted {
                let mut result =
                    TableLoadResult::pending(table.clone(), table_drafts.len(), report.truncated);
                result.error = Some(reason.clone());
                report.tables.push(result);
                continue;
            }
            if self.cancellation.is_cancelled() {
                halted = Some("run cancelled".to_string());
                let mut result =
                    TableLoadResult::pending(table.clone(), table_drafts.len(), report.truncated);
                result.error = halted.clone();
                report.tables.push(result);
                continue;
            }

            let result = self.load_table(table, table_drafts, report.truncated, sink);
            match result.status {
                TableStatus::Failed => {
                    halted = Some(format!("not attempted: loading {table} failed"));
                }
                TableStatus::Cancelled => halted = Some("run cancelled".to_string()),
                TableStatus::Committed | TableStatus::Skipped => {}
            }
            report.tables.push(result);
        }

        let leftover: Vec<_> = drafts.tables().cloned().collect();
        if !leftover.is_empty() {
            warn!(tables = ?leftover, "drafts for tables outside the load plan were dropped");
        }
        report
    }

    fn load_table(
        &self,
        table: &TableName,
        drafts: Vec<TargetRowDraft>,
        truncated: bool,
        sink: &mut dyn RelationalSink,
    ) -> TableLoadResult {
        let _span = info_span!("table", table = %table).entered();
        let started = Instant::now();
        let mut result = TableLoadResult::pending(table.clone(), drafts.len(), truncated);

        let Some(def) = self.schema.table(table) else {
            result.status = TableStatus::Failed;
            result.error = Some(SinkError::UnknownTable(table.clone()).to_string());
            return result;
        };
        let prepared = prepare(def, drafts);
        result.rejected = prepared.rejected;
        result.duplicates_collapsed = prepared.duplicates_collapsed;
        if !result.rejected.is_empty() {
            warn!(rejected = result.rejected.len(), "conflicting primary-key duplicates rejected");
        }

        let batch_size = self.options.batch_size.max(1);
        let rows = &prepared.rows;
        let retried = with_retry(&self.options.retry, table.as_str(), || {
            in_transaction(sink, |sink| {
                for batch in rows.chunks(batch_size) {
                    if self.cancellation.is_cancelled() {
                        return Ok(TableOutcome::Cancelled);
                    }
                    sink.insert_batch(table, batch)?;
                }
                Ok(TableOutcome::Inserted(rows.len()))
            })
        });
        result.attempts = retried.attempts;

        match retried.result {
            Ok(TableOutcome::Inserted(inserted)) => {
                result.status = TableStatus::Committed;
                result.inserted = inserted;
                result.content_digest = Some(content_digest(def, &prepared.keys, rows));
                info!(
                    inserted,
                    attempts = result.attempts,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "table committed"
                );
            }
            Ok(TableOutcome::Cancelled) => {
                result.status = TableStatus::Cancelled;
                result.error = Some("run cancelled".to_string());
                warn!("load cancelled, table rolled back");
            }
            Err(e) => {
                result.status = TableStatus::Failed;
                result.error = Some(e.to_string());
                error!(error = %e, attempts = result.attempts, "table load failed, rolled back");
            }
        }
        result
    }
}

/// Runs `body` between `begin` and `commit`, rolling back on error.
///
/// A body returning [`TableOutcome::Cancelled`] is rolled back as well.
fn in_transaction<T: Rollbackable>(
    sink: &mut dyn RelationalSink,
    body: impl FnOnce(&mut dyn RelationalSink) -> Result<T, SinkError>,
) -> Result<T, SinkError> {
    sink.begin()?;
    match body(sink) {
        Ok(value) if value.should_roll_back() => {
            sink.rollback()?;
            Ok(value)
        }
        Ok(value) => match sink.commit() {
            Ok(()) => Ok(value),
            Err(e) => {
                roll_back_quietly(sink);
                Err(e)
            }
        },
        Err(e) => {
            roll_back_quietly(sink);
            Err(e)
        }
    }
}

fn roll_back_quietly(sink: &mut dyn RelationalSink) {
    match sink.rollback() {
        Ok(()) | Err(SinkError::NoTransaction) => {}
        Err(e) => warn!(error = %e, "rollback failed"),
    }
}

trait Rollbackable {
    fn should_roll_back(&self) -> bool;
}

impl Rollbackable for () {
    fn should_roll_back(&self) -> bool {
        false
    }
}

impl Rollbackable for TableOutcome {
    fn should_roll_back(&self) -> bool {
        matches!(self, TableOutcome::Cancelled)
    }
}

fn skip_all(
    tables: &[TableName],
    drafts: &mut DraftsByTable,
    truncated: bool,
    reason: &str,
) -> Vec<TableLoadResult> {
    tables
        .iter()
        .map(|table| {
            let mut result =
                TableLoadResult::pending(table.clone(), drafts.take(table).len(), truncated);
            result.error = Some(reason.to_string());
            result
        })
        .collect()
}

/// Folds identical primary-key duplicates and rejects conflicting ones.
///
/// The first draft for a key wins; rows keep their arrival order.
fn prepare(def: &TableDef, drafts: Vec<TargetRowDraft>) -> PreparedTable {
    let mut prepared = PreparedTable {
        rows: Vec::with_capacity(drafts.len()),
        rejected: Vec::new(),
        duplicates_collapsed: 0,
        keys: Vec::with_capacity(drafts.len()),
    };
    let Some(pk) = def.primary_key() else {
        prepared.rows = drafts.into_iter().map(|draft| draft.values).collect();
        return prepared;
    };

    // key -> (row index, source table, line)
    let mut seen: BTreeMap<String, (usize, String, usize)> = BTreeMap::new();
    for draft in drafts {
        let provenance = &draft.provenance;
        let key_value = draft.value(&pk.name);
        if key_value.is_null() {
            prepared.rejected.push(RowRejection {
                source_table: provenance.source_table.clone(),
                line: provenance.line,
                reason: format!("primary key {} is null", pk.name),
            });
            continue;
        }
        let key = key_value.render();
        if let Some((index, first_table, first_line)) = seen.get(&key) {
            if prepared.rows[*index] == draft.values {
                prepared.duplicates_collapsed += 1;
                debug!(key = %key, line = provenance.line, "identical duplicate collapsed");
            } else {
                prepared.rejected.push(RowRejection {
                    source_table: provenance.source_table.clone(),
                    line: provenance.line,
                    reason: format!(
                        "{}={key} conflicts with the row from {first_table} line {first_line}",
                        pk.name
                    ),
                });
            }
            continue;
        }
        seen.insert(
            key.clone(),
            (
                prepared.rows.len(),
                provenance.source_table.clone(),
                provenance.line,
            ),
        );
        prepared.keys.push(key);
        prepared.rows.push(draft.values);
    }
    prepared
}

/// SHA-256 over the rows ordered by primary key, columns in schema order.
///
/// Tables without a primary key are ordered by their rendered rows.
fn content_digest(def: &TableDef, keys: &[String], rows: &[RowValues]) -> String {
    let mut lines: Vec<(&str, String)> = rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let line = def
                .columns
                .iter()
                .map(|column| {
                    row.get(&column.name)
                        .map(omop_model::Value::render)
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
                .join("\u{1f}");
            (keys.get(index).map_or("", String::as_str), line)
        })
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for (_, line) in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
