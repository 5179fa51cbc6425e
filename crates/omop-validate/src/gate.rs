//! Validation Gate entry point.

use std::collections::BTreeSet;
use std::time::Instant;

use omop_load::{Query, RelationalSink, SinkError, with_retry};
use omop_model::{RetryPolicy, RowValues, TableName, TargetSchema, ValidationReport};
use tracing::{info, info_span, warn};

use crate::checks;

/// Read-only access to the sink shared by all checks.
pub(crate) struct CheckContext<'a> {
    pub expected: &'a BTreeSet<TableName>,
    sink: &'a dyn RelationalSink,
    retry: &'a RetryPolicy,
}

impl CheckContext<'_> {
    pub fn query(&self, query: &Query) -> Result<Vec<RowValues>, SinkError> {
        with_retry(self.retry, query.table.as_str(), || self.sink.query(query)).result
    }
}

/// Checks loaded tables against the target schema without mutating them.
pub struct ValidationGate<'a> {
    schema: &'a TargetSchema,
    retry: RetryPolicy,
}

impl<'a> ValidationGate<'a> {
    pub fn new(schema: &'a TargetSchema) -> Self {
        Self {
            schema,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs every check on each expected table.
    ///
    /// Foreign keys are only followed into other expected tables.
    pub fn validate(
        &self,
        sink: &dyn RelationalSink,
        expected_tables: &[TableName],
    ) -> Result<ValidationReport, SinkError> {
        let _span = info_span!("validate", tables = expected_tables.len()).entered();
        let started = Instant::now();
        let expected: BTreeSet<TableName> = expected_tables.iter().cloned().collect();
        let context = CheckContext {
            expected: &expected,
            sink,
            retry: &self.retry,
        };

        let mut report = ValidationReport::default();
        for table in expected_tables {
            let Some(def) = self.schema.table(table) else {
                warn!(table = %table, "table is not part of the target schema, not validated");
                continue;
            };
            report.violations.extend(checks::run_all(&context, def)?);
            report.tables_checked.push(table.clone());
        }

        info!(
            tables = report.tables_checked.len(),
            errors = report.error_count(),
            warnings = report.warning_count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "validation finished"
        );
        Ok(report)
    }
}
