//! Run configuration.

use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// What to do with a non-missing value that no static rule covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedPolicy {
    /// Map to the reserved unmapped concept and record a warning.
    #[default]
    Placeholder,
    /// Reject the whole source record.
    Reject,
}

impl UnmappedPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "placeholder" | "unmapped-to-placeholder" => Some(Self::Placeholder),
            "reject" | "reject-record" => Some(Self::Reject),
            _ => None,
        }
    }
}

impl fmt::Display for UnmappedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placeholder => f.write_str("placeholder"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// Exponential backoff for transient sink errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(32) as i32);
        let delay = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }
}

/// Options controlling a single trial run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Truncate every planned table before loading.
    pub truncate: bool,
    pub unmapped_policy: UnmappedPolicy,
    /// Concept written for values without a static rule.
    pub unmapped_concept_id: i64,
    /// Concept written for missing values ("No matching concept").
    pub missing_concept_id: i64,
    /// Rows per `insert_batch` call.
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Rejected records above this count fail the run. `None` never fails.
    pub max_rejected_records: Option<usize>,
    /// Validation errors fail the run.
    pub fail_on_validation: bool,
    /// Release date for run-scoped rules; today when unset.
    pub release_date: Option<NaiveDate>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            truncate: false,
            unmapped_policy: UnmappedPolicy::Placeholder,
            unmapped_concept_id: 0,
            missing_concept_id: 0,
            batch_size: 1_000,
            retry: RetryPolicy::default(),
            max_rejected_records: None,
            fail_on_validation: false,
            release_date: None,
        }
    }
}

impl RunOptions {
    /// Fail-closed options: unmapped values and any rejected record or
    /// validation error fail the run.
    pub fn strict() -> Self {
        Self {
            unmapped_policy: UnmappedPolicy::Reject,
            max_rejected_records: Some(0),
            fail_on_validation: true,
            ..Self::default()
        }
    }

    /// Batch size with zero treated as one.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
