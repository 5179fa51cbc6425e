//! Run configuration: defaults, optional JSON file, then command-line flags.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use omop_model::{RunOptions, UnmappedPolicy};

/// Flag values that override the configuration file.
#[derive(Debug, Clone, Default)]
pub struct OptionOverrides {
    pub strict: bool,
    pub truncate: bool,
    pub unmapped_policy: Option<UnmappedPolicy>,
    pub batch_size: Option<usize>,
    pub max_rejected_records: Option<usize>,
    pub fail_on_validation: bool,
    pub release_date: Option<NaiveDate>,
}

/// Reads a JSON [`RunOptions`] file. Missing keys keep their defaults.
pub fn load_options_file(path: &Path) -> Result<RunOptions> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse config {}", path.display()))
}

/// Resolves the options of a run.
///
/// `--strict` replaces the base with fail-closed options before the other
/// flags are applied. Boolean flags can only switch a behavior on.
pub fn resolve_options(config: Option<&Path>, overrides: &OptionOverrides) -> Result<RunOptions> {
    let mut options = match config {
        Some(path) => load_options_file(path)?,
        None => RunOptions::default(),
    };
    if overrides.strict {
        let strict = RunOptions::strict();
        options.unmapped_policy = strict.unmapped_policy;
        options.max_rejected_records = strict.max_rejected_records;
        options.fail_on_validation = strict.fail_on_validation;
    }
    options.truncate |= overrides.truncate;
    options.fail_on_validation |= overrides.fail_on_validation;
    if let Some(policy) = overrides.unmapped_policy {
        options.unmapped_policy = policy;
    }
    if let Some(size) = overrides.batch_size {
        options.batch_size = size;
    }
    if let Some(limit) = overrides.max_rejected_records {
        options.max_rejected_records = Some(limit);
    }
    if let Some(date) = overrides.release_date {
        options.release_date = Some(date);
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{"batch_size": 50, "unmapped_policy": "reject", "retry": {"max_retries": 1}}"#,
        )
        .unwrap();

        let options = resolve_options(
            Some(&path),
            &OptionOverrides {
                batch_size: Some(10),
                truncate: true,
                ..OptionOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(options.batch_size, 10);
        assert!(options.truncate);
        assert_eq!(options.unmapped_policy, UnmappedPolicy::Reject);
        assert_eq!(options.retry.max_retries, 1);
        assert_eq!(options.retry.initial_delay_ms, 50);
    }

    #[test]
    fn strict_flag_fails_closed() {
        let options = resolve_options(
            None,
            &OptionOverrides {
                strict: true,
                max_rejected_records: Some(3),
                ..OptionOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(options.unmapped_policy, UnmappedPolicy::Reject);
        assert!(options.fail_on_validation);
        assert_eq!(options.max_rejected_records, Some(3));
    }

    #[test]
    fn unreadable_config_names_the_file() {
        let error = resolve_options(
            Some(Path::new("/nonexistent/run.json")),
            &OptionOverrides::default(),
        )
        .unwrap_err();
        assert!(error.to_string().contains("run.json"));
    }
}
