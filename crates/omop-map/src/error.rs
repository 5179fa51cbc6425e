//! Error types for mapping file loading.

use std::path::PathBuf;

/// Mapping file errors. All of them are fatal and raised before any
/// data is transformed or loaded.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// A row is missing a required value, or a value does not parse.
    #[error("malformed mapping {file}:{line}, column {column:?}: {message}")]
    Malformed {
        file: String,
        line: usize,
        column: String,
        message: String,
    },

    /// Two rows write the same target within a trial.
    #[error(
        "conflicting mapping rules in {file} for {target}: line {first_line} and line {second_line}"
    )]
    Conflicting {
        file: String,
        target: String,
        first_line: usize,
        second_line: usize,
    },

    #[error("no structural mapping rules for trial {trial:?}")]
    UnknownTrial { trial: String },

    /// A rule targets a table or column the target schema does not declare.
    #[error("rule {rule_id} targets {target}, which is not in the target schema")]
    UnknownTarget { rule_id: String, target: String },

    /// A constant does not fit the column it is written to.
    #[error("rule {rule_id}: constant {value:?} does not fit {target}: {message}")]
    InvalidConstant {
        rule_id: String,
        target: String,
        value: String,
        message: String,
    },

    #[error("failed to read mapping file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse mapping CSV {file}: {message}")]
    Csv { file: String, message: String },
}

impl MappingError {
    pub(crate) fn malformed(
        file: &str,
        line: usize,
        column: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::Malformed {
            file: file.to_string(),
            line,
            column: column.to_string(),
            message: message.into(),
        }
    }
}
