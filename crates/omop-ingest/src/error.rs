//! Error types for source extract ingestion.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while locating or reading source extracts.
#[derive(Debug, Error)]
pub enum IngestError {
    // === File System Errors ===
    /// Input directory not found or not a directory.
    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// Failed to read directory entries.
    #[error("failed to read directory {path}: {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to open a source file.
    #[error("failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === CSV Parsing Errors ===
    /// A row could not be parsed.
    #[error("failed to parse CSV {path} at line {line}: {message}")]
    CsvParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// File has no header row.
    #[error("CSV file is empty: {path}")]
    EmptyCsv { path: PathBuf },

    /// Two header cells normalize to the same field name.
    #[error("duplicate column {column} in {path}")]
    DuplicateColumn { path: PathBuf, column: String },
}

pub type Result<T> = std::result::Result<T, IngestError>;
