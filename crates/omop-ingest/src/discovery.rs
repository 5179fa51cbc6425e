//! Source file discovery for a trial extract.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use omop_model::{TrialId, normalize_field_name};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// A source extract file matched to a declared source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub source_table: String,
    pub path: PathBuf,
}

/// Outcome of matching an input directory against the declared source tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDiscovery {
    /// Directory the files were taken from.
    pub root: PathBuf,
    /// Matched files, ordered by source table.
    pub files: Vec<SourceFile>,
    /// Declared source tables with no file.
    pub missing: Vec<String>,
    /// CSV files that match no declared source table.
    pub unused: Vec<PathBuf>,
}

/// Lists all CSV files in a directory.
///
/// Returns files sorted by filename.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(IngestError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| IngestError::DirectoryRead {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry_result in entries {
        let entry = entry_result.map_err(|e| IngestError::DirectoryRead {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Directory holding a trial's extract: `<input>/<trial>` when it exists,
/// otherwise `<input>` itself.
pub fn trial_root(input: &Path, trial: &TrialId) -> PathBuf {
    let nested = input.join(trial.as_str());
    if nested.is_dir() {
        nested
    } else {
        input.to_path_buf()
    }
}

/// Matches CSV files to declared source tables by case-insensitive file stem.
///
/// Declared tables without a file are reported as missing rather than
/// failing; a trial extract may legitimately lack an optional form.
pub fn discover_source_tables(
    input: &Path,
    trial: &TrialId,
    declared: &BTreeSet<String>,
) -> Result<SourceDiscovery> {
    let root = trial_root(input, trial);
    let mut by_table: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut unused = Vec::new();

    for path in list_csv_files(&root)? {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(normalize_field_name)
            .unwrap_or_default();
        if declared.contains(&stem) && !by_table.contains_key(&stem) {
            by_table.insert(stem, path);
        } else {
            unused.push(path);
        }
    }

    let missing: Vec<String> = declared
        .iter()
        .filter(|table| !by_table.contains_key(*table))
        .cloned()
        .collect();
    if !missing.is_empty() {
        warn!(trial = %trial, missing = ?missing, "declared source tables have no extract file");
    }
    if !unused.is_empty() {
        debug!(trial = %trial, files = unused.len(), "extract files not referenced by any rule");
    }

    Ok(SourceDiscovery {
        root,
        files: by_table
            .into_iter()
            .map(|(source_table, path)| SourceFile { source_table, path })
            .collect(),
        missing,
        unused,
    })
}
