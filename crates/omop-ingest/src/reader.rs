//! Streams one source extract file as [`SourceRecord`]s.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use omop_model::{SourceRecord, TrialId, normalize_field_name};
use tracing::{debug, trace};

use crate::error::{IngestError, Result};

/// Lazily reads a source CSV, one record per data row.
///
/// Header cells are normalized to lowercase field names with BOM and
/// surrounding whitespace removed. Blank cells become missing values and
/// rows with no value at all are skipped. Lines are numbered from 1, not
/// counting the header.
pub struct SourceTableReader {
    path: PathBuf,
    trial: TrialId,
    source_table: String,
    headers: Vec<String>,
    records: csv::StringRecordsIntoIter<File>,
    line: usize,
    skipped_blank: usize,
}

impl SourceTableReader {
    pub fn open(path: &Path, trial: TrialId, source_table: &str) -> Result<Self> {
        let file = File::open(path).map_err(|e| IngestError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let raw_headers = reader.headers().map_err(|e| IngestError::CsvParse {
            path: path.to_path_buf(),
            line: 0,
            message: e.to_string(),
        })?;
        if raw_headers.iter().all(|header| header.trim().is_empty()) {
            return Err(IngestError::EmptyCsv {
                path: path.to_path_buf(),
            });
        }
        let headers: Vec<String> = raw_headers.iter().map(normalize_field_name).collect();
        let mut seen = BTreeSet::new();
        for header in headers.iter().filter(|header| !header.is_empty()) {
            if !seen.insert(header) {
                return Err(IngestError::DuplicateColumn {
                    path: path.to_path_buf(),
                    column: header.clone(),
                });
            }
        }
        debug!(path = %path.display(), columns = headers.len(), "opened source extract");

        Ok(Self {
            path: path.to_path_buf(),
            trial,
            source_table: normalize_field_name(source_table),
            headers,
            records: reader.into_records(),
            line: 0,
            skipped_blank: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    /// Normalized field names, in file order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Rows skipped so far because every cell was blank.
    pub fn skipped_blank(&self) -> usize {
        self.skipped_blank
    }
}

impl Iterator for SourceTableReader {
    type Item = Result<SourceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => {
                    self.line += 1;
                    return Some(Err(IngestError::CsvParse {
                        path: self.path.clone(),
                        line: self.line,
                        message: e.to_string(),
                    }));
                }
            };
            self.line += 1;
            if record.iter().all(str::is_empty) {
                self.skipped_blank += 1;
                trace!(line = self.line, "skipped blank row");
                continue;
            }

            let mut source =
                SourceRecord::new(self.trial.clone(), &self.source_table, self.line);
            for (index, header) in self.headers.iter().enumerate() {
                if header.is_empty() {
                    continue;
                }
                source.insert(header, record.get(index).map(str::to_string));
            }
            return Some(Ok(source));
        }
    }
}
