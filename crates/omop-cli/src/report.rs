//! JSON run report persistence.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use omop_model::RunReport;

/// Writes the report as pretty JSON.
///
/// The report is written to a sibling temp file first and renamed into
/// place, so a reader never sees a partial report.
pub fn write_run_report(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create report directory {}", parent.display()))?;
    }
    let temp_path = path.with_extension("json.tmp");
    {
        let file = File::create(&temp_path)
            .with_context(|| format!("create {}", temp_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, report).context("serialize run report")?;
        writer.write_all(b"\n")?;
        let file = writer
            .into_inner()
            .map_err(std::io::IntoInnerError::into_error)
            .context("flush run report")?;
        file.sync_all().context("sync run report")?;
    }
    fs::rename(&temp_path, path)
        .with_context(|| format!("move run report into place at {}", path.display()))?;
    Ok(())
}

pub fn read_run_report(path: &Path) -> Result<RunReport> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("parse run report {}", path.display()))
}
