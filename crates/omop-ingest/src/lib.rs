//! eCRF source extract ingestion.
//!
//! Locates a trial's per-form CSV extracts and streams their rows as
//! [`omop_model::SourceRecord`]s tagged with the trial identity.

pub mod discovery;
pub mod error;
pub mod reader;

pub use discovery::{
    SourceDiscovery, SourceFile, discover_source_tables, list_csv_files, trial_root,
};
pub use error::{IngestError, Result};
pub use reader::SourceTableReader;
