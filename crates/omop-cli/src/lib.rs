//! Run orchestration and operational plumbing for the `omop-etl` binary.

pub mod config;
pub mod logging;
pub mod pipeline;
pub mod report;
