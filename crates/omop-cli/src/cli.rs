//! CLI argument definitions for the OMOP loader.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;
use omop_model::UnmappedPolicy;

#[derive(Parser)]
#[command(
    name = "omop-etl",
    version,
    about = "Map trial eCRF extracts onto the OMOP CDM and load them",
    long_about = "Map clinical-trial eCRF extracts onto OMOP CDM v5.4 tables.\n\n\
                  Rules come from a structural and a static mapping file. Tables are\n\
                  loaded in foreign-key order, one transaction per table, and checked\n\
                  after loading."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Allow raw source values (patient data) in log output.
    #[arg(long = "log-data", global = true)]
    pub log_data: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Map, load and validate one trial extract.
    Run(RunArgs),

    /// Print the table load order for a trial.
    Plan(MappingArgs),

    /// Validate the mapping files for a trial against the target schema.
    CheckMappings(MappingArgs),

    /// List the target schema tables.
    Tables,
}

#[derive(Args)]
pub struct MappingArgs {
    /// Trial identifier selecting the structural rules.
    #[arg(long = "trial", value_name = "ID")]
    pub trial: String,

    /// Structural mapping CSV (default: packaged mapping).
    #[arg(long = "structural-mapping", value_name = "FILE")]
    pub structural_mapping: Option<PathBuf>,

    /// Static (value-level) mapping CSV (default: packaged mapping).
    #[arg(long = "static-mapping", value_name = "FILE")]
    pub static_mapping: Option<PathBuf>,
}

#[derive(Args)]
pub struct RunArgs {
    /// Directory with the extract CSVs, or with a subdirectory per trial.
    #[arg(value_name = "INPUT_DIR")]
    pub input_dir: PathBuf,

    #[command(flatten)]
    pub mappings: MappingArgs,

    /// Output directory for tables and the run report (default: <INPUT_DIR>/output).
    #[arg(long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// JSON file with run options; flags take precedence.
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Empty every planned table before loading.
    #[arg(long = "truncate")]
    pub truncate: bool,

    /// Handling of coded values without a static rule.
    #[arg(long = "unmapped-policy", value_enum)]
    pub unmapped_policy: Option<UnmappedPolicyArg>,

    /// Rows per insert batch.
    #[arg(long = "batch-size", value_name = "N")]
    pub batch_size: Option<usize>,

    /// Fail the run when more records than this are rejected.
    #[arg(long = "max-rejected-records", value_name = "N")]
    pub max_rejected_records: Option<usize>,

    /// Fail the run when validation finds errors.
    #[arg(long = "fail-on-validation")]
    pub fail_on_validation: bool,

    /// Release date written by run-scoped rules (default: today).
    #[arg(long = "release-date", value_name = "YYYY-MM-DD")]
    pub release_date: Option<NaiveDate>,

    /// Reject unmapped values and fail on any rejection or validation error.
    #[arg(long = "strict")]
    pub strict: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum UnmappedPolicyArg {
    /// Write the unmapped concept and keep the record.
    Placeholder,
    /// Reject the whole record.
    Reject,
}

impl From<UnmappedPolicyArg> for UnmappedPolicy {
    fn from(arg: UnmappedPolicyArg) -> Self {
        match arg {
            UnmappedPolicyArg::Placeholder => UnmappedPolicy::Placeholder,
            UnmappedPolicyArg::Reject => UnmappedPolicy::Reject,
        }
    }
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
