//! CLI commands and argument parsing

use crate::output::OutputFormat;
use crate::types::Granularity;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pull financial and economic datasets into canonical tables
#[derive(Parser, Debug)]
#[command(name = "remote-datareader")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file (YAML); built-in sources only when omitted
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a dataset and write it as a canonical table
    Fetch {
        /// Symbolic dataset name (e.g. census.bds.firms)
        dataset: String,

        /// First date to include (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last date to include (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Granularity (daily, weekly, monthly, quarterly, annual)
        #[arg(short, long)]
        granularity: Option<Granularity>,

        /// Credential name to use instead of the configured one
        #[arg(long)]
        credential: Option<String>,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "csv")]
        format: OutputFormat,
    },

    /// List available datasets
    List {
        /// Only datasets of this source
        #[arg(long)]
        source: Option<String>,
    },

    /// Validate the settings and every source definition
    Validate,
}
