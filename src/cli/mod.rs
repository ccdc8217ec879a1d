//! CLI module
//!
//! Command-line interface for fetching datasets.
//!
//! # Commands
//!
//! - `fetch` - Fetch a dataset and write CSV, JSON lines, Parquet or Arrow
//! - `list` - List datasets of every configured and built-in source
//! - `validate` - Validate the settings file

mod commands;
mod runner;

pub use crate::output::OutputFormat;
pub use commands::{Cli, Commands};
pub use runner::Runner;

#[cfg(test)]
mod tests;
