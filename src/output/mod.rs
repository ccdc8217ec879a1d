//! Output module
//!
//! Serializes a [`CanonicalTable`](crate::table::CanonicalTable) for the CLI.
//!
//! # Overview
//!
//! - Inferring an Arrow schema from cell types, index keys kept as metadata
//! - Converting a canonical table into a single RecordBatch
//! - Writing Parquet and Arrow IPC files
//! - Writing CSV and JSON lines

mod schema;
mod text;
mod writer;

pub use schema::{date32, infer_schema, to_record_batch, INDEX_METADATA_KEY};
pub use text::{cell_to_json, write_csv, write_jsonl};
pub use writer::{write_arrow, write_parquet, ParquetWriter, ParquetWriterConfig};

use crate::error::Result;
use crate::table::CanonicalTable;
use std::io::Write;

/// Serialization format for a fetched dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Comma-separated values with a header row
    #[default]
    Csv,
    /// One JSON object per line
    Jsonl,
    /// Apache Parquet (snappy)
    Parquet,
    /// Arrow IPC file
    Arrow,
}

impl OutputFormat {
    /// True for formats that should not be written to a terminal
    pub fn is_binary(self) -> bool {
        matches!(self, OutputFormat::Parquet | OutputFormat::Arrow)
    }

    /// Conventional file extension
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Parquet => "parquet",
            OutputFormat::Arrow => "arrow",
        }
    }
}

/// Write a table in the given format; returns the number of rows written
pub fn write_table<W: Write + Send>(
    table: &CanonicalTable,
    format: OutputFormat,
    sink: W,
) -> Result<usize> {
    match format {
        OutputFormat::Csv => write_csv(table, sink),
        OutputFormat::Jsonl => write_jsonl(table, sink),
        OutputFormat::Parquet => write_parquet(table, sink, None),
        OutputFormat::Arrow => write_arrow(table, sink),
    }
}
