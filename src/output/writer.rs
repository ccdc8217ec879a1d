//! Columnar writers: Parquet and Arrow IPC
//!
//! Both take a whole canonical table as one RecordBatch; datasets are small
//! enough that streaming row groups buys nothing.

use super::schema::to_record_batch;
use crate::error::Result;
use crate::table::CanonicalTable;
use arrow::datatypes::Schema;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Configuration for Parquet writer
#[derive(Debug, Clone)]
pub struct ParquetWriterConfig {
    compression: Compression,
    row_group_size: usize,
}

impl Default for ParquetWriterConfig {
    fn default() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: 1024 * 1024,
        }
    }
}

impl ParquetWriterConfig {
    /// Create a new config with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set compression algorithm
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set row group size
    #[must_use]
    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size;
        self
    }

    /// Use no compression
    #[must_use]
    pub fn uncompressed(self) -> Self {
        self.with_compression(Compression::UNCOMPRESSED)
    }

    /// Use ZSTD compression
    #[must_use]
    pub fn zstd(self) -> Self {
        self.with_compression(Compression::ZSTD(ZstdLevel::default()))
    }

    /// Use GZIP compression
    #[must_use]
    pub fn gzip(self) -> Self {
        self.with_compression(Compression::GZIP(GzipLevel::default()))
    }

    /// Get row group size
    pub fn row_group_size(&self) -> usize {
        self.row_group_size
    }

    fn build_properties(&self, schema: &Schema) -> WriterProperties {
        let mut builder = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size);
        // Keep the index keys readable by tools that ignore the Arrow schema
        if let Some(index) = schema.metadata().get(super::INDEX_METADATA_KEY) {
            builder = builder.set_key_value_metadata(Some(vec![
                parquet::file::metadata::KeyValue::new(
                    super::INDEX_METADATA_KEY.to_string(),
                    index.clone(),
                ),
            ]));
        }
        builder.build()
    }
}

/// Parquet writer over any byte sink
pub struct ParquetWriter<W: Write + Send> {
    writer: ArrowWriter<W>,
    rows_written: usize,
}

impl<W: Write + Send> ParquetWriter<W> {
    /// Create a new Parquet writer
    pub fn new(sink: W, schema: &Schema, config: &ParquetWriterConfig) -> Result<Self> {
        let props = config.build_properties(schema);
        let writer = ArrowWriter::try_new(sink, Arc::new(schema.clone()), Some(props))?;
        Ok(Self {
            writer,
            rows_written: 0,
        })
    }

    /// Write a RecordBatch
    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.writer.write(batch)?;
        self.rows_written += batch.num_rows();
        Ok(())
    }

    /// Get the number of rows written so far
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Finish the file and return the row count
    pub fn close(self) -> Result<usize> {
        let rows = self.rows_written;
        self.writer.close()?;
        Ok(rows)
    }
}

/// Write a canonical table as a Parquet file
pub fn write_parquet<W: Write + Send>(
    table: &CanonicalTable,
    sink: W,
    config: Option<&ParquetWriterConfig>,
) -> Result<usize> {
    let default_config = ParquetWriterConfig::default();
    let config = config.unwrap_or(&default_config);

    let batch = to_record_batch(table)?;
    let mut writer = ParquetWriter::new(sink, batch.schema().as_ref(), config)?;
    writer.write(&batch)?;
    let rows = writer.close()?;
    debug!("Wrote {} rows as Parquet", rows);
    Ok(rows)
}

/// Write a canonical table as an Arrow IPC file
pub fn write_arrow<W: Write>(table: &CanonicalTable, sink: W) -> Result<usize> {
    let batch = to_record_batch(table)?;
    let mut writer = FileWriter::try_new(sink, batch.schema().as_ref())?;
    writer.write(&batch)?;
    writer.finish()?;
    debug!("Wrote {} rows as Arrow IPC", batch.num_rows());
    Ok(batch.num_rows())
}
