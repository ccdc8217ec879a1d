//! Canonical table → Arrow conversion
//!
//! Column types are inferred from the non-missing cells of each column:
//! integers become `Int64`, a mix of integers and floats `Float64`, dates
//! `Date32`, booleans `Boolean`; anything else (including all-missing
//! columns) falls back to `Utf8`. Every field is nullable.

use crate::error::Result;
use crate::table::{CanonicalTable, Cell};
use arrow::array::{
    ArrayRef, BooleanBuilder, Date32Builder, Float64Builder, Int64Builder, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;

/// Schema metadata key holding the comma-separated index keys
pub const INDEX_METADATA_KEY: &str = "index";

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Int,
    Float,
    Bool,
    Date,
    Text,
}

impl Kind {
    fn of(cell: &Cell) -> Option<Self> {
        match cell {
            Cell::Null => None,
            Cell::Int(_) => Some(Kind::Int),
            Cell::Float(_) => Some(Kind::Float),
            Cell::Bool(_) => Some(Kind::Bool),
            Cell::Date(_) => Some(Kind::Date),
            Cell::Text(s) if s.trim().is_empty() => None,
            Cell::Text(_) => Some(Kind::Text),
        }
    }

    fn merge(self, other: Kind) -> Kind {
        match (self, other) {
            (a, b) if a == b => a,
            (Kind::Int | Kind::Float, Kind::Int | Kind::Float) => Kind::Float,
            _ => Kind::Text,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            Kind::Int => DataType::Int64,
            Kind::Float => DataType::Float64,
            Kind::Bool => DataType::Boolean,
            Kind::Date => DataType::Date32,
            Kind::Text => DataType::Utf8,
        }
    }
}

fn column_kind<'a>(cells: impl Iterator<Item = &'a Cell>) -> Kind {
    cells
        .filter_map(Kind::of)
        .reduce(Kind::merge)
        .unwrap_or(Kind::Text)
}

/// Infer the Arrow schema of a canonical table
pub fn infer_schema(table: &CanonicalTable) -> Schema {
    let fields: Vec<Field> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let kind = column_kind(table.rows().iter().map(|row| &row[i]));
            Field::new(name, kind.data_type(), true)
        })
        .collect();

    let metadata = HashMap::from([(
        INDEX_METADATA_KEY.to_string(),
        table.index_keys().join(","),
    )]);
    Schema::new_with_metadata(fields, metadata)
}

/// Days since the Unix epoch, as Arrow's `Date32` stores them
pub fn date32(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn build_column<'a>(data_type: &DataType, cells: impl Iterator<Item = &'a Cell>) -> ArrayRef {
    match data_type {
        DataType::Int64 => {
            let mut builder = Int64Builder::new();
            for cell in cells {
                builder.append_option(cell.as_i64());
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::new();
            for cell in cells {
                builder.append_option(cell.as_f64().filter(|v| !v.is_nan()));
            }
            Arc::new(builder.finish())
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::new();
            for cell in cells {
                builder.append_option(match cell {
                    Cell::Bool(b) => Some(*b),
                    _ => None,
                });
            }
            Arc::new(builder.finish())
        }
        DataType::Date32 => {
            let mut builder = Date32Builder::new();
            for cell in cells {
                builder.append_option(cell.as_date().map(date32));
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder = StringBuilder::new();
            for cell in cells {
                if cell.is_missing() {
                    builder.append_null();
                } else {
                    builder.append_value(cell.to_string());
                }
            }
            Arc::new(builder.finish())
        }
    }
}

/// Convert a canonical table into a single RecordBatch
pub fn to_record_batch(table: &CanonicalTable) -> Result<RecordBatch> {
    let schema = Arc::new(infer_schema(table));
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| build_column(field.data_type(), table.rows().iter().map(|row| &row[i])))
        .collect();

    let options = RecordBatchOptions::new().with_row_count(Some(table.len()));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}
