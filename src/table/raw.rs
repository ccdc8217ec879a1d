//! Per-transport raw payloads
//!
//! Vendor responses are held in a `RawTable` variant until they are
//! validated into a [`Table`]. Nothing untyped leaves a connector.

use super::{Cell, Table};
use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde_json::{Map, Value};

/// Raw payload as produced by one transport
#[derive(Debug, Clone)]
pub enum RawTable {
    /// Rows materialized from a SQL result set
    Rows(Table),

    /// JSON array of arrays whose first row is the header
    /// (e.g. `[["sic1","firms"],["07","1234"]]`)
    JsonGrid(Vec<Vec<Value>>),

    /// JSON object keyed by date, each value an object of fields
    /// (e.g. `{"2024-01-02": {"1. open": "1.10"}}`)
    KeyedSeries {
        /// Name given to the key column
        key_column: String,
        /// Entries keyed by the series key
        entries: Map<String, Value>,
    },

    /// Delimited text parsed into cells
    Delimited(Table),
}

impl RawTable {
    /// Build a grid from a parsed JSON body
    pub fn json_grid(value: Value) -> Result<Self> {
        let Value::Array(rows) = value else {
            return Err(Error::schema("expected a JSON array of rows"));
        };

        rows.into_iter()
            .enumerate()
            .map(|(i, row)| match row {
                Value::Array(cells) => Ok(cells),
                other => Err(Error::schema(format!(
                    "row {i} is not an array: {}",
                    type_name(&other)
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(RawTable::JsonGrid)
    }

    /// Extract a keyed series object found under `path` (dot separated)
    pub fn keyed_series(body: &Value, path: &str, key_column: impl Into<String>) -> Result<Self> {
        let found = path
            .split('.')
            .filter(|p| !p.is_empty())
            .try_fold(body, |current, part| current.get(part))
            .ok_or_else(|| Error::schema(format!("response has no '{path}' member")))?;

        match found {
            Value::Object(entries) => Ok(RawTable::KeyedSeries {
                key_column: key_column.into(),
                entries: entries.clone(),
            }),
            other => Err(Error::schema(format!(
                "'{path}' is {} instead of an object",
                type_name(other)
            ))),
        }
    }

    /// Validate the payload and convert it into a table
    pub fn into_table(self) -> Result<Table> {
        match self {
            RawTable::Rows(table) | RawTable::Delimited(table) => Ok(table),
            RawTable::JsonGrid(rows) => grid_to_table(rows),
            RawTable::KeyedSeries {
                key_column,
                entries,
            } => series_to_table(key_column, entries),
        }
    }
}

fn grid_to_table(rows: Vec<Vec<Value>>) -> Result<Table> {
    let mut rows = rows.into_iter();
    let header = rows
        .next()
        .ok_or_else(|| Error::schema("response grid has no header row"))?;

    let columns = header
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            other => Err(Error::schema(format!(
                "header cell is {} instead of a string",
                type_name(other)
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    let cells = rows
        .map(|row| row.iter().map(Cell::from_json).collect())
        .collect();
    Table::from_rows(columns, cells)
}

fn series_to_table(key_column: String, entries: Map<String, Value>) -> Result<Table> {
    let mut columns = vec![key_column];
    for value in entries.values() {
        let Value::Object(fields) = value else {
            return Err(Error::schema(format!(
                "series entry is {} instead of an object",
                type_name(value)
            )));
        };
        for name in fields.keys() {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }

    let mut table = Table::new(columns.clone());
    for (key, value) in &entries {
        let mut row = Vec::with_capacity(columns.len());
        row.push(parse_series_key(key));
        for column in &columns[1..] {
            let cell = match value.get(column) {
                Some(Value::String(s)) => match Cell::parse_numeric(s) {
                    Cell::Float(f) if f.is_nan() => Cell::Text(s.clone()),
                    numeric => numeric,
                },
                Some(other) => Cell::from_json(other),
                None => Cell::Null,
            };
            row.push(cell);
        }
        table.push_row(row)?;
    }
    Ok(table)
}

/// Series keys are dates, sometimes with a time suffix
fn parse_series_key(key: &str) -> Cell {
    let date_part = key.split_whitespace().next().unwrap_or(key);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_or_else(|_| Cell::text(key), Cell::Date)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
