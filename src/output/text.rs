//! Row-oriented writers: CSV and JSON lines

use crate::error::Result;
use crate::table::{CanonicalTable, Cell};
use serde_json::{Map, Value};
use std::io::Write;
use tracing::debug;

/// JSON value for a cell; missing values and NaN become `null`
pub fn cell_to_json(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(b) => Value::Bool(*b),
        Cell::Int(i) => Value::from(*i),
        Cell::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Cell::Text(s) => Value::String(s.clone()),
        Cell::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
    }
}

/// Write a canonical table as CSV with a header row.
///
/// Missing values are written as empty fields.
pub fn write_csv<W: Write>(table: &CanonicalTable, sink: W) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(ToString::to_string))?;
    }
    writer.flush()?;
    debug!("Wrote {} rows as CSV", table.len());
    Ok(table.len())
}

/// Write a canonical table as one JSON object per line
pub fn write_jsonl<W: Write>(table: &CanonicalTable, mut sink: W) -> Result<usize> {
    for row in table.rows() {
        let object: Map<String, Value> = table
            .columns()
            .iter()
            .zip(row)
            .map(|(name, cell)| (name.clone(), cell_to_json(cell)))
            .collect();
        serde_json::to_writer(&mut sink, &Value::Object(object))?;
        sink.write_all(b"\n")?;
    }
    sink.flush()?;
    debug!("Wrote {} rows as JSON lines", table.len());
    Ok(table.len())
}
