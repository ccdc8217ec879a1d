//! Zip member extraction and delimited-text parsing

use super::ArchiveSpec;
use crate::error::{Error, Result};
use crate::table::{Cell, RawTable, Table};
use crate::types::Granularity;
use chrono::{Datelike, NaiveDate};
use std::io::{Cursor, Read};
use tracing::debug;

/// Read one member of a zip archive as text.
///
/// The exact name wins; otherwise the first case-insensitive match.
pub fn extract_member(archive: &[u8], member: &str) -> Result<String> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| Error::schema(format!("corrupt archive: {e}")))?;

    let mut available: Vec<String> = zip.file_names().map(str::to_string).collect();
    available.sort();

    let name = available
        .iter()
        .find(|name| name.as_str() == member)
        .or_else(|| available.iter().find(|name| name.eq_ignore_ascii_case(member)))
        .cloned()
        .ok_or_else(|| Error::MemberNotFound {
            member: member.to_string(),
            available: available.clone(),
        })?;

    let mut file = zip
        .by_name(&name)
        .map_err(|e| Error::schema(format!("corrupt archive member '{name}': {e}")))?;
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)?;

    debug!("Extracted {} ({} bytes)", name, bytes.len());
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse the wanted section of a member into a table.
///
/// Skips `skip_rows` physical lines, then any prose up to the header (the
/// first line with a blank leading cell or a `date_column` cell), and stops
/// at the first row whose sentinel column is missing.
pub fn parse_member(text: &str, spec: &ArchiveSpec) -> Result<Table> {
    let body = from_header(skip_lines(text, spec.skip_rows), &spec.date_column);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let mut records = reader.records();

    let header = records
        .next()
        .transpose()?
        .ok_or_else(|| Error::schema("archive member has no header row"))?;

    let mut columns: Vec<String> = header.iter().map(str::to_string).collect();
    match columns.first_mut() {
        Some(first) if first.is_empty() => first.clone_from(&spec.date_column),
        Some(_) => {}
        None => return Err(Error::schema("archive member has an empty header row")),
    }

    let date_idx = columns
        .iter()
        .position(|c| c == &spec.date_column)
        .ok_or_else(|| {
            Error::schema(format!(
                "date column '{}' not in header [{}]",
                spec.date_column,
                columns.join(", ")
            ))
        })?;

    let sentinel_idx = match &spec.sentinel_column {
        Some(name) => columns.iter().position(|c| c == name).ok_or_else(|| {
            Error::schema(format!("sentinel column '{name}' not in header"))
        })?,
        None => (0..columns.len())
            .find(|&i| i != date_idx)
            .ok_or_else(|| Error::schema("archive member has no data columns"))?,
    };

    let mut table = Table::new(columns.clone());
    for (line, record) in records.enumerate() {
        let record = record?;

        let sentinel = record.get(sentinel_idx).unwrap_or_default();
        if sentinel.is_empty() {
            debug!(
                "Sentinel column '{}' missing after {} rows; section ends",
                columns[sentinel_idx],
                table.len()
            );
            break;
        }

        let mut row = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let field = record.get(i).unwrap_or_default();
            let cell = if i == date_idx {
                Cell::Date(parse_date(field, spec.granularity).ok_or_else(|| {
                    Error::schema(format!(
                        "unparseable {} date '{field}' in data row {}",
                        spec.granularity,
                        line + 1
                    ))
                })?)
            } else {
                parse_value(field, &spec.missing_markers)
            };
            row.push(cell);
        }
        table.push_row(row)?;
    }

    RawTable::Delimited(table).into_table()
}

/// Everything after the first `n` lines
fn skip_lines(text: &str, n: usize) -> &str {
    let mut rest = text;
    for _ in 0..n {
        match rest.find('\n') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return "",
        }
    }
    rest
}

/// Everything from the header line on; preambles differ in length per file
fn from_header<'a>(text: &'a str, date_column: &str) -> &'a str {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let cells: Vec<&str> = line.trim_end().split(',').map(str::trim).collect();
        let blank_lead =
            cells.len() > 1 && cells[0].is_empty() && cells[1..].iter().any(|c| !c.is_empty());
        if blank_lead || cells.contains(&date_column) {
            if offset > 0 {
                debug!("Skipped {} bytes of preamble before the header", offset);
            }
            return &text[offset..];
        }
        offset += line.len();
    }
    text
}

fn parse_value(field: &str, missing_markers: &[String]) -> Cell {
    if field.is_empty() || missing_markers.iter().any(|m| m == field) {
        return Cell::Null;
    }
    field
        .parse::<f64>()
        .map_or_else(|_| Cell::text(field), Cell::Float)
}

/// Parse an archive date label and snap it to the end of its period.
///
/// Monthly `YYYYMM` → last day of the month, annual `YYYY` → Dec 31,
/// quarterly `YYYYQn` or `YYYYMM` → last day of the quarter, daily and
/// weekly `YYYYMMDD` unchanged.
pub fn parse_date(label: &str, granularity: Granularity) -> Option<NaiveDate> {
    let label = label.trim();
    match granularity {
        Granularity::Daily | Granularity::Weekly => {
            NaiveDate::parse_from_str(label, "%Y%m%d").ok()
        }
        Granularity::Monthly => {
            let (year, month) = year_month(label)?;
            month_end(year, month)
        }
        Granularity::Quarterly => {
            let (year, quarter) = match label.split_once(['Q', 'q']) {
                Some((year, quarter)) => (year.parse().ok()?, quarter.parse::<u32>().ok()?),
                None => {
                    let (year, month) = year_month(label)?;
                    (year, (month - 1) / 3 + 1)
                }
            };
            if !(1..=4).contains(&quarter) {
                return None;
            }
            month_end(year, quarter * 3)
        }
        Granularity::Annual => {
            if label.len() != 4 {
                return None;
            }
            NaiveDate::from_ymd_opt(label.parse().ok()?, 12, 31)
        }
    }
}

fn year_month(label: &str) -> Option<(i32, u32)> {
    if label.len() != 6 || !label.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = label[..4].parse().ok()?;
    let month = label[4..].parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }?;
    first_of_next.pred_opt().filter(|d| d.month() == month)
}
