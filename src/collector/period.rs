//! Reporting periods
//!
//! A paginated source is queried once per period. Periods order
//! chronologically and print as the label sent to the API: `2010`,
//! `2010-03` or `2010-03-31`.

use crate::error::{Error, Result};
use crate::table::Cell;
use crate::types::Granularity;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One reporting interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Period {
    Year(i32),
    Month { year: i32, month: u32 },
    Day(NaiveDate),
}

impl Period {
    /// The period containing `date` at the given granularity
    pub fn containing(date: NaiveDate, granularity: Granularity) -> Result<Self> {
        match granularity {
            Granularity::Annual => Ok(Period::Year(date.year())),
            Granularity::Monthly => Ok(Period::Month {
                year: date.year(),
                month: date.month(),
            }),
            Granularity::Daily => Ok(Period::Day(date)),
            other => Err(Error::config(format!(
                "periods must be daily, monthly or annual, not {other}"
            ))),
        }
    }

    /// Label sent to the API and stored in the period column
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// The following period of the same kind
    pub fn next(&self) -> Option<Period> {
        match *self {
            Period::Year(year) => year.checked_add(1).map(Period::Year),
            Period::Month { year, month: 12 } => year
                .checked_add(1)
                .map(|year| Period::Month { year, month: 1 }),
            Period::Month { year, month } => Some(Period::Month {
                year,
                month: month + 1,
            }),
            Period::Day(date) => date.succ_opt().map(Period::Day),
        }
    }

    /// Cell stored in the period column
    ///
    /// Years are integers, months their `YYYY-MM` label and days dates, so
    /// the column sorts chronologically.
    pub fn to_cell(&self) -> Cell {
        match *self {
            Period::Year(year) => Cell::from(year),
            Period::Month { .. } => Cell::Text(self.label()),
            Period::Day(date) => Cell::Date(date),
        }
    }

    fn same_kind(&self, other: &Period) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Year(year) => write!(f, "{year}"),
            Period::Month { year, month } => write!(f, "{year}-{month:02}"),
            Period::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::config(format!("invalid period '{s}'"));
        let parts: Vec<&str> = s.split('-').collect();

        match parts.as_slice() {
            [year] => year.parse().map(Period::Year).map_err(|_| invalid()),
            [year, month] => {
                let year: i32 = year.parse().map_err(|_| invalid())?;
                let month: u32 = month.parse().map_err(|_| invalid())?;
                if (1..=12).contains(&month) {
                    Ok(Period::Month { year, month })
                } else {
                    Err(invalid())
                }
            }
            [_, _, _] => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Period::Day)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.label()
    }
}

impl TryFrom<String> for Period {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Inclusive, ascending run of periods of one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodRange {
    start: Period,
    end: Period,
}

impl PeriodRange {
    /// Create a range; both ends must be the same kind and `start <= end`
    pub fn new(start: Period, end: Period) -> Result<Self> {
        if !start.same_kind(&end) {
            return Err(Error::config(format!(
                "period range mixes kinds: {start} .. {end}"
            )));
        }
        if start > end {
            return Err(Error::config(format!(
                "period range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Inclusive range of years
    pub fn years(start: i32, end: i32) -> Result<Self> {
        Self::new(Period::Year(start), Period::Year(end))
    }

    /// Periods covering `[start, end]` at the given granularity
    pub fn from_dates(start: NaiveDate, end: NaiveDate, granularity: Granularity) -> Result<Self> {
        Self::new(
            Period::containing(start, granularity)?,
            Period::containing(end, granularity)?,
        )
    }

    /// First period
    pub fn start(&self) -> Period {
        self.start
    }

    /// Last period
    pub fn end(&self) -> Period {
        self.end
    }

    /// Iterate the periods in ascending order
    pub fn iter(&self) -> PeriodIter {
        PeriodIter {
            next: Some(self.start),
            end: self.end,
        }
    }

    /// Number of periods
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Always false: a range holds at least one period
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl IntoIterator for PeriodRange {
    type Item = Period;
    type IntoIter = PeriodIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`PeriodRange`]
#[derive(Debug, Clone)]
pub struct PeriodIter {
    next: Option<Period>,
    end: Period,
}

impl Iterator for PeriodIter {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        let current = self.next.filter(|p| *p <= self.end)?;
        self.next = current.next();
        Some(current)
    }
}
