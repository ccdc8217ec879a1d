//! Connectors
//!
//! A [`Connector`] turns a [`DatasetRequest`] into a [`Dataset`] for the
//! symbolic dataset names it serves. Four transports are provided:
//!
//! | Connector | Transport |
//! |-----------|-----------|
//! | [`SqlConnector`] | SQL session on a relational warehouse |
//! | [`RestPaginatedConnector`] | one REST request per period |
//! | [`ArchiveConnector`] | zip archive of delimited files |
//! | [`RestSeriesConnector`] | one REST request returning a keyed series |
//!
//! Callers go through [`ConnectorRegistry`], which owns every configured
//! connector and dispatches by dataset name.

mod archive;
mod registry;
mod rest;
mod sql;

pub use archive::ArchiveConnector;
pub use registry::ConnectorRegistry;
pub use rest::{RestPaginatedConnector, RestSeriesConnector};
pub use sql::SqlConnector;

use crate::cancel::CancelToken;
use crate::collector::PeriodUnavailable;
use crate::error::{Error, Result};
use crate::table::{CanonicalTable, Cell};
use crate::types::Granularity;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use std::future::Future;

// ============================================================================
// Connector Trait
// ============================================================================

/// Core trait that all connectors implement
#[async_trait]
pub trait Connector: Send + Sync {
    /// Source name (e.g. `census`)
    fn name(&self) -> &str;

    /// Dataset names this connector serves
    fn datasets(&self) -> Vec<String>;

    /// Fetch one dataset
    async fn fetch(&self, request: DatasetRequest) -> Result<Dataset>;
}

// ============================================================================
// Request
// ============================================================================

/// What to fetch. Built once, then read-only.
#[derive(Debug, Clone)]
pub struct DatasetRequest {
    dataset: String,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    granularity: Option<Granularity>,
    credential: Option<String>,
    cancel: CancelToken,
}

impl DatasetRequest {
    /// Request the whole of `dataset`
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            start: None,
            end: None,
            granularity: None,
            credential: None,
            cancel: CancelToken::new(),
        }
    }

    /// First date wanted (inclusive)
    #[must_use]
    pub fn start(mut self, date: NaiveDate) -> Self {
        self.start = Some(date);
        self
    }

    /// Last date wanted (inclusive)
    #[must_use]
    pub fn end(mut self, date: NaiveDate) -> Self {
        self.end = Some(date);
        self
    }

    /// Both ends of the range
    #[must_use]
    pub fn between(self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start(start).end(end)
    }

    /// Reporting frequency
    #[must_use]
    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// Use this credential name instead of the configured one
    #[must_use]
    pub fn credential(mut self, name: impl Into<String>) -> Self {
        self.credential = Some(name.into());
        self
    }

    /// Token the fetch observes for cancellation
    #[must_use]
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Dataset name
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Start of the range
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start
    }

    /// End of the range
    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end
    }

    /// Requested granularity
    pub fn requested_granularity(&self) -> Option<Granularity> {
        self.granularity
    }

    /// Credential override
    pub fn credential_override(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Cancellation token
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// Reject an inverted range
    pub fn validate(&self) -> Result<()> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => Err(Error::config(format!(
                "start {start} is after end {end} for {}",
                self.dataset
            ))),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Dataset
// ============================================================================

/// Result of a fetch
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub table: CanonicalTable,

    /// Periods that could not be fetched
    pub unavailable: Vec<PeriodUnavailable>,
}

impl Dataset {
    /// Dataset with nothing missing
    pub fn complete(table: CanonicalTable) -> Self {
        Self {
            table,
            unavailable: Vec::new(),
        }
    }

    /// Whether every period was fetched
    pub fn is_complete(&self) -> bool {
        self.unavailable.is_empty()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Drop rows whose `column` lies outside the request's range.
///
/// Bounds take the column's own type: dates compare as dates, integer years
/// as the year of the bound, and `YYYY`/`YYYY-MM`/`YYYY-MM-DD` labels as the
/// bound formatted the same way. Other columns are left alone.
pub(crate) fn apply_range(table: &mut CanonicalTable, column: &str, request: &DatasetRequest) {
    if request.start.is_none() && request.end.is_none() {
        return;
    }
    let Some(sample) = table
        .column(column)
        .and_then(|cells| cells.into_iter().find(|c| !c.is_missing()).cloned())
    else {
        return;
    };

    let bound = |date: NaiveDate| -> Option<Cell> {
        match &sample {
            Cell::Date(_) => Some(Cell::Date(date)),
            Cell::Int(_) => Some(Cell::Int(i64::from(date.year()))),
            Cell::Text(label) => match label.len() {
                4 => Some(Cell::Text(date.format("%Y").to_string())),
                7 => Some(Cell::Text(date.format("%Y-%m").to_string())),
                10 => Some(Cell::Text(date.format("%Y-%m-%d").to_string())),
                _ => None,
            },
            _ => None,
        }
    };

    let start = request.start.and_then(bound);
    let end = request.end.and_then(bound);
    if start.is_none() && end.is_none() {
        return;
    }

    let before = table.len();
    table.retain_between(column, start.as_ref(), end.as_ref());
    tracing::debug!(
        "Date range kept {} of {} rows of {}",
        table.len(),
        before,
        request.dataset
    );
}

/// Run `fetch` unless the request is cancelled first
pub(crate) async fn until_cancelled<T>(
    cancel: &CancelToken,
    fetch: impl Future<Output = Result<T>>,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled { partial: None });
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled { partial: None }),
        result = fetch => result,
    }
}

/// Absolute URL, or `path` under `base`
pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
