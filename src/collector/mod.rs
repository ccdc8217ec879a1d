//! Paginated per-period collection
//!
//! Some APIs only answer one reporting period per call (the Census BDS
//! endpoint takes `year2=<year>`). [`PaginatedCollector`] issues one request
//! per period through a bounded pool, tolerates individual period failures,
//! and merges successful periods in ascending period order.
//!
//! ```text
//! periods ──► buffer_unordered(limit) ──► slots[period] ──► merge ──► SchemaMap ──► CanonicalTable
//!                      │                                     │
//!                 cancel / deadline                 failures → unavailable
//! ```

mod period;

pub use period::{Period, PeriodIter, PeriodRange};

use crate::cancel::CancelToken;
use crate::credentials::CredentialResolver;
use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use crate::normalize::SchemaMap;
use crate::table::{CanonicalTable, RawTable, Table};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A period that could not be fetched; never aborts its siblings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodUnavailable {
    pub period: Period,
    pub reason: String,
}

/// What to request for each period and how to shape the merged result
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSpec {
    /// URL, or path relative to the client's base URL
    pub endpoint: String,

    /// Query parameter carrying the period label (e.g. `year2`)
    pub period_param: String,

    /// Column receiving the period label; defaults to `period_param`
    pub period_column: Option<String>,

    /// Static query parameters (e.g. `get`, `for`)
    pub params: BTreeMap<String, String>,

    /// Query parameter carrying the API key
    pub key_param: Option<String>,

    /// Credential name resolving to the API key
    pub credential: Option<String>,

    /// Normalization applied to the merged table
    pub schema: SchemaMap,

    /// Maximum requests in flight
    pub concurrency: usize,

    /// Give up on the whole collection after this long
    pub collect_timeout: Option<Duration>,
}

impl CollectorSpec {
    /// Collection with default concurrency and no static parameters
    pub fn new(endpoint: impl Into<String>, period_param: impl Into<String>, schema: SchemaMap) -> Self {
        Self {
            endpoint: endpoint.into(),
            period_param: period_param.into(),
            period_column: None,
            params: BTreeMap::new(),
            key_param: None,
            credential: None,
            schema,
            concurrency: default_concurrency(),
            collect_timeout: None,
        }
    }

    /// Add a static query parameter
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Send the credential `credential` as query parameter `key_param`
    #[must_use]
    pub fn api_key(mut self, key_param: impl Into<String>, credential: impl Into<String>) -> Self {
        self.key_param = Some(key_param.into());
        self.credential = Some(credential.into());
        self
    }

    /// Set the column receiving the period label
    #[must_use]
    pub fn period_column(mut self, column: impl Into<String>) -> Self {
        self.period_column = Some(column.into());
        self
    }

    /// Set the pool size (minimum 1)
    #[must_use]
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// Set the overall deadline
    #[must_use]
    pub fn collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = Some(timeout);
        self
    }

    fn period_column_name(&self) -> &str {
        self.period_column.as_deref().unwrap_or(&self.period_param)
    }
}

pub(crate) fn default_concurrency() -> usize {
    4
}

/// Merged result of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub table: CanonicalTable,
    pub unavailable: Vec<PeriodUnavailable>,
}

type PeriodResult = Result<Table>;

/// Fetches a period range from a REST endpoint
#[derive(Clone)]
pub struct PaginatedCollector {
    client: HttpClient,
    credentials: Arc<dyn CredentialResolver>,
}

impl PaginatedCollector {
    /// Create a collector
    pub fn new(client: HttpClient, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            client,
            credentials,
        }
    }

    /// Fetch every period in `range` and merge the successes.
    ///
    /// Fails with `CredentialMissing` before any request, with
    /// `AuthenticationFailed` when the source rejected the key for any
    /// period, with `SourceUnavailable` when no period succeeds, and with
    /// `Cancelled` (carrying the periods fetched so far) on cancellation or
    /// deadline.
    pub async fn collect(
        &self,
        spec: &CollectorSpec,
        range: PeriodRange,
        cancel: &CancelToken,
    ) -> Result<Collected> {
        let key = match (&spec.key_param, &spec.credential) {
            (Some(param), Some(credential)) => {
                Some((param.clone(), self.credentials.resolve(credential)?))
            }
            _ => None,
        };

        let periods: Vec<Period> = range.iter().collect();
        let limit = spec.concurrency.max(1);
        let deadline = spec.collect_timeout.map(|t| Instant::now() + t);

        info!(
            "Collecting {} periods {}..{} from {} (concurrency {})",
            periods.len(),
            range.start(),
            range.end(),
            spec.endpoint,
            limit
        );

        let mut slots: Vec<Option<PeriodResult>> = periods.iter().map(|_| None).collect();

        let fetches = stream::iter(periods.iter().copied().enumerate())
            .map(|(i, period)| {
                let key = key.as_ref();
                async move { (i, self.fetch_period(spec, period, key).await) }
            })
            .buffer_unordered(limit);
        let mut fetches = std::pin::pin!(fetches);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("Collection from {} cancelled", spec.endpoint);
                    return Err(cancelled(spec, &periods, slots));
                }
                () = wait_until(deadline) => {
                    warn!("Collection from {} hit its deadline", spec.endpoint);
                    return Err(cancelled(spec, &periods, slots));
                }
                next = fetches.next() => match next {
                    Some((i, result)) => slots[i] = Some(result),
                    None => break,
                },
            }
        }

        // A rejected key fails every later period too; retrying will not help
        if let Some(rejected) = slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(Err(Error::AuthenticationFailed { .. }))))
            .and_then(Option::take)
            .and_then(std::result::Result::err)
        {
            return Err(rejected);
        }

        let (merged, unavailable) = merge_periods(spec.period_column_name(), &periods, slots);

        let Some(merged) = merged else {
            let reason = unavailable
                .first()
                .map_or_else(|| "no periods".to_string(), |u| format!("{}: {}", u.period, u.reason));
            return Err(Error::unavailable(format!(
                "every period from {} failed ({reason})",
                spec.endpoint
            )));
        };

        let table = spec.schema.apply(merged)?;
        info!(
            "Collected {} rows from {} ({} of {} periods unavailable)",
            table.len(),
            spec.endpoint,
            unavailable.len(),
            periods.len()
        );

        Ok(Collected { table, unavailable })
    }

    async fn fetch_period(
        &self,
        spec: &CollectorSpec,
        period: Period,
        key: Option<&(String, String)>,
    ) -> PeriodResult {
        let mut request = RequestConfig::new();
        for (name, value) in &spec.params {
            request = request.query(name, value);
        }
        request = request.query(&spec.period_param, period.label());
        if let Some((param, secret)) = key {
            request = request.query(param, secret);
        }

        debug!("Fetching period {} from {}", period, spec.endpoint);

        let result = async {
            let body: Value = self
                .client
                .get_json_with_config(&spec.endpoint, request)
                .await?;
            RawTable::json_grid(body)?.into_table()
        }
        .await;

        result.map_err(|e| {
            let e = redact(e);
            warn!("Period {} unavailable: {}", period, e);
            e
        })
    }
}

impl std::fmt::Debug for PaginatedCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedCollector")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

/// Drop request URLs (which carry the API key) from transport errors
fn redact(error: Error) -> Error {
    match error {
        Error::Http(e) => Error::Http(e.without_url()),
        other => other,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn cancelled(spec: &CollectorSpec, periods: &[Period], slots: Vec<Option<PeriodResult>>) -> Error {
    let (partial, _) = merge_periods(spec.period_column_name(), periods, slots);
    Error::Cancelled {
        partial: partial.map(Box::new),
    }
}

/// Concatenate successful periods in ascending period order.
///
/// Each table gets `period_column` set to its period. A period whose
/// columns differ from the first successful one is reported unavailable.
/// Slots still `None` (never fetched) are skipped.
pub(crate) fn merge_periods(
    period_column: &str,
    periods: &[Period],
    slots: Vec<Option<PeriodResult>>,
) -> (Option<Table>, Vec<PeriodUnavailable>) {
    let mut merged: Option<Table> = None;
    let mut unavailable = Vec::new();

    for (period, slot) in periods.iter().zip(slots) {
        let mut table = match slot {
            Some(Ok(table)) => table,
            Some(Err(e)) => {
                unavailable.push(PeriodUnavailable {
                    period: *period,
                    reason: e.to_string(),
                });
                continue;
            }
            None => continue,
        };
        table.fill_column(period_column, &period.to_cell());

        let Some(target) = merged.as_mut() else {
            merged = Some(table);
            continue;
        };

        let appended = table
            .select_columns(target.columns())
            .and_then(|aligned| {
                if aligned.columns().len() == table.columns().len() {
                    target.append(aligned)
                } else {
                    Err(Error::schema("extra columns"))
                }
            });

        if let Err(e) = appended {
            let reason = format!(
                "columns [{}] differ from [{}]: {e}",
                table.columns().join(", "),
                target.columns().join(", ")
            );
            warn!("Period {} unavailable: {}", period, reason);
            unavailable.push(PeriodUnavailable {
                period: *period,
                reason,
            });
        }
    }

    (merged, unavailable)
}
