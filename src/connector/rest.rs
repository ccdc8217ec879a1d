//! REST connectors: per-period collection and single-call keyed series

use super::{apply_range, until_cancelled, Connector, Dataset, DatasetRequest};
use crate::collector::{CollectorSpec, PaginatedCollector, Period, PeriodRange};
use crate::config::{CollectorSettings, PaginatedDatasetConfig, SeriesDatasetConfig};
use crate::credentials::CredentialResolver;
use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use crate::table::RawTable;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Members some APIs use to report errors inside a 200 response
const MESSAGE_MEMBERS: [&str; 3] = ["Error Message", "Note", "Information"];

// ============================================================================
// Paginated
// ============================================================================

/// Fetches datasets one period per request
pub struct RestPaginatedConnector {
    name: String,
    collector: PaginatedCollector,
    settings: CollectorSettings,
    datasets: BTreeMap<String, PaginatedDatasetConfig>,
}

impl RestPaginatedConnector {
    /// Create a connector over a client whose base URL is the source's
    pub fn new(
        name: impl Into<String>,
        client: HttpClient,
        credentials: Arc<dyn CredentialResolver>,
        settings: CollectorSettings,
        datasets: Vec<PaginatedDatasetConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            collector: PaginatedCollector::new(client, credentials),
            settings,
            datasets: datasets.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    /// Periods to collect for a request
    pub(crate) fn period_range(
        dataset: &PaginatedDatasetConfig,
        request: &DatasetRequest,
    ) -> Result<PeriodRange> {
        if let Some(requested) = request.requested_granularity() {
            if requested != dataset.granularity {
                return Err(Error::config(format!(
                    "{} is published {}, not {requested}",
                    dataset.name, dataset.granularity
                )));
            }
        }

        let (first, last) = dataset.default_range()?;
        let start = match request.start_date() {
            Some(date) => Period::containing(date, dataset.granularity)?,
            None => first,
        };
        let end = match request.end_date() {
            Some(date) => Period::containing(date, dataset.granularity)?,
            None => last,
        };
        PeriodRange::new(start, end)
    }

    fn spec(&self, dataset: &PaginatedDatasetConfig, request: &DatasetRequest) -> CollectorSpec {
        let mut spec = CollectorSpec::new(
            dataset.endpoint.clone(),
            dataset.period_param.clone(),
            dataset.schema.clone(),
        )
        .concurrency(self.settings.concurrency);
        spec.params.clone_from(&dataset.params);

        if let Some(column) = &dataset.period_column {
            spec = spec.period_column(column.clone());
        }
        if let Some(key_param) = &dataset.key_param {
            let credential = request
                .credential_override()
                .map(str::to_string)
                .or_else(|| dataset.credential.clone());
            if let Some(credential) = credential {
                spec = spec.api_key(key_param.clone(), credential);
            }
        }
        if let Some(secs) = self.settings.collect_timeout_secs {
            spec = spec.collect_timeout(Duration::from_secs(secs));
        }
        spec
    }
}

#[async_trait]
impl Connector for RestPaginatedConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn datasets(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    async fn fetch(&self, request: DatasetRequest) -> Result<Dataset> {
        request.validate()?;
        let dataset = self
            .datasets
            .get(request.dataset())
            .ok_or_else(|| Error::UnknownDataset {
                dataset: request.dataset().to_string(),
            })?;

        let range = Self::period_range(dataset, &request)?;
        let spec = self.spec(dataset, &request);

        let collected = self.collector.collect(&spec, range, request.cancel()).await?;
        let mut table = collected.table;

        let period_column = dataset
            .period_column
            .as_deref()
            .unwrap_or(&dataset.period_param);
        apply_range(
            &mut table,
            &dataset.schema.canonical_name(period_column),
            &request,
        );

        if !collected.unavailable.is_empty() {
            warn!(
                "{} is incomplete: {} periods unavailable",
                dataset.name,
                collected.unavailable.len()
            );
        }

        Ok(Dataset {
            table,
            unavailable: collected.unavailable,
        })
    }
}

// ============================================================================
// Keyed series
// ============================================================================

/// Fetches a whole keyed series in one request
pub struct RestSeriesConnector {
    name: String,
    client: HttpClient,
    credentials: Arc<dyn CredentialResolver>,
    datasets: BTreeMap<String, SeriesDatasetConfig>,
}

impl RestSeriesConnector {
    /// Create a connector over a client whose base URL is the source's
    pub fn new(
        name: impl Into<String>,
        client: HttpClient,
        credentials: Arc<dyn CredentialResolver>,
        datasets: Vec<SeriesDatasetConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            credentials,
            datasets: datasets.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    fn request_config(
        &self,
        dataset: &SeriesDatasetConfig,
        request: &DatasetRequest,
    ) -> Result<RequestConfig> {
        let mut config = RequestConfig::new();
        for (key, value) in &dataset.params {
            config = config.query(key, value);
        }
        // Older history needs the full series rather than the recent window
        if request.start_date().is_some() {
            for (key, value) in &dataset.history_params {
                config = config.query(key, value);
            }
        }
        if let Some(key_param) = &dataset.key_param {
            let credential = request
                .credential_override()
                .or(dataset.credential.as_deref())
                .ok_or_else(|| {
                    Error::config(format!("{} has a key_param but no credential", dataset.name))
                })?;
            config = config.query(key_param, self.credentials.resolve(credential)?);
        }
        Ok(config)
    }

    async fn download(&self, dataset: &SeriesDatasetConfig, config: RequestConfig) -> Result<Value> {
        self.client
            .get_json_with_config(&dataset.endpoint, config)
            .await
            .map_err(|e| match e {
                Error::HttpStatus { status, .. } => Error::unavailable(format!(
                    "{} returned HTTP {status}",
                    dataset.name
                )),
                Error::Http(e) => Error::unavailable(e.without_url().to_string()),
                other => other,
            })
    }
}

/// Turn an in-band error message into an error.
///
/// Messages about the API key are `AuthenticationFailed`; anything else
/// (throttling notes, bad calls) is `SourceUnavailable`.
pub(crate) fn check_series_body(source: &str, body: &Value, series_path: &str) -> Result<()> {
    let has_series = series_path
        .split('.')
        .filter(|p| !p.is_empty())
        .try_fold(body, |current, part| current.get(part))
        .is_some();
    if has_series {
        return Ok(());
    }

    match MESSAGE_MEMBERS
        .iter()
        .find_map(|member| body.get(*member).and_then(Value::as_str))
    {
        Some(message) if message.to_ascii_lowercase().contains("apikey") => {
            Err(Error::auth(source, message))
        }
        Some(message) => Err(Error::unavailable(message.to_string())),
        None => Ok(()),
    }
}

#[async_trait]
impl Connector for RestSeriesConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn datasets(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    async fn fetch(&self, request: DatasetRequest) -> Result<Dataset> {
        request.validate()?;
        let dataset = self
            .datasets
            .get(request.dataset())
            .ok_or_else(|| Error::UnknownDataset {
                dataset: request.dataset().to_string(),
            })?;

        let config = self.request_config(dataset, &request)?;
        info!("Fetching {} from {}", dataset.name, self.name);

        let body = until_cancelled(request.cancel(), self.download(dataset, config)).await?;
        check_series_body(&self.name, &body, &dataset.series_path)?;

        let table = RawTable::keyed_series(&body, &dataset.series_path, dataset.key_column.clone())?
            .into_table()?;
        let mut table = dataset.schema.apply(table)?;
        apply_range(
            &mut table,
            &dataset.schema.canonical_name(&dataset.key_column),
            &request,
        );

        info!("Fetched {} rows of {}", table.len(), dataset.name);
        Ok(Dataset::complete(table))
    }
}
