//! Dataset name → connector dispatch

use super::{
    ArchiveConnector, Connector, Dataset, DatasetRequest, RestPaginatedConnector,
    RestSeriesConnector, SqlConnector,
};
use crate::config::{Settings, SourceConfig};
use crate::credentials::CredentialResolver;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::session::SessionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns every connector and routes requests by dataset name
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
    by_dataset: HashMap<String, usize>,
}

impl ConnectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured source (built-ins included).
    ///
    /// SQL sources share one [`SessionManager`]; each HTTP source gets its own
    /// client so rate limits apply per source.
    pub fn from_settings(
        settings: &Settings,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Result<Self> {
        settings.validate()?;
        Self::from_sources(
            settings,
            settings.effective_sources()?,
            SessionManager::duckdb(Arc::clone(&credentials)),
            credentials,
        )
    }

    /// Build the given sources over an existing session manager
    pub fn from_sources(
        settings: &Settings,
        sources: Vec<SourceConfig>,
        sessions: SessionManager,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Result<Self> {
        let mut registry = Self::new();

        for source in sources {
            let connector: Arc<dyn Connector> = match source {
                SourceConfig::Sql {
                    name,
                    session,
                    datasets,
                } => Arc::new(SqlConnector::new(name, session, sessions.clone(), datasets)),
                SourceConfig::RestPaginated {
                    name,
                    base_url,
                    rate_limit,
                    datasets,
                } => {
                    let client = HttpClient::with_config(
                        settings
                            .http
                            .client_config(Some(&base_url), rate_limit.as_ref()),
                    )?;
                    Arc::new(RestPaginatedConnector::new(
                        name,
                        client,
                        Arc::clone(&credentials),
                        settings.collector.clone(),
                        datasets,
                    ))
                }
                SourceConfig::Archive {
                    name,
                    base_url,
                    datasets,
                } => {
                    let client = HttpClient::with_config(settings.http.client_config(None, None))?;
                    Arc::new(ArchiveConnector::new(name, base_url, client, datasets))
                }
                SourceConfig::RestSeries {
                    name,
                    base_url,
                    rate_limit,
                    datasets,
                } => {
                    let client = HttpClient::with_config(
                        settings
                            .http
                            .client_config(Some(&base_url), rate_limit.as_ref()),
                    )?;
                    Arc::new(RestSeriesConnector::new(
                        name,
                        client,
                        Arc::clone(&credentials),
                        datasets,
                    ))
                }
            };
            registry.register(connector)?;
        }

        info!(
            "Registered {} datasets from {} sources",
            registry.by_dataset.len(),
            registry.connectors.len()
        );
        Ok(registry)
    }

    /// Add a connector; its dataset names must not be taken
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Result<()> {
        let datasets = connector.datasets();
        if let Some(taken) = datasets.iter().find(|d| self.by_dataset.contains_key(*d)) {
            return Err(Error::config(format!(
                "dataset '{taken}' of {} is already registered",
                connector.name()
            )));
        }

        let idx = self.connectors.len();
        for dataset in datasets {
            debug!("Registering {} from {}", dataset, connector.name());
            self.by_dataset.insert(dataset, idx);
        }
        self.connectors.push(connector);
        Ok(())
    }

    /// Fetch through the connector that serves the requested dataset
    pub async fn fetch(&self, request: DatasetRequest) -> Result<Dataset> {
        request.validate()?;
        let connector = self
            .connector_for(request.dataset())
            .ok_or_else(|| Error::UnknownDataset {
                dataset: request.dataset().to_string(),
            })?;
        debug!("Dispatching {} to {}", request.dataset(), connector.name());
        connector.fetch(request).await
    }

    /// Connector serving `dataset`
    pub fn connector_for(&self, dataset: &str) -> Option<&Arc<dyn Connector>> {
        self.by_dataset.get(dataset).map(|&i| &self.connectors[i])
    }

    /// Every dataset name, sorted
    pub fn datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_dataset.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered connectors in registration order
    pub fn connectors(&self) -> &[Arc<dyn Connector>] {
        &self.connectors
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("datasets", &self.datasets())
            .finish()
    }
}
