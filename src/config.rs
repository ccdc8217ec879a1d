//! Configuration types for data sources
//!
//! One [`Settings`] document describes HTTP behaviour, collector limits,
//! credential names and every configured source with its datasets. It is
//! loaded once at startup and passed explicitly to
//! [`crate::connector::ConnectorRegistry::from_settings`].

use crate::archive::default_missing_markers;
use crate::collector::{default_concurrency, Period};
use crate::error::{Error, Result, ResultExt};
use crate::http::{HttpClientConfig, RateLimiterConfig};
use crate::normalize::SchemaMap;
use crate::session::SessionConfig;
use crate::types::{BackoffType, Granularity, StringMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Top-Level Settings
// ============================================================================

/// Complete configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP client defaults shared by REST and archive sources
    #[serde(default)]
    pub http: HttpSettings,

    /// Paginated collection limits
    #[serde(default)]
    pub collector: CollectorSettings,

    /// Symbolic credential name to environment variable
    #[serde(default)]
    pub credentials: StringMap,

    /// Merge the built-in sources into `sources`
    #[serde(default = "default_true")]
    pub builtin_sources: bool,

    /// Configured sources
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http: HttpSettings::default(),
            collector: CollectorSettings::default(),
            credentials: HashMap::new(),
            builtin_sources: true,
            sources: Vec::new(),
        }
    }
}

impl Settings {
    /// Parse settings from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load settings from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .context(format!("reading settings from {}", path.display()))?;
        debug!("Loaded settings from {}", path.display());
        Self::from_yaml(&yaml)
    }

    /// Configured sources followed by built-ins not overridden by name
    pub fn effective_sources(&self) -> Result<Vec<SourceConfig>> {
        let mut sources = self.sources.clone();
        if self.builtin_sources {
            let configured: HashSet<&str> = self.sources.iter().map(SourceConfig::name).collect();
            for builtin in crate::sources::builtin_sources()? {
                if !configured.contains(builtin.name()) {
                    sources.push(builtin);
                }
            }
        }
        Ok(sources)
    }

    /// Check the effective configuration for conflicts.
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut source_names = HashSet::new();
        let mut dataset_names = HashSet::new();

        if self.collector.concurrency == 0 {
            problems.push("collector.concurrency must be at least 1".to_string());
        }

        for source in self.effective_sources()? {
            if !source_names.insert(source.name().to_string()) {
                problems.push(format!("duplicate source '{}'", source.name()));
            }
            for dataset in source.dataset_names() {
                if !dataset_names.insert(dataset.clone()) {
                    problems.push(format!("duplicate dataset '{dataset}'"));
                }
            }
            source.check(&mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::config(problems.join("; ")))
        }
    }
}

// ============================================================================
// HTTP / Collector Settings
// ============================================================================

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Retries after the first attempt; 0 disables retrying
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub backoff: BackoffType,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Default per-source rate limit; `null` disables limiting
    #[serde(default = "default_rate_limit")]
    pub rate_limit: Option<RateLimiterConfig>,

    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_rate_limit() -> Option<RateLimiterConfig> {
    Some(RateLimiterConfig::default())
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_retries: default_max_retries(),
            backoff: BackoffType::default(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            rate_limit: default_rate_limit(),
            user_agent: None,
        }
    }
}

impl HttpSettings {
    /// Client config for one source, optionally overriding the rate limit
    pub fn client_config(
        &self,
        base_url: Option<&str>,
        rate_limit: Option<&RateLimiterConfig>,
    ) -> HttpClientConfig {
        let mut builder = HttpClientConfig::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .max_retries(self.max_retries)
            .backoff(
                self.backoff,
                Duration::from_millis(self.initial_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            );

        if let Some(url) = base_url {
            builder = builder.base_url(url);
        }
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent);
        }
        builder = match rate_limit.or(self.rate_limit.as_ref()) {
            Some(limit) => builder.rate_limit(limit.clone()),
            None => builder.no_rate_limit(),
        };

        builder.build()
    }
}

/// Paginated collection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Requests in flight per collection
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Overall deadline per collection
    #[serde(default)]
    pub collect_timeout_secs: Option<u64>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            collect_timeout_secs: None,
        }
    }
}

// ============================================================================
// Sources
// ============================================================================

/// One data provider and the datasets it serves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Relational warehouse reached through a SQL session
    Sql {
        name: String,
        session: SessionConfig,
        #[serde(default)]
        datasets: Vec<SqlDatasetConfig>,
    },

    /// REST API answering one period per request
    RestPaginated {
        name: String,
        base_url: String,
        #[serde(default)]
        rate_limit: Option<RateLimiterConfig>,
        #[serde(default)]
        datasets: Vec<PaginatedDatasetConfig>,
    },

    /// Zip archives of delimited files
    Archive {
        name: String,
        base_url: String,
        #[serde(default)]
        datasets: Vec<ArchiveDatasetConfig>,
    },

    /// REST API returning a whole keyed series in one response
    RestSeries {
        name: String,
        base_url: String,
        #[serde(default)]
        rate_limit: Option<RateLimiterConfig>,
        #[serde(default)]
        datasets: Vec<SeriesDatasetConfig>,
    },
}

impl SourceConfig {
    /// Parse a single source from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Source name
    pub fn name(&self) -> &str {
        match self {
            Self::Sql { name, .. }
            | Self::RestPaginated { name, .. }
            | Self::Archive { name, .. }
            | Self::RestSeries { name, .. } => name,
        }
    }

    /// Kind label used in listings
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sql { .. } => "sql",
            Self::RestPaginated { .. } => "rest_paginated",
            Self::Archive { .. } => "archive",
            Self::RestSeries { .. } => "rest_series",
        }
    }

    /// Names of the datasets this source serves
    pub fn dataset_names(&self) -> Vec<String> {
        self.dataset_summaries()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Dataset names with their descriptions, for listings
    pub fn dataset_summaries(&self) -> Vec<(String, Option<String>)> {
        fn summary(name: &str, description: &Option<String>) -> (String, Option<String>) {
            (name.to_string(), description.clone())
        }
        match self {
            Self::Sql { datasets, .. } => datasets
                .iter()
                .map(|d| summary(&d.name, &d.description))
                .collect(),
            Self::RestPaginated { datasets, .. } => datasets
                .iter()
                .map(|d| summary(&d.name, &d.description))
                .collect(),
            Self::Archive { datasets, .. } => datasets
                .iter()
                .map(|d| summary(&d.name, &d.description))
                .collect(),
            Self::RestSeries { datasets, .. } => datasets
                .iter()
                .map(|d| summary(&d.name, &d.description))
                .collect(),
        }
    }

    fn check(&self, problems: &mut Vec<String>) {
        let source = self.name();
        match self {
            Self::Sql { datasets, .. } => {
                for d in datasets {
                    check_schema(source, &d.name, &d.schema, problems);
                }
            }
            Self::RestPaginated { datasets, .. } => {
                for d in datasets {
                    check_schema(source, &d.name, &d.schema, problems);
                    if !matches!(
                        d.granularity,
                        Granularity::Daily | Granularity::Monthly | Granularity::Annual
                    ) {
                        problems.push(format!(
                            "{source}/{}: paginated granularity must be daily, monthly or annual",
                            d.name
                        ));
                    }
                    match d.default_range() {
                        Ok(_) => {}
                        Err(e) => problems.push(format!("{source}/{}: {e}", d.name)),
                    }
                }
            }
            Self::Archive { datasets, .. } => {
                for d in datasets {
                    check_schema(source, &d.name, &d.schema, problems);
                    if d.library.is_none() && (d.url.is_none() || d.member.is_none()) {
                        problems.push(format!(
                            "{source}/{}: archive needs either 'library' or both 'url' and 'member'",
                            d.name
                        ));
                    }
                    if !d.granularities.contains(&d.granularity) {
                        problems.push(format!(
                            "{source}/{}: default granularity {} not in granularities",
                            d.name, d.granularity
                        ));
                    }
                }
            }
            Self::RestSeries { datasets, .. } => {
                for d in datasets {
                    check_schema(source, &d.name, &d.schema, problems);
                }
            }
        }
    }
}

fn check_schema(source: &str, dataset: &str, schema: &SchemaMap, problems: &mut Vec<String>) {
    if schema.index.is_empty() {
        problems.push(format!("{source}/{dataset}: schema.index is empty"));
    }
}

// ============================================================================
// Datasets
// ============================================================================

/// A table (or query) in a SQL source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlDatasetConfig {
    pub name: String,

    /// Schema (library) holding the table, e.g. `ff`
    pub library: String,

    pub table: String,

    /// Columns to select; empty selects all
    #[serde(default)]
    pub columns: Vec<String>,

    /// Column the request's date range is pushed down to
    #[serde(default)]
    pub date_column: Option<String>,

    /// Row limit
    #[serde(default)]
    pub obs: Option<usize>,

    pub schema: SchemaMap,

    #[serde(default)]
    pub description: Option<String>,
}

/// A per-period REST dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedDatasetConfig {
    pub name: String,

    /// Path relative to the source's base URL
    pub endpoint: String,

    /// Query parameter carrying the period label
    pub period_param: String,

    /// Column receiving the period label (pre-rename); defaults to
    /// `period_param`
    #[serde(default)]
    pub period_column: Option<String>,

    #[serde(default = "default_annual")]
    pub granularity: Granularity,

    /// First period fetched when the request has no start
    pub first_period: String,

    /// Last period fetched when the request has no end
    pub last_period: String,

    /// Static query parameters
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Query parameter carrying the API key
    #[serde(default)]
    pub key_param: Option<String>,

    /// Credential name of the API key
    #[serde(default)]
    pub credential: Option<String>,

    pub schema: SchemaMap,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_annual() -> Granularity {
    Granularity::Annual
}

impl PaginatedDatasetConfig {
    /// Parsed `first_period ..= last_period`
    pub fn default_range(&self) -> Result<(Period, Period)> {
        let first: Period = self.first_period.parse()?;
        let last: Period = self.last_period.parse()?;
        if first > last {
            return Err(Error::config(format!(
                "first_period {first} is after last_period {last}"
            )));
        }
        Ok((first, last))
    }
}

/// A dataset read from a zip archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDatasetConfig {
    pub name: String,

    /// Ken French library name; derives url and member per granularity
    #[serde(default)]
    pub library: Option<String>,

    /// Explicit archive URL (relative to the source's base URL or absolute)
    #[serde(default)]
    pub url: Option<String>,

    /// Explicit member name
    #[serde(default)]
    pub member: Option<String>,

    #[serde(default)]
    pub skip_rows: Option<usize>,

    #[serde(default)]
    pub sentinel_column: Option<String>,

    #[serde(default = "default_date_label")]
    pub date_column: String,

    /// Granularity used when the request names none
    #[serde(default)]
    pub granularity: Granularity,

    /// Granularities the archive is published at
    #[serde(default = "default_granularities")]
    pub granularities: Vec<Granularity>,

    #[serde(default = "default_missing_markers")]
    pub missing_markers: Vec<String>,

    pub schema: SchemaMap,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_date_label() -> String {
    "Date".to_string()
}

fn default_granularities() -> Vec<Granularity> {
    vec![Granularity::Monthly]
}

/// A keyed JSON series fetched in one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesDatasetConfig {
    pub name: String,

    /// Path relative to the source's base URL
    #[serde(default)]
    pub endpoint: String,

    /// Static query parameters
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Extra parameters sent when the request carries a start date
    #[serde(default)]
    pub history_params: BTreeMap<String, String>,

    #[serde(default)]
    pub key_param: Option<String>,

    #[serde(default)]
    pub credential: Option<String>,

    /// Dot-separated path to the series object in the response
    pub series_path: String,

    /// Column receiving the series keys
    #[serde(default = "default_key_column")]
    pub key_column: String,

    pub schema: SchemaMap,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_key_column() -> String {
    "date".to_string()
}
