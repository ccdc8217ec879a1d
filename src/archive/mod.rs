//! Archive retrieval
//!
//! Downloads a zip archive, pulls one delimited member out of it and parses
//! the leading section into a table with normalized dates. The Ken French
//! data library naming convention is built in via [`ArchiveSpec::french`].

mod parse;

pub use parse::{extract_member, parse_date, parse_member};

use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use crate::table::Table;
use crate::types::Granularity;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default markers for missing values in archive files
pub fn default_missing_markers() -> Vec<String> {
    vec!["-99.99".to_string(), "-999".to_string()]
}

fn default_date_column() -> String {
    "Date".to_string()
}

/// Where an archive lives and how to read its member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSpec {
    pub url: String,

    /// File inside the archive
    pub member: String,

    /// Physical lines before the header row
    #[serde(default)]
    pub skip_rows: usize,

    /// Column whose first missing value ends the wanted section.
    /// Defaults to the first non-date column.
    #[serde(default)]
    pub sentinel_column: Option<String>,

    /// Name given to the blank leading header cell
    #[serde(default = "default_date_column")]
    pub date_column: String,

    #[serde(default)]
    pub granularity: Granularity,

    #[serde(default = "default_missing_markers")]
    pub missing_markers: Vec<String>,
}

impl ArchiveSpec {
    /// Archive at `url` holding `member`
    pub fn new(url: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            member: member.into(),
            skip_rows: 0,
            sentinel_column: None,
            date_column: default_date_column(),
            granularity: Granularity::default(),
            missing_markers: default_missing_markers(),
        }
    }

    /// A Ken French data library file.
    ///
    /// Daily and weekly files carry the frequency in their name
    /// (`<library>_daily_CSV.zip`); other frequencies share the plain name.
    pub fn french(base_url: &str, library: &str, granularity: Granularity) -> Self {
        let stem = match granularity {
            Granularity::Daily | Granularity::Weekly => format!("{library}_{granularity}"),
            _ => library.to_string(),
        };
        let url = format!("{}/{stem}_CSV.zip", base_url.trim_end_matches('/'));

        Self::new(url, format!("{stem}.CSV"))
            .skip_rows(3)
            .granularity(granularity)
    }

    /// Set the number of lines before the header
    #[must_use]
    pub fn skip_rows(mut self, rows: usize) -> Self {
        self.skip_rows = rows;
        self
    }

    /// Set the sentinel column
    #[must_use]
    pub fn sentinel_column(mut self, column: impl Into<String>) -> Self {
        self.sentinel_column = Some(column.into());
        self
    }

    /// Set the date column label
    #[must_use]
    pub fn date_column(mut self, column: impl Into<String>) -> Self {
        self.date_column = column.into();
        self
    }

    /// Set the date granularity
    #[must_use]
    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Replace the missing-value markers
    #[must_use]
    pub fn missing_markers<S: AsRef<str>>(mut self, markers: &[S]) -> Self {
        self.missing_markers = markers.iter().map(|m| m.as_ref().to_string()).collect();
        self
    }
}

/// Downloads and parses archives
#[derive(Debug, Clone)]
pub struct ArchiveRetriever {
    client: HttpClient,
}

impl ArchiveRetriever {
    /// Create a retriever over a shared HTTP client
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Download the archive and parse its member
    pub async fn retrieve(&self, spec: &ArchiveSpec) -> Result<Table> {
        info!("Downloading archive {}", spec.url);

        let (status, body) = self
            .client
            .get_bytes(&spec.url, RequestConfig::new())
            .await
            .map_err(|e| match e {
                Error::HttpStatus { status, .. } => {
                    Error::unavailable(format!("{} returned HTTP {status}", spec.url))
                }
                Error::Http(e) => Error::unavailable(format!("{}: {}", spec.url, e.without_url())),
                other => other,
            })?;
        debug!("Downloaded {} bytes (HTTP {})", body.len(), status);

        let text = extract_member(&body, &spec.member)?;
        let table = parse_member(&text, spec)?;

        info!(
            "Parsed {} rows x {} columns from {}",
            table.len(),
            table.columns().len(),
            spec.member
        );
        Ok(table)
    }
}
