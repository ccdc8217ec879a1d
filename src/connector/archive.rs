//! Zip archive connector

use super::{apply_range, join_url, until_cancelled, Connector, Dataset, DatasetRequest};
use crate::archive::{ArchiveRetriever, ArchiveSpec};
use crate::config::ArchiveDatasetConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

/// Reads datasets out of downloadable zip archives
pub struct ArchiveConnector {
    name: String,
    base_url: String,
    retriever: ArchiveRetriever,
    datasets: BTreeMap<String, ArchiveDatasetConfig>,
}

impl ArchiveConnector {
    /// Create a connector; relative archive URLs resolve against `base_url`
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        client: HttpClient,
        datasets: Vec<ArchiveDatasetConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            retriever: ArchiveRetriever::new(client),
            datasets: datasets.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    /// Archive location and layout for a request
    pub(crate) fn archive_spec(
        &self,
        dataset: &ArchiveDatasetConfig,
        request: &DatasetRequest,
    ) -> Result<ArchiveSpec> {
        let granularity = request
            .requested_granularity()
            .unwrap_or(dataset.granularity);
        if !dataset.granularities.contains(&granularity) {
            return Err(Error::config(format!(
                "{} is not published {granularity}",
                dataset.name
            )));
        }

        let mut spec = match (&dataset.library, &dataset.url, &dataset.member) {
            (_, Some(url), Some(member)) => {
                ArchiveSpec::new(join_url(&self.base_url, url), member.clone())
                    .granularity(granularity)
            }
            (Some(library), _, _) => ArchiveSpec::french(&self.base_url, library, granularity),
            _ => {
                return Err(Error::config(format!(
                    "{} needs either a library or a url and member",
                    dataset.name
                )))
            }
        };

        if let Some(rows) = dataset.skip_rows {
            spec = spec.skip_rows(rows);
        }
        if let Some(column) = &dataset.sentinel_column {
            spec = spec.sentinel_column(column.clone());
        }
        Ok(spec
            .date_column(dataset.date_column.clone())
            .missing_markers(&dataset.missing_markers))
    }
}

#[async_trait]
impl Connector for ArchiveConnector {
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

        let spec = self.archive_spec(dataset, &request)?;
        info!("Fetching {} from {}", dataset.name, spec.url);

        let table = until_cancelled(request.cancel(), self.retriever.retrieve(&spec)).await?;
        let mut table = dataset.schema.apply(table)?;
        apply_range(
            &mut table,
            &dataset.schema.canonical_name(&dataset.date_column),
            &request,
        );

        info!("Fetched {} rows of {}", table.len(), dataset.name);
        Ok(Dataset::complete(table))
    }
}
