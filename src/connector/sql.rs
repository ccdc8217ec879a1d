//! SQL warehouse connector

use super::{apply_range, until_cancelled, Connector, Dataset, DatasetRequest};
use crate::config::SqlDatasetConfig;
use crate::error::{Error, Result};
use crate::session::{quote_ident, quote_literal, SessionConfig, SessionManager};
use crate::table::RawTable;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

/// Reads tables from a relational source through a shared session
pub struct SqlConnector {
    name: String,
    session: SessionConfig,
    manager: SessionManager,
    datasets: BTreeMap<String, SqlDatasetConfig>,
}

impl SqlConnector {
    /// Create a connector; sessions come from `manager`
    pub fn new(
        name: impl Into<String>,
        session: SessionConfig,
        manager: SessionManager,
        datasets: Vec<SqlDatasetConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            session,
            manager,
            datasets: datasets.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    /// Session manager shared with other SQL connectors
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// SELECT for one dataset with the request's range pushed down
    pub(crate) fn statement(dataset: &SqlDatasetConfig, request: &DatasetRequest) -> String {
        let columns = if dataset.columns.is_empty() {
            "*".to_string()
        } else {
            dataset
                .columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut statement = format!(
            "SELECT {columns} FROM {}.{}",
            quote_ident(&dataset.library),
            quote_ident(&dataset.table)
        );

        if let Some(date_column) = &dataset.date_column {
            let column = quote_ident(date_column);
            let mut conditions = Vec::new();
            if let Some(start) = request.start_date() {
                conditions.push(format!(
                    "{column} >= CAST({} AS DATE)",
                    quote_literal(&start.to_string())
                ));
            }
            if let Some(end) = request.end_date() {
                conditions.push(format!(
                    "{column} <= CAST({} AS DATE)",
                    quote_literal(&end.to_string())
                ));
            }
            if !conditions.is_empty() {
                statement.push_str(" WHERE ");
                statement.push_str(&conditions.join(" AND "));
            }
            statement.push_str(&format!(" ORDER BY {column}"));
        }

        if let Some(obs) = dataset.obs {
            statement.push_str(&format!(" LIMIT {obs}"));
        }
        statement
    }

    fn dataset(&self, name: &str) -> Result<&SqlDatasetConfig> {
        self.datasets
            .get(name)
            .ok_or_else(|| Error::UnknownDataset {
                dataset: name.to_string(),
            })
    }
}

#[async_trait]
impl Connector for SqlConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn datasets(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    async fn fetch(&self, request: DatasetRequest) -> Result<Dataset> {
        request.validate()?;
        let dataset = self.dataset(request.dataset())?;

        let mut session_config = self.session.clone();
        if let Some(credential) = request.credential_override() {
            session_config.username = Some(credential.to_string());
        }

        let statement = Self::statement(dataset, &request);
        info!("Fetching {} from {}", dataset.name, self.name);

        let rows = until_cancelled(request.cancel(), async {
            let session = self.manager.acquire(&session_config).await?;
            let result = self.manager.query(&session, &statement).await;
            self.manager.release(&session);
            result
        })
        .await?;

        let table = RawTable::Rows(rows).into_table()?;
        let mut table = dataset.schema.apply(table)?;
        if let Some(date_column) = &dataset.date_column {
            apply_range(&mut table, &dataset.schema.canonical_name(date_column), &request);
        }

        info!("Fetched {} rows of {}", table.len(), dataset.name);
        Ok(Dataset::complete(table))
    }
}
