//! CLI runner - executes commands

use crate::cancel::CancelToken;
use crate::cli::commands::{Cli, Commands};
use crate::config::Settings;
use crate::connector::{ConnectorRegistry, Dataset, DatasetRequest};
use crate::credentials::EnvCredentials;
use crate::error::{Error, Result};
use crate::output::{write_table, OutputFormat};
use crate::types::Granularity;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Arguments of the `fetch` subcommand
struct FetchArgs<'a> {
    dataset: &'a str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    granularity: Option<Granularity>,
    credential: Option<&'a str>,
    output: Option<&'a Path>,
    format: OutputFormat,
}

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Fetch {
                dataset,
                start,
                end,
                granularity,
                credential,
                output,
                format,
            } => {
                self.fetch(FetchArgs {
                    dataset,
                    start: *start,
                    end: *end,
                    granularity: *granularity,
                    credential: credential.as_deref(),
                    output: output.as_deref(),
                    format: *format,
                })
                .await
            }
            Commands::List { source } => self.list(source.as_deref()),
            Commands::Validate => self.validate(),
        }
    }

    /// Load settings from `--settings`, or defaults with built-in sources
    fn load_settings(&self) -> Result<Settings> {
        match &self.cli.settings {
            Some(path) => Settings::from_file(path),
            None => Ok(Settings::default()),
        }
    }

    fn output_message(msg: &Value) {
        println!("{}", serde_json::to_string(msg).unwrap_or_default());
    }

    /// Fetch a dataset and write it out
    async fn fetch(&self, args: FetchArgs<'_>) -> Result<()> {
        if args.output.is_none() && args.format.is_binary() {
            return Err(Error::config(format!(
                "{:?} output needs --output",
                args.format
            )));
        }

        let settings = self.load_settings()?;
        let credentials = Arc::new(EnvCredentials::new(settings.credentials.clone()));
        let registry = ConnectorRegistry::from_settings(&settings, credentials)?;

        let cancel = CancelToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling fetch");
                on_interrupt.cancel();
            }
        });

        let mut request = DatasetRequest::new(args.dataset).cancel_token(cancel);
        if let Some(start) = args.start {
            request = request.start(start);
        }
        if let Some(end) = args.end {
            request = request.end(end);
        }
        if let Some(granularity) = args.granularity {
            request = request.granularity(granularity);
        }
        if let Some(credential) = args.credential {
            request = request.credential(credential);
        }

        let started = Instant::now();
        let dataset = registry.fetch(request).await?;
        info!(
            "Fetched {} rows of {} in {:.1}s",
            dataset.table.len(),
            args.dataset,
            started.elapsed().as_secs_f64()
        );
        report_unavailable(args.dataset, &dataset);

        let rows = match args.output {
            Some(path) => {
                let file = File::create(path)?;
                let rows = write_table(&dataset.table, args.format, BufWriter::new(file))?;
                info!("Wrote {} rows to {}", rows, path.display());
                rows
            }
            None => write_table(
                &dataset.table,
                args.format,
                BufWriter::new(std::io::stdout()),
            )?,
        };

        if !dataset.is_complete() {
            warn!(
                "{} rows written; {} periods are missing",
                rows,
                dataset.unavailable.len()
            );
        }
        Ok(())
    }

    /// List datasets of every effective source
    fn list(&self, source: Option<&str>) -> Result<()> {
        let settings = self.load_settings()?;
        let sources = settings.effective_sources()?;

        if let Some(wanted) = source {
            if !sources.iter().any(|s| s.name() == wanted) {
                return Err(Error::config(format!("Unknown source: {wanted}")));
            }
        }

        for config in sources
            .iter()
            .filter(|s| source.map_or(true, |wanted| s.name() == wanted))
        {
            for (dataset, description) in config.dataset_summaries() {
                Self::output_message(&json!({
                    "dataset": dataset,
                    "source": config.name(),
                    "kind": config.kind(),
                    "description": description,
                }));
            }
        }
        Ok(())
    }

    /// Validate settings and report what would be served
    fn validate(&self) -> Result<()> {
        let settings = self.load_settings()?;
        settings.validate()?;
        let sources = settings.effective_sources()?;
        let datasets: usize = sources.iter().map(|s| s.dataset_names().len()).sum();

        Self::output_message(&json!({
            "type": "LOG",
            "log": {
                "level": "INFO",
                "message": format!(
                    "Settings are valid with {} sources and {} datasets",
                    sources.len(),
                    datasets
                )
            }
        }));
        Ok(())
    }
}

/// Warn about each period that could not be fetched
fn report_unavailable(name: &str, dataset: &Dataset) {
    for missing in &dataset.unavailable {
        warn!(
            "{} period {} unavailable: {}",
            name, missing.period, missing.reason
        );
    }
}
