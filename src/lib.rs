// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # remote-datareader
//!
//! Connectors that pull financial and economic datasets from heterogeneous
//! remote sources and hand back one canonical, index-keyed table per request.
//!
//! ## Features
//!
//! - **SQL warehouses**: pooled, reference-counted sessions (DuckDB attaching
//!   PostgreSQL) with read-only query enforcement
//! - **Paginated REST**: one request per period, bounded concurrency, partial
//!   results with the missing periods reported
//! - **Zip archives**: member lookup, header-skipping CSV parse, section
//!   truncation, month-end date normalization
//! - **Keyed series**: single-call JSON series (date → values)
//! - **Canonical tables**: vendor columns renamed, numeric coercion, unique
//!   sorted index keys
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use remote_datareader::{ConnectorRegistry, DatasetRequest, Settings};
//! use remote_datareader::credentials::EnvCredentials;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> remote_datareader::Result<()> {
//!     let settings = Settings::default();
//!     let creds = Arc::new(EnvCredentials::new(settings.credentials.clone()));
//!     let registry = ConnectorRegistry::from_settings(&settings, creds)?;
//!
//!     let request = DatasetRequest::new("french.ff5")
//!         .between(chrono::NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
//!                  chrono::NaiveDate::from_ymd_opt(2012, 12, 31).unwrap());
//!     let dataset = registry.fetch(request).await?;
//!     println!("{} rows, complete: {}", dataset.table.len(), dataset.is_complete());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ConnectorRegistry                          │
//! │        fetch(DatasetRequest) → Dataset { table, unavailable }   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────┬────────────────┼────────────────┬────────────────┐
//! │    SQL      │ REST paginated │    Archive     │  REST series   │
//! ├─────────────┼────────────────┼────────────────┼────────────────┤
//! │ Session     │ Paginated      │ Archive        │ HTTP client    │
//! │ Manager     │ Collector      │ Retriever      │ Retry          │
//! │ DuckDB      │ HTTP client    │ zip + csv      │ Rate Limit     │
//! └─────────────┴────────────────┴────────────────┴────────────────┘
//!                                │
//!                    Schema Normalizer → CanonicalTable
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Cells, raw tables and canonical tables
pub mod table;

/// Schema normalization into canonical tables
pub mod normalize;

/// HTTP client with retry and rate limiting
pub mod http;

/// Credential resolution by symbolic name
pub mod credentials;

/// Cooperative cancellation
pub mod cancel;

/// Pooled SQL sessions
pub mod session;

/// Per-period REST collection
pub mod collector;

/// Zip archive download and parsing
pub mod archive;

/// Connector trait, variants and registry
pub mod connector;

/// Settings and source definitions
pub mod config;

/// Built-in source definitions
pub mod sources;

/// Arrow, Parquet, CSV and JSON lines output
pub mod output;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use collector::{Period, PeriodUnavailable};
pub use config::Settings;
pub use connector::{Connector, ConnectorRegistry, Dataset, DatasetRequest};
pub use table::{CanonicalTable, Cell};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
