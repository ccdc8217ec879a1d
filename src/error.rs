//! Error types for remote-datareader
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//!
//! Per-period failures of a paginated fetch are *not* errors; they are
//! collected as [`crate::collector::PeriodUnavailable`] alongside the data.

use crate::table::Table;
use thiserror::Error;

/// The main error type for remote-datareader
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Credential '{name}' is missing")]
    CredentialMissing { name: String },

    #[error("Authentication failed for {source_name}: {message}")]
    AuthenticationFailed { source_name: String, message: String },

    #[error("Unknown dataset: {dataset}")]
    UnknownDataset { dataset: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // ============================================================================
    // Transport Errors
    // ============================================================================
    #[error("Source unavailable: {message}")]
    SourceUnavailable { message: String },

    #[error("Connection to {host} timed out after {timeout_ms}ms")]
    ConnectTimeout { host: String, timeout_ms: u64 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // Shape Errors
    // ============================================================================
    #[error("Schema mismatch: {message}")]
    SchemaMismatch { message: String },

    #[error("Duplicate index key: {key}")]
    DuplicateIndexKey { key: String },

    #[error("Archive member '{member}' not found (available: {})", .available.join(", "))]
    MemberNotFound {
        member: String,
        available: Vec<String>,
    },

    #[error("Query failed: {message}")]
    QueryError { message: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    // ============================================================================
    // Arrow/Parquet Errors
    // ============================================================================
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    // ============================================================================
    // Cancellation
    // ============================================================================
    /// The fetch was cancelled or hit its deadline. `partial` carries the
    /// periods collected before cancellation, in ascending period order.
    #[error("Fetch cancelled")]
    Cancelled { partial: Option<Box<Table>> },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Coarse classification used to tell the caller how to remediate a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Fix secrets or configuration
    Configuration,
    /// Retry later
    Transient,
    /// Fix code or the dataset definition
    Permanent,
    /// The caller gave up
    Cancelled,
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing credential error
    pub fn credential_missing(name: impl Into<String>) -> Self {
        Self::CredentialMissing { name: name.into() }
    }

    /// Create an authentication error
    pub fn auth(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a source unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }

    /// Create a schema mismatch error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::QueryError {
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Only transport failures and 5xx responses qualify. 4xx responses and
    /// SQL query errors are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Error::ConnectTimeout { .. } => true,
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Classify the error by remediation
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config { .. }
            | Error::CredentialMissing { .. }
            | Error::AuthenticationFailed { .. }
            | Error::UnknownDataset { .. }
            | Error::YamlParse(_)
            | Error::InvalidUrl(_) => ErrorCategory::Configuration,

            Error::SourceUnavailable { .. } | Error::ConnectTimeout { .. } | Error::Http(_) => {
                ErrorCategory::Transient
            }

            Error::HttpStatus { status, .. } if *status >= 500 => ErrorCategory::Transient,

            Error::Cancelled { .. } => ErrorCategory::Cancelled,

            _ => ErrorCategory::Permanent,
        }
    }

    /// Partial table carried by a cancellation, if any
    pub fn partial(&self) -> Option<&Table> {
        match self {
            Error::Cancelled { partial } => partial.as_deref(),
            _ => None,
        }
    }
}

/// Check if an HTTP status code is retryable
pub(crate) fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status)
}

/// Result type alias for remote-datareader
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::credential_missing("census.api_key");
        assert_eq!(err.to_string(), "Credential 'census.api_key' is missing");

        let err = Error::http_status(404, "Not found");
        assert_eq!(err.to_string(), "HTTP 404: Not found");

        let err = Error::MemberNotFound {
            member: "F-F.CSV".to_string(),
            available: vec!["a.CSV".to_string(), "b.CSV".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Archive member 'F-F.CSV' not found (available: a.CSV, b.CSV)"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::http_status(500, "").is_retryable());
        assert!(Error::http_status(503, "").is_retryable());
        assert!(Error::ConnectTimeout {
            host: "db".to_string(),
            timeout_ms: 10
        }
        .is_retryable());

        assert!(!Error::http_status(400, "").is_retryable());
        assert!(!Error::http_status(401, "").is_retryable());
        assert!(!Error::http_status(404, "").is_retryable());
        assert!(!Error::http_status(429, "").is_retryable());
        assert!(!Error::query("syntax error").is_retryable());
        assert!(!Error::config("test").is_retryable());
    }

    #[test]
    fn test_category() {
        assert_eq!(
            Error::credential_missing("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Error::auth("wrds", "bad password").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Error::unavailable("connection reset").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            Error::http_status(502, "").category(),
            ErrorCategory::Transient
        );
        assert_eq!(Error::schema("bad").category(), ErrorCategory::Permanent);
        assert_eq!(
            Error::DuplicateIndexKey {
                key: "(1, 2)".to_string()
            }
            .category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            Error::Cancelled { partial: None }.category(),
            ErrorCategory::Cancelled
        );
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(Error::config("inner"));
        let with_context = result.context("outer");
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("outer: Configuration error: inner"));
    }

    #[test]
    fn test_from_anyhow() {
        let err: Error = anyhow::anyhow!("embedder failure").into();
        assert_eq!(err.to_string(), "embedder failure");
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert!(!err.is_retryable());
    }
}
