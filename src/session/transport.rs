//! SQL transport over DuckDB
//!
//! The session manager talks to a warehouse through the [`SqlTransport`] and
//! [`SqlConnection`] traits. [`DuckDbTransport`] is the production
//! implementation: it attaches PostgreSQL read-only through DuckDB's postgres
//! extension, or opens a local DuckDB file.
//!
//! Both traits are blocking; the session manager calls them from
//! `spawn_blocking`.

use crate::error::{Error, Result};
use crate::table::{Cell, Table};
use crate::types::TlsMode;
use chrono::{DateTime, NaiveDate};
use duckdb::types::Value;
use duckdb::Connection;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

/// Masks `password=...` in libpq DSNs and `user:pass@` in URLs
static PASSWORD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(password=)('(?:[^'\\]|\\.)*'|\S+)|(://[^:/@\s]+:)[^@\s]+(@)").unwrap()
});

/// Kind of database behind a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlEngine {
    /// Remote PostgreSQL attached through DuckDB
    #[default]
    Postgres,
    /// Local DuckDB file (`database` is a path) or `:memory:`
    DuckDb,
}

/// Fully resolved connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub engine: SqlEngine,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: TlsMode,
    pub application_name: String,
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    /// libpq keyword/value connection string
    pub fn dsn(&self) -> String {
        let mut parts = vec![
            format!("host={}", quote_param(&self.host)),
            format!("port={}", self.port),
            format!("dbname={}", quote_param(&self.database)),
        ];
        if let Some(user) = &self.username {
            parts.push(format!("user={}", quote_param(user)));
        }
        if let Some(password) = &self.password {
            parts.push(format!("password={}", quote_param(password)));
        }
        parts.push(format!("sslmode={}", self.tls.as_sslmode()));
        if !self.application_name.is_empty() {
            parts.push(format!(
                "application_name={}",
                quote_param(&self.application_name)
            ));
        }
        parts.push(format!(
            "connect_timeout={}",
            self.connect_timeout.as_secs().max(1)
        ));
        parts.join(" ")
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("tls", &self.tls)
            .field("application_name", &self.application_name)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Replace passwords in a connection string for logging
pub fn mask_dsn(dsn: &str) -> String {
    PASSWORD_REGEX
        .replace_all(dsn, |caps: &regex::Captures<'_>| {
            if let Some(key) = caps.get(1) {
                format!("{}****", key.as_str())
            } else {
                format!("{}****{}", &caps[3], &caps[4])
            }
        })
        .into_owned()
}

/// Quote a libpq parameter value when it contains spaces or quotes
fn quote_param(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Escape a value for use inside a SQL string literal
fn sql_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// An open connection that executes one statement at a time
pub trait SqlConnection: Send {
    /// Run a statement and materialize every row
    fn execute(&mut self, statement: &str) -> Result<Table>;

    /// Close the connection
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens connections to a SQL source
pub trait SqlTransport: Send + Sync {
    /// Establish a connection
    fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn SqlConnection>>;
}

/// DuckDB-backed transport
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbTransport;

impl DuckDbTransport {
    /// Create the transport
    pub fn new() -> Self {
        Self
    }

    /// Attach the source database to a fresh in-memory DuckDB
    fn attach(conn: &Connection, options: &ConnectOptions) -> Result<()> {
        match options.engine {
            SqlEngine::Postgres => {
                conn.execute_batch("INSTALL postgres; LOAD postgres;")
                    .map_err(|e| {
                        Error::unavailable(format!("Failed to load postgres extension: {e}"))
                    })?;

                let dsn = options.dsn();
                debug!("Attaching PostgreSQL: {}", mask_dsn(&dsn));

                let attach_sql = format!(
                    "ATTACH '{}' AS source_db (TYPE POSTGRES, READ_ONLY); USE source_db;",
                    sql_literal(&dsn)
                );
                conn.execute_batch(&attach_sql).map_err(|e| {
                    classify_connect_error(&options.host, options.connect_timeout, &e.to_string())
                })?;
            }
            SqlEngine::DuckDb => {
                if options.database != ":memory:" {
                    let attach_sql = format!(
                        "ATTACH '{}' AS source_db (READ_ONLY); USE source_db;",
                        sql_literal(&options.database)
                    );
                    conn.execute_batch(&attach_sql).map_err(|e| {
                        Error::unavailable(format!("Failed to attach DuckDB: {e}"))
                    })?;
                }
            }
        }
        Ok(())
    }
}

impl SqlTransport for DuckDbTransport {
    fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn SqlConnection>> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::unavailable(format!("Failed to create DuckDB connection: {e}")))?;

        Self::attach(&conn, options)?;

        Ok(Box::new(DuckDbConnection { conn }))
    }
}

/// Map a driver error raised while connecting onto the error taxonomy
pub(crate) fn classify_connect_error(host: &str, timeout: Duration, message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("password authentication")
        || lower.contains("no password supplied")
        || (lower.contains("role") && lower.contains("does not exist"))
    {
        Error::auth(host, message)
    } else if lower.contains("timeout expired") || lower.contains("timed out") {
        Error::ConnectTimeout {
            host: host.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        Error::unavailable(format!("{host}: {message}"))
    }
}

/// Connection to an in-process DuckDB
struct DuckDbConnection {
    conn: Connection,
}

impl SqlConnection for DuckDbConnection {
    fn execute(&mut self, statement: &str) -> Result<Table> {
        debug!("Executing query: {}", statement);

        let mut stmt = self
            .conn
            .prepare(statement)
            .map_err(|e| Error::query(e.to_string()))?;
        let mut rows = stmt.query([]).map_err(|e| Error::query(e.to_string()))?;

        let columns = rows
            .as_ref()
            .map(|s| s.column_names())
            .unwrap_or_default();
        let width = columns.len();

        let mut cells = Vec::new();
        while let Some(row) = rows.next().map_err(|e| Error::query(e.to_string()))? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let value: Value = row.get(i).map_err(|e| Error::query(e.to_string()))?;
                values.push(duckdb_value_to_cell(value));
            }
            cells.push(values);
        }

        Table::from_rows(columns, cells)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| Error::unavailable(format!("Failed to close DuckDB connection: {e}")))
    }
}

/// Convert a DuckDB value to a cell
pub(crate) fn duckdb_value_to_cell(value: Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Boolean(b) => Cell::Bool(b),
        Value::TinyInt(i) => Cell::Int(i.into()),
        Value::SmallInt(i) => Cell::Int(i.into()),
        Value::Int(i) => Cell::Int(i.into()),
        Value::BigInt(i) => Cell::Int(i),
        Value::HugeInt(i) => i64::try_from(i).map_or(Cell::Float(i as f64), Cell::Int),
        Value::UTinyInt(i) => Cell::Int(i.into()),
        Value::USmallInt(i) => Cell::Int(i.into()),
        Value::UInt(i) => Cell::Int(i.into()),
        Value::UBigInt(i) => i64::try_from(i).map_or(Cell::Float(i as f64), Cell::Int),
        Value::Float(f) => Cell::Float(f64::from(f)),
        Value::Double(f) => Cell::Float(f),
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map_or_else(|_| Cell::Text(d.to_string()), Cell::Float),
        Value::Text(s) => Cell::Text(s),
        Value::Blob(b) => Cell::Text(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b,
        )),
        Value::Date32(d) => {
            // Days since epoch (719163 is the number of days from 1 CE to 1970-01-01)
            NaiveDate::from_num_days_from_ce_opt(d + 719_163)
                .map_or(Cell::Int(d.into()), Cell::Date)
        }
        Value::Timestamp(_, i) => {
            let secs = i.div_euclid(1_000_000);
            let nsecs = (i.rem_euclid(1_000_000) * 1000) as u32;
            DateTime::from_timestamp(secs, nsecs).map_or(Cell::Int(i), |dt| {
                let naive = dt.naive_utc();
                if naive.time() == chrono::NaiveTime::MIN {
                    Cell::Date(naive.date())
                } else {
                    Cell::Text(dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string())
                }
            })
        }
        Value::Time64(_, t) => {
            // Microseconds since midnight
            let secs = t / 1_000_000;
            let micros = t % 1_000_000;
            Cell::Text(format!(
                "{:02}:{:02}:{:02}.{:06}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60,
                micros
            ))
        }
        other => Cell::Text(format!("{other:?}")),
    }
}
