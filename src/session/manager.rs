//! Reference-counted SQL sessions
//!
//! At most one live connection exists per [`SessionKey`]. Callers receive a
//! [`Session`] lease; the connection closes when the last lease is released.

use super::transport::{ConnectOptions, DuckDbTransport, SqlConnection, SqlEngine, SqlTransport};
use crate::credentials::CredentialResolver;
use crate::error::{Error, Result};
use crate::table::{Cell, Table};
use crate::types::TlsMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Statements that cannot modify the remote database
static READ_ONLY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(SELECT|WITH|VALUES|SHOW|DESCRIBE|EXPLAIN)\b").unwrap()
});

// ============================================================================
// Session Config
// ============================================================================

/// Connection settings for one SQL source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub engine: SqlEngine,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub database: String,

    #[serde(default)]
    pub tls: TlsMode,

    /// Credential name resolving to the user name
    #[serde(default)]
    pub username: Option<String>,

    /// Credential name resolving to the password
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_application_name")]
    pub application_name: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    5432
}

fn default_application_name() -> String {
    crate::NAME.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl SessionConfig {
    /// Remote PostgreSQL source
    pub fn postgres(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            engine: SqlEngine::Postgres,
            host: host.into(),
            port,
            database: database.into(),
            tls: TlsMode::default(),
            username: None,
            password: None,
            application_name: default_application_name(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Local DuckDB file, or `:memory:`
    pub fn duckdb(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            engine: SqlEngine::DuckDb,
            host: path.clone(),
            port: 0,
            database: path,
            tls: TlsMode::Disable,
            username: None,
            password: None,
            application_name: default_application_name(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Set the credential names for user and password
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the TLS mode
    #[must_use]
    pub fn tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Connect timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Cache key for sessions opened with this config
    pub fn key(&self) -> SessionKey {
        SessionKey {
            host: self.host.clone(),
            credential: self.username.clone().unwrap_or_default(),
        }
    }
}

/// Identity of a cached session: one per (host, credential)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub host: String,
    pub credential: String,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.credential.is_empty() {
            write!(f, "{}", self.host)
        } else {
            write!(f, "{}@{}", self.credential, self.host)
        }
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// Connection guarded so one statement runs at a time
struct Handle {
    conn: Mutex<Option<Box<dyn SqlConnection>>>,
}

impl Handle {
    fn new(conn: Box<dyn SqlConnection>) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    fn execute(&self, statement: &str) -> Result<Table> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::query("session is closed"))?;
        conn.execute(statement)
    }

    fn close(&self) {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            if let Err(e) = conn.close() {
                warn!("Error closing session: {e}");
            }
        }
    }
}

struct Live {
    id: u64,
    handle: Arc<Handle>,
    refs: usize,
}

struct Inner {
    transport: Arc<dyn SqlTransport>,
    credentials: Arc<dyn CredentialResolver>,
    live: Mutex<HashMap<SessionKey, Live>>,
    /// Per-key gates serializing connection attempts
    gates: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
    next_id: AtomicU64,
}

impl Inner {
    /// Take a new lease on a live session
    fn lease(self: &Arc<Self>, key: &SessionKey) -> Option<Session> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = live.get_mut(key)?;
        entry.refs += 1;
        Some(Session {
            id: entry.id,
            key: key.clone(),
            handle: Arc::clone(&entry.handle),
            released: AtomicBool::new(false),
            inner: Arc::clone(self),
        })
    }

    fn gate(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(key.clone()).or_default())
    }

    /// Forget the gate for `key` when nobody holds it and no session is live
    fn prune_gate(&self, key: &SessionKey) {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = gates
            .get(key)
            .is_some_and(|gate| Arc::strong_count(gate) == 1);
        if idle && !live.contains_key(key) {
            gates.remove(key);
        }
    }

    fn install(self: &Arc<Self>, key: &SessionKey, conn: Box<dyn SqlConnection>) -> Session {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = Arc::new(Handle::new(conn));
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.clone(),
                Live {
                    id,
                    handle: Arc::clone(&handle),
                    refs: 1,
                },
            );
        Session {
            id,
            key: key.clone(),
            handle,
            released: AtomicBool::new(false),
            inner: Arc::clone(self),
        }
    }

    fn release(&self, key: &SessionKey, id: u64) {
        let closing = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            match live.get_mut(key) {
                Some(entry) if entry.id == id => {
                    entry.refs = entry.refs.saturating_sub(1);
                    if entry.refs == 0 {
                        live.remove(key).map(|entry| entry.handle)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(handle) = closing {
            handle.close();
            info!("Closed session {} to {}", id, key);
            self.prune_gate(key);
        }
    }
}

// ============================================================================
// Session Lease
// ============================================================================

/// One caller's lease on a shared session
///
/// Dropping the lease releases it.
pub struct Session {
    id: u64,
    key: SessionKey,
    handle: Arc<Handle>,
    released: AtomicBool,
    inner: Arc<Inner>,
}

impl Session {
    /// Identifier of the underlying connection
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cache key of the underlying connection
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Whether this lease has been released
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release this lease; later calls are no-ops
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.inner.release(&self.key, self.id);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session Manager
// ============================================================================

/// Hands out leases on cached SQL sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager over a transport and credential resolver
    pub fn new(transport: Arc<dyn SqlTransport>, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                credentials,
                live: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Create a manager backed by DuckDB
    pub fn duckdb(credentials: Arc<dyn CredentialResolver>) -> Self {
        Self::new(Arc::new(DuckDbTransport::new()), credentials)
    }

    /// Lease the session for `config`, connecting if none is live
    pub async fn acquire(&self, config: &SessionConfig) -> Result<Session> {
        let key = config.key();

        if let Some(session) = self.inner.lease(&key) {
            debug!("Reusing session {} to {}", session.id, key);
            return Ok(session);
        }

        let guard = self.inner.gate(&key).lock_owned().await;

        // Another caller may have connected while we waited
        if let Some(session) = self.inner.lease(&key) {
            debug!("Reusing session {} to {}", session.id, key);
            return Ok(session);
        }

        let result = self.connect(config, &key, guard).await;
        if result.is_err() {
            self.inner.prune_gate(&key);
        }
        result
    }

    /// Connect while holding the key's gate.
    ///
    /// On timeout the blocking connect keeps running; the gate moves into a
    /// task that waits for it and closes any late connection, so the key
    /// never has two connections at once.
    async fn connect(
        &self,
        config: &SessionConfig,
        key: &SessionKey,
        guard: OwnedMutexGuard<()>,
    ) -> Result<Session> {
        let options = self.connect_options(config)?;
        let timeout = config.timeout();
        let transport = Arc::clone(&self.inner.transport);

        info!(
            "Connecting to {}:{} ({}, sslmode={})",
            config.host,
            config.port,
            config.database,
            config.tls.as_sslmode()
        );

        let mut connecting = tokio::task::spawn_blocking(move || transport.connect(&options));
        let Ok(joined) = tokio::time::timeout(timeout, &mut connecting).await else {
            warn!("Connect to {} timed out; closing it once it completes", key);
            let inner = Arc::clone(&self.inner);
            let key = key.clone();
            tokio::spawn(async move {
                if let Ok(Ok(conn)) = connecting.await {
                    let closed = tokio::task::spawn_blocking(move || conn.close()).await;
                    if let Ok(Err(e)) = closed {
                        warn!("Error closing late connection to {}: {}", key, e);
                    }
                }
                drop(guard);
                inner.prune_gate(&key);
            });
            return Err(Error::ConnectTimeout {
                host: config.host.clone(),
                timeout_ms: timeout.as_millis() as u64,
            });
        };
        let conn = joined.map_err(|e| Error::unavailable(format!("connect task failed: {e}")))??;

        let session = self.inner.install(key, conn);
        info!("Opened session {} to {}", session.id, key);
        Ok(session)
    }

    /// Run a read-only statement on a session and materialize the rows
    pub async fn query(&self, session: &Session, statement: &str) -> Result<Table> {
        if session.is_released() {
            return Err(Error::query("session has been released"));
        }
        let statement = check_read_only(statement)?;

        let handle = Arc::clone(&session.handle);
        tokio::task::spawn_blocking(move || handle.execute(&statement))
            .await
            .map_err(|e| Error::query(format!("query task failed: {e}")))?
    }

    /// Release a lease; releasing twice is a no-op
    pub fn release(&self, session: &Session) {
        session.release();
    }

    /// Number of open connections
    pub fn live_sessions(&self) -> usize {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Keys with a connection gate still tracked
    #[cfg(test)]
    pub(crate) fn gate_count(&self) -> usize {
        self.inner
            .gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Outstanding leases on the session for `key`
    pub fn ref_count(&self, key: &SessionKey) -> usize {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |entry| entry.refs)
    }

    // ------------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------------

    /// Schemas ("libraries") visible on the session
    pub async fn list_libraries(&self, session: &Session) -> Result<Vec<String>> {
        let table = self
            .query(
                session,
                "SELECT DISTINCT table_schema FROM information_schema.tables \
                 WHERE table_catalog = current_database() \
                 AND table_schema NOT IN ('information_schema', 'pg_catalog') \
                 ORDER BY table_schema",
            )
            .await?;
        Ok(first_column(&table))
    }

    /// Tables in one library
    pub async fn list_tables(&self, session: &Session, library: &str) -> Result<Vec<String>> {
        let statement = format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_catalog = current_database() AND table_schema = {} \
             ORDER BY table_name",
            quote_literal(library)
        );
        let table = self.query(session, &statement).await?;
        Ok(first_column(&table))
    }

    /// Column names, types and nullability of one table
    pub async fn describe_table(
        &self,
        session: &Session,
        library: &str,
        table: &str,
    ) -> Result<Table> {
        let statement = format!(
            "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
             WHERE table_catalog = current_database() AND table_schema = {} AND table_name = {} \
             ORDER BY ordinal_position",
            quote_literal(library),
            quote_literal(table)
        );
        let description = self.query(session, &statement).await?;
        if description.is_empty() {
            return Err(Error::query(format!("table {library}.{table} does not exist")));
        }
        Ok(description)
    }

    /// Whole table, or its first `obs` rows
    pub async fn get_table(
        &self,
        session: &Session,
        library: &str,
        table: &str,
        obs: Option<usize>,
    ) -> Result<Table> {
        let mut statement = format!(
            "SELECT * FROM {}.{}",
            quote_ident(library),
            quote_ident(table)
        );
        if let Some(obs) = obs {
            statement.push_str(&format!(" LIMIT {obs}"));
        }
        self.query(session, &statement).await
    }

    fn connect_options(&self, config: &SessionConfig) -> Result<ConnectOptions> {
        let resolve = |name: &Option<String>| {
            name.as_deref()
                .map(|n| self.inner.credentials.resolve(n))
                .transpose()
        };

        Ok(ConnectOptions {
            engine: config.engine,
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            username: resolve(&config.username)?,
            password: resolve(&config.password)?,
            tls: config.tls,
            application_name: config.application_name.clone(),
            connect_timeout: config.timeout(),
        })
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("live_sessions", &self.live_sessions())
            .finish_non_exhaustive()
    }
}

/// Reject anything but a single read-only statement
pub(crate) fn check_read_only(statement: &str) -> Result<String> {
    let body = statement.trim().trim_end_matches(';').trim_end();
    if body.is_empty() {
        return Err(Error::query("empty statement"));
    }
    if body.contains(';') {
        return Err(Error::query("only one statement may be executed at a time"));
    }
    if !READ_ONLY_REGEX.is_match(body) {
        return Err(Error::query(format!(
            "only read-only statements are allowed: {}",
            body.split_whitespace().next().unwrap_or_default()
        )));
    }
    Ok(body.to_string())
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn first_column(table: &Table) -> Vec<String> {
    table
        .rows()
        .iter()
        .filter_map(|row| row.first())
        .filter(|cell| !matches!(cell, Cell::Null))
        .map(ToString::to_string)
        .collect()
}
