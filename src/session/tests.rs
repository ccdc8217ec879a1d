//! Tests for the session manager

use super::manager::check_read_only;
use super::*;
use crate::credentials::StaticCredentials;
use crate::error::{Error, Result};
use crate::table::{Cell, Table};
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_case::test_case;

// ============================================================================
// Fake transport
// ============================================================================

#[derive(Default)]
struct Counters {
    started: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    open: AtomicUsize,
    peak_open: AtomicUsize,
    statements: Mutex<Vec<String>>,
    last_options: Mutex<Option<ConnectOptions>>,
}

struct FakeTransport {
    counters: Arc<Counters>,
    /// Applied to the first connect only
    delay: Duration,
    failure: Option<fn() -> Error>,
}

impl FakeTransport {
    fn new() -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (
            Self {
                counters: Arc::clone(&counters),
                delay: Duration::ZERO,
                failure: None,
            },
            counters,
        )
    }
}

impl SqlTransport for FakeTransport {
    fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn SqlConnection>> {
        if self.counters.started.fetch_add(1, Ordering::SeqCst) == 0 {
            std::thread::sleep(self.delay);
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        *self.counters.last_options.lock().unwrap() = Some(options.clone());
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeConnection {
    counters: Arc<Counters>,
}

impl SqlConnection for FakeConnection {
    fn execute(&mut self, statement: &str) -> Result<Table> {
        self.counters
            .statements
            .lock()
            .unwrap()
            .push(statement.to_string());
        Table::from_rows(
            vec!["statement".to_string()],
            vec![vec![Cell::text(statement)]],
        )
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn wrds_config() -> SessionConfig {
    SessionConfig::postgres("wrds-pgdata.wharton.upenn.edu", 9737, "wrds")
        .credentials("wrds.username", "wrds.password")
}

fn wrds_credentials() -> Arc<StaticCredentials> {
    Arc::new(
        StaticCredentials::new()
            .with("wrds.username", "alice")
            .with("wrds.password", "hunter2"),
    )
}

fn manager_with(transport: FakeTransport) -> SessionManager {
    SessionManager::new(Arc::new(transport), wrds_credentials())
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_two_acquires_share_one_connection() {
    let (transport, counters) = FakeTransport::new();
    let manager = manager_with(transport);
    let config = wrds_config();

    let first = manager.acquire(&config).await.unwrap();
    let second = manager.acquire(&config).await.unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
    assert_eq!(manager.live_sessions(), 1);
    assert_eq!(manager.ref_count(&config.key()), 2);
}

#[tokio::test]
async fn test_double_release_is_noop() {
    let (transport, counters) = FakeTransport::new();
    let manager = manager_with(transport);
    let config = wrds_config();

    let first = manager.acquire(&config).await.unwrap();
    let second = manager.acquire(&config).await.unwrap();

    manager.release(&first);
    manager.release(&first);
    assert_eq!(manager.ref_count(&config.key()), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 0);

    manager.release(&second);
    assert_eq!(manager.live_sessions(), 0);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

    drop(first);
    drop(second);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_drop_releases_lease() {
    let (transport, counters) = FakeTransport::new();
    let manager = manager_with(transport);

    {
        let _session = manager.acquire(&wrds_config()).await.unwrap();
        assert_eq!(manager.live_sessions(), 1);
    }

    assert_eq!(manager.live_sessions(), 0);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconnects_after_last_release() {
    let (transport, counters) = FakeTransport::new();
    let manager = manager_with(transport);
    let config = wrds_config();

    let first = manager.acquire(&config).await.unwrap();
    let first_id = first.id();
    first.release();

    let second = manager.acquire(&config).await.unwrap();
    assert_ne!(second.id(), first_id);
    assert_eq!(counters.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_acquires_connect_once() {
    let (mut transport, counters) = FakeTransport::new();
    transport.delay = Duration::from_millis(50);
    let manager = manager_with(transport);
    let config = wrds_config();

    let leases = futures::future::join_all((0..8).map(|_| manager.acquire(&config))).await;
    let leases: Vec<Session> = leases.into_iter().collect::<Result<_>>().unwrap();

    assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
    assert!(leases.iter().all(|s| s.id() == leases[0].id()));
    assert_eq!(manager.ref_count(&config.key()), 8);
}

#[tokio::test]
async fn test_distinct_credentials_get_distinct_sessions() {
    let (transport, counters) = FakeTransport::new();
    let credentials = StaticCredentials::new()
        .with("wrds.username", "alice")
        .with("wrds.password", "a")
        .with("other.username", "bob")
        .with("other.password", "b");
    let manager = SessionManager::new(Arc::new(transport), Arc::new(credentials));

    let a = manager.acquire(&wrds_config()).await.unwrap();
    let b = manager
        .acquire(
            &SessionConfig::postgres("wrds-pgdata.wharton.upenn.edu", 9737, "wrds")
                .credentials("other.username", "other.password"),
        )
        .await
        .unwrap();

    assert_ne!(a.id(), b.id());
    assert_eq!(counters.connects.load(Ordering::SeqCst), 2);
    assert_eq!(manager.live_sessions(), 2);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_missing_credential_fails_before_connecting() {
    let (transport, counters) = FakeTransport::new();
    let manager = SessionManager::new(Arc::new(transport), Arc::new(StaticCredentials::new()));

    let err = manager.acquire(&wrds_config()).await.unwrap_err();

    assert!(matches!(err, Error::CredentialMissing { name } if name == "wrds.username"));
    assert_eq!(counters.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connect_timeout() {
    let (mut transport, _counters) = FakeTransport::new();
    transport.delay = Duration::from_millis(1500);
    let manager = manager_with(transport);

    let err = manager
        .acquire(&wrds_config().connect_timeout(Duration::from_secs(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConnectTimeout { timeout_ms: 1000, .. }));
    assert_eq!(manager.live_sessions(), 0);
}

#[tokio::test]
async fn test_timed_out_connect_is_closed_before_reconnecting() {
    let (mut transport, counters) = FakeTransport::new();
    transport.delay = Duration::from_millis(1500);
    let manager = manager_with(transport);
    let config = wrds_config().connect_timeout(Duration::from_secs(1));

    let err = manager.acquire(&config).await.unwrap_err();
    assert!(matches!(err, Error::ConnectTimeout { .. }));

    // Waits for the late connect to land and be closed
    let session = manager.acquire(&config).await.unwrap();
    assert_eq!(counters.connects.load(Ordering::SeqCst), 2);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.peak_open.load(Ordering::SeqCst), 1);
    assert_eq!(manager.live_sessions(), 1);

    session.release();
    assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
    assert_eq!(counters.open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_gates_are_dropped_with_their_sessions() {
    let (transport, _counters) = FakeTransport::new();
    let manager = manager_with(transport);
    let config = wrds_config();

    let first = manager.acquire(&config).await.unwrap();
    let second = manager.acquire(&config).await.unwrap();
    assert_eq!(manager.gate_count(), 1);

    first.release();
    assert_eq!(manager.gate_count(), 1);
    second.release();
    assert_eq!(manager.gate_count(), 0);
}

#[tokio::test]
async fn test_failed_connect_leaves_no_gate() {
    let (mut transport, _counters) = FakeTransport::new();
    transport.failure = Some(|| Error::auth("wrds", "password authentication failed"));
    let manager = manager_with(transport);

    assert!(manager.acquire(&wrds_config()).await.is_err());
    assert_eq!(manager.gate_count(), 0);
}

#[tokio::test]
async fn test_authentication_failure_is_not_cached() {
    let (mut transport, counters) = FakeTransport::new();
    transport.failure = Some(|| Error::auth("wrds", "password authentication failed"));
    let manager = manager_with(transport);

    let err = manager.acquire(&wrds_config()).await.unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed { .. }));

    let _ = manager.acquire(&wrds_config()).await;
    assert_eq!(counters.connects.load(Ordering::SeqCst), 2);
    assert_eq!(manager.live_sessions(), 0);
}

#[tokio::test]
async fn test_connect_options_carry_resolved_secrets() {
    let (transport, counters) = FakeTransport::new();
    let manager = manager_with(transport);

    let _session = manager.acquire(&wrds_config()).await.unwrap();

    let options = counters.last_options.lock().unwrap().clone().unwrap();
    assert_eq!(options.username.as_deref(), Some("alice"));
    assert_eq!(options.password.as_deref(), Some("hunter2"));
    assert_eq!(options.port, 9737);
    assert!(options.dsn().contains("sslmode=require"));
}

// ============================================================================
// Queries
// ============================================================================

#[test_case("SELECT date FROM ff.liq_ps" ; "select")]
#[test_case("  select 1;" ; "lowercase with semicolon")]
#[test_case("WITH t AS (SELECT 1) SELECT * FROM t" ; "cte")]
#[test_case("VALUES (1)" ; "values")]
#[test_case("DESCRIBE ff.liq_ps" ; "describe")]
fn test_read_only_accepted(statement: &str) {
    assert!(check_read_only(statement).is_ok());
}

#[test_case("DELETE FROM ff.liq_ps" ; "delete")]
#[test_case("insert into t values (1)" ; "insert")]
#[test_case("DROP TABLE ff.liq_ps" ; "drop")]
#[test_case("SELECT 1; DROP TABLE ff.liq_ps" ; "stacked")]
#[test_case("   " ; "empty")]
fn test_write_statements_rejected(statement: &str) {
    assert!(matches!(
        check_read_only(statement),
        Err(Error::QueryError { .. })
    ));
}

#[tokio::test]
async fn test_query_runs_trimmed_statement() {
    let (transport, counters) = FakeTransport::new();
    let manager = manager_with(transport);
    let session = manager.acquire(&wrds_config()).await.unwrap();

    let table = manager.query(&session, " SELECT 1; ").await.unwrap();

    assert_eq!(table.get(0, "statement"), Some(&Cell::text("SELECT 1")));
    assert_eq!(
        *counters.statements.lock().unwrap(),
        vec!["SELECT 1".to_string()]
    );
}

#[tokio::test]
async fn test_query_on_released_lease_fails() {
    let (transport, _counters) = FakeTransport::new();
    let manager = manager_with(transport);
    let session = manager.acquire(&wrds_config()).await.unwrap();
    session.release();

    let err = manager.query(&session, "SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::QueryError { .. }));
}

// ============================================================================
// DuckDB
// ============================================================================

fn liquidity_db() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wrds.duckdb");
    let conn = duckdb::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE SCHEMA ff;
         CREATE TABLE ff.liq_ps (date DATE, ps_level DOUBLE, ps_innov DOUBLE, ps_vwf DOUBLE);
         INSERT INTO ff.liq_ps VALUES
            ('2009-12-31', -0.01, 0.02, 0.001),
            ('2010-01-29', -0.03, -0.01, 0.004),
            ('2010-02-26', 0.02, 0.03, -0.002);",
    )
    .unwrap();
    drop(conn);
    let path = path.to_string_lossy().into_owned();
    (dir, path)
}

#[tokio::test]
async fn test_duckdb_file_query() {
    let (_dir, path) = liquidity_db();
    let manager = SessionManager::duckdb(Arc::new(StaticCredentials::new()));
    let session = manager.acquire(&SessionConfig::duckdb(&path)).await.unwrap();

    let table = manager
        .query(
            &session,
            "SELECT date, ps_level, ps_innov, ps_vwf FROM ff.liq_ps \
             WHERE date >= '2010-01-01' ORDER BY date",
        )
        .await
        .unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(
        table.get(0, "date"),
        Some(&Cell::Date(NaiveDate::from_ymd_opt(2010, 1, 29).unwrap()))
    );
    assert_eq!(table.get(1, "ps_level"), Some(&Cell::Float(0.02)));
}

#[tokio::test]
async fn test_duckdb_catalog() {
    let (_dir, path) = liquidity_db();
    let manager = SessionManager::duckdb(Arc::new(StaticCredentials::new()));
    let session = manager.acquire(&SessionConfig::duckdb(&path)).await.unwrap();

    let libraries = manager.list_libraries(&session).await.unwrap();
    assert!(libraries.contains(&"ff".to_string()));

    let tables = manager.list_tables(&session, "ff").await.unwrap();
    assert_eq!(tables, vec!["liq_ps".to_string()]);

    let description = manager
        .describe_table(&session, "ff", "liq_ps")
        .await
        .unwrap();
    assert_eq!(description.len(), 4);
    assert_eq!(description.get(0, "column_name"), Some(&Cell::text("date")));

    let head = manager
        .get_table(&session, "ff", "liq_ps", Some(1))
        .await
        .unwrap();
    assert_eq!(head.len(), 1);

    let missing = manager.describe_table(&session, "ff", "nope").await;
    assert!(matches!(missing, Err(Error::QueryError { .. })));
}

#[tokio::test]
async fn test_duckdb_server_error_is_query_error() {
    let manager = SessionManager::duckdb(Arc::new(StaticCredentials::new()));
    let session = manager
        .acquire(&SessionConfig::duckdb(":memory:"))
        .await
        .unwrap();

    let err = manager
        .query(&session, "SELECT * FROM no_such_table")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::QueryError { .. }));
}
