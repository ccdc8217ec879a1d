//! Authenticated SQL sessions
//!
//! [`SessionManager`] opens at most one connection per (host, credential)
//! pair and shares it between callers through reference-counted
//! [`Session`] leases. Connections go through an [`SqlTransport`]; the
//! default [`DuckDbTransport`] attaches PostgreSQL read-only via DuckDB.

mod manager;
mod transport;

pub(crate) use manager::{quote_ident, quote_literal};
pub use manager::{Session, SessionConfig, SessionKey, SessionManager};
pub use transport::{
    mask_dsn, ConnectOptions, DuckDbTransport, SqlConnection, SqlEngine, SqlTransport,
};

#[cfg(test)]
mod tests;
