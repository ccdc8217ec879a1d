//! Credential resolution
//!
//! Connectors and the session manager never read secrets themselves. They ask
//! a [`CredentialResolver`] for a symbolic name such as `wrds.username` or
//! `census.api_key`.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Resolves a symbolic credential name to its secret value
pub trait CredentialResolver: Send + Sync {
    /// Resolve `name`, failing with `CredentialMissing` when absent or empty
    fn resolve(&self, name: &str) -> Result<String>;
}

/// In-memory credentials
#[derive(Clone, Default)]
pub struct StaticCredentials {
    secrets: HashMap<String, String>,
}

impl StaticCredentials {
    /// Create an empty credential set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), secret.into());
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, name: &str) -> Result<String> {
        self.secrets
            .get(name)
            .filter(|s| !s.is_empty())
            .cloned()
            .ok_or_else(|| Error::credential_missing(name))
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.secrets.keys().collect();
        names.sort();
        f.debug_struct("StaticCredentials")
            .field("names", &names)
            .finish()
    }
}

/// Credentials read from environment variables.
///
/// Symbolic names map to variables explicitly (`wrds.username` →
/// `WRDS_USERNAME`); unmapped names fall back to the uppercased name with
/// dots replaced by underscores.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    mapping: HashMap<String, String>,
}

impl EnvCredentials {
    /// Create a resolver with explicit name → variable mapping
    pub fn new(mapping: HashMap<String, String>) -> Self {
        Self { mapping }
    }

    /// Environment variable consulted for `name`
    pub fn variable_for(&self, name: &str) -> String {
        self.mapping
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.replace(['.', '-'], "_").to_uppercase())
    }
}

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, name: &str) -> Result<String> {
        std::env::var(self.variable_for(name))
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::credential_missing(name))
    }
}
