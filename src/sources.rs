//! Built-in source definitions embedded in the binary
//!
//! Each YAML file under `sources/` describes one provider and its datasets,
//! so `fetch census.bds.firms` works without a settings file. A source in
//! the user's settings with the same name replaces the built-in one.

use crate::config::SourceConfig;
use crate::error::{Result, ResultExt};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Built-in source YAML definitions by source name
pub static BUILTIN_SOURCES: LazyLock<BTreeMap<&'static str, &'static str>> =
    LazyLock::new(|| {
        let mut m = BTreeMap::new();

        // Paginated REST
        m.insert("census", include_str!("../sources/census.yaml"));

        // Archives
        m.insert("french", include_str!("../sources/french.yaml"));

        // SQL warehouses
        m.insert("wrds", include_str!("../sources/wrds.yaml"));

        // Keyed series
        m.insert("alphavantage", include_str!("../sources/alphavantage.yaml"));

        m
    });

/// Get a built-in source's YAML by name
pub fn get_builtin(name: &str) -> Option<&'static str> {
    BUILTIN_SOURCES.get(name).copied()
}

/// Check if a source name is built in
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_SOURCES.contains_key(name)
}

/// List built-in source names
pub fn list_builtin() -> Vec<&'static str> {
    BUILTIN_SOURCES.keys().copied().collect()
}

/// Parse every built-in source
pub fn builtin_sources() -> Result<Vec<SourceConfig>> {
    BUILTIN_SOURCES
        .iter()
        .map(|(name, yaml)| {
            SourceConfig::from_yaml(yaml).context(format!("built-in source '{name}'"))
        })
        .collect()
}
