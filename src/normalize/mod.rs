//! Schema normalizer
//!
//! Every connector funnels its [`Table`] through [`normalize`] so callers
//! always receive the same shape: canonical column names, a declared index,
//! rows strictly ascending by that index.
//!
//! [`SchemaMap`] bundles the per-dataset normalization rules that live in
//! configuration (drops, numeric coercion, renames, label casing, index).

use crate::error::{Error, Result};
use crate::table::{CanonicalTable, Cell, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Rename columns, reindex, and enforce index uniqueness.
///
/// Columns not named in `rename` are left untouched. Fails with
/// `SchemaMismatch` when an index key is absent or a rename collides, and with
/// `DuplicateIndexKey` when two rows share a key.
pub fn normalize<S: AsRef<str>>(
    mut table: Table,
    rename: &HashMap<String, String>,
    index_keys: &[S],
) -> Result<CanonicalTable> {
    // Sort renames so collisions are reported deterministically
    let ordered: BTreeMap<&String, &String> = rename.iter().collect();
    for (from, to) in ordered {
        table.rename_column(from, to)?;
    }

    if index_keys.is_empty() {
        return Err(Error::schema("at least one index key is required"));
    }

    let index: Vec<String> = index_keys.iter().map(|k| k.as_ref().to_string()).collect();
    let positions = index
        .iter()
        .map(|key| {
            table.column_index(key).ok_or_else(|| {
                Error::schema(format!(
                    "index key '{key}' not in columns [{}]",
                    table.columns().join(", ")
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let (columns, mut rows) = table.into_parts();
    rows.sort_by(|a, b| {
        positions
            .iter()
            .map(|&i| &a[i])
            .cmp(positions.iter().map(|&i| &b[i]))
    });

    if let Some(pair) = rows.windows(2).find(|pair| {
        positions
            .iter()
            .all(|&i| pair[0][i] == pair[1][i])
    }) {
        return Err(Error::DuplicateIndexKey {
            key: format_key(&positions, &pair[0]),
        });
    }

    Ok(CanonicalTable::from_sorted(columns, index, positions, rows))
}

fn format_key(positions: &[usize], row: &[Cell]) -> String {
    let parts: Vec<String> = positions.iter().map(|&i| row[i].to_string()).collect();
    format!("({})", parts.join(", "))
}

/// Normalization rules for one dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaMap {
    /// Columns removed before anything else (e.g. geography echo `us`)
    #[serde(default)]
    pub drop: Vec<String>,

    /// Columns coerced from text to numbers; bad values become NaN
    #[serde(default)]
    pub numeric: Vec<String>,

    /// Vendor label to canonical label
    #[serde(default)]
    pub rename: HashMap<String, String>,

    /// Uppercase every column label after renaming
    #[serde(default)]
    pub uppercase: bool,

    /// Canonical index key columns (post-rename, post-casing names)
    #[serde(default)]
    pub index: Vec<String>,
}

impl SchemaMap {
    /// Create rules with just an index
    pub fn indexed_by<S: AsRef<str>>(index: &[S]) -> Self {
        Self {
            index: index.iter().map(|s| s.as_ref().to_string()).collect(),
            ..Self::default()
        }
    }

    /// Add a rename
    #[must_use]
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rename.insert(from.into(), to.into());
        self
    }

    /// Add numeric columns
    #[must_use]
    pub fn numeric<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.numeric
            .extend(columns.iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Add dropped columns
    #[must_use]
    pub fn drop_columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.drop.extend(columns.iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Uppercase labels
    #[must_use]
    pub fn uppercase(mut self) -> Self {
        self.uppercase = true;
        self
    }

    /// Name a vendor column carries after renaming and casing
    pub fn canonical_name(&self, column: &str) -> String {
        let renamed = self.rename.get(column).map_or(column, String::as_str);
        if self.uppercase {
            renamed.to_uppercase()
        } else {
            renamed.to_string()
        }
    }

    /// Apply every rule and normalize.
    ///
    /// Order: drop, numeric coercion (vendor names), rename, uppercase,
    /// reindex.
    pub fn apply(&self, mut table: Table) -> Result<CanonicalTable> {
        table.drop_columns(&self.drop);
        table.coerce_numeric(&self.numeric)?;

        let ordered: BTreeMap<&String, &String> = self.rename.iter().collect();
        for (from, to) in ordered {
            table.rename_column(from, to)?;
        }
        if self.uppercase {
            table.uppercase_columns()?;
        }

        normalize(table, &HashMap::new(), &self.index)
    }
}

#[cfg(test)]
mod tests;
