//! Normalized output table
//!
//! A `CanonicalTable` can only be built by [`crate::normalize::normalize`],
//! which guarantees rows are strictly ascending by the index key.

use super::{Cell, Table};

/// Vendor-independent table with a unique, sorted index key
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTable {
    columns: Vec<String>,
    index: Vec<String>,
    index_positions: Vec<usize>,
    rows: Vec<Vec<Cell>>,
}

impl CanonicalTable {
    /// Assemble from rows already sorted and de-duplicated by the index
    pub(crate) fn from_sorted(
        columns: Vec<String>,
        index: Vec<String>,
        index_positions: Vec<usize>,
        rows: Vec<Vec<Cell>>,
    ) -> Self {
        Self {
            columns,
            index,
            index_positions,
            rows,
        }
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Index key column names
    pub fn index_keys(&self) -> &[String] {
        &self.index
    }

    /// Rows, ascending by index key
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Cell at (row, column name)
    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Index key of a row
    pub fn key(&self, row: usize) -> Option<Vec<&Cell>> {
        let row = self.rows.get(row)?;
        Some(self.index_positions.iter().map(|&i| &row[i]).collect())
    }

    /// Row with the given index key
    pub fn lookup(&self, key: &[Cell]) -> Option<&[Cell]> {
        self.rows
            .binary_search_by(|row| {
                self.index_positions
                    .iter()
                    .map(|&i| &row[i])
                    .cmp(key.iter())
            })
            .ok()
            .map(|i| self.rows[i].as_slice())
    }

    /// Drop rows whose `column` value falls outside `[start, end]`.
    ///
    /// Missing values are dropped too when any bound is given. Sorting and
    /// uniqueness are preserved because rows are only removed.
    pub fn retain_between(&mut self, column: &str, start: Option<&Cell>, end: Option<&Cell>) {
        if start.is_none() && end.is_none() {
            return;
        }
        let Some(idx) = self.column_index(column) else {
            return;
        };
        self.rows.retain(|row| {
            let value = &row[idx];
            !value.is_missing()
                && start.map_or(true, |s| value >= s)
                && end.map_or(true, |e| value <= e)
        });
    }

    /// Convert back to a plain table (index dropped)
    pub fn into_table(self) -> Table {
        Table::from_rows(self.columns, self.rows).unwrap_or_default()
    }
}
