//! Untyped-schema intermediate table
//!
//! `Table` is what every transport produces once its raw payload has been
//! validated. It has no index and no ordering guarantees; the schema
//! normalizer turns it into a [`super::CanonicalTable`].

use super::Cell;
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Column names plus rows of cells; every row has one cell per column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a table from rows, validating row widths and column names
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(Error::schema(format!("duplicate column '{column}'")));
            }
        }

        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Column names in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in insertion order
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

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at (row, column name)
    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Append a row
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::schema(format!(
                "row has {} cells but table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append all rows of another table with the same columns
    pub fn append(&mut self, other: Table) -> Result<()> {
        if self.columns.is_empty() && self.rows.is_empty() {
            *self = other;
            return Ok(());
        }
        if other.columns != self.columns {
            return Err(Error::schema(format!(
                "cannot append table with columns [{}] to [{}]",
                other.columns.join(", "),
                self.columns.join(", ")
            )));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Set every row's value for `column`, adding the column if absent
    pub fn fill_column(&mut self, column: &str, value: &Cell) {
        match self.column_index(column) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.clone();
                }
            }
            None => {
                self.columns.push(column.to_string());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
    }

    /// Replace each cell of `column` with `f(cell)`
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&Cell) -> Result<Cell>,
    {
        let idx = self
            .column_index(column)
            .ok_or_else(|| Error::schema(format!("missing column '{column}'")))?;
        for row in &mut self.rows {
            row[idx] = f(&row[idx])?;
        }
        Ok(())
    }

    /// Coerce the named columns to numbers; bad values become NaN
    pub fn coerce_numeric<S: AsRef<str>>(&mut self, columns: &[S]) -> Result<()> {
        for column in columns {
            self.map_column(column.as_ref(), |cell| Ok(cell.to_numeric()))?;
        }
        Ok(())
    }

    /// Remove the named columns; names that do not exist are ignored
    pub fn drop_columns<S: AsRef<str>>(&mut self, columns: &[S]) {
        let mut drop: Vec<usize> = columns
            .iter()
            .filter_map(|c| self.column_index(c.as_ref()))
            .collect();
        drop.sort_unstable();
        drop.dedup();

        for idx in drop.into_iter().rev() {
            self.columns.remove(idx);
            for row in &mut self.rows {
                row.remove(idx);
            }
        }
    }

    /// Uppercase every column label
    pub fn uppercase_columns(&mut self) -> Result<()> {
        let upper: Vec<String> = self.columns.iter().map(|c| c.to_uppercase()).collect();
        let unique: HashSet<&String> = upper.iter().collect();
        if unique.len() != upper.len() {
            return Err(Error::schema(
                "uppercasing column labels produced duplicate names",
            ));
        }
        self.columns = upper;
        Ok(())
    }

    /// Rename one column
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let Some(idx) = self.column_index(from) else {
            return Ok(());
        };
        if self.column_index(to).is_some() {
            return Err(Error::schema(format!(
                "cannot rename '{from}' to '{to}': column already exists"
            )));
        }
        self.columns[idx] = to.to_string();
        Ok(())
    }

    /// Project onto the named columns in the given order
    pub fn select_columns<S: AsRef<str>>(&self, columns: &[S]) -> Result<Table> {
        let positions = columns
            .iter()
            .map(|c| {
                self.column_index(c.as_ref())
                    .ok_or_else(|| Error::schema(format!("missing column '{}'", c.as_ref())))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Table {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| positions.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Keep only the first `len` rows
    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }

    /// Split into columns and rows
    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<Cell>>) {
        (self.columns, self.rows)
    }
}
