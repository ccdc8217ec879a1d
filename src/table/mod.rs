//! Table model
//!
//! # Overview
//!
//! - [`Cell`] - a typed, totally ordered value
//! - [`RawTable`] - per-transport payload (SQL rows, JSON grid, keyed JSON
//!   series, delimited text) validated into a [`Table`]
//! - [`Table`] - intermediate rows with named columns
//! - [`CanonicalTable`] - normalized output, unique and sorted by index key

mod canonical;
mod cell;
mod frame;
mod raw;

pub use canonical::CanonicalTable;
pub use cell::Cell;
pub use frame::Table;
pub use raw::RawTable;
