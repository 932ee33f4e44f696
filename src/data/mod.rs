//! Data access adapter
//!
//! The stages only talk to the warehouse through [`DataAccess`]: a query is
//! resolved into an in-memory frame, and a frame is written back to a named
//! table. [`LocalWarehouse`] is the bundled implementation.

mod frame;
mod warehouse;

pub use frame::{as_factor, class_levels, feature_matrix, numeric_values, row_index};
pub use warehouse::{ColumnDef, ColumnType, LocalWarehouse, TableSchema};

use crate::context::TableRef;
use crate::error::Result;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Write discipline for [`DataAccess::persist`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Discard the destination's rows and write the frame wholesale
    Replace,
    /// Add the frame's rows after the existing ones
    Append,
}

/// Warehouse adapter consumed by the lifecycle stages
pub trait DataAccess {
    /// Resolve a data-retrieval statement into a tabular dataset
    fn resolve(&self, query: &str) -> Result<DataFrame>;

    /// Write a frame to `destination`
    fn persist(&self, frame: &DataFrame, destination: &TableRef, mode: WriteMode) -> Result<()>;

    /// Table reference as the adapter's query dialect expects it
    fn qualify(&self, table: &TableRef) -> String {
        table.fqtn()
    }
}
