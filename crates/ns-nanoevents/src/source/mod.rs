//! Columnar data sources.
//!
//! A [`ColumnSource`] exposes named branches (flat, jagged or doubly-jagged
//! primitive columns) and reads any entry range of one branch at a time.
//! Schemas only ever see [`BranchInfo`]; data is read lazily through the
//! form-key interpreter.

mod preloaded;

#[cfg(feature = "parquet-io")]
pub mod parquet;

pub use preloaded::PreloadedSource;

#[cfg(feature = "parquet-io")]
pub use self::parquet::{ParquetSource, write_parquet, write_parquet_bytes};

use sha2::{Digest, Sha256};

use crate::array::Array;
use crate::error::{NanoEventsError, Result};
use crate::form::Primitive;

/// Metadata for one branch of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    /// Branch name.
    pub name: String,
    /// Leaf element type.
    pub primitive: Primitive,
    /// Number of list layers (0 = one value per entry).
    pub list_depth: usize,
    /// Optional documentation string.
    pub doc: Option<String>,
}

impl BranchInfo {
    /// Describe a materialized column.
    pub fn from_array(name: impl Into<String>, array: &Array) -> Result<Self> {
        let name = name.into();
        let mut depth = 0;
        let mut node = array;
        loop {
            match node {
                Array::Numpy(b) => {
                    return Ok(Self { name, primitive: b.primitive(), list_depth: depth, doc: None });
                }
                Array::ListOffset { content, .. } => {
                    depth += 1;
                    node = content.as_ref();
                }
                _ => {
                    return Err(NanoEventsError::TypeMismatch(format!(
                        "branch '{name}' must be a primitive or (nested) list column"
                    )));
                }
            }
        }
    }
}

/// Random-access reader of named columnar branches.
pub trait ColumnSource: Send + Sync {
    /// Number of entries (events).
    fn num_entries(&self) -> u64;

    /// All branches, in source order.
    fn branches(&self) -> Vec<BranchInfo>;

    /// Read entries `[start, stop)` of one branch. Offsets of the result start at 0.
    fn read(&self, name: &str, start: u64, stop: u64) -> Result<Array>;

    /// Stable identifier of the underlying data (used in partition keys).
    fn uuid(&self) -> &str;

    /// Path of the object inside the data source (e.g. `/Events`).
    fn object_path(&self) -> &str;
}

/// Content hash used when a source carries no explicit uuid.
pub(crate) fn content_uuid(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update(b"\n");
    }
    let digest = format!("{:x}", hasher.finalize());
    // uuid-shaped: 8-4-4-4-12
    format!(
        "{}-{}-{}-{}-{}",
        &digest[0..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32]
    )
}

pub(crate) fn check_range(start: u64, stop: u64, entries: u64) -> Result<()> {
    if start > stop || stop > entries {
        return Err(NanoEventsError::EntryRange { start, stop, entries });
    }
    Ok(())
}
