//! Error types for event views, schemas and column sources.

use thiserror::Error;

/// Errors that can occur building or reading NanoEvents.
#[derive(Error, Debug)]
pub enum NanoEventsError {
    /// I/O error reading a source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error for forms, metadata or options.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parquet decoding error.
    #[cfg(feature = "parquet-io")]
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow conversion error.
    #[cfg(feature = "parquet-io")]
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Branch not present in the column source.
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// Field not present in a record form or array.
    #[error("field not found: {0}")]
    FieldNotFound(String),

    /// A schema could not interpret the base form.
    #[error("schema error: {0}")]
    Schema(String),

    /// Malformed or failing form-key program.
    #[error("form key error in '{key}': {reason}")]
    FormKey {
        /// The offending program.
        key: String,
        /// What went wrong.
        reason: String,
    },

    /// Type mismatch (e.g. kinematics requested from a non-record column).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Invalid entry range request.
    #[error("invalid entry range [{start}, {stop}) for source with {entries} entries")]
    EntryRange {
        /// Requested first entry.
        start: u64,
        /// Requested stop entry (exclusive).
        stop: u64,
        /// Entries available.
        entries: u64,
    },

    /// Structural validation failure (offsets, lengths, counts).
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result alias for NanoEvents operations.
pub type Result<T> = std::result::Result<T, NanoEventsError>;
