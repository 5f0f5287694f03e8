//! Error types for Lectura-DB
//!
//! The taxonomy separates lookup failures (wrong table or experiment name,
//! never retried) from transient query failures (timeouts, flaky
//! connections, retried per experiment). Insufficient data is NOT an error:
//! it is a valid terminal readout status.

use std::time::Duration;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Lectura-DB error types
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced warehouse table does not exist (e.g. a target metric table
    /// that was never materialized)
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Experiment is not present in the registry
    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    /// Warehouse query exceeded its time budget
    #[error("Query timed out after {0:?}")]
    QueryTimeout(Duration),

    /// Transient warehouse failure (connection drop, overloaded cluster)
    #[error("Transient query failure: {0}")]
    Transient(String),

    /// Query parsing error
    #[error("SQL parse error: {0}")]
    Parse(String),

    /// Table schema does not match what the readout query expects
    #[error("Schema error: {0}")]
    Schema(String),

    /// Storage error (Parquet/Arrow)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Missing or ill-typed bound parameter
    #[error("Invalid query parameter: {0}")]
    InvalidParam(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow/Parquet error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller may retry the failed query.
    ///
    /// Only timeouts and transient warehouse failures are retryable; lookup
    /// and schema failures are deterministic and retrying cannot fix them.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::QueryTimeout(_) | Self::Transient(_))
    }

    /// Whether this is a lookup failure (missing table or experiment).
    ///
    /// Lookup failures are reported per experiment and never abort a batch.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(self, Self::TableNotFound(_) | Self::ExperimentNotFound(_))
    }
}
