//! Error types for dga-nn
//!
//! Every fault carries the condition that caused it; nothing is masked.
//! The only error that is ever swallowed is a failed `data.json` write
//! (see [`crate::experiment::ResultAggregator::persist`]).

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// dga-nn error types
#[derive(Error, Debug)]
pub enum Error {
    /// Directory creation or artifact read/write failed
    #[error("Storage fault at '{}': {reason}", path.display())]
    StorageFault {
        /// File or directory that could not be accessed
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },

    /// Persisted data does not match what the reader expects
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A cross-validation fold failed; the whole run is aborted
    #[error("Cross-validation fold {fold} failed: {reason}\nNo partial results are kept")]
    FoldFailure {
        /// Zero-based fold index
        fold: usize,
        /// Underlying cause
        reason: String,
    },

    /// External baseline classifier file missing or unreadable
    #[error("Baseline classifier unavailable at '{}': {reason}", path.display())]
    BaselineUnavailable {
        /// Configured baseline path
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },

    /// Caller supplied data that violates an input contract
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Estimator training failed
    #[error("Training failed: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::StorageFault`] for `path` from any displayable cause.
    pub fn storage(path: impl AsRef<Path>, reason: impl std::fmt::Display) -> Self {
        Self::StorageFault {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Build a [`Error::BaselineUnavailable`] for `path`.
    pub fn baseline(path: impl AsRef<Path>, reason: impl std::fmt::Display) -> Self {
        Self::BaselineUnavailable {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }
}
