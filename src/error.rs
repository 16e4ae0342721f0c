//! Error types
//!
//! `StorageError` covers file-level failures of tracking files. `ApiError` is what the
//! tracking manager, garbage collector and CLI return to their callers.

use std::path::PathBuf;
use thiserror::Error;

/// Storage-level errors for tracking and pending-deletion files
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// API-level errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid hash key: {0}")]
    InvalidHashKey(String),

    /// Ordering or programming error. Never tolerated by best-effort loops.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unable to parse tracking file: {}", .0.display())]
    UnparseableRecord(PathBuf),

    #[error("Cannot upgrade legacy tracking record: {0}")]
    LegacyUpgrade(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl ApiError {
    /// Whether a best-effort loop must stop instead of reporting and continuing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::InvariantViolation(_))
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
