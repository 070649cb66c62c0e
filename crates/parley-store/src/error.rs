//! Store error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Persistence failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A collection file exists but does not parse as a JSON array.
    #[error("corrupt collection file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}
