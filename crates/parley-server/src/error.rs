//! Server error types.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while running the client acceptor.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bind failed.
    #[error("failed to bind client listener on {addr}: {source}")]
    BindFailed {
        addr: String,
        source: std::io::Error,
    },

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
