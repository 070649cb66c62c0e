//! Wire protocol error types.

use thiserror::Error;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while framing or parsing wire traffic.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error on the underlying stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Bytes do not form a valid frame of the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}
