//! Dispatcher error types.

use parley_store::StoreError;
use thiserror::Error;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors produced while executing a client operation.
///
/// Every variant maps to an `E` frame with its display text; none of them
/// escape the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Frame failed to parse, unknown code, or payload missing fields.
    #[error("{0}")]
    BadRequest(String),

    /// Wrong password or unknown user on login.
    #[error("{0}")]
    AuthFailure(String),

    /// The record targeted by the operation does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate username on register.
    #[error("{0}")]
    Conflict(String),

    /// Persistence failed; the process continues.
    #[error("Internal storage error")]
    Store(#[from] StoreError),

    /// Catch-all for anything that escaped the operation handlers.
    #[error("Internal server error")]
    Internal,
}
