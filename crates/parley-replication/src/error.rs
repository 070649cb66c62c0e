//! Replication error types.

use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur while configuring or running the coordinator.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The configured replica set does not contain this node's replication
    /// endpoint. Elections would mis-tally, so this is fatal at startup.
    #[error("replica set must include this node's replication endpoint {0}")]
    SelfNotInReplicaSet(String),

    /// The configured replica set is empty.
    #[error("replica set must not be empty")]
    EmptyReplicaSet,

    /// The replication endpoint is ambiguous (bind host `0.0.0.0` and more
    /// than one configured replica on the local port).
    #[error("cannot identify self in replica set: multiple replicas on port {0}")]
    AmbiguousSelf(u16),

    /// Binding the replication listener failed.
    #[error("failed to bind replication listener on {addr}: {source}")]
    BindFailed {
        addr: String,
        source: std::io::Error,
    },

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
