//! # parley-replication: Replication coordinator for Parley
//!
//! Primary–backup replication with leader election over a fixed, known
//! replica set.
//!
//! ## Roles
//!
//! ```text
//!             election timeout                majority of votes
//!   Backup ───────────────────► Candidate ───────────────────► Primary
//!     ▲                            │                              │
//!     └────────────────────────────┴──────────────────────────────┘
//!                      any message with a higher term
//! ```
//!
//! The primary executes client operations locally and fans every write out
//! to the backups as `REPLICATE` frames. Backups forward client frames to
//! the primary over a transient connection and apply replicated frames
//! through the dispatcher in replicated mode. Heartbeats flow from the
//! primary every 500 ms; a backup that sees none within its randomized
//! election timeout (1.5–3 s) starts an election for the next term.
//!
//! ## Locking
//!
//! Three locks, never more than one held at a time, never held across a
//! dispatcher call or a socket send: the state lock (role, term, primary,
//! votes, heartbeat instant), the vote lock (`voted_for`), and the
//! operation-log lock.

mod config;
mod error;
mod replicator;
mod state;


pub use config::ReplicatorConfig;
pub use error::{ReplicationError, ReplicationResult};
pub use replicator::Replicator;
pub use state::Role;
