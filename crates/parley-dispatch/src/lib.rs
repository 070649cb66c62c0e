//! # parley-dispatch: Request dispatcher for Parley
//!
//! The dispatcher is a pure function of (frame, optional client handle) →
//! response frame. It decodes the operation, executes it against the store,
//! and produces exactly one reply; it never raises to the coordinator - every
//! failure path becomes an `E` frame.
//!
//! Side channels:
//! - successful Login binds the client connection into the [`Presence`]
//!   registry;
//! - successful SendMessage pushes a notification frame to the recipient's
//!   connection when one is bound (best-effort; a failed push is logged and
//!   dropped).
//!
//! Frames applied in [`DispatchMode::Replicated`] (operations arriving from
//! the primary rather than a client) skip both side channels: presence is
//! per-process state and replicated application must not touch it.

mod error;
mod handler;
mod password;
mod presence;

pub use error::{DispatchError, DispatchResult};
pub use handler::{DispatchMode, Dispatcher};
pub use presence::{FrameSink, Presence};
