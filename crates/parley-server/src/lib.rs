//! # parley-server: Client acceptor for Parley
//!
//! Binds the client TCP port and runs one worker thread per accepted
//! connection. Workers read frames with a short poll timeout (so shutdown is
//! observed), hand each frame to the replication coordinator, and write the
//! response back on the same connection.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      parley-server                       │
//! │  ┌──────────┐   ┌───────────────┐   ┌────────────────┐   │
//! │  │ Listener │ → │ Worker/conn   │ → │   Replicator   │   │
//! │  │  (TCP)   │   │ (FrameReader) │   │ handle_client  │   │
//! │  └──────────┘   └───────────────┘   └────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each connection's write half is wrapped in a [`TcpSink`]: the same handle
//! the presence registry stores, so responses and pushed notifications share
//! one frame-level lock and cannot interleave bytes.

mod connection;
mod error;
mod server;

pub use connection::TcpSink;
pub use error::{ServerError, ServerResult};
pub use server::Server;
