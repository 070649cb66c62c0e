//! # parley-store: Durable document store for Parley
//!
//! Two named collections (`users`, `messages`), each a JSON array on disk,
//! each guarded by its own mutex. Reads filter with [`Predicate`]s and return
//! cloned snapshots; every mutation rewrites the collection file in full
//! before it is visible in memory, so a successful return implies the data is
//! on disk.
//!
//! # File Layout
//!
//! ```text
//! {data_dir}/
//! ├── users.json      <- JSON array of user documents
//! └── messages.json   <- JSON array of message documents
//! ```
//!
//! Binary fields (password hashes) are persisted as tagged base64 objects
//! (`{"__type__":"bytes","data":…}`) so they survive the round trip through
//! JSON byte-exactly. Timestamps are ISO 8601 strings; range predicates parse
//! them to instants before comparing.

mod document;
mod error;
mod predicate;
mod store;

pub use document::{Document, decode_bytes, encode_bytes};
pub use error::{StoreError, StoreResult};
pub use predicate::{Filter, Predicate, second_window};
pub use store::{Collection, Store};
