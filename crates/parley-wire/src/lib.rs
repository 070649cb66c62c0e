//! # parley-wire: Wire protocol for Parley
//!
//! One envelope for all client traffic: a single UTF-8 JSON object
//! `{"type": <code>, "payload": <value>}`, no length prefix, one complete
//! JSON value per frame. Peer coordination frames are flat objects carrying
//! `type`, `term`, and `server_id` (plus message-specific fields) on the
//! same connection discipline.
//!
//! ## Client request codes
//!
//! | Code | Operation | Class |
//! |------|-----------|-------|
//! | `R`  | Register | write |
//! | `L`  | Login | read |
//! | `M`  | SendMessage | write |
//! | `GM` | GetMessages | read |
//! | `G`  | GetUserList | read |
//! | `D`  | DeleteMessage | write |
//! | `U`  | DeleteUser | write |
//! | `W`  | UpdateViewCount | write |
//! | `O`  | LogOff | write |
//! | `GS` | GetUserStats | read |
//! | `STATUS` | replica status (answered by the coordinator) | read |
//!
//! Frames may arrive split across reads or back to back in one read; use
//! [`FrameReader`] to extract complete values.

mod error;
mod frames;
mod peer;
mod reader;

pub use error::{WireError, WireResult};
pub use frames::{Request, Response, StatusInfo, UserStats, UsernameArg, WireMessage};
pub use peer::{PeerMessage, is_peer_code};
pub use reader::{FrameReader, write_frame};

/// Serializes a frame to its wire bytes.
pub fn encode<T: serde::Serialize>(frame: &T) -> WireResult<Vec<u8>> {
    Ok(serde_json::to_vec(frame)?)
}

/// Extracts the operation code (`type` field) from a raw frame without
/// touching its payload.
///
/// The replication coordinator classifies frames by code alone; full payload
/// decoding is the dispatcher's job.
pub fn frame_code(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    Some(value.get("type")?.as_str()?.to_string())
}

/// Returns true if `code` names a state-modifying client operation that must
/// be replicated: {R, M, D, U, W, O}.
pub fn is_write_code(code: &str) -> bool {
    matches!(code, "R" | "M" | "D" | "U" | "W" | "O")
}

/// Deserializes a frame from wire bytes.
pub fn decode<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> WireResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}
