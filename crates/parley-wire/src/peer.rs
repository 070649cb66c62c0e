//! Peer coordination frames.
//!
//! - [`PeerMessage::Heartbeat`] - Primary → All: I'm still alive
//! - [`PeerMessage::RequestVote`] - Candidate → All: elect me
//! - [`PeerMessage::VoteResponse`] - Voter → Candidate: granted or not
//! - [`PeerMessage::Replicate`] - Primary → Backup: apply this client frame
//! - [`PeerMessage::ReplicateAck`] - Backup → Primary: applied
//!
//! Unlike client frames, peer frames are flat objects: `type`, `term`, and
//! `server_id` sit at the top level. `REPLICATE` carries the embedded client
//! frame as a UTF-8 string in `operation`. Anything arriving on the
//! replication endpoint whose `type` is not one of these codes is treated as
//! a forwarded client frame.

use parley_types::{ReplicaId, Term};
use serde::{Deserialize, Serialize};

/// A frame exchanged between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    /// Primary → All: liveness signal for `term`.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat { term: Term, server_id: ReplicaId },

    /// Candidate → All: solicit a vote for `term`.
    #[serde(rename = "REQUEST_VOTE")]
    RequestVote { term: Term, server_id: ReplicaId },

    /// Voter → Candidate: the answer to a `REQUEST_VOTE`.
    #[serde(rename = "VOTE_RESPONSE")]
    VoteResponse {
        term: Term,
        server_id: ReplicaId,
        vote_granted: bool,
    },

    /// Primary → Backup: apply the embedded client frame.
    #[serde(rename = "REPLICATE")]
    Replicate {
        term: Term,
        server_id: ReplicaId,
        operation: String,
    },

    /// Backup → Primary: the embedded frame was applied.
    #[serde(rename = "REPLICATE_ACK")]
    ReplicateAck { server_id: ReplicaId },
}

impl PeerMessage {
    /// Returns the sender's replica id.
    pub fn sender(&self) -> &ReplicaId {
        match self {
            PeerMessage::Heartbeat { server_id, .. }
            | PeerMessage::RequestVote { server_id, .. }
            | PeerMessage::VoteResponse { server_id, .. }
            | PeerMessage::Replicate { server_id, .. }
            | PeerMessage::ReplicateAck { server_id } => server_id,
        }
    }

    /// Returns the frame name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            PeerMessage::Heartbeat { .. } => "HEARTBEAT",
            PeerMessage::RequestVote { .. } => "REQUEST_VOTE",
            PeerMessage::VoteResponse { .. } => "VOTE_RESPONSE",
            PeerMessage::Replicate { .. } => "REPLICATE",
            PeerMessage::ReplicateAck { .. } => "REPLICATE_ACK",
        }
    }
}

/// Returns true if `code` names a peer coordination frame rather than a
/// client operation.
pub fn is_peer_code(code: &str) -> bool {
    matches!(
        code,
        "HEARTBEAT" | "REQUEST_VOTE" | "VOTE_RESPONSE" | "REPLICATE" | "REPLICATE_ACK"
    )
}
