//! # parley-types: Core types for Parley
//!
//! This crate contains shared types used across the Parley chat service:
//! - Replica identity ([`ReplicaId`])
//! - Election epochs ([`Term`])
//! - Store record identifiers ([`RecordId`])
//! - Timestamp parsing and formatting ([`parse_timestamp`], [`format_timestamp`])

use std::fmt::{self, Display};
use std::net::SocketAddr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Replica Identity
// ============================================================================

/// Protocol-level identity of a replica: the canonical `host:port` string of
/// its replication endpoint.
///
/// Every peer frame carries the sender's `ReplicaId`, and the configured
/// replica set is a list of these. Identifying replicas by endpoint makes
/// resolving `primary_id` to a dialable address total - there is no separate
/// name-to-address table to fall out of sync.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Creates a replica id from a `host:port` string.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self(endpoint.into())
    }

    /// Creates a replica id from host and port parts.
    pub fn from_parts(host: &str, port: u16) -> Self {
        Self(format!("{host}:{port}"))
    }

    /// Returns the endpoint string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the endpoint into a socket address, resolving `0.0.0.0` and
    /// `localhost` forms the way `ToSocketAddrs` does.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        use std::net::ToSocketAddrs;
        self.0.to_socket_addrs().ok()?.next()
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SocketAddr> for ReplicaId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

// ============================================================================
// Election Term
// ============================================================================

/// A monotonically increasing election epoch.
///
/// At most one replica is Primary for a given term. Terms only ever advance;
/// a replica that observes a higher term adopts it and steps down.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Term(u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn new(term: u64) -> Self {
        Self(term)
    }

    /// Returns the term as a `u64`.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next term.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Record Identity
// ============================================================================

/// Store-assigned identifier for a persisted record.
///
/// Opaque to everything outside the store. Monotonic within a process:
/// `"{unix_millis}-{seq}"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Formats an instant as the canonical on-disk / on-wire form: RFC 3339 with
/// microsecond precision in UTC.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Returns the current instant in the canonical form.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parses a timestamp string into an absolute instant.
///
/// Accepts RFC 3339 (with offset or `Z`), offset-less ISO 8601 as produced
/// by older clients (`2024-01-01T12:00:00.123456`, interpreted as UTC), and
/// the legacy `"%Y-%m-%d %H:%M:%S"` form. Returns `None` when the string
/// matches none of these; callers treat unparseable stored timestamps as
/// non-matching rather than erroring.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}
