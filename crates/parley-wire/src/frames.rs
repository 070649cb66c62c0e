//! Client request and response frames.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A username argument.
///
/// Clients send either the positional form `["alice"]` or the named form
/// `{"username":"alice"}`; both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UsernameArg {
    Named { username: String },
    Positional((String,)),
}

impl UsernameArg {
    /// Creates the named form.
    pub fn named(username: impl Into<String>) -> Self {
        Self::Named {
            username: username.into(),
        }
    }

    /// Returns the carried username.
    pub fn username(&self) -> &str {
        match self {
            Self::Named { username } => username,
            Self::Positional((username,)) => username,
        }
    }
}

/// A client request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Request {
    /// Create an account. Payload is the ordered pair `[username, password]`.
    #[serde(rename = "R")]
    Register(String, String),

    /// Authenticate and bind this connection into the presence registry.
    #[serde(rename = "L")]
    Login(String, String),

    /// Send a message to another user.
    #[serde(rename = "M")]
    SendMessage {
        sender: String,
        recipient: String,
        message: String,
    },

    /// Fetch all conversations involving a user.
    #[serde(rename = "GM")]
    GetMessages(UsernameArg),

    /// List every registered username.
    #[serde(rename = "G")]
    GetUserList,

    /// Delete a message, tolerating sub-second timestamp rounding.
    #[serde(rename = "D")]
    DeleteMessage {
        message: String,
        timestamp: String,
        sender: String,
        receiver: String,
    },

    /// Delete a user and cascade to their messages.
    #[serde(rename = "U")]
    DeleteUser(UsernameArg),

    /// Set a user's message view count.
    #[serde(rename = "W")]
    UpdateViewCount { username: String, new_count: u32 },

    /// Record a user's log-off time.
    #[serde(rename = "O")]
    LogOff(UsernameArg),

    /// Fetch a user's log-off time and view count.
    #[serde(rename = "GS")]
    GetUserStats(UsernameArg),

    /// Replica status diagnostic, answered by the coordinator itself.
    #[serde(rename = "STATUS")]
    Status,
}

impl Request {
    /// Returns true if this operation mutates server state and must be
    /// replicated to backups.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Request::Register(..)
                | Request::SendMessage { .. }
                | Request::DeleteMessage { .. }
                | Request::DeleteUser(..)
                | Request::UpdateViewCount { .. }
                | Request::LogOff(..)
        )
    }

    /// Returns the wire code, for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Request::Register(..) => "R",
            Request::Login(..) => "L",
            Request::SendMessage { .. } => "M",
            Request::GetMessages(..) => "GM",
            Request::GetUserList => "G",
            Request::DeleteMessage { .. } => "D",
            Request::DeleteUser(..) => "U",
            Request::UpdateViewCount { .. } => "W",
            Request::LogOff(..) => "O",
            Request::GetUserStats(..) => "GS",
            Request::Status => "STATUS",
        }
    }
}

/// A message record as it appears inside a `BM` response bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub sender: String,
    pub receiver: String,
    pub message: String,
    pub timestamp: String,
}

/// Per-user statistics carried in a `V` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub log_off_time: Option<String>,
    pub view_count: u32,
}

/// Replica status carried in a `STATUS` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub server_id: String,
    pub replica_id: String,
    pub role: String,
    pub term: u64,
    pub primary_id: Option<String>,
}

/// A server response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Response {
    /// Operation succeeded; payload is human-readable text.
    #[serde(rename = "S")]
    Success(String),

    /// Operation failed; payload is human-readable text.
    #[serde(rename = "E")]
    Error(String),

    /// All conversations for a user: other party → timestamp-ascending
    /// message list.
    #[serde(rename = "BM")]
    Messages(BTreeMap<String, Vec<WireMessage>>),

    /// Every registered username.
    #[serde(rename = "U")]
    UserList(Vec<String>),

    /// Log-off time and view count for one user.
    #[serde(rename = "V")]
    UserStats(UserStats),

    /// Unsolicited inbound-message notification, pushed to an online
    /// recipient outside the request/response cycle.
    #[serde(rename = "M")]
    Notification {
        sender: String,
        recipient: String,
        message: String,
    },

    /// Replica status diagnostic.
    #[serde(rename = "STATUS")]
    Status(StatusInfo),
}
