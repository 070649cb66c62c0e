//! Operation execution: one request frame in, one response frame out.

use std::collections::{BTreeMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::{Value, json};

use parley_store::{Collection, Document, Predicate, Store, decode_bytes, encode_bytes, second_window};
use parley_types::{now_timestamp, parse_timestamp};
use parley_wire::{Request, Response, UserStats, WireMessage};

use crate::error::{DispatchError, DispatchResult};
use crate::password;
use crate::presence::{FrameSink, Presence};

/// Default message view count assigned at registration.
const DEFAULT_VIEW_COUNT: u32 = 5;

/// How a frame reached the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Directly from a client (or forwarded by a backup). Presence binding
    /// and notification pushes apply.
    Client,

    /// Replicated from the primary. No client handle exists and presence
    /// must not be touched.
    Replicated,
}

/// Executes client operations against the store.
pub struct Dispatcher {
    store: Arc<Store>,
    presence: Arc<Presence>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, presence: Arc<Presence>) -> Self {
        Self { store, presence }
    }

    /// Returns the presence registry this dispatcher pushes through.
    pub fn presence(&self) -> &Arc<Presence> {
        &self.presence
    }

    /// Handles one raw frame. Never panics, never errors: every failure
    /// path produces an `E` frame.
    pub fn handle(
        &self,
        frame: &[u8],
        client: Option<&Arc<dyn FrameSink>>,
        mode: DispatchMode,
    ) -> Response {
        let result = catch_unwind(AssertUnwindSafe(|| self.handle_inner(frame, client, mode)))
            .unwrap_or_else(|_| {
                tracing::error!("dispatcher panicked while handling a frame");
                Err(DispatchError::Internal)
            });

        match result {
            Ok(response) => response,
            Err(e) => {
                if let DispatchError::Store(ref source) = e {
                    tracing::error!(error = %source, "store failure while dispatching");
                }
                Response::Error(e.to_string())
            }
        }
    }

    fn handle_inner(
        &self,
        frame: &[u8],
        client: Option<&Arc<dyn FrameSink>>,
        mode: DispatchMode,
    ) -> DispatchResult<Response> {
        let request: Request = parley_wire::decode(frame)
            .map_err(|e| DispatchError::BadRequest(format!("Invalid request: {e}")))?;

        tracing::debug!(op = request.code(), mode = ?mode, "dispatching");

        match request {
            Request::Register(username, password) => self.register(&username, &password),
            Request::Login(username, password) => self.login(&username, &password, client, mode),
            Request::SendMessage { sender, recipient, message } => {
                self.send_message(&sender, &recipient, &message, mode)
            }
            Request::GetMessages(user) => self.get_messages(user.username()),
            Request::GetUserList => self.user_list(),
            Request::DeleteMessage { message, timestamp, sender, receiver } => {
                self.delete_message(&message, &timestamp, &sender, &receiver)
            }
            Request::DeleteUser(user) => self.delete_user(user.username()),
            Request::UpdateViewCount { username, new_count } => {
                self.update_view_count(&username, new_count)
            }
            Request::LogOff(user) => self.log_off(user.username()),
            Request::GetUserStats(user) => self.user_stats(user.username()),
            Request::Status => Err(DispatchError::BadRequest("Invalid message type".to_string())),
        }
    }

    // ========================================================================
    // Users
    // ========================================================================

    fn register(&self, username: &str, password: &str) -> DispatchResult<Response> {
        let existing = self
            .store
            .read(Collection::Users, &Predicate::all().field("user_name", username));
        if !existing.is_empty() {
            return Err(DispatchError::Conflict("Username already exists".to_string()));
        }

        let mut doc = Document::new();
        doc.insert("user_name".to_string(), json!(username));
        doc.insert("password_hash".to_string(), encode_bytes(&password::hash(password)));
        doc.insert("view_count".to_string(), json!(DEFAULT_VIEW_COUNT));
        doc.insert("log_off_time".to_string(), Value::Null);

        self.store.insert(Collection::Users, doc)?;
        tracing::info!(user = username, "registered");
        Ok(Response::Success("User created successfully".to_string()))
    }

    fn login(
        &self,
        username: &str,
        password: &str,
        client: Option<&Arc<dyn FrameSink>>,
        mode: DispatchMode,
    ) -> DispatchResult<Response> {
        let users = self
            .store
            .read(Collection::Users, &Predicate::all().field("user_name", username));
        let Some(user) = users.first() else {
            return Err(DispatchError::AuthFailure("Login failed".to_string()));
        };

        let stored = user
            .get("password_hash")
            .and_then(decode_bytes)
            .ok_or_else(|| DispatchError::AuthFailure("Login failed".to_string()))?;
        if !password::verify(password, &stored) {
            return Err(DispatchError::AuthFailure("Login failed".to_string()));
        }

        if mode == DispatchMode::Client {
            if let Some(sink) = client {
                self.presence.bind(username, Arc::clone(sink));
            }
        }

        tracing::info!(user = username, "logged in");
        Ok(Response::Success("Login successful".to_string()))
    }

    fn user_list(&self) -> DispatchResult<Response> {
        let names = self
            .store
            .read(Collection::Users, &Predicate::all())
            .iter()
            .filter_map(|doc| doc.get("user_name")?.as_str().map(String::from))
            .collect();
        Ok(Response::UserList(names))
    }

    fn delete_user(&self, username: &str) -> DispatchResult<Response> {
        // Cascade first: every message the user sent or received.
        let sent = self
            .store
            .delete(Collection::Messages, &Predicate::all().field("sender", username))?;
        let received = self
            .store
            .delete(Collection::Messages, &Predicate::all().field("receiver", username))?;

        let removed = self
            .store
            .delete(Collection::Users, &Predicate::all().field("user_name", username))?;
        if removed == 0 {
            return Err(DispatchError::NotFound("Failed to delete user".to_string()));
        }

        tracing::info!(user = username, sent, received, "deleted user and cascaded messages");
        Ok(Response::Success("User deleted successfully".to_string()))
    }

    fn update_view_count(&self, username: &str, new_count: u32) -> DispatchResult<Response> {
        let mut assignments = Document::new();
        assignments.insert("view_count".to_string(), json!(new_count));

        let updated = self.store.update(
            Collection::Users,
            &Predicate::all().field("user_name", username),
            &assignments,
        )?;
        if updated == 0 {
            return Err(DispatchError::NotFound("Failed to update view count".to_string()));
        }
        Ok(Response::Success("View count updated".to_string()))
    }

    fn log_off(&self, username: &str) -> DispatchResult<Response> {
        let mut assignments = Document::new();
        assignments.insert("log_off_time".to_string(), json!(now_timestamp()));

        let updated = self.store.update(
            Collection::Users,
            &Predicate::all().field("user_name", username),
            &assignments,
        )?;
        if updated == 0 {
            return Err(DispatchError::NotFound("Failed to update log off time".to_string()));
        }
        Ok(Response::Success("Log off time updated".to_string()))
    }

    fn user_stats(&self, username: &str) -> DispatchResult<Response> {
        let users = self
            .store
            .read(Collection::Users, &Predicate::all().field("user_name", username));
        let Some(user) = users.first() else {
            return Err(DispatchError::NotFound("User not found".to_string()));
        };

        let log_off_time = user
            .get("log_off_time")
            .and_then(Value::as_str)
            .map(String::from);
        let view_count = user
            .get("view_count")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_VIEW_COUNT, |n| n as u32);

        Ok(Response::UserStats(UserStats { log_off_time, view_count }))
    }

    // ========================================================================
    // Messages
    // ========================================================================

    fn send_message(
        &self,
        sender: &str,
        recipient: &str,
        message: &str,
        mode: DispatchMode,
    ) -> DispatchResult<Response> {
        let receiver_exists = !self
            .store
            .read(Collection::Users, &Predicate::all().field("user_name", recipient))
            .is_empty();
        if !receiver_exists {
            return Err(DispatchError::NotFound("Recipient not found".to_string()));
        }

        let mut doc = Document::new();
        doc.insert("sender".to_string(), json!(sender));
        doc.insert("receiver".to_string(), json!(recipient));
        doc.insert("message".to_string(), json!(message));
        doc.insert("timestamp".to_string(), json!(now_timestamp()));
        self.store.insert(Collection::Messages, doc)?;

        if mode == DispatchMode::Client {
            self.notify_recipient(sender, recipient, message);
        }

        Ok(Response::Success("Message sent".to_string()))
    }

    /// Pushes an inbound-message notification to the recipient when online.
    /// Push failures are logged and dropped; the sender's response is
    /// unaffected and the push is never retried.
    fn notify_recipient(&self, sender: &str, recipient: &str, message: &str) {
        let Some(sink) = self.presence.lookup(recipient) else {
            return;
        };
        let push = Response::Notification {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            message: message.to_string(),
        };
        let Ok(frame) = parley_wire::encode(&push) else {
            return;
        };
        if let Err(e) = sink.send_frame(&frame) {
            tracing::warn!(recipient, error = %e, "notification push failed, dropping");
        }
    }

    fn get_messages(&self, username: &str) -> DispatchResult<Response> {
        let sent = self
            .store
            .read(Collection::Messages, &Predicate::all().field("sender", username));
        let received = self
            .store
            .read(Collection::Messages, &Predicate::all().field("receiver", username));

        // Union the two queries; a message to oneself appears in both.
        let mut seen: HashSet<String> = HashSet::new();
        let mut buckets: BTreeMap<String, Vec<WireMessage>> = BTreeMap::new();
        for doc in sent.iter().chain(received.iter()) {
            if let Some(id) = doc.get("id").and_then(Value::as_str) {
                if !seen.insert(id.to_string()) {
                    continue;
                }
            }
            let Some(record) = wire_message(doc) else {
                continue;
            };
            let other_party = if record.sender == username {
                record.receiver.clone()
            } else {
                record.sender.clone()
            };
            buckets.entry(other_party).or_default().push(record);
        }

        for messages in buckets.values_mut() {
            messages.sort_by_key(|m| parse_timestamp(&m.timestamp));
        }

        Ok(Response::Messages(buckets))
    }

    fn delete_message(
        &self,
        message: &str,
        timestamp: &str,
        sender: &str,
        receiver: &str,
    ) -> DispatchResult<Response> {
        let mut predicate = Predicate::all().field("message", message).field("sender", sender);
        if !receiver.is_empty() {
            predicate = predicate.field("receiver", receiver);
        }

        // Clients round timestamps below the second; match within ±1 s of
        // the supplied instant, then fall back to the fields alone.
        if let Some(center) = parse_timestamp(timestamp) {
            let (gte, lt) = second_window(center);
            let windowed = predicate.clone().time_range("timestamp", Some(gte), Some(lt));
            if self.store.delete(Collection::Messages, &windowed)? > 0 {
                return Ok(Response::Success("Message deleted".to_string()));
            }
            tracing::debug!(message, timestamp, "windowed delete missed, retrying without timestamp");
        }

        if self.store.delete(Collection::Messages, &predicate)? > 0 {
            return Ok(Response::Success("Message deleted".to_string()));
        }
        Err(DispatchError::NotFound("Message not deleted".to_string()))
    }
}

/// Projects a stored message document onto its wire form.
fn wire_message(doc: &Document) -> Option<WireMessage> {
    Some(WireMessage {
        sender: doc.get("sender")?.as_str()?.to_string(),
        receiver: doc.get("receiver")?.as_str()?.to_string(),
        message: doc.get("message")?.as_str()?.to_string(),
        timestamp: doc.get("timestamp")?.as_str()?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::testing::{DeadSink, RecordingSink};
    use parley_wire::UsernameArg;
    use test_case::test_case;

    fn fixture() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let presence = Arc::new(Presence::new());
        (dir, Dispatcher::new(store, presence))
    }

    fn send(dispatcher: &Dispatcher, request: &Request) -> Response {
        let frame = parley_wire::encode(request).unwrap();
        dispatcher.handle(&frame, None, DispatchMode::Client)
    }

    fn register(dispatcher: &Dispatcher, name: &str, password: &str) {
        let response = send(dispatcher, &Request::Register(name.into(), password.into()));
        assert!(matches!(response, Response::Success(_)), "register failed: {response:?}");
    }

    #[test]
    fn register_then_login_succeeds() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "Password1");

        let response = send(&dispatcher, &Request::Login("alice".into(), "Password1".into()));
        assert_eq!(response, Response::Success("Login successful".to_string()));
    }

    #[test]
    fn duplicate_register_reports_conflict() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");

        let response = send(&dispatcher, &Request::Register("alice".into(), "p2".into()));
        assert_eq!(response, Response::Error("Username already exists".to_string()));
    }

    #[test_case("alice", "wrong"; "wrong password")]
    #[test_case("nobody", "Password1"; "unknown user")]
    fn login_failures(user: &str, password: &str) {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "Password1");

        let response = send(&dispatcher, &Request::Login(user.into(), password.into()));
        assert_eq!(response, Response::Error("Login failed".to_string()));
    }

    #[test]
    fn login_binds_presence_and_replicated_login_does_not() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");

        let sink: Arc<dyn FrameSink> = Arc::new(RecordingSink::default());
        let frame = parley_wire::encode(&Request::Login("alice".into(), "p".into())).unwrap();

        dispatcher.handle(&frame, Some(&sink), DispatchMode::Client);
        assert!(dispatcher.presence().lookup("alice").is_some());

        dispatcher.presence().unbind(&sink);
        dispatcher.handle(&frame, None, DispatchMode::Replicated);
        assert!(dispatcher.presence().lookup("alice").is_none());
    }

    #[test]
    fn message_to_online_recipient_is_pushed() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");
        register(&dispatcher, "bob", "p");

        let bob = Arc::new(RecordingSink::default());
        let bob_sink: Arc<dyn FrameSink> = bob.clone();
        dispatcher.presence().bind("bob", bob_sink);

        let response = send(
            &dispatcher,
            &Request::SendMessage {
                sender: "alice".into(),
                recipient: "bob".into(),
                message: "hi".into(),
            },
        );
        assert_eq!(response, Response::Success("Message sent".to_string()));

        let frames = bob.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let push: Response = parley_wire::decode(&frames[0]).unwrap();
        assert_eq!(
            push,
            Response::Notification {
                sender: "alice".into(),
                recipient: "bob".into(),
                message: "hi".into(),
            }
        );
    }

    #[test]
    fn failed_push_does_not_fail_the_send() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");
        register(&dispatcher, "bob", "p");
        dispatcher.presence().bind("bob", Arc::new(DeadSink));

        let response = send(
            &dispatcher,
            &Request::SendMessage {
                sender: "alice".into(),
                recipient: "bob".into(),
                message: "hi".into(),
            },
        );
        assert_eq!(response, Response::Success("Message sent".to_string()));
    }

    #[test]
    fn replicated_send_skips_notification() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");
        register(&dispatcher, "bob", "p");

        let bob = Arc::new(RecordingSink::default());
        dispatcher.presence().bind("bob", bob.clone());

        let frame = parley_wire::encode(&Request::SendMessage {
            sender: "alice".into(),
            recipient: "bob".into(),
            message: "hi".into(),
        })
        .unwrap();
        dispatcher.handle(&frame, None, DispatchMode::Replicated);

        assert!(bob.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn send_to_unknown_recipient_fails() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");

        let response = send(
            &dispatcher,
            &Request::SendMessage {
                sender: "alice".into(),
                recipient: "ghost".into(),
                message: "hi".into(),
            },
        );
        assert_eq!(response, Response::Error("Recipient not found".to_string()));
    }

    #[test]
    fn get_messages_buckets_and_sorts_ascending() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");
        register(&dispatcher, "bob", "p");

        for text in ["one", "two"] {
            send(
                &dispatcher,
                &Request::SendMessage {
                    sender: "alice".into(),
                    recipient: "bob".into(),
                    message: text.into(),
                },
            );
        }
        send(
            &dispatcher,
            &Request::SendMessage {
                sender: "bob".into(),
                recipient: "alice".into(),
                message: "three".into(),
            },
        );

        let response = send(&dispatcher, &Request::GetMessages(UsernameArg::named("alice")));
        let Response::Messages(buckets) = response else {
            panic!("expected BM response");
        };
        assert_eq!(buckets.len(), 1);
        let thread = &buckets["bob"];
        assert_eq!(thread.len(), 3);
        let mut instants: Vec<_> = thread.iter().map(|m| parse_timestamp(&m.timestamp)).collect();
        let sorted = instants.clone();
        instants.sort();
        assert_eq!(instants, sorted, "bucket must be timestamp-ascending");
    }

    #[test]
    fn delete_message_tolerates_half_second_skew() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");
        register(&dispatcher, "bob", "p");
        send(
            &dispatcher,
            &Request::SendMessage {
                sender: "alice".into(),
                recipient: "bob".into(),
                message: "hi".into(),
            },
        );

        let shifted = chrono::Utc::now() + chrono::Duration::milliseconds(500);
        let response = send(
            &dispatcher,
            &Request::DeleteMessage {
                message: "hi".into(),
                timestamp: parley_types::format_timestamp(shifted),
                sender: "alice".into(),
                receiver: "bob".into(),
            },
        );
        assert_eq!(response, Response::Success("Message deleted".to_string()));

        let after = send(&dispatcher, &Request::GetMessages(UsernameArg::named("alice")));
        assert_eq!(after, Response::Messages(BTreeMap::new()));
    }

    #[test]
    fn delete_message_falls_back_without_timestamp() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");
        register(&dispatcher, "bob", "p");
        send(
            &dispatcher,
            &Request::SendMessage {
                sender: "alice".into(),
                recipient: "bob".into(),
                message: "hi".into(),
            },
        );

        // Wildly wrong but parseable timestamp: the window misses, the
        // field-only retry still deletes.
        let response = send(
            &dispatcher,
            &Request::DeleteMessage {
                message: "hi".into(),
                timestamp: "2001-01-01T00:00:00Z".into(),
                sender: "alice".into(),
                receiver: "bob".into(),
            },
        );
        assert_eq!(response, Response::Success("Message deleted".to_string()));
    }

    #[test]
    fn delete_missing_message_reports_not_deleted() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");

        let response = send(
            &dispatcher,
            &Request::DeleteMessage {
                message: "ghost".into(),
                timestamp: now_timestamp(),
                sender: "alice".into(),
                receiver: "".into(),
            },
        );
        assert_eq!(response, Response::Error("Message not deleted".to_string()));
    }

    #[test]
    fn delete_user_cascades_to_messages() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");
        register(&dispatcher, "bob", "p");
        send(
            &dispatcher,
            &Request::SendMessage {
                sender: "alice".into(),
                recipient: "bob".into(),
                message: "hi".into(),
            },
        );
        send(
            &dispatcher,
            &Request::SendMessage {
                sender: "bob".into(),
                recipient: "alice".into(),
                message: "yo".into(),
            },
        );

        let response = send(&dispatcher, &Request::DeleteUser(UsernameArg::named("alice")));
        assert_eq!(response, Response::Success("User deleted successfully".to_string()));

        let users = send(&dispatcher, &Request::GetUserList);
        assert_eq!(users, Response::UserList(vec!["bob".to_string()]));

        let bobs = send(&dispatcher, &Request::GetMessages(UsernameArg::named("bob")));
        assert_eq!(bobs, Response::Messages(BTreeMap::new()));
    }

    #[test]
    fn view_count_update_and_stats() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");

        let stats = send(&dispatcher, &Request::GetUserStats(UsernameArg::named("alice")));
        assert_eq!(
            stats,
            Response::UserStats(UserStats { log_off_time: None, view_count: 5 })
        );

        let response = send(
            &dispatcher,
            &Request::UpdateViewCount { username: "alice".into(), new_count: 12 },
        );
        assert_eq!(response, Response::Success("View count updated".to_string()));

        let stats = send(&dispatcher, &Request::GetUserStats(UsernameArg::named("alice")));
        assert_eq!(
            stats,
            Response::UserStats(UserStats { log_off_time: None, view_count: 12 })
        );
    }

    #[test]
    fn log_off_records_a_parseable_instant() {
        let (_dir, dispatcher) = fixture();
        register(&dispatcher, "alice", "p");

        let response = send(&dispatcher, &Request::LogOff(UsernameArg::named("alice")));
        assert_eq!(response, Response::Success("Log off time updated".to_string()));

        let Response::UserStats(stats) =
            send(&dispatcher, &Request::GetUserStats(UsernameArg::named("alice")))
        else {
            panic!("expected V response");
        };
        let logged_off = stats.log_off_time.expect("log_off_time set");
        assert!(parse_timestamp(&logged_off).is_some());
    }

    #[test]
    fn malformed_frame_is_a_bad_request_not_a_crash() {
        let (_dir, dispatcher) = fixture();
        let response = dispatcher.handle(b"{\"type\":\"R\",\"payload\":42}", None, DispatchMode::Client);
        assert!(matches!(response, Response::Error(_)));
    }
}
