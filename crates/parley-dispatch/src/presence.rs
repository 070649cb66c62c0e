//! Presence registry: authenticated username → live client connection.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

/// A handle that can push one frame atomically to a client connection.
///
/// Implementations must write the whole frame in one guarded call so a
/// pushed notification cannot interleave with a response the connection
/// worker is writing.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &[u8]) -> io::Result<()>;
}

/// Concurrent mapping from logged-in username to its client connection.
///
/// The dispatcher consults it to push inbound-message notifications; the
/// acceptor unbinds a connection when its worker exits.
#[derive(Default)]
pub struct Presence {
    online: Mutex<HashMap<String, Arc<dyn FrameSink>>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `username` to `sink`, replacing any prior binding.
    pub fn bind(&self, username: &str, sink: Arc<dyn FrameSink>) {
        let mut online = self.online.lock().unwrap();
        online.insert(username.to_string(), sink);
    }

    /// Removes every username bound to `sink`.
    pub fn unbind(&self, sink: &Arc<dyn FrameSink>) {
        let mut online = self.online.lock().unwrap();
        online.retain(|_, bound| !Arc::ptr_eq(bound, sink));
    }

    /// Returns the connection bound to `username`, if any.
    pub fn lookup(&self, username: &str) -> Option<Arc<dyn FrameSink>> {
        let online = self.online.lock().unwrap();
        online.get(username).cloned()
    }

    /// Number of currently bound users.
    pub fn online_count(&self) -> usize {
        self.online.lock().unwrap().len()
    }
}

/// Test doubles shared by this crate's unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::FrameSink;
    use std::io;
    use std::sync::Mutex;

    /// A sink that records every pushed frame.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub frames: Mutex<Vec<Vec<u8>>>,
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
            self.frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    /// A sink whose connection has gone away.
    pub(crate) struct DeadSink;

    impl FrameSink for DeadSink {
        fn send_frame(&self, _frame: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "receiver gone"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[test]
    fn bind_replaces_prior_connection() {
        let presence = Presence::new();
        let first: Arc<dyn FrameSink> = Arc::new(RecordingSink::default());
        let second: Arc<dyn FrameSink> = Arc::new(RecordingSink::default());

        presence.bind("alice", Arc::clone(&first));
        presence.bind("alice", Arc::clone(&second));

        let bound = presence.lookup("alice").unwrap();
        assert!(Arc::ptr_eq(&bound, &second));
        assert_eq!(presence.online_count(), 1);
    }

    #[test]
    fn unbind_removes_all_names_for_a_connection() {
        let presence = Presence::new();
        let sink: Arc<dyn FrameSink> = Arc::new(RecordingSink::default());
        presence.bind("alice", Arc::clone(&sink));
        presence.bind("alice2", Arc::clone(&sink));

        presence.unbind(&sink);
        assert!(presence.lookup("alice").is_none());
        assert!(presence.lookup("alice2").is_none());
        assert_eq!(presence.online_count(), 0);
    }

    #[test]
    fn unbind_leaves_other_connections_alone() {
        let presence = Presence::new();
        let a: Arc<dyn FrameSink> = Arc::new(RecordingSink::default());
        let b: Arc<dyn FrameSink> = Arc::new(RecordingSink::default());
        presence.bind("alice", Arc::clone(&a));
        presence.bind("bob", Arc::clone(&b));

        presence.unbind(&a);
        assert!(presence.lookup("alice").is_none());
        assert!(presence.lookup("bob").is_some());
    }
}
