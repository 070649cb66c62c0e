//! The replication coordinator.
//!
//! Owns the peer listener, the heartbeat emitter, and the election-timeout
//! monitor, and routes every client frame: executed locally and fanned out
//! when primary, forwarded to the primary otherwise. Peers are addressed by
//! endpoint only - a connection is opened per message, used for at most one
//! round trip, and closed.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use parley_dispatch::{DispatchMode, Dispatcher, FrameSink};
use parley_types::{ReplicaId, Term};
use parley_wire::{FrameReader, PeerMessage, Response, StatusInfo, WireError};

use crate::config::ReplicatorConfig;
use crate::error::{ReplicationError, ReplicationResult};
use crate::state::{ElectionState, Role};

/// Cadence of primary heartbeats.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Randomized election timeout bounds, milliseconds.
const ELECTION_TIMEOUT_MS: std::ops::RangeInclusive<u64> = 1500..=3000;

/// Window after the initial election before a lone node promotes itself.
const BOOTSTRAP_WINDOW: Duration = Duration::from_secs(5);

/// Connect+send timeout for replication fan-out.
const REPLICATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connect+send timeout for heartbeats and vote requests.
const PEER_TIMEOUT: Duration = Duration::from_secs(1);

/// Read timeout when awaiting the primary's answer to a forwarded frame.
const FORWARD_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Client routing retries while the primary is unknown or unreachable.
const CLIENT_RETRIES: u32 = 3;

/// Backoff between client routing retries.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Poll interval for the non-blocking peer accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Slice length for interruptible sleeps.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// The replication coordinator for one replica.
pub struct Replicator {
    server_id: String,
    local_id: ReplicaId,
    peers: Vec<ReplicaId>,
    bind_addr: String,
    dispatcher: Dispatcher,

    // Lock order discipline: at most one of these held at a time, and none
    // across a dispatcher call or socket send.
    state: Mutex<ElectionState>,
    voted_for: Mutex<Option<ReplicaId>>,
    operation_log: Mutex<Vec<Vec<u8>>>,

    running: AtomicBool,
}

impl Replicator {
    /// Creates the coordinator. Validates that self is in the replica set;
    /// no sockets are opened until [`Replicator::start`].
    pub fn new(config: ReplicatorConfig, dispatcher: Dispatcher) -> ReplicationResult<Arc<Self>> {
        let local_id = config.resolve_local_id()?;
        let cluster_size = config.cluster_size();

        Ok(Arc::new(Self {
            server_id: config.server_id,
            local_id: local_id.clone(),
            peers: config.replicas,
            bind_addr: format!("{}:{}", config.bind_host, config.replication_port),
            dispatcher,
            state: Mutex::new(ElectionState::new(local_id, cluster_size)),
            voted_for: Mutex::new(None),
            operation_log: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }))
    }

    /// Returns this replica's protocol identity.
    pub fn local_id(&self) -> &ReplicaId {
        &self.local_id
    }

    /// Returns this replica's current role.
    pub fn role(&self) -> Role {
        self.state.lock().unwrap().role()
    }

    /// Returns this replica's current term.
    pub fn current_term(&self) -> Term {
        self.state.lock().unwrap().current_term()
    }

    /// Number of replicated write frames seen by this replica.
    pub fn operation_log_len(&self) -> usize {
        self.operation_log.lock().unwrap().len()
    }

    /// Current status for the STATUS diagnostic.
    pub fn status(&self) -> StatusInfo {
        let snapshot = self.state.lock().unwrap().snapshot();
        StatusInfo {
            server_id: self.server_id.clone(),
            replica_id: self.local_id.to_string(),
            role: snapshot.role.as_str().to_string(),
            term: snapshot.term.as_u64(),
            primary_id: snapshot.primary_id.map(|p| p.to_string()),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Binds the replication listener, runs the initial election, and spawns
    /// the long-running activities (peer acceptor, heartbeat emitter,
    /// election monitor).
    ///
    /// Blocks for up to the bootstrap window when no primary can be
    /// established; a lone node self-promotes and returns immediately.
    pub fn start(self: &Arc<Self>) -> ReplicationResult<()> {
        let listener = TcpListener::bind(&self.bind_addr).map_err(|source| {
            ReplicationError::BindFailed {
                addr: self.bind_addr.clone(),
                source,
            }
        })?;
        listener.set_nonblocking(true)?;
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(
            server = %self.server_id,
            replica = %self.local_id,
            cluster = self.peers.len(),
            "replication listener up"
        );

        let acceptor = Arc::clone(self);
        thread::spawn(move || acceptor.run_peer_listener(&listener));

        // Initial election, then wait out the bootstrap window for either a
        // win or a heartbeat naming some other primary. Elections are
        // retried on a randomized cadence so replicas that all voted for
        // themselves in the same term break the tie before the window ends.
        self.start_election();
        let deadline = Instant::now() + BOOTSTRAP_WINDOW;
        let mut next_retry = Instant::now() + election_jitter();
        loop {
            {
                let state = self.state.lock().unwrap();
                if state.role() == Role::Primary || state.primary_id().is_some() {
                    break;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                self.state.lock().unwrap().promote_self();
                break;
            }
            if now >= next_retry {
                self.start_election();
                next_retry = now + election_jitter();
            }
            thread::sleep(SHUTDOWN_POLL);
        }

        let snapshot = self.state.lock().unwrap().snapshot();
        tracing::info!(
            role = snapshot.role.as_str(),
            term = %snapshot.term,
            primary = ?snapshot.primary_id,
            "bootstrap complete"
        );

        let heartbeat = Arc::clone(self);
        thread::spawn(move || heartbeat.run_heartbeat_loop());
        let monitor = Arc::clone(self);
        thread::spawn(move || monitor.run_election_monitor());
        Ok(())
    }

    /// Signals every loop to exit at its next poll.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Client operation routing
    // ========================================================================

    /// Routes one client frame and returns the encoded response frame.
    ///
    /// Primary: dispatch locally, then fan writes out to the backups.
    /// Backup with a known primary: forward over a transient connection.
    /// No known primary: retry briefly, then report the outage.
    pub fn handle_client(
        self: &Arc<Self>,
        frame: &[u8],
        client: Option<&Arc<dyn FrameSink>>,
    ) -> Vec<u8> {
        let code = parley_wire::frame_code(frame);
        if code.as_deref() == Some("STATUS") {
            return encode_or_internal(&Response::Status(self.status()));
        }
        let is_write = code.as_deref().is_some_and(parley_wire::is_write_code);

        for attempt in 1..=CLIENT_RETRIES {
            let snapshot = self.state.lock().unwrap().snapshot();

            if snapshot.role == Role::Primary {
                let response = self.dispatcher.handle(frame, client, DispatchMode::Client);
                if is_write {
                    self.operation_log.lock().unwrap().push(frame.to_vec());
                    self.replicate_to_backups(frame, snapshot.term);
                }
                return encode_or_internal(&response);
            }

            let known_primary = snapshot.primary_id.filter(|p| *p != self.local_id);
            if let Some(primary) = known_primary {
                match self.forward_to_primary(&primary, frame) {
                    Ok(reply) => return reply,
                    Err(e) => {
                        tracing::warn!(primary = %primary, error = %e, "forward to primary failed");
                        self.state.lock().unwrap().clear_primary();
                        self.start_election();
                        if attempt == CLIENT_RETRIES {
                            return encode_or_internal(&Response::Error(
                                "Primary server unavailable, trying to elect new primary".to_string(),
                            ));
                        }
                    }
                }
            }
            if attempt < CLIENT_RETRIES {
                thread::sleep(RETRY_DELAY);
            }
        }

        encode_or_internal(&Response::Error("No primary server available".to_string()))
    }

    /// One transient connection to the primary: frame out, one frame back.
    fn forward_to_primary(&self, primary: &ReplicaId, frame: &[u8]) -> io::Result<Vec<u8>> {
        let addr = primary
            .to_socket_addr()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unresolvable primary endpoint"))?;
        let mut stream = TcpStream::connect_timeout(&addr, REPLICATE_TIMEOUT)?;
        stream.set_write_timeout(Some(REPLICATE_TIMEOUT))?;
        stream.set_read_timeout(Some(FORWARD_READ_TIMEOUT))?;
        parley_wire::write_frame(&mut stream, frame)?;

        let mut reader = FrameReader::new(&stream);
        match reader.next_frame() {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(io::Error::new(io::ErrorKind::TimedOut, "primary did not answer")),
            Err(WireError::Io(e)) => Err(e),
            Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
        }
    }

    /// Fans a write frame out to every backup in parallel, one short-lived
    /// thread per peer. Fire-and-forget: the ack is read best-effort and a
    /// dead peer only costs a log line.
    fn replicate_to_backups(self: &Arc<Self>, frame: &[u8], term: Term) {
        let message = PeerMessage::Replicate {
            term,
            server_id: self.local_id.clone(),
            operation: String::from_utf8_lossy(frame).into_owned(),
        };
        let Ok(bytes) = parley_wire::encode(&message) else {
            return;
        };

        for peer in self.peers.iter().filter(|p| **p != self.local_id) {
            let peer = peer.clone();
            let bytes = bytes.clone();
            thread::spawn(move || {
                match send_peer_frame(&peer, &bytes, REPLICATE_TIMEOUT, true) {
                    Ok(()) => tracing::debug!(peer = %peer, "replicated"),
                    Err(e) => tracing::warn!(peer = %peer, error = %e, "replication send failed"),
                }
            });
        }
    }

    // ========================================================================
    // Peer listener
    // ========================================================================

    fn run_peer_listener(self: Arc<Self>, listener: &TcpListener) {
        while self.is_running() {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let this = Arc::clone(&self);
                    thread::spawn(move || this.handle_peer_connection(stream));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    if self.is_running() {
                        tracing::warn!(error = %e, "peer accept failed");
                    }
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        tracing::debug!(replica = %self.local_id, "peer listener stopped");
    }

    /// Handles one inbound peer connection: a single peer frame (answered in
    /// place where the protocol calls for it) or a forwarded client frame.
    fn handle_peer_connection(self: Arc<Self>, stream: TcpStream) {
        if let Err(e) = self.serve_peer_connection(&stream) {
            tracing::debug!(error = %e, "peer connection dropped");
        }
    }

    fn serve_peer_connection(self: &Arc<Self>, mut stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(REPLICATE_TIMEOUT))?;

        let mut reader = FrameReader::new(stream);
        let frame = match reader.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(WireError::ConnectionClosed) => return Ok(()),
            Err(WireError::Io(e)) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "malformed peer frame");
                return Ok(());
            }
        };

        let code = parley_wire::frame_code(&frame).unwrap_or_default();
        if !parley_wire::is_peer_code(&code) {
            // A client frame forwarded by a backup: route it normally and
            // send the one response frame back.
            let reply = self.handle_client(&frame, None);
            return parley_wire::write_frame(&mut stream, &reply);
        }

        let message: PeerMessage = match parley_wire::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable peer frame");
                return Ok(());
            }
        };

        // A replica never processes its own frames (wildcard binds can make
        // self-sends possible).
        if *message.sender() == self.local_id {
            return Ok(());
        }

        match message {
            PeerMessage::Heartbeat { term, server_id } => {
                self.handle_heartbeat(term, &server_id);
                Ok(())
            }
            PeerMessage::RequestVote { term, server_id } => {
                let response = self.handle_vote_request(term, server_id);
                let bytes = parley_wire::encode(&response).map_err(io::Error::other)?;
                parley_wire::write_frame(&mut stream, &bytes)
            }
            PeerMessage::VoteResponse { term, server_id, vote_granted } => {
                self.handle_vote_response(term, server_id, vote_granted);
                Ok(())
            }
            PeerMessage::Replicate { term, server_id, operation } => {
                self.handle_replicate(term, &server_id, operation.as_bytes());
                let ack = PeerMessage::ReplicateAck { server_id: self.local_id.clone() };
                let bytes = parley_wire::encode(&ack).map_err(io::Error::other)?;
                parley_wire::write_frame(&mut stream, &bytes)
            }
            PeerMessage::ReplicateAck { .. } => Ok(()),
        }
    }

    // ========================================================================
    // Peer message handlers
    // ========================================================================

    pub(crate) fn handle_heartbeat(&self, term: Term, sender: &ReplicaId) {
        let clear_vote = self.state.lock().unwrap().observe_heartbeat(term, sender);
        if clear_vote {
            *self.voted_for.lock().unwrap() = None;
        }
    }

    /// Answers a vote request.
    ///
    /// A higher term is adopted first (stepping down a primary). The vote is
    /// granted iff the candidate's term is current and we have not voted for
    /// anyone else this term.
    pub(crate) fn handle_vote_request(&self, term: Term, candidate: ReplicaId) -> PeerMessage {
        let (current, clear_vote) = {
            let mut state = self.state.lock().unwrap();
            let clear = state.observe_term(term);
            (state.current_term(), clear)
        };
        if clear_vote {
            *self.voted_for.lock().unwrap() = None;
        }

        let vote_granted = {
            let mut voted_for = self.voted_for.lock().unwrap();
            let free = voted_for.is_none() || voted_for.as_ref() == Some(&candidate);
            if term >= current && free {
                *voted_for = Some(candidate.clone());
                true
            } else {
                false
            }
        };

        tracing::info!(
            candidate = %candidate,
            term = %term,
            current = %current,
            granted = vote_granted,
            "vote request"
        );

        PeerMessage::VoteResponse {
            term: current,
            server_id: self.local_id.clone(),
            vote_granted,
        }
    }

    pub(crate) fn handle_vote_response(&self, term: Term, sender: ReplicaId, granted: bool) {
        let clear_vote = {
            let mut state = self.state.lock().unwrap();
            if state.observe_term(term) {
                true
            } else {
                if granted {
                    let _ = state.record_vote(term, sender);
                }
                false
            }
        };
        if clear_vote {
            *self.voted_for.lock().unwrap() = None;
        }
    }

    /// Applies a replicated frame when it comes from the current primary at
    /// a current-or-newer term and this replica is a backup. Returns whether
    /// the frame was applied.
    pub(crate) fn handle_replicate(&self, term: Term, sender: &ReplicaId, operation: &[u8]) -> bool {
        let (accept, clear_vote) = {
            let mut state = self.state.lock().unwrap();
            let accept = state.role() == Role::Backup
                && state.primary_id() == Some(sender)
                && term >= state.current_term();
            let clear = if accept { state.observe_term(term) } else { false };
            (accept, clear)
        };
        if clear_vote {
            *self.voted_for.lock().unwrap() = None;
        }
        if !accept {
            tracing::debug!(from = %sender, term = %term, "ignoring replicate");
            return false;
        }

        tracing::debug!(from = %sender, term = %term, "applying replicated operation");
        let _response = self.dispatcher.handle(operation, None, DispatchMode::Replicated);
        self.operation_log.lock().unwrap().push(operation.to_vec());
        true
    }

    // ========================================================================
    // Elections
    // ========================================================================

    /// Starts an election unless we are primary or already know one.
    pub(crate) fn start_election(self: &Arc<Self>) {
        let (term, won) = {
            let mut state = self.state.lock().unwrap();
            if state.role() == Role::Primary || state.primary_id().is_some() {
                return;
            }
            state.begin_election()
        };
        *self.voted_for.lock().unwrap() = Some(self.local_id.clone());

        tracing::info!(replica = %self.local_id, term = %term, "starting election");
        if won {
            return;
        }

        let request = PeerMessage::RequestVote {
            term,
            server_id: self.local_id.clone(),
        };
        let Ok(bytes) = parley_wire::encode(&request) else {
            return;
        };

        for peer in self.peers.iter().filter(|p| **p != self.local_id) {
            let peer = peer.clone();
            let bytes = bytes.clone();
            let this = Arc::clone(self);
            thread::spawn(move || this.request_vote_from(&peer, &bytes));
        }
    }

    /// Sends one vote request and feeds the answer back in.
    fn request_vote_from(self: &Arc<Self>, peer: &ReplicaId, request: &[u8]) {
        let reply = (|| -> io::Result<Option<Vec<u8>>> {
            let addr = peer
                .to_socket_addr()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unresolvable peer"))?;
            let mut stream = TcpStream::connect_timeout(&addr, PEER_TIMEOUT)?;
            stream.set_write_timeout(Some(PEER_TIMEOUT))?;
            stream.set_read_timeout(Some(PEER_TIMEOUT))?;
            parley_wire::write_frame(&mut stream, request)?;

            let mut reader = FrameReader::new(&stream);
            match reader.next_frame() {
                Ok(frame) => Ok(frame),
                Err(WireError::Io(e)) => Err(e),
                Err(_) => Ok(None),
            }
        })();

        match reply {
            Ok(Some(frame)) => match parley_wire::decode::<PeerMessage>(&frame) {
                Ok(PeerMessage::VoteResponse { term, server_id, vote_granted }) => {
                    self.handle_vote_response(term, server_id, vote_granted);
                }
                Ok(other) => {
                    tracing::debug!(peer = %peer, frame = other.name(), "unexpected vote reply");
                }
                Err(e) => tracing::debug!(peer = %peer, error = %e, "undecodable vote reply"),
            },
            Ok(None) => tracing::debug!(peer = %peer, "no vote reply"),
            Err(e) => tracing::debug!(peer = %peer, error = %e, "vote request failed"),
        }
    }

    // ========================================================================
    // Long-running loops
    // ========================================================================

    /// Emits heartbeats while primary; idle otherwise. The state lock is
    /// released before any socket is touched.
    fn run_heartbeat_loop(self: Arc<Self>) {
        while self.is_running() {
            let snapshot = self.state.lock().unwrap().snapshot();
            if snapshot.role == Role::Primary {
                let message = PeerMessage::Heartbeat {
                    term: snapshot.term,
                    server_id: self.local_id.clone(),
                };
                if let Ok(bytes) = parley_wire::encode(&message) {
                    for peer in self.peers.iter().filter(|p| **p != self.local_id) {
                        if let Err(e) = send_peer_frame(peer, &bytes, PEER_TIMEOUT, false) {
                            tracing::debug!(peer = %peer, error = %e, "heartbeat send failed");
                        }
                    }
                }
            }
            thread::sleep(HEARTBEAT_INTERVAL);
        }
    }

    /// Watches for heartbeat staleness and triggers elections.
    ///
    /// Covers both a Backup that lost its primary and a Candidate whose
    /// election went nowhere - the latter restarts with a higher term.
    fn run_election_monitor(self: Arc<Self>) {
        while self.is_running() {
            let timeout = Duration::from_millis(rand::thread_rng().gen_range(ELECTION_TIMEOUT_MS));
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline && self.is_running() {
                thread::sleep(SHUTDOWN_POLL);
            }
            if !self.is_running() {
                break;
            }

            let should_elect = {
                let mut state = self.state.lock().unwrap();
                if state.role() == Role::Primary {
                    false
                } else if state.heartbeat_stale(timeout) {
                    tracing::info!(
                        replica = %self.local_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "no heartbeat within election timeout"
                    );
                    state.clear_primary();
                    true
                } else {
                    state.primary_id().is_none()
                }
            };
            if should_elect {
                self.start_election();
            }
        }
    }
}

/// Randomized retry spacing for tied elections during bootstrap.
fn election_jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(1000..=2000))
}

/// Opens a transient connection to `peer` and sends one frame. When
/// `await_ack` is set, one reply frame is read and discarded so the peer can
/// finish applying before the socket closes.
fn send_peer_frame(
    peer: &ReplicaId,
    bytes: &[u8],
    timeout: Duration,
    await_ack: bool,
) -> io::Result<()> {
    let addr = peer
        .to_socket_addr()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unresolvable peer"))?;
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    parley_wire::write_frame(&mut stream, bytes)?;

    if await_ack {
        stream.set_read_timeout(Some(timeout))?;
        let mut reader = FrameReader::new(&stream);
        let _ = reader.next_frame();
    }
    Ok(())
}

/// Encodes a response frame, falling back to a canned internal error so the
/// caller always has bytes to write.
fn encode_or_internal(response: &Response) -> Vec<u8> {
    parley_wire::encode(response)
        .unwrap_or_else(|_| br#"{"type":"E","payload":"Internal server error"}"#.to_vec())
}
