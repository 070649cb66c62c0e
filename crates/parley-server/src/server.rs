//! The client acceptor and its connection workers.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parley_dispatch::{FrameSink, Presence};
use parley_replication::Replicator;
use parley_wire::{FrameReader, Response, WireError};

use crate::connection::TcpSink;
use crate::error::{ServerError, ServerResult};

/// Read poll timeout: how quickly a worker notices shutdown.
const READ_POLL: Duration = Duration::from_millis(500);

/// Poll interval for the non-blocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// The client-facing TCP server.
pub struct Server {
    addr: String,
    replicator: Arc<Replicator>,
    presence: Arc<Presence>,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Creates the server; no socket is opened until [`Server::start`].
    pub fn new(addr: impl Into<String>, replicator: Arc<Replicator>, presence: Arc<Presence>) -> Self {
        Self {
            addr: addr.into(),
            replicator,
            presence,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Binds the client listener and spawns the accept loop.
    pub fn start(&self) -> ServerResult<()> {
        let listener = TcpListener::bind(&self.addr).map_err(|source| ServerError::BindFailed {
            addr: self.addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(addr = %self.addr, "client listener up");

        let replicator = Arc::clone(&self.replicator);
        let presence = Arc::clone(&self.presence);
        let running = Arc::clone(&self.running);
        thread::spawn(move || accept_loop(&listener, &replicator, &presence, &running));
        Ok(())
    }

    /// Signals the accept loop and every worker to exit at its next poll.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn accept_loop(
    listener: &TcpListener,
    replicator: &Arc<Replicator>,
    presence: &Arc<Presence>,
    running: &Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                tracing::debug!(client = %addr, "client connected");
                let replicator = Arc::clone(replicator);
                let presence = Arc::clone(presence);
                let running = Arc::clone(running);
                thread::spawn(move || {
                    if let Err(e) = serve_connection(&replicator, &presence, &running, stream, addr) {
                        tracing::debug!(client = %addr, error = %e, "connection worker exited");
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "client accept failed");
                }
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    tracing::debug!("client accept loop stopped");
}

/// One worker per connection: read a frame, route it, write the response.
///
/// On any exit path the connection is unbound from presence so notifications
/// stop targeting a dead socket.
fn serve_connection(
    replicator: &Arc<Replicator>,
    presence: &Arc<Presence>,
    running: &Arc<AtomicBool>,
    stream: TcpStream,
    addr: SocketAddr,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_POLL))?;

    let sink: Arc<dyn FrameSink> = Arc::new(TcpSink::new(stream.try_clone()?));
    let mut reader = FrameReader::new(stream);

    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(());
        }
        match reader.next_frame() {
            Ok(Some(frame)) => {
                let reply = replicator.handle_client(&frame, Some(&sink));
                if let Err(e) = sink.send_frame(&reply) {
                    break Err(e);
                }
            }
            Ok(None) => {} // read poll timeout, check shutdown and go again
            Err(WireError::ConnectionClosed) => {
                tracing::debug!(client = %addr, "client disconnected");
                break Ok(());
            }
            Err(WireError::Malformed(e)) => {
                // Unframeable bytes: answer once, then drop the connection -
                // there is no way back to a frame boundary.
                tracing::warn!(client = %addr, error = %e, "unframeable client bytes");
                let reply = Response::Error(format!("Invalid request: {e}"));
                if let Ok(bytes) = parley_wire::encode(&reply) {
                    let _ = sink.send_frame(&bytes);
                }
                break Ok(());
            }
            Err(WireError::Io(e)) => break Err(e),
        }
    };

    presence.unbind(&sink);
    outcome
}
