//! Per-connection write handle.

use std::io;
use std::net::TcpStream;
use std::sync::Mutex;

use parley_dispatch::FrameSink;

/// Frame-atomic write handle for one client connection.
///
/// Shared between the connection's worker (responses) and the presence
/// registry (pushed notifications). The lock spans the whole frame write so
/// two writers can never interleave bytes on the socket.
pub struct TcpSink {
    stream: Mutex<TcpStream>,
}

impl TcpSink {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }
}

impl FrameSink for TcpSink {
    fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut stream = self.stream.lock().unwrap();
        parley_wire::write_frame(&mut *stream, frame)
    }
}
