//! Incremental frame extraction from a byte stream.

use std::io::{self, Read, Write};

use serde::de::IgnoredAny;

use crate::error::{WireError, WireResult};

/// Reads complete JSON frames from a stream.
///
/// Frames carry no length prefix; a frame is one complete JSON value. TCP
/// gives no message boundaries, so a frame may arrive across several reads
/// and two frames may arrive in one read. The reader buffers bytes and
/// yields each complete value as it forms.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(4096),
        }
    }

    /// Returns the next complete frame.
    ///
    /// - `Ok(Some(bytes))` - one complete JSON value.
    /// - `Ok(None)` - the read timed out before a frame completed; the
    ///   partial bytes stay buffered. Callers use this to poll a shutdown
    ///   flag.
    /// - `Err(WireError::ConnectionClosed)` - orderly EOF (or EOF mid-frame).
    pub fn next_frame(&mut self) -> WireResult<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.extract_buffered()? {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; 4096];
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(WireError::Io(e)),
            }
        }
    }

    /// Tries to split one complete JSON value off the front of the buffer.
    fn extract_buffered(&mut self) -> WireResult<Option<Vec<u8>>> {
        let start = self.buf.iter().position(|b| !b.is_ascii_whitespace());
        let Some(start) = start else {
            self.buf.clear();
            return Ok(None);
        };

        let mut stream = serde_json::Deserializer::from_slice(&self.buf[start..]).into_iter::<IgnoredAny>();
        match stream.next() {
            Some(Ok(IgnoredAny)) => {
                let end = start + stream.byte_offset();
                let frame = self.buf[start..end].to_vec();
                self.buf.drain(..end);
                Ok(Some(frame))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(WireError::Malformed(e)),
            None => Ok(None),
        }
    }
}

/// Writes one frame with a single buffered write.
///
/// Sockets are shared between a connection's response stream and pushed
/// notifications; callers must serialize access (a per-socket lock) and this
/// helper guarantees the frame goes out in one `write_all`.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A reader that yields its input in fixed-size slivers, simulating a
    /// frame split across TCP segments.
    struct Dribble {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Dribble {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.data.len() {
                return Ok(0);
            }
            let end = (self.pos + self.step).min(self.data.len());
            let n = (end - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn single_frame() {
        let mut reader = FrameReader::new(Cursor::new(br#"{"type":"G"}"#.to_vec()));
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame, br#"{"type":"G"}"#);
        assert!(matches!(reader.next_frame(), Err(WireError::ConnectionClosed)));
    }

    #[test]
    fn two_frames_in_one_read() {
        let bytes = br#"{"type":"G"}{"type":"STATUS"}"#.to_vec();
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert_eq!(reader.next_frame().unwrap().unwrap(), br#"{"type":"G"}"#);
        assert_eq!(reader.next_frame().unwrap().unwrap(), br#"{"type":"STATUS"}"#);
    }

    #[test]
    fn frame_split_across_reads() {
        let data = br#"{"type":"R","payload":["alice","Password1"]}"#.to_vec();
        let mut reader = FrameReader::new(Dribble { data: data.clone(), pos: 0, step: 7 });
        assert_eq!(reader.next_frame().unwrap().unwrap(), data);
    }

    #[test]
    fn whitespace_between_frames_is_skipped() {
        let bytes = b"  {\"a\":1} \n {\"b\":2}".to_vec();
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert_eq!(reader.next_frame().unwrap().unwrap(), br#"{"a":1}"#);
        assert_eq!(reader.next_frame().unwrap().unwrap(), br#"{"b":2}"#);
    }

    #[test]
    fn eof_mid_frame_is_connection_closed() {
        let mut reader = FrameReader::new(Cursor::new(br#"{"type":"G"#.to_vec()));
        assert!(matches!(reader.next_frame(), Err(WireError::ConnectionClosed)));
    }

    #[test]
    fn syntactic_garbage_is_malformed() {
        let mut reader = FrameReader::new(Cursor::new(b"}}}".to_vec()));
        assert!(matches!(reader.next_frame(), Err(WireError::Malformed(_))));
    }
}
