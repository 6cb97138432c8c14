//! Event stream over a live connection
//!
//! Reads the handshake, then one event per line. Each event must be acknowledged
//! once the debugger has finished with it: the traced process blocks until it
//! sees the `ack`, which is how a break pauses the remote parser.

use super::codec::decode_event;
use super::{EventSource, SessionInfo};
use crate::types::{DebuggerError, Event, Result};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};

const ACK: &[u8] = b"ack\n";

/// Protocol reader/writer pair
pub struct EventStream<R, W> {
    reader: R,
    writer: W,
    line: String,
    session: Option<SessionInfo>,
}

impl EventStream<BufReader<TcpStream>, TcpStream> {
    /// Wrap a connected socket
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        let writer = stream.try_clone()?;
        Ok(Self::new(BufReader::new(stream), writer))
    }
}

impl<R: BufRead, W: Write> EventStream<R, W> {
    /// Create a stream over any reader/writer pair
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: String::new(),
            session: None,
        }
    }

    /// Session details, available once the handshake completed
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    fn read_line(&mut self) -> Result<Option<&str>> {
        self.line.clear();
        let read = self.reader.read_line(&mut self.line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(self.line.trim_end_matches(&['\r', '\n'][..])))
    }
}

impl<R: BufRead + Send, W: Write + Send> EventSource for EventStream<R, W> {
    fn handshake(&mut self) -> Result<SessionInfo> {
        let version_line = self
            .read_line()?
            .ok_or_else(|| DebuggerError::HandshakeError("connection closed before greeting".to_string()))?
            .to_string();
        let protocol_version = version_line
            .strip_prefix("ANTLR ")
            .map(|v| v.trim().to_string())
            .ok_or_else(|| DebuggerError::HandshakeError(format!("unexpected greeting {:?}", version_line)))?;

        let grammar_line = self
            .read_line()?
            .ok_or_else(|| DebuggerError::HandshakeError("connection closed before grammar name".to_string()))?
            .to_string();
        let grammar_file = grammar_line
            .strip_prefix("grammar ")
            .map(|g| g.trim().trim_matches('"').to_string())
            .ok_or_else(|| DebuggerError::HandshakeError(format!("unexpected grammar line {:?}", grammar_line)))?;

        let session = SessionInfo { protocol_version, grammar_file };
        log::info!(
            "Traced process speaks protocol {} for grammar {}",
            session.protocol_version,
            session.grammar_file
        );
        self.session = Some(session.clone());
        Ok(session)
    }

    fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            let line = match self.read_line()? {
                Some(line) => line.to_string(),
                None => return Ok(None),
            };
            if line.is_empty() {
                continue;
            }
            match decode_event(&line)? {
                Some(event) => return Ok(Some(event)),
                // Ignored lines still hold the traced process until acknowledged
                None => self.ack()?,
            }
        }
    }

    fn ack(&mut self) -> Result<()> {
        self.writer.write_all(ACK)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Handle that can tear down a socket from another thread
#[derive(Debug)]
pub struct ShutdownHandle(TcpStream);

impl ShutdownHandle {
    /// Clone a handle off a connected socket
    pub fn new(stream: &TcpStream) -> Result<Self> {
        Ok(Self(stream.try_clone()?))
    }

    /// Shut down both directions; blocked reads return end-of-stream
    pub fn shutdown(&self) {
        if let Err(e) = self.0.shutdown(Shutdown::Both) {
            log::debug!("Socket shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stream(input: &str) -> EventStream<Cursor<Vec<u8>>, Vec<u8>> {
        EventStream::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_handshake_reads_version_and_grammar() {
        let mut s = stream("ANTLR 2\ngrammar \"Expr.g\nterminate\n");
        let session = s.handshake().unwrap();
        assert_eq!(session.protocol_version, "2");
        assert_eq!(session.grammar_file, "Expr.g");
        assert_eq!(s.session(), Some(&session));
        assert_eq!(s.next_event().unwrap(), Some(Event::Terminate));
    }

    #[test]
    fn test_handshake_rejects_foreign_greeting() {
        let mut s = stream("HTTP/1.1 200 OK\n");
        assert!(matches!(s.handshake(), Err(DebuggerError::HandshakeError(_))));

        let mut s = stream("");
        assert!(matches!(s.handshake(), Err(DebuggerError::HandshakeError(_))));
    }

    #[test]
    fn test_ignored_lines_are_acknowledged_immediately() {
        let mut s = stream("semanticPredicate\ttrue\tp\n\nenterAlt\t1\n");
        assert_eq!(s.next_event().unwrap(), Some(Event::EnterAlt { alt: 1 }));
        assert_eq!(s.writer, b"ack\n".to_vec());

        s.ack().unwrap();
        assert_eq!(s.writer, b"ack\nack\n".to_vec());
        assert_eq!(s.next_event().unwrap(), None);
    }
}
