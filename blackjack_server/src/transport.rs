// Line transport over one TCP connection.
//
// `Transport` wraps a `TcpStream` together with a `ConnId` — a process-wide
// monotonic identifier for the accepted connection. Several owners may hold
// clones of one transport (the session, a lobby seat, the connection set);
// the `ConnId` is what makes "is this still the same connection?" guards
// possible after a reconnect replaces the socket behind a name.
//
// Reads are byte-at-a-time until `\n`, with no buffering across lines, so a
// transport can change readers between lines (the session hands the
// connection to the match task during a match). Timed reads use the socket
// read timeout as the readiness wait; once a line has started, the per-byte
// tolerance extends to `BULK_BYTE_TIMEOUT` for heavily fragmented senders.
//
// Writes go through `write_all`, which already loops over partial writes and
// retries interrupts. `send_best_effort` flips the socket non-blocking for
// the one writer that must never stall: the shutdown broadcast.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use blackjack_protocol::ServerLine;

/// Read/write timeout armed on every session's socket. Plain `read_line`
/// calls run under it; a peer silent for this long is treated as gone.
pub const SESSION_IO_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-byte tolerance once a line has started arriving.
pub const BULK_BYTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity of one accepted connection. Distinct from the socket: clones of
/// a `Transport` share the id, and a reconnect produces a new id for the
/// same player name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Outcome of a line read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// One line, terminator stripped. May be truncated at the length bound.
    Line(String),
    /// Peer closed; any partial line is discarded.
    Eof,
    /// No complete first byte within the wait (timed reads only).
    TimedOut,
    /// Unrecoverable I/O error.
    Failed,
}

/// Outcome of a non-blocking readiness probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    Idle,
    Readable,
    Closed,
    Failed,
}

pub struct Transport {
    stream: TcpStream,
    id: ConnId,
}

impl Transport {
    pub fn new(stream: TcpStream, id: ConnId) -> Transport {
        Transport { stream, id }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    /// Clone the transport (shared socket, same id).
    pub fn try_clone(&self) -> io::Result<Transport> {
        Ok(Transport {
            stream: self.stream.try_clone()?,
            id: self.id,
        })
    }

    /// Arm the session-level read/write timeouts.
    pub fn set_io_timeouts(&self) -> io::Result<()> {
        self.stream.set_read_timeout(Some(SESSION_IO_TIMEOUT))?;
        self.stream.set_write_timeout(Some(SESSION_IO_TIMEOUT))
    }

    /// Write one protocol line, appending the terminator. Partial writes are
    /// completed and interrupts retried by `write_all`.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        (&self.stream).write_all(&bytes)
    }

    pub fn send(&self, line: &ServerLine) -> io::Result<()> {
        self.write_line(&line.to_string())
    }

    /// Non-blocking write that swallows every error. Only for the shutdown
    /// broadcast, which must not stall on an unresponsive peer.
    pub fn send_best_effort(&self, line: &ServerLine) {
        if self.stream.set_nonblocking(true).is_err() {
            return;
        }
        let mut bytes = line.to_string().into_bytes();
        bytes.push(b'\n');
        let _ = (&self.stream).write_all(&bytes);
        let _ = self.stream.set_nonblocking(false);
    }

    /// Read one line under the socket's current read timeout.
    pub fn read_line(&self, max: usize) -> ReadOutcome {
        self.read_line_inner(max, None)
    }

    /// Read one line, waiting at most `first_wait` for it to start. Once the
    /// first byte arrives the per-byte wait extends to `BULK_BYTE_TIMEOUT`.
    /// Restores the session-level timeout afterwards.
    pub fn read_line_timeout(&self, max: usize, first_wait: Duration) -> ReadOutcome {
        let outcome = self.read_line_inner(max, Some(first_wait));
        let _ = self.stream.set_read_timeout(Some(SESSION_IO_TIMEOUT));
        outcome
    }

    fn read_line_inner(&self, max: usize, first_wait: Option<Duration>) -> ReadOutcome {
        if let Some(wait) = first_wait {
            // A zero Duration would disable the timeout entirely; clamp up.
            let wait = wait.max(Duration::from_millis(1));
            if self.stream.set_read_timeout(Some(wait)).is_err() {
                return ReadOutcome::Failed;
            }
        }
        let mut line: Vec<u8> = Vec::with_capacity(64);
        let mut buf = [0u8; 1];
        loop {
            match (&self.stream).read(&mut buf) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(_) => {
                    if buf[0] == b'\n' {
                        break;
                    }
                    if line.is_empty() && first_wait.is_some() {
                        let _ = self.stream.set_read_timeout(Some(BULK_BYTE_TIMEOUT));
                    }
                    line.push(buf[0]);
                    if line.len() >= max {
                        break; // buffer exhaustion: surface what we have
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    return ReadOutcome::TimedOut;
                }
                Err(_) => return ReadOutcome::Failed,
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        ReadOutcome::Line(String::from_utf8_lossy(&line).into_owned())
    }

    /// Non-blocking readiness check that consumes nothing.
    pub fn probe(&self) -> Probe {
        if self.stream.set_nonblocking(true).is_err() {
            return Probe::Failed;
        }
        let mut buf = [0u8; 1];
        let result = self.stream.peek(&mut buf);
        let _ = self.stream.set_nonblocking(false);
        match result {
            Ok(0) => Probe::Closed,
            Ok(_) => Probe::Readable,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.kind() == ErrorKind::Interrupted =>
            {
                Probe::Idle
            }
            Err(_) => Probe::Failed,
        }
    }

    /// Shut both halves, unblocking any parked read on a clone.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener;

    /// Create a connected (client, server-side transport) pair on localhost.
    fn tcp_pair() -> (TcpStream, Transport) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, Transport::new(server, ConnId(1)))
    }

    #[test]
    fn reads_one_line_without_terminator() {
        let (mut client, transport) = tcp_pair();
        client.write_all(b"C45alice\nC45J 1\n").unwrap();
        match transport.read_line(256) {
            ReadOutcome::Line(line) => assert_eq!(line, "C45alice"),
            other => panic!("expected a line, got {other:?}"),
        }
        // The next call picks up the next line — no buffering in between.
        match transport.read_line(256) {
            ReadOutcome::Line(line) => assert_eq!(line, "C45J 1"),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn strips_carriage_return() {
        let (mut client, transport) = tcp_pair();
        client.write_all(b"C45bob\r\n").unwrap();
        match transport.read_line(256) {
            ReadOutcome::Line(line) => assert_eq!(line, "C45bob"),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn truncates_at_the_length_bound() {
        let (mut client, transport) = tcp_pair();
        client.write_all(b"abcdefgh\n").unwrap();
        match transport.read_line(4) {
            ReadOutcome::Line(line) => assert_eq!(line, "abcd"),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn eof_when_peer_closes_first() {
        let (client, transport) = tcp_pair();
        drop(client);
        assert!(matches!(transport.read_line(256), ReadOutcome::Eof));
    }

    #[test]
    fn timed_read_expires_when_idle() {
        let (_client, transport) = tcp_pair();
        let start = std::time::Instant::now();
        let outcome = transport.read_line_timeout(256, Duration::from_millis(50));
        assert!(matches!(outcome, ReadOutcome::TimedOut));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn timed_read_returns_data_that_arrives_in_time() {
        let (mut client, transport) = tcp_pair();
        client.write_all(b"C45PI\n").unwrap();
        match transport.read_line_timeout(256, Duration::from_secs(2)) {
            ReadOutcome::Line(line) => assert_eq!(line, "C45PI"),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn probe_reports_idle_readable_closed() {
        let (mut client, transport) = tcp_pair();
        assert_eq!(transport.probe(), Probe::Idle);

        client.write_all(b"C45PI\n").unwrap();
        // Give the loopback a moment to deliver.
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(transport.probe(), Probe::Readable);

        // Probing must not consume the pending line.
        match transport.read_line(256) {
            ReadOutcome::Line(line) => assert_eq!(line, "C45PI"),
            other => panic!("expected a line, got {other:?}"),
        }

        drop(client);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(transport.probe(), Probe::Closed);
    }

    #[test]
    fn write_line_appends_terminator() {
        let (client, transport) = tcp_pair();
        transport.write_line("C45OK").unwrap();
        let mut reader = std::io::BufReader::new(client);
        let mut line = String::new();
        std::io::BufRead::read_line(&mut reader, &mut line).unwrap();
        assert_eq!(line, "C45OK\n");
    }

    #[test]
    fn clones_share_the_id() {
        let (_client, transport) = tcp_pair();
        let clone = transport.try_clone().unwrap();
        assert_eq!(clone.id(), transport.id());
    }
}
