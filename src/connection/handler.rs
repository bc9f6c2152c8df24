//! Buffered Client Connection
//!
//! This module wraps one accepted, non-blocking socket together with a fixed
//! receive buffer and a fixed send buffer.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Reactor accepts the socket
//!        │
//!        ▼
//! 2. Connection created, registered for READABLE | WRITABLE
//!        │
//!        ▼
//! 3. ┌────────────────────────────────────────┐
//!    │  readable  → receive() → handler       │
//!    │  response  → enqueue_response()        │
//!    │  writable  → flush()                   │
//!    └────────────────────────────────────────┘
//!        │
//!        ▼
//! 4. Peer closes / I/O error
//!        │
//!        ▼
//! 5. Reactor deregisters and drops the Connection (socket closed once)
//! ```
//!
//! ## Buffer Management
//!
//! The receive handler runs inline right after every successful read, so it
//! sees the bytes before the next read lands in the same buffer. It is
//! expected to consume whatever complete requests it finds and leave any
//! partial request at the front for the next read to complete.

use crate::connection::buffer::FixedBuffer;
use bytes::{Buf, Bytes};
use mio::net::TcpStream;
use mio::Token;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::trace;

/// Identifies a connection for its whole lifetime.
///
/// Ids come from a counter and are never handed out twice, even after the OS
/// reuses a file descriptor, so a late response can't reach the wrong client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl ConnectionId {
    /// The mio token this connection is registered under.
    pub fn token(self) -> Token {
        Token(self.0)
    }
}

impl From<Token> for ConnectionId {
    fn from(token: Token) -> Self {
        ConnectionId(token.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Called inline after each successful read.
///
/// The handler gets the receive buffer mutably and must consume what it
/// processes; bytes left behind stay at the front of the buffer.
pub trait ReceiveHandler {
    fn on_receive(&mut self, id: ConnectionId, buffer: &mut FixedBuffer);

    /// Whether more bytes may be read for `id` right now.
    ///
    /// While this is false the reactor leaves the connection's input in the
    /// socket and in its receive buffer.
    fn is_accepting(&self, _id: ConnectionId) -> bool {
        true
    }

    /// The connection is gone; drop any state kept for it.
    fn on_close(&mut self, _id: ConnectionId) {}
}

impl<F> ReceiveHandler for F
where
    F: FnMut(ConnectionId, &mut FixedBuffer),
{
    fn on_receive(&mut self, id: ConnectionId, buffer: &mut FixedBuffer) {
        self(id, buffer)
    }
}

/// Result of one read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n > 0` bytes were read and handed to the handler
    Data(usize),
    /// Nothing to read right now
    WouldBlock,
    /// The peer closed its side
    Closed,
}

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The send buffer is empty
    Flushed,
    /// The socket stopped accepting bytes; the unsent tail is kept
    Pending,
}

/// Errors that end (or reject work for) a single connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The receive buffer is full and the handler could not drain it
    #[error("receive buffer full")]
    ReceiveBufferFull,

    /// Not enough free space in the send buffer
    #[error("send buffer overflow: need {needed} bytes, {available} available")]
    SendOverflow { needed: usize, available: usize },

    /// The socket accepted zero bytes for a non-empty write
    #[error("socket wrote zero bytes")]
    WriteZero,
}

/// One client socket plus its receive and send buffers.
///
/// Responses that do not fit in the send buffer wait in an outbox and are
/// copied in as the socket drains, so a slow reader only delays itself.
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    receive_buffer: FixedBuffer,
    send_buffer: FixedBuffer,
    outbox: VecDeque<Bytes>,
    outbox_bytes: usize,
}

impl Connection {
    /// Wraps an accepted, non-blocking stream.
    ///
    /// # Arguments
    ///
    /// * `id` - The id (and mio token) for this connection
    /// * `stream` - The accepted socket
    /// * `peer` - The client's socket address
    /// * `buffer_size` - Capacity of both the receive and the send buffer
    pub fn new(id: ConnectionId, stream: TcpStream, peer: SocketAddr, buffer_size: usize) -> Self {
        Self {
            id,
            stream,
            peer,
            receive_buffer: FixedBuffer::with_capacity(buffer_size),
            send_buffer: FixedBuffer::with_capacity(buffer_size),
            outbox: VecDeque::new(),
            outbox_bytes: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The socket, for (de)registration with the poller.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Bytes waiting in the send buffer.
    pub fn pending_send(&self) -> usize {
        self.send_buffer.len()
    }

    pub fn send_capacity(&self) -> usize {
        self.send_buffer.capacity()
    }

    /// Response bytes waiting behind the send buffer.
    pub fn outbox_bytes(&self) -> usize {
        self.outbox_bytes
    }

    /// True once more than a full send buffer of responses is waiting.
    ///
    /// The reactor stops reading from a backed-up connection so that a
    /// client which never reads cannot make the server queue without bound.
    pub fn is_backed_up(&self) -> bool {
        self.outbox_bytes >= self.send_buffer.capacity()
    }

    /// Performs one non-blocking read into the receive buffer.
    ///
    /// On data, `handler` runs before this returns.
    pub fn receive<H>(&mut self, handler: &mut H) -> Result<ReadOutcome, ConnectionError>
    where
        H: ReceiveHandler + ?Sized,
    {
        if self.receive_buffer.remaining() == 0 {
            return Err(ConnectionError::ReceiveBufferFull);
        }

        loop {
            match self.stream.read(self.receive_buffer.spare_mut()) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => {
                    self.receive_buffer.advance(n);
                    trace!(conn = %self.id, bytes = n, "Read data");
                    handler.on_receive(self.id, &mut self.receive_buffer);
                    return Ok(ReadOutcome::Data(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Appends `bytes` to the send buffer.
    ///
    /// Fails with [`ConnectionError::SendOverflow`] when the free space is too
    /// small. The buffer is left untouched in that case, so the caller can
    /// retry after the next flush.
    pub fn enqueue_to_send(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.send_buffer
            .extend_from_slice(bytes)
            .map_err(|available| ConnectionError::SendOverflow {
                needed: bytes.len(),
                available,
            })
    }

    /// Hands bytes already sitting in the receive buffer to `handler`.
    ///
    /// Used when reading resumes after a pause, since no new read may arrive
    /// to trigger the handler.
    pub fn process_buffered<H>(&mut self, handler: &mut H)
    where
        H: ReceiveHandler + ?Sized,
    {
        if !self.receive_buffer.is_empty() {
            handler.on_receive(self.id, &mut self.receive_buffer);
        }
    }

    /// Queues a whole response.
    ///
    /// Never fails: what does not fit in the send buffer waits in the outbox,
    /// including responses larger than the buffer itself.
    pub fn enqueue_response(&mut self, payload: Bytes) {
        if self.outbox.is_empty() && self.enqueue_to_send(&payload).is_ok() {
            return;
        }
        self.outbox_bytes += payload.len();
        self.outbox.push_back(payload);
        self.fill_from_outbox();
    }

    /// Sends the send buffer and the outbox until both are empty or the
    /// socket stops accepting bytes.
    pub fn flush(&mut self) -> Result<SendOutcome, ConnectionError> {
        loop {
            self.fill_from_outbox();
            if self.send_buffer.is_empty() {
                return Ok(SendOutcome::Flushed);
            }
            if self.send()? == SendOutcome::Pending {
                return Ok(SendOutcome::Pending);
            }
        }
    }

    /// Moves outbox bytes into the free part of the send buffer.
    fn fill_from_outbox(&mut self) {
        while let Some(front) = self.outbox.front_mut() {
            let n = front.len().min(self.send_buffer.remaining());
            if n > 0 {
                if self.send_buffer.extend_from_slice(&front[..n]).is_err() {
                    break;
                }
                front.advance(n);
                self.outbox_bytes -= n;
            }
            if !front.is_empty() {
                break;
            }
            self.outbox.pop_front();
        }
    }

    /// Writes as much of the send buffer as the socket takes.
    ///
    /// Written bytes are dropped from the front of the buffer; whatever the
    /// socket refused stays queued for the next writable event.
    pub fn send(&mut self) -> Result<SendOutcome, ConnectionError> {
        while !self.send_buffer.is_empty() {
            match self.stream.write(self.send_buffer.filled()) {
                Ok(0) => return Err(ConnectionError::WriteZero),
                Ok(n) => {
                    self.send_buffer.consume(n);
                    trace!(conn = %self.id, bytes = n, "Sent data");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(SendOutcome::Pending)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(SendOutcome::Flushed)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("received", &self.receive_buffer.len())
            .field("pending_send", &self.send_buffer.len())
            .field("outbox", &self.outbox_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::time::{Duration, Instant};

    /// Returns a server-side Connection and the matching blocking client.
    fn connected_pair(buffer_size: usize) -> (Connection, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = StdTcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let conn = Connection::new(
            ConnectionId(7),
            TcpStream::from_std(server),
            peer,
            buffer_size,
        );
        (conn, client)
    }

    /// Retries `receive` until something other than WouldBlock comes back.
    fn receive_until_ready<H: ReceiveHandler>(
        conn: &mut Connection,
        handler: &mut H,
    ) -> Result<ReadOutcome, ConnectionError> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match conn.receive(handler)? {
                ReadOutcome::WouldBlock if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                outcome => return Ok(outcome),
            }
        }
    }

    #[test]
    fn test_receive_invokes_handler() {
        let (mut conn, mut client) = connected_pair(1024);
        client.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();

        let mut seen = Vec::new();
        let mut handler = |id: ConnectionId, buf: &mut FixedBuffer| {
            assert_eq!(id, ConnectionId(7));
            seen.extend_from_slice(buf.filled());
            buf.clear();
        };

        let outcome = receive_until_ready(&mut conn, &mut handler).unwrap();
        assert!(matches!(outcome, ReadOutcome::Data(n) if n > 0));
        assert_eq!(seen, b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_receive_reports_close() {
        let (mut conn, client) = connected_pair(1024);
        drop(client);

        let mut handler = |_: ConnectionId, _: &mut FixedBuffer| {
            panic!("handler must not run on close");
        };
        let outcome = receive_until_ready(&mut conn, &mut handler).unwrap();
        assert_eq!(outcome, ReadOutcome::Closed);
    }

    #[test]
    fn test_receive_buffer_full() {
        let (mut conn, mut client) = connected_pair(4);
        client.write_all(b"abcdefgh").unwrap();

        // A handler that never consumes anything
        let mut handler = |_: ConnectionId, _: &mut FixedBuffer| {};
        let deadline = Instant::now() + Duration::from_secs(2);
        let err = loop {
            match conn.receive(&mut handler) {
                Err(e) => break e,
                Ok(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
                Ok(outcome) => panic!("unexpected {:?}", outcome),
            }
        };
        assert!(matches!(err, ConnectionError::ReceiveBufferFull));
    }

    #[test]
    fn test_enqueue_overflow_is_not_destructive() {
        let (mut conn, _client) = connected_pair(8);

        conn.enqueue_to_send(b"+OK\r\n").unwrap();
        let err = conn.enqueue_to_send(b"+PONG\r\n").unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::SendOverflow {
                needed: 7,
                available: 3
            }
        ));
        assert_eq!(conn.pending_send(), 5);
    }

    #[test]
    fn test_send_flushes_buffer() {
        let (mut conn, mut client) = connected_pair(64);

        conn.enqueue_to_send(b"+OK\r\n").unwrap();
        conn.enqueue_to_send(b"$3\r\nhey\r\n").unwrap();
        assert_eq!(conn.send().unwrap(), SendOutcome::Flushed);
        assert_eq!(conn.pending_send(), 0);

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        while received.len() < 14 {
            let n = client.read(&mut buf).unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"+OK\r\n$3\r\nhey\r\n");
    }

    #[test]
    fn test_send_keeps_unsent_tail() {
        // Fill the socket until the kernel refuses more, without the client reading.
        let (mut conn, mut client) = connected_pair(64 * 1024);
        let chunk = vec![b'x'; 64 * 1024];

        let mut pending = false;
        for _ in 0..1024 {
            if conn.pending_send() == 0 {
                conn.enqueue_to_send(&chunk).unwrap();
            }
            if conn.send().unwrap() == SendOutcome::Pending {
                pending = true;
                break;
            }
        }
        assert!(pending, "socket never pushed back");
        let left = conn.pending_send();
        assert!(left > 0);

        // Drain on the client side, then the retained tail goes out.
        client.set_nonblocking(true).unwrap();
        let mut buf = vec![0u8; 256 * 1024];
        let deadline = Instant::now() + Duration::from_secs(5);
        while conn.pending_send() > 0 && Instant::now() < deadline {
            let _ = client.read(&mut buf);
            let _ = conn.send().unwrap();
        }
        assert_eq!(conn.pending_send(), 0);
    }

    #[test]
    fn test_outbox_holds_what_does_not_fit() {
        let (mut conn, mut client) = connected_pair(8);

        conn.enqueue_response(Bytes::from_static(b"+OK\r\n"));
        conn.enqueue_response(Bytes::from_static(b"$5\r\nhello\r\n"));
        // Larger than the whole send buffer
        conn.enqueue_response(Bytes::from(vec![b'z'; 20]));

        assert_eq!(conn.pending_send(), 8);
        assert_eq!(conn.outbox_bytes(), 5 + 11 + 20 - 8);
        assert!(conn.is_backed_up());

        assert_eq!(conn.flush().unwrap(), SendOutcome::Flushed);
        assert_eq!(conn.pending_send(), 0);
        assert_eq!(conn.outbox_bytes(), 0);

        let mut expected = b"+OK\r\n$5\r\nhello\r\n".to_vec();
        expected.extend_from_slice(&[b'z'; 20]);
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut received = vec![0u8; expected.len()];
        client.read_exact(&mut received).unwrap();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_process_buffered_replays_leftovers() {
        let (mut conn, mut client) = connected_pair(64);
        client.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();

        // First pass leaves everything in place
        let mut ignore = |_: ConnectionId, _: &mut FixedBuffer| {};
        receive_until_ready(&mut conn, &mut ignore).unwrap();

        let mut seen = Vec::new();
        let mut take_all = |_: ConnectionId, buf: &mut FixedBuffer| {
            seen.extend_from_slice(buf.filled());
            buf.clear();
        };
        conn.process_buffered(&mut take_all);
        assert_eq!(seen, b"*1\r\n$4\r\nPING\r\n");
    }
}
