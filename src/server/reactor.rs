//! Readiness Reactor
//!
//! The reactor owns the mio `Poll`, the listening socket and every client
//! [`Connection`]. It is driven by repeated calls to [`Reactor::poll`], each of
//! which performs one zero-timeout poll and then services what became ready.
//!
//! ## One Poll Cycle
//!
//! ```text
//! poll(timeout = 0)
//!    │
//!    ├── listener readable   → accept until WouldBlock, register each stream
//!    ├── connection readable → receive until WouldBlock (handler runs inline)
//!    ├── connection writable → add to the writable set
//!    │
//!    ▼
//! flush every connection in the writable set
//!    ├── Flushed     → stays writable
//!    ├── WouldBlock  → leaves the set until the next writable event
//!    └── error       → connection closed
//!    │
//!    ▼
//! resume paused connections that may read again
//! ```
//!
//! Readiness is edge-triggered, so every readable connection is drained to
//! `WouldBlock` before moving on; otherwise the remaining bytes would never be
//! signalled again.
//!
//! ## Pausing Reads
//!
//! A connection stops reading while its outbox holds more than a send buffer
//! of responses, or while the handler reports it is not accepting input. Its
//! unread bytes stay in the socket, so the client's own writes eventually
//! block. Because no new edge will arrive for bytes already in the socket,
//! paused connections are remembered and retried at the end of every poll.

use crate::connection::{Connection, ConnectionId, ReadOutcome, ReceiveHandler, SendOutcome};
use crate::server::ServerError;
use bytes::Bytes;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Token reserved for the listening socket. Connection ids start above it.
const LISTENER: Token = Token(0);

/// Smallest events buffer the reactor keeps.
const MIN_EVENTS: usize = 128;

/// Event loop over one listener and its accepted connections.
pub struct Reactor<H> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: HashMap<ConnectionId, Connection>,
    writable: HashSet<ConnectionId>,
    /// Connections whose reads were paused with input possibly left unread
    deferred: HashSet<ConnectionId>,
    /// Reused between cycles to avoid allocating
    scratch: Vec<ConnectionId>,
    handler: H,
    next_id: usize,
    buffer_size: usize,
}

impl<H: ReceiveHandler> Reactor<H> {
    /// Binds the listener and registers it for read readiness.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to listen on (port 0 picks a free port)
    /// * `handler` - Receives every connection's bytes right after they are read
    /// * `buffer_size` - Receive and send buffer capacity per connection
    pub fn bind(addr: SocketAddr, handler: H, buffer_size: usize) -> Result<Self, ServerError> {
        let poll = Poll::new().map_err(ServerError::Poll)?;
        let mut listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::Register)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(MIN_EVENTS),
            listener,
            connections: HashMap::new(),
            writable: HashSet::new(),
            deferred: HashSet::new(),
            scratch: Vec::new(),
            handler,
            next_id: LISTENER.0 + 1,
            buffer_size,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of open client connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Runs one poll cycle without blocking.
    ///
    /// Returns the number of readiness events handled. Only a failure of the
    /// OS poll itself is returned as an error; per-connection failures close
    /// that connection and are logged.
    pub fn poll(&mut self) -> io::Result<usize> {
        let wanted = self.connections.len() + 1;
        if self.events.capacity() < wanted {
            self.events = Events::with_capacity(wanted.next_power_of_two().max(MIN_EVENTS));
        }

        match self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        // Taken out so the handlers below can borrow `self` mutably.
        let events = std::mem::replace(&mut self.events, Events::with_capacity(0));
        let mut handled = 0;

        for event in events.iter() {
            handled += 1;
            match event.token() {
                LISTENER => self.accept_all(),
                token => {
                    let id = ConnectionId::from(token);
                    if event.is_readable() || event.is_read_closed() {
                        self.read_all(id);
                    }
                    if event.is_writable() && self.connections.contains_key(&id) {
                        self.writable.insert(id);
                    }
                    if event.is_error() && self.connections.contains_key(&id) {
                        warn!(conn = %id, "Socket error reported by poll");
                        self.close(id);
                    }
                }
            }
        }

        self.events = events;
        self.flush_writable();
        self.resume_deferred();
        Ok(handled)
    }

    /// Queues a response for connection `id`.
    ///
    /// Returns `false` if the connection no longer exists. Otherwise the
    /// payload is accepted whole: it goes into the send buffer if there is
    /// room and waits in the connection's outbox if not. Only that connection
    /// is held up by a client that stops reading.
    pub fn enqueue_to_send_buffer(&mut self, id: ConnectionId, payload: Bytes) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.enqueue_response(payload);
                true
            }
            None => false,
        }
    }

    /// Number of connections whose reads are currently paused.
    pub fn paused_count(&self) -> usize {
        self.deferred.len()
    }

    /// Accepts until the listener would block.
    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let id = ConnectionId(self.next_id);
                    self.next_id += 1;

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(conn = %id, error = %e, "Failed to set TCP_NODELAY");
                    }
                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        id.token(),
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        warn!(peer = %peer, error = %e, "Failed to register connection");
                        continue;
                    }

                    info!(conn = %id, peer = %peer, "Client connected");
                    self.connections
                        .insert(id, Connection::new(id, stream, peer, self.buffer_size));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    /// Reads from `id` until it would block or has to pause, closing it on
    /// EOF or error.
    fn read_all(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };

        let close = loop {
            if conn.is_backed_up() || !self.handler.is_accepting(id) {
                if self.deferred.insert(id) {
                    debug!(conn = %id, outbox = conn.outbox_bytes(), "Reads paused");
                }
                break false;
            }
            match conn.receive(&mut self.handler) {
                Ok(ReadOutcome::Data(_)) => continue,
                Ok(ReadOutcome::WouldBlock) => {
                    self.deferred.remove(&id);
                    break false;
                }
                Ok(ReadOutcome::Closed) => break true,
                Err(e) => {
                    warn!(conn = %id, error = %e, "Read failed");
                    break true;
                }
            }
        };

        if close {
            self.close(id);
        }
    }

    /// Flushes every connection in the writable set.
    fn flush_writable(&mut self) {
        self.scratch.clear();
        self.scratch.extend(self.writable.iter().copied());

        for i in 0..self.scratch.len() {
            let id = self.scratch[i];
            let Some(conn) = self.connections.get_mut(&id) else {
                self.writable.remove(&id);
                continue;
            };

            match conn.flush() {
                Ok(SendOutcome::Flushed) => {}
                Ok(SendOutcome::Pending) => {
                    trace!(conn = %id, pending = conn.pending_send(), "Socket not writable");
                    self.writable.remove(&id);
                }
                Err(e) => {
                    warn!(conn = %id, error = %e, "Write failed");
                    self.close(id);
                }
            }
        }
    }

    /// Picks paused connections back up once they may read again.
    ///
    /// Input already buffered is handed to the handler first, then the socket
    /// is drained as if a readable event had arrived.
    fn resume_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        self.scratch.clear();
        self.scratch.extend(self.deferred.iter().copied());

        for i in 0..self.scratch.len() {
            let id = self.scratch[i];
            let Some(conn) = self.connections.get_mut(&id) else {
                self.deferred.remove(&id);
                continue;
            };
            if conn.is_backed_up() || !self.handler.is_accepting(id) {
                continue;
            }

            trace!(conn = %id, "Reads resumed");
            conn.process_buffered(&mut self.handler);
            self.read_all(id);
        }
    }

    /// Deregisters and drops connection `id`.
    fn close(&mut self, id: ConnectionId) {
        self.writable.remove(&id);
        self.deferred.remove(&id);
        self.handler.on_close(id);
        if let Some(mut conn) = self.connections.remove(&id) {
            if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
                debug!(conn = %id, error = %e, "Deregister failed");
            }
            info!(conn = %id, peer = %conn.peer(), "Client disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FixedBuffer;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Instant;

    /// Records every chunk it is handed and consumes it.
    #[derive(Default)]
    struct Collector {
        received: Vec<(ConnectionId, Vec<u8>)>,
    }

    impl ReceiveHandler for Collector {
        fn on_receive(&mut self, id: ConnectionId, buffer: &mut FixedBuffer) {
            self.received.push((id, buffer.filled().to_vec()));
            buffer.clear();
        }
    }

    fn bind_reactor() -> Reactor<Collector> {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        Reactor::bind(addr, Collector::default(), 1024).unwrap()
    }

    /// Polls until `done` holds or two seconds pass.
    fn poll_until<H, F>(reactor: &mut Reactor<H>, mut done: F)
    where
        H: ReceiveHandler,
        F: FnMut(&Reactor<H>) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done(reactor) {
            assert!(Instant::now() < deadline, "condition not reached in time");
            reactor.poll().unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn received_bytes(reactor: &Reactor<Collector>) -> Vec<u8> {
        reactor
            .handler()
            .received
            .iter()
            .flat_map(|(_, bytes)| bytes.clone())
            .collect()
    }

    #[test]
    fn test_accept_and_receive() {
        let mut reactor = bind_reactor();
        let mut client = TcpStream::connect(reactor.local_addr().unwrap()).unwrap();

        poll_until(&mut reactor, |r| r.connection_count() == 1);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
        poll_until(&mut reactor, |r| received_bytes(r).len() == 14);

        assert_eq!(received_bytes(&reactor), b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(reactor.handler().received[0].0, ConnectionId(1));
    }

    #[test]
    fn test_enqueue_and_flush() {
        let mut reactor = bind_reactor();
        let mut client = TcpStream::connect(reactor.local_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        poll_until(&mut reactor, |r| r.connection_count() == 1);

        assert!(reactor.enqueue_to_send_buffer(ConnectionId(1), Bytes::from_static(b"+PONG\r\n")));
        // The first writable event may arrive on a later cycle than the accept.
        for _ in 0..10 {
            reactor.poll().unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut buf = [0u8; 7];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"+PONG\r\n");
    }

    #[test]
    fn test_enqueue_to_unknown_connection() {
        let mut reactor = bind_reactor();
        assert!(!reactor.enqueue_to_send_buffer(ConnectionId(42), Bytes::from_static(b"+OK\r\n")));
    }

    #[test]
    fn test_payload_larger_than_send_buffer() {
        let mut reactor = bind_reactor();
        let mut client = TcpStream::connect(reactor.local_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        poll_until(&mut reactor, |r| r.connection_count() == 1);

        let payload = vec![b'x'; 4096];
        assert!(reactor.enqueue_to_send_buffer(ConnectionId(1), Bytes::from(payload.clone())));
        assert_eq!(reactor.connection_count(), 1);

        let mut received = vec![0u8; payload.len()];
        let mut filled = 0;
        let deadline = Instant::now() + Duration::from_secs(2);
        client.set_nonblocking(true).unwrap();
        while filled < received.len() {
            assert!(Instant::now() < deadline, "payload not delivered in time");
            reactor.poll().unwrap();
            match client.read(&mut received[filled..]) {
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => panic!("read failed: {e}"),
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(received, payload);
    }

    /// Accepts nothing while `open` is false, consuming whatever it is handed.
    struct Gate {
        open: bool,
        received: Vec<u8>,
        closed: Vec<ConnectionId>,
    }

    impl ReceiveHandler for Gate {
        fn on_receive(&mut self, _id: ConnectionId, buffer: &mut FixedBuffer) {
            self.received.extend_from_slice(buffer.filled());
            buffer.clear();
        }

        fn is_accepting(&self, _id: ConnectionId) -> bool {
            self.open
        }

        fn on_close(&mut self, id: ConnectionId) {
            self.closed.push(id);
        }
    }

    #[test]
    fn test_reads_pause_and_resume_without_new_events() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let gate = Gate {
            open: false,
            received: Vec::new(),
            closed: Vec::new(),
        };
        let mut reactor = Reactor::bind(addr, gate, 1024).unwrap();
        let mut client = TcpStream::connect(reactor.local_addr().unwrap()).unwrap();
        poll_until(&mut reactor, |r| r.connection_count() == 1);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
        poll_until(&mut reactor, |r| r.paused_count() == 1);
        assert!(reactor.handler().received.is_empty());

        // The readable edge was already spent; reopening alone must deliver.
        reactor.handler_mut().open = true;
        poll_until(&mut reactor, |r| r.handler().received.len() == 14);
        assert_eq!(reactor.paused_count(), 0);

        drop(client);
        poll_until(&mut reactor, |r| r.connection_count() == 0);
        assert_eq!(reactor.handler().closed, vec![ConnectionId(1)]);
    }

    #[test]
    fn test_close_and_ids_not_reused() {
        let mut reactor = bind_reactor();
        let addr = reactor.local_addr().unwrap();

        let first = TcpStream::connect(addr).unwrap();
        poll_until(&mut reactor, |r| r.connection_count() == 1);

        drop(first);
        poll_until(&mut reactor, |r| r.connection_count() == 0);

        let mut second = TcpStream::connect(addr).unwrap();
        poll_until(&mut reactor, |r| r.connection_count() == 1);
        second.write_all(b"x").unwrap();
        poll_until(&mut reactor, |r| !r.handler().received.is_empty());

        assert_eq!(reactor.handler().received[0].0, ConnectionId(2));
    }
}
