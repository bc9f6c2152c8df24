//! Server runtime: the I/O loop, the worker loop and shutdown.

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::connection::{ConnectionId, FixedBuffer, ReceiveHandler};
use crate::protocol::{tokenize, FrameScanner, RespValue};
use crate::queue::{self, Consumer, Producer};
use crate::server::{Reactor, Request, Response, ServerError};
use crate::storage::{StorageEngine, StorageStats};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, trace, warn};

/// Capacity of both the request and the response queue.
pub const QUEUE_CAPACITY: usize = 1024;

/// Requests held back while the request queue is full. Once reached, reads
/// pause and further frames stay in the connections' receive buffers.
pub const BACKLOG_LIMIT: usize = 1024;

/// Idle iterations spent spinning before yielding the thread.
const SPIN_LIMIT: u32 = 64;

/// Spin-then-yield backoff for the idle loops.
#[derive(Debug, Default)]
struct Backoff {
    idle: u32,
}

impl Backoff {
    fn reset(&mut self) {
        self.idle = 0;
    }

    fn snooze(&mut self) {
        if self.idle < SPIN_LIMIT {
            std::hint::spin_loop();
            self.idle += 1;
        } else {
            thread::yield_now();
        }
    }
}

/// Receive handler that cuts incoming bytes into request frames.
///
/// Each complete frame is copied into a [`Request`] and pushed onto the
/// request queue. When the queue is full, requests wait in a local backlog
/// that the I/O loop retries every iteration, so nothing is dropped and
/// order is preserved.
///
/// The backlog is capped. At the cap the forwarder stops taking frames and
/// reports itself as not accepting, which pauses reads in the reactor until
/// the worker catches up.
#[derive(Debug)]
pub struct RequestForwarder {
    requests: Producer<Request>,
    backlog: VecDeque<Request>,
    backlog_limit: usize,
    /// Scan progress over a partial frame, per connection
    scanners: HashMap<ConnectionId, FrameScanner>,
}

impl RequestForwarder {
    pub fn new(requests: Producer<Request>) -> Self {
        Self::with_backlog_limit(requests, BACKLOG_LIMIT)
    }

    pub fn with_backlog_limit(requests: Producer<Request>, backlog_limit: usize) -> Self {
        Self {
            requests,
            backlog: VecDeque::new(),
            backlog_limit: backlog_limit.max(1),
            scanners: HashMap::new(),
        }
    }

    /// Requests waiting for room in the queue.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Moves as much of the backlog into the queue as fits.
    ///
    /// Returns true if at least one request was moved.
    pub fn retry_backlog(&mut self) -> bool {
        let mut moved = false;
        while let Some(request) = self.backlog.pop_front() {
            if let Err(request) = self.requests.push(request) {
                self.backlog.push_front(request);
                break;
            }
            moved = true;
        }
        moved
    }

    fn forward(&mut self, request: Request) {
        // Older requests go first
        if !self.backlog.is_empty() {
            self.backlog.push_back(request);
            return;
        }
        if let Err(request) = self.requests.push(request) {
            debug!(conn = %request.connection_id, "Request queue full, holding request");
            self.backlog.push_back(request);
        }
    }
}

impl ReceiveHandler for RequestForwarder {
    fn on_receive(&mut self, id: ConnectionId, buffer: &mut FixedBuffer) {
        let data = buffer.filled();
        let mut scanner = self.scanners.remove(&id).unwrap_or_default();
        let mut consumed = 0;

        while consumed < data.len() && self.backlog.len() < self.backlog_limit {
            let rest = &data[consumed..];
            match scanner.scan(rest) {
                Ok(Some(len)) => {
                    self.forward(Request::new(id, Bytes::copy_from_slice(&rest[..len])));
                    consumed += len;
                }
                Ok(None) => break,
                Err(e) => {
                    // Let the worker turn the bad bytes into an error reply.
                    debug!(conn = %id, error = %e, "Malformed request");
                    self.forward(Request::new(id, Bytes::copy_from_slice(rest)));
                    consumed = data.len();
                }
            }
        }

        // Progress only survives for a partial frame left at the front
        if scanner.scanned() > 0 {
            self.scanners.insert(id, scanner);
        }
        buffer.consume(consumed);
    }

    fn is_accepting(&self, _id: ConnectionId) -> bool {
        self.backlog.len() < self.backlog_limit
    }

    fn on_close(&mut self, id: ConnectionId) {
        self.scanners.remove(&id);
    }
}

/// Cloneable handle that stops a running [`Server`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Asks both server threads to exit. Returns immediately.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Worker-thread state: the store, the command handler and its queue ends.
struct Worker {
    store: StorageEngine,
    handler: CommandHandler,
    requests: Consumer<Request>,
    responses: Producer<Response>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self) -> StorageStats {
        let mut backoff = Backoff::default();

        while self.running.load(Ordering::Acquire) {
            let Some(request) = self.requests.pop() else {
                backoff.snooze();
                continue;
            };
            backoff.reset();

            let reply = match tokenize(&request.payload) {
                Ok(tokens) => self.handler.execute(&mut self.store, &tokens),
                Err(e) => RespValue::error(format!("Protocol error: {}", e)),
            };
            if reply.is_error() {
                debug!(conn = %request.connection_id, reply = %reply, "Error reply");
            } else {
                trace!(conn = %request.connection_id, reply = %reply, "Reply");
            }

            let mut response = Response::new(request.connection_id, Bytes::from(reply.serialize()));
            loop {
                match self.responses.push(response) {
                    Ok(()) => break,
                    Err(rejected) => {
                        if !self.running.load(Ordering::Acquire) {
                            return self.store.stats();
                        }
                        response = rejected;
                        backoff.snooze();
                    }
                }
            }
        }

        self.store.stats()
    }
}

/// A bound server, ready to run.
///
/// # Example
///
/// ```no_run
/// use relaykv::config::ServerConfig;
/// use relaykv::server::Server;
/// use relaykv::storage::StorageEngine;
///
/// let server = Server::bind(ServerConfig::default(), StorageEngine::new()).unwrap();
/// let shutdown = server.shutdown_handle();
/// std::thread::spawn(move || server.run());
/// // ...
/// shutdown.stop();
/// ```
pub struct Server {
    reactor: Reactor<RequestForwarder>,
    responses: Consumer<Response>,
    worker: Worker,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Binds the listener and creates both queues.
    ///
    /// `store` is handed to the worker thread when [`run`](Self::run) starts.
    pub fn bind(config: ServerConfig, store: StorageEngine) -> Result<Self, ServerError> {
        let addr = resolve(&config.bind_address())?;
        let config = Arc::new(config);

        let (request_tx, request_rx) = queue::bounded(QUEUE_CAPACITY)?;
        let (response_tx, response_rx) = queue::bounded(QUEUE_CAPACITY)?;

        let reactor = Reactor::bind(addr, RequestForwarder::new(request_tx), config.buffer_size)?;
        let running = Arc::new(AtomicBool::new(true));

        info!(
            addr = %reactor.local_addr().unwrap_or(addr),
            role = %config.role,
            keys = store.len(),
            "Server listening"
        );

        Ok(Self {
            reactor,
            responses: response_rx,
            worker: Worker {
                store,
                handler: CommandHandler::new(Arc::clone(&config)),
                requests: request_rx,
                responses: response_tx,
                running: Arc::clone(&running),
            },
            running,
        })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.reactor.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Runs the server until [`ShutdownHandle::stop`] is called or the event
    /// loop fails.
    ///
    /// The worker runs on its own thread; the I/O loop runs on the calling
    /// thread. Both are finished when this returns.
    pub fn run(self) -> Result<(), ServerError> {
        let Server {
            mut reactor,
            mut responses,
            worker,
            running,
        } = self;

        let worker = thread::Builder::new()
            .name("relaykv-worker".to_string())
            .spawn(move || worker.run())
            .map_err(ServerError::Spawn)?;

        let result = io_loop(&mut reactor, &mut responses, &running);
        running.store(false, Ordering::Release);

        match worker.join() {
            Ok(stats) => info!(
                keys = stats.keys,
                gets = stats.get_ops,
                sets = stats.set_ops,
                rejected_sets = stats.rejected_sets,
                expired = stats.expired,
                "Worker stopped"
            ),
            Err(_) => {
                error!("Worker thread panicked");
                return Err(ServerError::WorkerPanicked);
            }
        }

        info!(open_connections = reactor.connection_count(), "Server stopped");
        result
    }
}

/// The I/O thread's loop.
fn io_loop(
    reactor: &mut Reactor<RequestForwarder>,
    responses: &mut Consumer<Response>,
    running: &AtomicBool,
) -> Result<(), ServerError> {
    let mut backoff = Backoff::default();

    while running.load(Ordering::Acquire) {
        let mut progressed = reactor.handler_mut().retry_backlog();

        // Each connection buffers its own replies, so one slow reader never
        // holds up responses for anyone else.
        while let Some(response) = responses.pop() {
            progressed = true;
            if !reactor.enqueue_to_send_buffer(response.connection_id, response.payload) {
                warn!(conn = %response.connection_id, "Dropping response for closed connection");
            }
        }

        match reactor.poll() {
            Ok(0) => {}
            Ok(_) => progressed = true,
            Err(e) => {
                error!(error = %e, "Poll failed");
                return Err(ServerError::EventLoop(e));
            }
        }

        if progressed {
            backoff.reset();
        } else {
            backoff.snooze();
        }
    }

    Ok(())
}

fn resolve(addr: &str) -> Result<SocketAddr, ServerError> {
    let resolve_error = |source| ServerError::Resolve {
        addr: addr.to_string(),
        source,
    };
    addr.to_socket_addrs()
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| {
            resolve_error(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no addresses found",
            ))
        })
}
