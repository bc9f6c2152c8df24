//! Server Module
//!
//! This module wires the pieces together into the running server: one I/O
//! thread driving the [`Reactor`], one worker thread executing commands, and
//! two SPSC queues between them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────── I/O thread ────────────────┐        ┌──────── worker thread ────────┐
//! │                                            │        │                               │
//! │  Reactor::poll()                           │Request │  pop ─> tokenize ─> execute   │
//! │    └─ RequestForwarder (frames → Request) ─┼───────>│                │              │
//! │                                            │        │                ▼              │
//! │  responses.pop() ─> enqueue_to_send_buffer │<───────┼─ push <─ encode RespValue     │
//! │                                            │Response│                               │
//! └────────────────────────────────────────────┘        └───────────────────────────────┘
//! ```
//!
//! Neither thread ever blocks. Both spin with a short backoff when idle and
//! stop when the shared running flag is cleared.
//!
//! Backpressure never stalls the loop itself. A full request queue fills a
//! capped backlog and then pauses reads; a client that stops reading only
//! grows its own outbox and then has its reads paused.

pub mod message;
pub mod reactor;
pub mod runtime;

pub use message::{Request, Response};
pub use reactor::Reactor;
pub use runtime::{RequestForwarder, Server, ShutdownHandle, BACKLOG_LIMIT, QUEUE_CAPACITY};

use crate::queue::QueueError;
use std::io;
use std::net::SocketAddr;

/// Errors that prevent the server from starting or keep it from running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to create poll instance: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to resolve bind address {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to register listener: {0}")]
    Register(#[source] io::Error),

    #[error("failed to create queue: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("event loop failed: {0}")]
    EventLoop(#[source] io::Error),

    #[error("worker thread panicked")]
    WorkerPanicked,
}
