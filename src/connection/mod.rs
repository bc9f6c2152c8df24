//! Connection Module
//!
//! This module owns everything that belongs to one client socket: the
//! fixed-size receive and send buffers and the non-blocking read/write logic.
//!
//! ## Architecture
//!
//! ```text
//!                 socket
//!                   │ read()
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │ Connection                                  │
//! │                                             │
//! │  receive buffer ──> ReceiveHandler (inline) │
//! │                                             │
//! │  send buffer  <── enqueue_to_send()         │
//! └──────────────────┬──────────────────────────┘
//!                    │ write()
//!                    ▼
//!                 socket
//! ```
//!
//! A `Connection` never decides when to read or write on its own; the
//! reactor drives it from readiness events.

pub mod buffer;
pub mod handler;

pub use buffer::FixedBuffer;
pub use handler::{
    Connection, ConnectionError, ConnectionId, ReadOutcome, ReceiveHandler, SendOutcome,
};
