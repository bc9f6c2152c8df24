//! Cross-Thread Handoff Queues
//!
//! The I/O thread and the worker thread never share memory directly. Every
//! request and every response crosses between them through a pair of bounded,
//! lock-free SPSC queues:
//!
//! ```text
//!   I/O thread                                   worker thread
//! ┌────────────┐   Producer<Request>   ┌─────┐   Consumer<Request>  ┌────────────┐
//! │  Reactor   │ ────────────────────> │ring │ ───────────────────> │  Command   │
//! │            │                       └─────┘                      │  Handler   │
//! │            │   Consumer<Response>  ┌─────┐   Producer<Response> │            │
//! │            │ <──────────────────── │ring │ <─────────────────── │            │
//! └────────────┘                       └─────┘                      └────────────┘
//! ```
//!
//! Neither side ever blocks on a queue: a full push hands the item back and an
//! empty pop returns `None`.

pub mod spsc;

pub use spsc::{bounded, Consumer, Producer, QueueError};
