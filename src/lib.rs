//! # RelayKV - A Two-Thread In-Memory Key-Value Server
//!
//! RelayKV is a small key-value server speaking a RESP-like protocol over TCP.
//! Networking and command execution run on two separate threads that only
//! talk through lock-free single-producer/single-consumer queues.
//!
//! ## Features
//!
//! - **Readiness-driven I/O**: One mio event loop multiplexes every client
//! - **Lock-free handoff**: Requests and responses cross threads via SPSC rings
//! - **Pipelining**: Several requests in one TCP segment, or one request split
//!   over several, are both handled
//! - **TTL Support**: Keys can carry a time-to-live, evicted lazily on read
//! - **Snapshot loading**: An RDB-style file can seed the store at startup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              RelayKV                                    │
//! │                                                                         │
//! │  ┌──────────── I/O thread ─────────────┐   ┌──────── worker ──────────┐ │
//! │  │                                     │   │                          │ │
//! │  │  ┌──────────┐     ┌──────────────┐  │   │  ┌───────────┐           │ │
//! │  │  │ Reactor  │────>│ Connection   │  │   │  │ Tokenizer │           │ │
//! │  │  │ (mio)    │     │ recv / send  │  │   │  └─────┬─────┘           │ │
//! │  │  └──────────┘     └──────┬───────┘  │   │        ▼                 │ │
//! │  │                          │ frames   │   │  ┌───────────┐           │ │
//! │  │                          ▼          │   │  │ Command   │           │ │
//! │  │                   Request queue ────┼──>│  │ Handler   │           │ │
//! │  │                                     │   │  └─────┬─────┘           │ │
//! │  │                  Response queue <───┼───│        ▼                 │ │
//! │  │                                     │   │  StorageEngine           │ │
//! │  └─────────────────────────────────────┘   └──────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use relaykv::config::ServerConfig;
//! use relaykv::server::Server;
//! use relaykv::storage::StorageEngine;
//!
//! fn main() -> Result<(), relaykv::server::ServerError> {
//!     let server = Server::bind(ServerConfig::default(), StorageEngine::new())?;
//!     server.run()
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message`
//! - `SET key value [PX milliseconds]`
//! - `GET key`
//! - `CONFIG GET dir|dbfilename`
//! - `INFO replication`
//! - `KEYS pattern` (always answered with an error)
//!
//! ## Module Overview
//!
//! - [`queue`]: Bounded lock-free SPSC queue
//! - [`connection`]: Per-client socket with fixed receive/send buffers
//! - [`protocol`]: Tokenizer, frame scanner and reply encoder
//! - [`storage`]: Insert-only store with lazy expiry, snapshot loader
//! - [`commands`]: Command dispatch
//! - [`server`]: Reactor, worker and shutdown
//! - [`config`]: Server settings

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::{Role, ServerConfig};
pub use protocol::{ProtocolError, RespValue, Token};
pub use server::{Server, ServerError, ShutdownHandle};
pub use storage::StorageEngine;

/// The default port RelayKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host RelayKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of RelayKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
