//! Command Handler Module
//!
//! This module implements the command processing layer for RelayKV.
//! It receives the flat tokens of one request, executes the command against
//! the store and returns the reply.
//!
//! ## Architecture
//!
//! ```text
//! Request payload
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Tokenizer      │  (protocol module)
//! └────────┬────────┘
//!          │ &[Token]
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Validate     │
//! │  - Dispatch     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `ECHO`
//! - `SET`, `GET`
//! - `CONFIG GET`, `INFO replication`, `KEYS`

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
