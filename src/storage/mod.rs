//! Storage Engine Module
//!
//! This module provides the storage functionality for RelayKV: a key-value
//! map with optional per-entry TTL, owned by the worker thread, plus the
//! loader that seeds it from a snapshot file at startup.
//!
//! ## Architecture
//!
//! ```text
//!   startup (main thread)            serving (worker thread)
//! ┌───────────────────────┐        ┌─────────────────────────┐
//! │  snapshot::load()     │──set──>│     StorageEngine       │<── set / get / keys
//! │  (dir/dbfilename)     │        │  HashMap<Bytes, Entry>  │
//! └───────────────────────┘        └─────────────────────────┘
//!                                    moved into the worker
//! ```
//!
//! ## Features
//!
//! - **Insert-Only Writes**: `set` never overwrites a live key
//! - **TTL Support**: Keys can carry a time-to-live from insertion
//! - **Lazy Expiry**: Expired keys are removed by the read that finds them
//!
//! ## Example
//!
//! ```
//! use relaykv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let mut engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("name"), Bytes::from("Ariz"), None);
//! assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
//!
//! engine.set(
//!     Bytes::from("session"),
//!     Bytes::from("token123"),
//!     Some(Duration::from_secs(3600)),
//! );
//! ```

pub mod engine;
pub mod snapshot;

// Re-export commonly used types
pub use engine::{Entry, StorageEngine, StorageStats};
pub use snapshot::{LoadReport, SnapshotError};
