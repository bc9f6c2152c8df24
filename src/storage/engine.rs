//! Expiring Key-Value Store
//!
//! This module implements the storage engine for RelayKV: a plain `HashMap`
//! owned by a single thread, with an optional time-to-live per entry.
//!
//! ## Design Decisions
//!
//! 1. **Single Owner**: The engine lives on the worker thread and is only ever
//!    touched through `&mut self`. There are no locks and no atomics.
//! 2. **Insert-Only**: `set` never overwrites a stored key, expired or not. It
//!    reports whether the insert happened instead.
//! 3. **Lazy Expiry**: An expired entry is removed by the read that notices it.
//!    There is no sweeper thread and no timer.
//!
//! ## Expiry Check
//!
//! ```text
//!   inserted_at                      inserted_at + ttl
//!        │◄──────────── live ───────────►│◄──── expired ────
//!        ▼                               ▼
//!  ──────●───────────────────────────────●──────────────────► time
//!                                        ▲
//!                     elapsed >= ttl ────┘  (boundary counts as expired)
//! ```

use bytes::Bytes;
use std::collections::hash_map::{self, HashMap};
use std::time::{Duration, Instant};
use tracing::trace;

/// A stored value with its insertion time and optional TTL.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry was inserted
    pub inserted_at: Instant,
    /// How long the entry lives after insertion (None = never expires)
    pub ttl: Option<Duration>,
}

impl Entry {
    /// Creates a new entry inserted at `now`.
    pub fn new(value: Bytes, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value,
            inserted_at: now,
            ttl,
        }
    }

    /// Checks if this entry has expired at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.inserted_at) >= ttl,
            None => false,
        }
    }
}

/// Operation counters, reported when the server shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: usize,
    pub get_ops: u64,
    pub set_ops: u64,
    pub rejected_sets: u64,
    pub expired: u64,
}

/// The storage engine.
///
/// # Thread Safety
///
/// None. The worker thread owns the engine outright. Seeding from a
/// snapshot happens before the worker starts, on the thread that builds the
/// server.
///
/// # Example
///
/// ```
/// use relaykv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let mut engine = StorageEngine::new();
///
/// assert!(engine.set(Bytes::from("name"), Bytes::from("Ariz"), None));
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
///
/// // Insert-only: the second set is rejected
/// assert!(!engine.set(Bytes::from("name"), Bytes::from("other"), None));
///
/// engine.set(Bytes::from("session"), Bytes::from("abc123"), Some(Duration::from_secs(60)));
/// ```
#[derive(Debug, Default)]
pub struct StorageEngine {
    data: HashMap<Bytes, Entry>,
    get_count: u64,
    set_count: u64,
    rejected_count: u64,
    expired_count: u64,
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `key` only if it is absent.
    ///
    /// Returns `false`, leaving the stored value untouched, whenever the key is
    /// present. That includes an entry that has expired but was not read yet;
    /// only a `get` evicts it and frees the key.
    pub fn set(&mut self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> bool {
        self.set_at(key, value, ttl, Instant::now())
    }

    fn set_at(&mut self, key: Bytes, value: Bytes, ttl: Option<Duration>, now: Instant) -> bool {
        self.set_count += 1;

        match self.data.entry(key) {
            hash_map::Entry::Occupied(_) => {
                self.rejected_count += 1;
                false
            }
            hash_map::Entry::Vacant(slot) => {
                slot.insert(Entry::new(value, ttl, now));
                true
            }
        }
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired entry
    /// is removed as part of this call.
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&mut self, key: &[u8], now: Instant) -> Option<Bytes> {
        self.get_count += 1;

        let entry = self.data.get(key)?;
        if !entry.is_expired_at(now) {
            return Some(entry.value.clone());
        }

        self.data.remove(key);
        self.expired_count += 1;
        trace!(key = ?String::from_utf8_lossy(key), "Evicted expired key on read");
        None
    }

    /// Returns every stored key.
    ///
    /// No expiry check is applied, so keys that have expired but were not
    /// read since may be listed. The KEYS command never calls this; only
    /// tests do.
    pub fn keys(&self) -> Vec<Bytes> {
        self.data.keys().cloned().collect()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.data.len(),
            get_ops: self.get_count,
            set_ops: self.set_count,
            rejected_sets: self.rejected_count,
            expired: self.expired_count,
        }
    }
}
