//! Fixed-Capacity Byte Buffer
//!
//! Each connection owns two of these: one for bytes read from the socket and
//! one for bytes waiting to be written. The capacity is fixed at creation;
//! the buffer never grows, which is what turns "client is too slow" into an
//! explicit overflow error instead of unbounded memory use.
//!
//! ```text
//!  0                len                      capacity
//!  ├─────────────────┼─────────────────────────┤
//!  │  filled (valid) │       spare             │
//!  └─────────────────┴─────────────────────────┘
//! ```

use std::fmt;

/// A byte array with a cursor marking the valid length.
pub struct FixedBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl FixedBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free space after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    /// The valid region.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The free region after the cursor, for a read to fill in.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Marks `n` bytes of the spare region as valid.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`remaining`](Self::remaining).
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advance past buffer capacity");
        self.len += n;
    }

    /// Copies `bytes` after the cursor.
    ///
    /// Returns the free space in `Err` when `bytes` does not fit; nothing is
    /// copied in that case.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), usize> {
        let available = self.remaining();
        if bytes.len() > available {
            return Err(available);
        }
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Drops the first `n` valid bytes and moves the rest to the front.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// Resets the cursor to zero.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl fmt::Debug for FixedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
