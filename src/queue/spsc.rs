//! Bounded Single-Producer / Single-Consumer Ring
//!
//! A fixed-capacity ring buffer that moves one item at a time from exactly one
//! producer thread to exactly one consumer thread without locks.
//!
//! ## Layout
//!
//! ```text
//!            head (consumer)           tail (producer)
//!                 │                         │
//!                 ▼                         ▼
//!   ┌─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┐
//!   │     │     │  A  │  B  │  C  │  D  │     │     │
//!   └─────┴─────┴─────┴─────┴─────┴─────┴─────┴─────┘
//!     slot index = position & (capacity - 1)
//! ```
//!
//! The producer owns `tail`, the consumer owns `head`. Each side reads the
//! other side's index with `Acquire` and publishes its own with `Release`:
//!
//! - a slot write happens-before the `tail` store that exposes it, so the
//!   consumer never reads a half-written item;
//! - a slot read happens-before the `head` store that frees it, so the
//!   producer never overwrites an item still being moved out.
//!
//! One slot is always left empty so that `head == tail` means empty and
//! `tail + 1 == head` means full. A ring of capacity `C` therefore holds at
//! most `C - 1` items.
//!
//! The two roles are separate handle types. Neither is `Clone`, and both
//! operations take `&mut self`, so a second producer or consumer cannot be
//! created from safe code.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building a queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Index masking needs a power-of-two slot count, and one slot is
    /// always kept empty, so the ring needs at least two.
    #[error("queue capacity must be a power of two greater than one (got {0})")]
    CapacityNotPowerOfTwo(usize),
}

/// Keeps the two indices on separate cache lines so the producer and the
/// consumer do not invalidate each other's line on every operation.
#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Shared ring state. Only reachable through a [`Producer`] and a [`Consumer`].
struct Ring<T> {
    /// Next slot to read. Written by the consumer only.
    head: CachePadded<AtomicUsize>,
    /// Next slot to write. Written by the producer only.
    tail: CachePadded<AtomicUsize>,
    mask: usize,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: a slot is only touched by the side that currently owns it, and
// ownership is handed over through the acquire/release pair on head/tail.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    #[inline]
    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) & self.mask
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Both handles are gone, so nothing else can observe the slots.
        let mut head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        while head != tail {
            // SAFETY: slots in [head, tail) were written and not yet read.
            unsafe { self.slots[head].get_mut().assume_init_drop() };
            head = (head + 1) & self.mask;
        }
    }
}

/// Creates a bounded SPSC queue with `capacity` slots.
///
/// `capacity` must be a power of two and at least 2. The queue holds up to
/// `capacity - 1` items at once.
///
/// # Example
///
/// ```
/// use relaykv::queue::bounded;
///
/// let (mut tx, mut rx) = bounded::<u32>(4).unwrap();
/// assert!(tx.push(1).is_ok());
/// assert_eq!(rx.pop(), Some(1));
/// assert_eq!(rx.pop(), None);
/// ```
pub fn bounded<T>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), QueueError> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(QueueError::CapacityNotPowerOfTwo(capacity));
    }

    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();

    let ring = Arc::new(Ring {
        head: CachePadded(AtomicUsize::new(0)),
        tail: CachePadded(AtomicUsize::new(0)),
        mask: capacity - 1,
        slots,
    });

    Ok((
        Producer {
            ring: Arc::clone(&ring),
        },
        Consumer { ring },
    ))
}

/// The writing half of a queue created by [`bounded`].
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Producer<T> {
    /// Pushes an item without blocking.
    ///
    /// Returns the item back in `Err` when the ring is full; retrying is up to
    /// the caller.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & ring.mask;

        if next == ring.head.load(Ordering::Acquire) {
            return Err(item);
        }

        // SAFETY: the slot at `tail` is outside [head, tail), so the consumer
        // will not touch it until the store below publishes it.
        unsafe { (*ring.slots[tail].get()).write(item) };
        ring.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Total slot count (one more than the number of items the ring can hold).
    pub fn capacity(&self) -> usize {
        self.ring.slots.len()
    }

    /// Items currently queued. Only a snapshot while the consumer is running.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The reading half of a queue created by [`bounded`].
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Consumer<T> {
    /// Pops the oldest item without blocking, or `None` when the ring is empty.
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);

        if head == ring.tail.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `head != tail` and the acquire load above synchronizes with
        // the producer's release store, so the slot holds an initialized item.
        let item = unsafe { (*ring.slots[head].get()).assume_init_read() };
        ring.head.store((head + 1) & ring.mask, Ordering::Release);
        Some(item)
    }

    pub fn capacity(&self) -> usize {
        self.ring.slots.len()
    }

    /// Items currently queued. Only a snapshot while the producer is running.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_rejects_capacity_not_power_of_two() {
        assert_eq!(
            bounded::<u8>(24).unwrap_err(),
            QueueError::CapacityNotPowerOfTwo(24)
        );
        assert!(bounded::<u8>(0).is_err());
        assert!(bounded::<u8>(1).is_err());
        assert!(bounded::<u8>(2).is_ok());
    }

    #[test]
    fn test_holds_capacity_minus_one() {
        for capacity in [2usize, 4, 16, 1024] {
            let (mut tx, mut rx) = bounded::<usize>(capacity).unwrap();

            for i in 0..capacity - 1 {
                assert!(tx.push(i).is_ok(), "push {} of {}", i, capacity);
            }
            assert_eq!(tx.push(999), Err(999));
            assert_eq!(tx.len(), capacity - 1);

            // One pop frees exactly one slot
            assert_eq!(rx.pop(), Some(0));
            assert!(tx.push(1000).is_ok());
            assert_eq!(tx.push(1001), Err(1001));
        }
    }

    #[test]
    fn test_fifo_and_wraparound() {
        let (mut tx, mut rx) = bounded::<u32>(4).unwrap();

        for round in 0..10u32 {
            let base = round * 3;
            tx.push(base).unwrap();
            tx.push(base + 1).unwrap();
            tx.push(base + 2).unwrap();
            assert_eq!(rx.pop(), Some(base));
            assert_eq!(rx.pop(), Some(base + 1));
            assert_eq!(rx.pop(), Some(base + 2));
            assert_eq!(rx.pop(), None);
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn test_single_producer_single_consumer_threads() {
        const COUNT: usize = 100_000;
        let (mut tx, mut rx) = bounded::<usize>(16).unwrap();

        let producer = thread::spawn(move || {
            for n in 0..COUNT {
                let mut item = n;
                loop {
                    match tx.push(item) {
                        Ok(()) => break,
                        Err(back) => {
                            item = back;
                            std::hint::spin_loop();
                        }
                    }
                }
            }
        });

        let consumer = thread::spawn(move || {
            let mut received = Vec::with_capacity(COUNT);
            while received.len() < COUNT {
                match rx.pop() {
                    Some(n) => received.push(n),
                    None => std::hint::spin_loop(),
                }
            }
            received
        });

        producer.join().unwrap();
        let received = consumer.join().unwrap();

        assert_eq!(received.len(), COUNT);
        for (index, n) in received.into_iter().enumerate() {
            assert_eq!(index, n);
        }
    }

    #[test]
    fn test_owned_payloads_move_through() {
        let (mut tx, mut rx) = bounded::<String>(8).unwrap();
        tx.push("hello".to_string()).unwrap();
        tx.push("world".to_string()).unwrap();
        assert_eq!(rx.pop().as_deref(), Some("hello"));
        assert_eq!(rx.pop().as_deref(), Some("world"));
    }

    #[test]
    fn test_drop_releases_queued_items() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let (mut tx, mut rx) = bounded::<Tracked>(8).unwrap();
        for _ in 0..5 {
            assert!(tx.push(Tracked(Arc::clone(&drops))).is_ok());
        }
        drop(rx.pop());
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        drop(tx);
        drop(rx);
        assert_eq!(drops.load(Ordering::SeqCst), 5);
    }
}
