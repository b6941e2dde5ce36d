// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fixed-capacity ring buffer that overwrites its oldest entry when full.
//!
//! # Example
//!
//! ```
//! use querykit::RingBuffer;
//!
//! let ring = RingBuffer::new(2);
//! assert!(ring.enqueue(1));
//! assert!(ring.enqueue(2));
//! assert!(!ring.enqueue(3)); // full: 1 is overwritten
//!
//! assert_eq!(ring.dequeue(), Some(2));
//! assert_eq!(ring.dequeue(), Some(3));
//! assert_eq!(ring.dequeue(), None);
//! ```

use parking_lot::Mutex;

struct Slots<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
}

/// Lock-protected circular FIFO.
///
/// Never grows and never blocks beyond the O(1) critical section.
/// Invariant: `0 <= count <= capacity`, and `head`/`tail` always index a
/// valid slot.
pub struct RingBuffer<T> {
    inner: Mutex<Slots<T>>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a ring with `capacity` slots (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            inner: Mutex::new(Slots {
                slots,
                head: 0,
                tail: 0,
                count: 0,
            }),
            capacity,
        }
    }

    /// Append an item.
    ///
    /// Returns `false` when the ring was full: the new item is stored anyway
    /// and the oldest item is lost. Callers count that as one drop.
    pub fn enqueue(&self, item: T) -> bool {
        let mut ring = self.inner.lock();
        let tail = ring.tail;
        ring.slots[tail] = Some(item);
        ring.tail = (tail + 1) % self.capacity;

        if ring.count == self.capacity {
            // tail == head here, so the write above replaced the oldest item
            ring.head = (ring.head + 1) % self.capacity;
            false
        } else {
            ring.count += 1;
            true
        }
    }

    /// Remove the oldest item, or `None` when empty.
    pub fn dequeue(&self) -> Option<T> {
        let mut ring = self.inner.lock();
        if ring.count == 0 {
            return None;
        }
        let head = ring.head;
        let item = ring.slots[head].take();
        ring.head = (head + 1) % self.capacity;
        ring.count -= 1;
        item
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
