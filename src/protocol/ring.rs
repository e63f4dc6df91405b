//! Fixed-capacity circular queue.
//!
//! Storage is allocated once at construction and never grows. `enqueue` on a
//! full ring hands the item back instead of overwriting; callers that want
//! drop-oldest behaviour dequeue first (see [`FixedRing::force_enqueue`]).
//!
//! # Example
//!
//! ```
//! use radiolink::protocol::FixedRing;
//!
//! let mut ring = FixedRing::with_capacity(4);
//! for b in [1u8, 2, 3, 4] {
//!     ring.enqueue(b).unwrap();
//! }
//! assert!(ring.is_full());
//! assert_eq!(ring.enqueue(5), Err(5));
//!
//! assert_eq!(ring.dequeue(), Some(1));
//! let mut out = [0u8; 4];
//! assert_eq!(ring.straighten_into(&mut out), 3);
//! assert_eq!(&out[..3], &[2, 3, 4]);
//! ```

/// Bounded FIFO with explicit full/empty state.
#[derive(Debug, Clone)]
pub struct FixedRing<T> {
    slots: Box<[Option<T>]>,
    /// Index of the oldest element.
    head: usize,
    len: usize,
}

impl<T> FixedRing<T> {
    /// Create an empty ring holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    /// Maximum number of items.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current number of items.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    #[inline]
    fn slot_index(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    /// Append at the back. Returns the item if the ring is full.
    pub fn enqueue(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let idx = self.slot_index(self.len);
        self.slots[idx] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Append at the back, evicting the oldest item when full.
    ///
    /// Returns the evicted item, if any.
    pub fn force_enqueue(&mut self, item: T) -> Option<T> {
        let evicted = if self.is_full() { self.dequeue() } else { None };
        let idx = self.slot_index(self.len);
        self.slots[idx] = Some(item);
        self.len += 1;
        evicted
    }

    /// Insert at the front so it is dequeued next. Returns the item if full.
    pub fn push_front(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.head = (self.head + self.capacity() - 1) % self.capacity();
        self.slots[self.head] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the oldest item.
    pub fn dequeue(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }

    /// Borrow the item `offset` positions from the front.
    pub fn get(&self, offset: usize) -> Option<&T> {
        if offset >= self.len {
            return None;
        }
        self.slots[self.slot_index(offset)].as_ref()
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    /// Drop every item.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

impl<T: Copy> FixedRing<T> {
    /// Copy items oldest-first into `out`, returning how many were written.
    ///
    /// The ring is left untouched.
    pub fn straighten_into(&self, out: &mut [T]) -> usize {
        let n = self.len.min(out.len());
        for (dst, src) in out.iter_mut().zip(self.iter()).take(n) {
            *dst = *src;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ring_is_empty() {
        let ring: FixedRing<u8> = FixedRing::with_capacity(4);
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.capacity(), 4);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        let _ring: FixedRing<u8> = FixedRing::with_capacity(0);
    }

    #[test]
    fn test_enqueue_on_full_returns_item() {
        let mut ring = FixedRing::with_capacity(2);
        ring.enqueue('a').unwrap();
        ring.enqueue('b').unwrap();
        assert_eq!(ring.enqueue('c'), Err('c'));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_fifo_order_across_wraparound() {
        let mut ring = FixedRing::with_capacity(3);
        for i in 0..3 {
            ring.enqueue(i).unwrap();
        }
        assert_eq!(ring.dequeue(), Some(0));
        assert_eq!(ring.dequeue(), Some(1));
        ring.enqueue(3).unwrap();
        ring.enqueue(4).unwrap();

        let items: Vec<_> = ring.iter().copied().collect();
        assert_eq!(items, vec![2, 3, 4]);

        let mut out = [0; 3];
        assert_eq!(ring.straighten_into(&mut out), 3);
        assert_eq!(out, [2, 3, 4]);
    }

    #[test]
    fn test_force_enqueue_evicts_oldest() {
        let mut ring = FixedRing::with_capacity(2);
        assert_eq!(ring.force_enqueue(1), None);
        assert_eq!(ring.force_enqueue(2), None);
        assert_eq!(ring.force_enqueue(3), Some(1));
        assert_eq!(ring.dequeue(), Some(2));
        assert_eq!(ring.dequeue(), Some(3));
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn test_push_front_jumps_queue() {
        let mut ring = FixedRing::with_capacity(3);
        ring.enqueue("normal").unwrap();
        ring.push_front("urgent").unwrap();
        assert_eq!(ring.dequeue(), Some("urgent"));
        assert_eq!(ring.dequeue(), Some("normal"));
    }

    #[test]
    fn test_clear() {
        let mut ring = FixedRing::with_capacity(4);
        ring.enqueue(String::from("x")).unwrap();
        ring.enqueue(String::from("y")).unwrap();
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.get(0), None);
        ring.enqueue(String::from("z")).unwrap();
        assert_eq!(ring.get(0).map(String::as_str), Some("z"));
    }

    #[test]
    fn test_straighten_into_short_output() {
        let mut ring = FixedRing::with_capacity(4);
        for b in [9u8, 8, 7] {
            ring.enqueue(b).unwrap();
        }
        let mut out = [0u8; 2];
        assert_eq!(ring.straighten_into(&mut out), 2);
        assert_eq!(out, [9, 8]);
        assert_eq!(ring.len(), 3);
    }
}
