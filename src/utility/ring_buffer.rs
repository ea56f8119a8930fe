//! Fixed-capacity FIFO ring addressed by a pair of [`CircularIndex`] cursors.
//!
//! Every slot is value-initialized at construction and stays initialized for
//! the lifetime of the ring; popping moves the value out and leaves
//! `T::default()` behind. This keeps the ring free of `unsafe` and lets
//! callers keep a "current" element parked at the tail without an extra field.

use super::circular_index::CircularIndex;

#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    /// Oldest occupied slot.
    tail: CircularIndex,
    len: usize,
}

impl<T: Default> RingBuffer<T> {
    /// Creates an empty ring able to hold `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        let slots = std::iter::repeat_with(T::default).take(capacity).collect();
        Self {
            slots,
            tail: CircularIndex::new(capacity),
            len: 0,
        }
    }

    /// Removes and returns the oldest element.
    pub fn pop_tail(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let val = std::mem::take(&mut self.slots[self.tail.get()]);
        self.tail += 1;
        self.len -= 1;
        Some(val)
    }
}

impl<T> RingBuffer<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Free slots remaining.
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.len
    }

    /// Appends at the head, handing the value back if the ring is full.
    pub fn push_head(&mut self, val: T) -> Result<(), T> {
        if self.is_full() {
            return Err(val);
        }
        let slot = (self.tail + self.len).get();
        self.slots[slot] = val;
        self.len += 1;
        Ok(())
    }

    /// Drops the oldest element in place, without the `Default` bound of
    /// [`pop_tail`](Self::pop_tail). The stale value stays in its slot until
    /// overwritten.
    pub fn advance_tail(&mut self) -> bool {
        if self.len == 0 {
            return false;
        }
        self.tail += 1;
        self.len -= 1;
        true
    }

    /// Oldest element.
    #[inline]
    pub fn tail(&self) -> Option<&T> {
        self.get(0)
    }

    #[inline]
    pub fn tail_mut(&mut self) -> Option<&mut T> {
        self.get_mut(0)
    }

    /// Most recently pushed element.
    #[inline]
    pub fn head(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    #[inline]
    pub fn head_mut(&mut self) -> Option<&mut T> {
        match self.len.checked_sub(1) {
            Some(i) => self.get_mut(i),
            None => None,
        }
    }

    /// `n`-th element counted from the tail.
    pub fn get(&self, n: usize) -> Option<&T> {
        (n < self.len).then(|| &self.slots[(self.tail + n).get()])
    }

    pub fn get_mut(&mut self, n: usize) -> Option<&mut T> {
        if n < self.len {
            let slot = (self.tail + n).get();
            Some(&mut self.slots[slot])
        } else {
            None
        }
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).map(move |n| &self.slots[(self.tail + n).get()])
    }
}
