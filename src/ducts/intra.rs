//! Intra-thread transport: producer and consumer interleave on one call stack.
//!
//! The ring holds `N + 1` slots. One slot is always occupied by the current
//! value, so "full" (`N + 1` occupied) and "nothing pending" (one occupied)
//! are distinguishable from the length alone and [`get`](DuctImpl::get)
//! always has something to return.

use parking_lot::{Mutex, MutexGuard};

use crate::conduit::duct::{DuctImpl, DuctKind};
use crate::utility::RingBuffer;

pub struct IntraDuct<T> {
    ring: Mutex<RingBuffer<T>>,
}

impl<T: Default> IntraDuct<T> {
    /// Creates a duct accepting `capacity` values before dropping.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "IntraDuct capacity must be non-zero");
        let mut ring = RingBuffer::new(capacity + 1);
        // value-initialized current slot
        let _ = ring.push_head(T::default());
        Self {
            ring: Mutex::new(ring),
        }
    }
}

impl<T> IntraDuct<T> {
    /// Both ends live on one thread, so the lock is never contended. A failed
    /// `try_lock` means the duct escaped its thread.
    #[inline]
    fn ring(&self) -> MutexGuard<'_, RingBuffer<T>> {
        match self.ring.try_lock() {
            Some(guard) => guard,
            None => panic!("IntraDuct driven from two threads at once"),
        }
    }
}

impl<T> DuctImpl<T> for IntraDuct<T>
where
    T: Clone + Default + Send,
{
    fn try_put(&self, val: T) -> Result<(), T> {
        self.ring().push_head(val)
    }

    fn try_consume_gets(&self, requested: usize) -> usize {
        let mut ring = self.ring();
        let num_consumed = requested.min(ring.len() - 1);
        for _ in 0..num_consumed {
            ring.pop_tail();
        }
        num_consumed
    }

    fn get(&self) -> T {
        match self.ring().tail() {
            Some(val) => val.clone(),
            None => unreachable!("IntraDuct lost its current slot"),
        }
    }

    fn pending(&self) -> usize {
        self.ring().len() - 1
    }

    fn available_capacity(&self) -> usize {
        self.ring().available()
    }

    fn kind(&self) -> DuctKind {
        DuctKind::Intra
    }

    fn name(&self) -> &'static str {
        "IntraDuct"
    }
}
