//! Cross-thread transport: lock-free single-producer/single-consumer ring.
//!
//! Same slot discipline as [`IntraDuct`](super::IntraDuct): `N + 1` slots
//! with the tail slot holding the current value. Every slot is
//! value-initialized before either end exists, so the consumer never reads
//! uninitialized memory, even before the first write.
//!
//! `head` counts writes and `tail` counts consumed reads. The producer owns
//! slot `head % (N + 1)` while `head - tail < N + 1`; the consumer owns slot
//! `tail % (N + 1)`. Publication goes through a Release store of the owning
//! counter and an Acquire load on the other side.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::conduit::duct::{DuctImpl, DuctKind};

#[repr(align(64))]
struct CachePadded<T>(T);

/// Exclusive claim on one end of the ring for the duration of a call.
struct EndClaim<'a>(&'a AtomicBool);

impl<'a> EndClaim<'a> {
    #[inline]
    fn acquire(flag: &'a AtomicBool, end: &'static str) -> Self {
        if flag.swap(true, Ordering::Acquire) {
            panic!("ThreadDuct {end} driven by two threads at once");
        }
        Self(flag)
    }
}

impl Drop for EndClaim<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ThreadDuct<T> {
    slots: Box<[UnsafeCell<T>]>,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    producer: AtomicBool,
    consumer: AtomicBool,
}

// SAFETY: slots are only touched by the end that owns them (see module docs),
// and each end is held by at most one thread at a time through `EndClaim`.
unsafe impl<T: Send> Sync for ThreadDuct<T> {}

impl<T: Default> ThreadDuct<T> {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ThreadDuct capacity must be non-zero");
        let slots = std::iter::repeat_with(|| UnsafeCell::new(T::default()))
            .take(capacity + 1)
            .collect();
        Self {
            slots,
            // slot 0 is the reserved current value
            head: CachePadded(AtomicUsize::new(1)),
            tail: CachePadded(AtomicUsize::new(0)),
            producer: AtomicBool::new(false),
            consumer: AtomicBool::new(false),
        }
    }
}

impl<T> ThreadDuct<T> {
    #[inline]
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn occupied(&self) -> usize {
        let tail = self.tail.0.load(Ordering::Acquire);
        let head = self.head.0.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }
}

impl<T> DuctImpl<T> for ThreadDuct<T>
where
    T: Clone + Default + Send,
{
    fn try_put(&self, val: T) -> Result<(), T> {
        let _claim = EndClaim::acquire(&self.producer, "producer");
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= self.slot_count() {
            return Err(val);
        }
        // SAFETY: the ring is not full, so the head slot is outside the
        // consumer's reach until the Release store below publishes it.
        unsafe {
            *self.slots[head % self.slot_count()].get() = val;
        }
        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    fn try_consume_gets(&self, requested: usize) -> usize {
        let _claim = EndClaim::acquire(&self.consumer, "consumer");
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        let unconsumed = head.wrapping_sub(tail) - 1;
        let num_consumed = requested.min(unconsumed);
        self.tail
            .0
            .store(tail.wrapping_add(num_consumed), Ordering::Release);
        num_consumed
    }

    fn get(&self) -> T {
        let _claim = EndClaim::acquire(&self.consumer, "consumer");
        let tail = self.tail.0.load(Ordering::Relaxed);
        // SAFETY: the tail slot belongs to the consumer; the producer never
        // writes it while it is the current value.
        unsafe { (*self.slots[tail % self.slot_count()].get()).clone() }
    }

    fn pending(&self) -> usize {
        self.occupied().saturating_sub(1)
    }

    fn available_capacity(&self) -> usize {
        self.slot_count().saturating_sub(self.occupied())
    }

    fn kind(&self) -> DuctKind {
        DuctKind::Thread
    }

    fn name(&self) -> &'static str {
        "ThreadDuct"
    }
}
