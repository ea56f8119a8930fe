//! The channel contract every transport implements, and the shared holder
//! through which an [`Inlet`](super::Inlet) and an [`Outlet`](super::Outlet)
//! reach it.
//!
//! # Contract
//!
//! A duct moves values from exactly one producer to exactly one consumer
//! through a bounded buffer. The consumer always has a *current* value to
//! read: before anything arrives it is `T::default()`, afterwards it is the
//! most recently consumed value.
//!
//! - [`try_put`](DuctImpl::try_put) never blocks and never loses a value it
//!   accepted; on a full buffer the value is handed back.
//! - [`try_consume_gets`](DuctImpl::try_consume_gets) advances the read
//!   cursor by up to `n` received values, bounded by what is available.
//! - [`get`](DuctImpl::get) returns the current value without advancing.
//!
//! Transports may be one-sided: an inter-process send duct implements only
//! the put half and an inter-process receive duct only the get half. Driving
//! the missing half is a programming error and panics.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

#[cfg(any(debug_assertions, feature = "check-invariants"))]
use crate::parallel::occupancy::OccupancyCaps;

/// Physical class of a duct implementation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DuctKind {
    /// Producer and consumer interleave on one thread.
    Intra,
    /// Producer and consumer on different threads of one process.
    Thread,
    /// Sending half of a process-crossing edge.
    ProcInlet,
    /// Receiving half of a process-crossing edge.
    ProcOutlet,
}

/// A transport strategy satisfying the duct contract.
pub trait DuctImpl<T>: Send + Sync {
    /// Enqueue `val`, or hand it back if no capacity is available.
    fn try_put(&self, val: T) -> Result<(), T>;

    /// Push out any values a batching transport is holding back.
    fn try_flush(&self) -> bool {
        true
    }

    /// Advance past up to `requested` available values; returns how many
    /// were consumed.
    fn try_consume_gets(&self, requested: usize) -> usize;

    /// Current value at the read cursor.
    fn get(&self) -> T;

    /// Values received but not yet consumed.
    fn pending(&self) -> usize;

    /// Values that could be put right now without dropping.
    fn available_capacity(&self) -> usize;

    fn kind(&self) -> DuctKind;

    fn name(&self) -> &'static str;
}

/// Panic for a put-side call on a get-only transport, or vice versa.
#[cold]
#[track_caller]
pub(crate) fn wrong_direction(name: &'static str, op: &'static str) -> ! {
    panic!("{op} called on {name}")
}

/// Shared slot holding a duct's implementation.
///
/// The slot starts with the implementation it was built with and accepts at
/// most one in-place replacement through [`emplace`](Self::emplace). The
/// replacement is visible to every holder of the same `Arc<Duct<T>>`, and
/// the replaced implementation is dropped on the spot.
pub struct Duct<T> {
    imp: RwLock<Box<dyn DuctImpl<T>>>,
    emplaced: AtomicBool,
    #[cfg(any(debug_assertions, feature = "check-invariants"))]
    caps: OccupancyCaps,
}

impl<T> Duct<T> {
    pub fn new(imp: Box<dyn DuctImpl<T>>) -> Self {
        Self {
            imp: RwLock::new(imp),
            emplaced: AtomicBool::new(false),
            #[cfg(any(debug_assertions, feature = "check-invariants"))]
            caps: OccupancyCaps::new(),
        }
    }

    pub fn from_impl<D: DuctImpl<T> + 'static>(imp: D) -> Self {
        Self::new(Box::new(imp))
    }

    /// Replace the implementation for every holder of this duct.
    ///
    /// # Panics
    ///
    /// Panics if the duct was already emplaced once.
    pub fn emplace(&self, imp: Box<dyn DuctImpl<T>>) {
        if self.emplaced.swap(true, Ordering::AcqRel) {
            panic!("duct {:#x} emplaced more than once", self.uid());
        }
        let replaced = std::mem::replace(&mut *self.imp.write(), imp);
        // dropped outside the lock; proc ducts cancel requests on drop
        drop(replaced);
    }

    pub fn is_emplaced(&self) -> bool {
        self.emplaced.load(Ordering::Acquire)
    }

    #[inline]
    fn active(&self) -> RwLockReadGuard<'_, Box<dyn DuctImpl<T>>> {
        self.imp.read()
    }

    #[cfg(any(debug_assertions, feature = "check-invariants"))]
    #[inline]
    pub(crate) fn caps(&self) -> &OccupancyCaps {
        &self.caps
    }

    #[inline]
    pub fn try_put(&self, val: T) -> Result<(), T> {
        crate::occupancy_audit!(self.caps(), "TryPut", 1);
        self.active().try_put(val)
    }

    #[inline]
    pub fn try_flush(&self) -> bool {
        crate::occupancy_audit!(self.caps(), "TryFlush", 1);
        self.active().try_flush()
    }

    #[inline]
    pub fn try_consume_gets(&self, requested: usize) -> usize {
        crate::occupancy_audit!(self.caps(), "TryConsumeGets", 1);
        self.active().try_consume_gets(requested)
    }

    #[inline]
    pub fn get(&self) -> T {
        self.active().get()
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.active().pending()
    }

    #[inline]
    pub fn available_capacity(&self) -> usize {
        self.active().available_capacity()
    }

    pub fn kind(&self) -> DuctKind {
        self.active().kind()
    }

    pub fn name(&self) -> &'static str {
        self.active().name()
    }

    /// Address-based identity; two handles share a duct iff their uids match.
    pub fn uid(&self) -> usize {
        self as *const Self as usize
    }
}

impl<T> std::fmt::Debug for Duct<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Duct")
            .field("uid", &format_args!("{:#x}", self.uid()))
            .field("impl", &self.name())
            .field("emplaced", &self.is_emplaced())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ducts::{IntraDuct, ThreadDuct};
    use std::sync::Arc;

    /// Intra duct that raises a flag when dropped.
    struct Flagged {
        inner: IntraDuct<u32>,
        dropped: Arc<AtomicBool>,
    }

    impl Drop for Flagged {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    impl DuctImpl<u32> for Flagged {
        fn try_put(&self, val: u32) -> Result<(), u32> {
            self.inner.try_put(val)
        }

        fn try_consume_gets(&self, requested: usize) -> usize {
            self.inner.try_consume_gets(requested)
        }

        fn get(&self) -> u32 {
            self.inner.get()
        }

        fn pending(&self) -> usize {
            self.inner.pending()
        }

        fn available_capacity(&self) -> usize {
            self.inner.available_capacity()
        }

        fn kind(&self) -> DuctKind {
            self.inner.kind()
        }

        fn name(&self) -> &'static str {
            "Flagged"
        }
    }

    #[test]
    fn emplace_releases_replaced_impl() {
        let dropped = Arc::new(AtomicBool::new(false));
        let duct = Arc::new(Duct::from_impl(Flagged {
            inner: IntraDuct::new(4),
            dropped: Arc::clone(&dropped),
        }));
        let uid = duct.uid();
        assert!(!duct.is_emplaced());
        duct.emplace(Box::new(ThreadDuct::<u32>::new(4)));
        assert!(dropped.load(Ordering::SeqCst));
        assert!(duct.is_emplaced());
        assert_eq!(duct.uid(), uid);
        assert_eq!(duct.name(), "ThreadDuct");
    }

    #[test]
    fn emplace_swaps_active_impl() {
        let duct = Duct::from_impl(IntraDuct::<u32>::new(4));
        assert_eq!(duct.kind(), DuctKind::Intra);
        duct.emplace(Box::new(ThreadDuct::<u32>::new(4)));
        assert_eq!(duct.kind(), DuctKind::Thread);
        assert_eq!(duct.get(), 0);
    }

    #[test]
    fn second_emplace_panics() {
        let duct = Duct::from_impl(IntraDuct::<u32>::new(4));
        duct.emplace(Box::new(ThreadDuct::<u32>::new(4)));
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            duct.emplace(Box::new(ThreadDuct::<u32>::new(4)));
        }));
        assert!(res.is_err());
    }

    #[test]
    fn put_and_consume_through_holder() {
        let duct = Duct::from_impl(IntraDuct::<u32>::new(2));
        assert!(duct.try_put(5).is_ok());
        assert_eq!(duct.pending(), 1);
        assert_eq!(duct.try_consume_gets(3), 1);
        assert_eq!(duct.get(), 5);
    }
}
