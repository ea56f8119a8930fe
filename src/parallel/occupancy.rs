//! Occupancy auditing for named critical sections.
//!
//! A duct end must be driven by exactly one caller at a time: one producer
//! on the put side and one consumer on the get side. An [`OccupancyCap`]
//! counts how many callers are currently inside a named region and panics
//! the moment that count would exceed the region's maximum.
//!
//! Auditing is a development aid. The [`occupancy_audit!`](crate::occupancy_audit)
//! macro expands to nothing unless `debug_assertions` or the
//! `check-invariants` feature is enabled, and the [`OccupancyCaps`] fields
//! that feed it are compiled out alongside.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use parking_lot::Mutex;

/// Concurrency limit for one named region.
#[derive(Debug)]
pub struct OccupancyCap {
    name: &'static str,
    maximum_occupancy: usize,
    occupancy: AtomicUsize,
}

impl OccupancyCap {
    pub fn new(name: &'static str, maximum_occupancy: usize) -> Self {
        Self {
            name,
            maximum_occupancy,
            occupancy: AtomicUsize::new(0),
        }
    }

    /// Registers one more caller inside the region.
    ///
    /// # Panics
    ///
    /// Panics if the region is already at its maximum occupancy.
    pub fn enter(&self) {
        let prev = self.occupancy.fetch_add(1, Ordering::AcqRel);
        if prev >= self.maximum_occupancy {
            self.occupancy.fetch_sub(1, Ordering::AcqRel);
            panic!(
                "[occupancy] `{}` entered by {} concurrent callers (maximum {})",
                self.name,
                prev + 1,
                self.maximum_occupancy
            );
        }
    }

    pub fn exit(&self) {
        let prev = self.occupancy.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "[occupancy] `{}` exited more than entered", self.name);
    }

    #[inline]
    pub fn maximum_occupancy(&self) -> usize {
        self.maximum_occupancy
    }

    #[inline]
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }
}

/// RAII token: enters the cap on construction, exits on drop.
#[must_use = "the region is exited as soon as the guard is dropped"]
pub struct OccupancyGuard {
    cap: Arc<OccupancyCap>,
}

impl OccupancyGuard {
    pub fn new(cap: Arc<OccupancyCap>) -> Self {
        cap.enter();
        Self { cap }
    }
}

impl Drop for OccupancyGuard {
    fn drop(&mut self) {
        self.cap.exit();
    }
}

/// Lazily-populated set of caps keyed by region name.
#[derive(Default)]
pub struct OccupancyCaps {
    lookup: Mutex<AHashMap<&'static str, Arc<OccupancyCap>>>,
}

impl OccupancyCaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches the cap for `name`, creating it with `maximum_occupancy` on
    /// first use.
    ///
    /// # Panics
    ///
    /// Panics if the same name is requested with two different maxima.
    pub fn get(&self, name: &'static str, maximum_occupancy: usize) -> Arc<OccupancyCap> {
        let mut lookup = self.lookup.lock();
        let cap = lookup
            .entry(name)
            .or_insert_with(|| Arc::new(OccupancyCap::new(name, maximum_occupancy)));
        assert_eq!(
            cap.maximum_occupancy(),
            maximum_occupancy,
            "[occupancy] `{name}` requested with conflicting maxima"
        );
        Arc::clone(cap)
    }
}

impl std::fmt::Debug for OccupancyCaps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lookup = self.lookup.lock();
        let mut names: Vec<_> = lookup.keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("OccupancyCaps").field("regions", &names).finish()
    }
}

/// Audit that at most `$max` callers are inside region `$name` of `$caps`
/// for the rest of the enclosing block.
#[macro_export]
macro_rules! occupancy_audit {
    ($caps:expr, $name:expr, $max:expr) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        let _occupancy_guard =
            $crate::parallel::occupancy::OccupancyGuard::new($caps.get($name, $max));
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn guard_enters_and_exits() {
        let caps = OccupancyCaps::new();
        let cap = caps.get("region", 1);
        {
            let _g = OccupancyGuard::new(Arc::clone(&cap));
            assert_eq!(cap.occupancy(), 1);
        }
        assert_eq!(cap.occupancy(), 0);
    }

    #[test]
    fn reentry_beyond_maximum_panics() {
        let caps = OccupancyCaps::new();
        let _outer = OccupancyGuard::new(caps.get("SurePut", 1));
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _inner = OccupancyGuard::new(caps.get("SurePut", 1));
        }));
        assert!(res.is_err());
        // the failed entry must not leak occupancy
        assert_eq!(caps.get("SurePut", 1).occupancy(), 1);
    }

    #[test]
    fn concurrent_callers_within_limit() {
        let caps = Arc::new(OccupancyCaps::new());
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let caps = Arc::clone(&caps);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let _g = OccupancyGuard::new(caps.get("shared", 2));
                    barrier.wait();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(caps.get("shared", 2).occupancy(), 0);
    }

    #[test]
    fn conflicting_maxima_panic() {
        let caps = OccupancyCaps::new();
        caps.get("TryPut", 1);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            caps.get("TryPut", 2);
        }));
        assert!(res.is_err());
    }
}
