//! Backends that carry many logical edges over one physical transport.
//!
//! Edges between the same pair of `(process, thread)` endpoints register with
//! a shared backend while the mesh is being built. Once every edge has
//! registered, [`PooledBackEnd::initialize`] or
//! [`AggregatedBackEnd::initialize`] freezes membership and opens the
//! underlying duct. Membership is ordered by [`InterProcAddress`], so both
//! processes agree on each member's slot without exchanging anything.
//!
//! Every member must touch its pool exactly once per epoch; a member that
//! skips an epoch stalls the flush for everyone else.

pub mod aggregator;
pub mod pool;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::Mutex;

use super::address::{InterProcAddress, PoolKey};

pub use aggregator::{
    AggregatedBackEnd, AggregatedInletDuct, AggregatedOutletDuct, InletAggregator,
    OutletAggregator,
};
pub use pool::{InletPool, OutletPool, PooledBackEnd, PooledInletDuct, PooledOutletDuct};

/// Registration hook shared by pools and aggregators.
pub trait Member {
    fn register(&mut self, address: InterProcAddress);
    fn len(&self) -> usize;
}

/// Mutex-guarded map from endpoint pair to the pool serving it.
pub(crate) struct Registry<P> {
    pools: Mutex<HashMap<PoolKey, Arc<Mutex<P>>>>,
    initialized: AtomicBool,
}

impl<P: Member> Registry<P> {
    pub(crate) fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Add `address` to its pool, creating the pool with `make` if needed.
    pub(crate) fn register(
        &self,
        address: InterProcAddress,
        make: impl FnOnce() -> P,
    ) -> Arc<Mutex<P>> {
        assert!(
            !self.is_initialized(),
            "{address} registered after backend initialization"
        );
        let mut pools = self.pools.lock();
        let pool = Arc::clone(
            pools
                .entry(address.pool_key())
                .or_insert_with(|| Arc::new(Mutex::new(make()))),
        );
        pool.lock().register(address);
        pool
    }

    /// Run `f` on every pool in key order, then mark the registry closed.
    pub(crate) fn initialize(&self, mut f: impl FnMut(&PoolKey, &mut P)) {
        assert!(!self.is_initialized(), "backend initialized twice");
        let pools = self.pools.lock();
        for (key, pool) in pools.iter().sorted_by_key(|(key, _)| **key) {
            f(key, &mut pool.lock());
        }
        self.initialized.store(true, Ordering::Release);
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn num_pools(&self) -> usize {
        self.pools.lock().len()
    }
}
