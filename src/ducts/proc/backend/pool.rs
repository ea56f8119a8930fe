//! Fixed-slot pooling: `M` edges share one message per epoch.
//!
//! Each member owns one slot of a `Vec<T>` of length `M`. A member's put
//! writes its slot; once all `M` members have put, the vector goes out as a
//! single message. On the receiving side the first member to step in an
//! epoch steps the underlying duct and the others read from the same batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

#[cfg(any(debug_assertions, feature = "check-invariants"))]
use hashbrown::HashSet;

use super::{Member, Registry};
use crate::conduit::duct::{DuctImpl, DuctKind, wrong_direction};
use crate::conduit::{Inlet, Outlet, Sink, Source};
use crate::distributed::Communicator;
use crate::ducts::proc::address::InterProcAddress;
use crate::ducts::proc::codec::Codec;
use crate::ducts::proc::iprobe::IprobeDuct;
use crate::ducts::proc::isend::RingIsendDuct;

/// Check that every member shares the representative's routing.
fn assert_agreement(addresses: &BTreeSet<InterProcAddress>) -> InterProcAddress {
    let Some(rep) = addresses.first().copied() else {
        panic!("pool initialized without members");
    };
    for addr in addresses {
        assert!(
            addr.outlet_proc == rep.outlet_proc
                && addr.inlet_thread == rep.inlet_thread
                && addr.comm == rep.comm,
            "pool member {addr} disagrees with {rep}"
        );
    }
    rep
}

fn position(addresses: &BTreeSet<InterProcAddress>, address: &InterProcAddress) -> usize {
    assert!(
        addresses.contains(address),
        "{address} is not a member of this pool"
    );
    addresses.range(..*address).count()
}

/// Sending side of a pool.
pub struct InletPool<T> {
    addresses: BTreeSet<InterProcAddress>,
    inlet: Option<Inlet<Vec<T>>>,
    buffer: Vec<T>,
    /// Puts seen this epoch.
    flush_counter: usize,
    /// Whether the last batch went out; a refused batch refuses the next
    /// epoch's writes as well.
    put_status: bool,
    #[cfg(any(debug_assertions, feature = "check-invariants"))]
    written: HashSet<usize>,
}

impl<T> Default for InletPool<T> {
    fn default() -> Self {
        Self {
            addresses: BTreeSet::new(),
            inlet: None,
            buffer: Vec::new(),
            flush_counter: 0,
            put_status: true,
            #[cfg(any(debug_assertions, feature = "check-invariants"))]
            written: HashSet::new(),
        }
    }
}

impl<T> Member for InletPool<T> {
    fn register(&mut self, address: InterProcAddress) {
        assert!(self.inlet.is_none(), "{address} joined an initialized pool");
        assert!(
            self.addresses.insert(address),
            "{address} registered twice"
        );
    }

    fn len(&self) -> usize {
        self.addresses.len()
    }
}

impl<T: Clone + Default + Send + 'static> InletPool<T> {
    pub fn is_initialized(&self) -> bool {
        self.inlet.is_some()
    }

    /// Freeze membership and open the shared send duct.
    pub fn initialize<C, K>(&mut self, comm: &C, codec: &K, capacity: usize)
    where
        C: Communicator,
        K: Codec<Vec<T>>,
    {
        assert!(!self.is_initialized(), "InletPool initialized twice");
        let rep = assert_agreement(&self.addresses);
        assert_eq!(
            rep.inlet_proc,
            comm.rank(),
            "InletPool for {rep} initialized on rank {}",
            comm.rank()
        );
        self.buffer = vec![T::default(); self.addresses.len()];
        let duct = RingIsendDuct::<Vec<T>, C, K>::new(rep, comm.clone(), codec.clone(), capacity);
        self.inlet = Some(Sink::new(duct).into_inlet());
        log::debug!(
            "InletPool for {rep} initialized with {} members",
            self.addresses.len()
        );
    }

    /// Slot index of `address`.
    pub fn lookup(&self, address: &InterProcAddress) -> usize {
        assert!(self.is_initialized(), "lookup before initialize");
        position(&self.addresses, address)
    }

    /// Write `val` into slot `index`, then count this member's epoch call.
    /// The value is handed back if the previous batch was refused.
    pub fn try_put(&mut self, val: T, index: usize) -> Result<(), T> {
        assert!(self.is_initialized(), "put before initialize");
        let res = if self.put_status {
            #[cfg(any(debug_assertions, feature = "check-invariants"))]
            assert!(
                self.written.insert(index),
                "pool slot {index} written twice in one epoch"
            );
            self.buffer[index] = val;
            Ok(())
        } else {
            Err(val)
        };
        self.flush();
        res
    }

    fn flush(&mut self) {
        self.flush_counter += 1;
        if self.flush_counter < self.addresses.len() {
            return;
        }
        self.flush_counter = 0;
        let batch = std::mem::replace(&mut self.buffer, vec![T::default(); self.addresses.len()]);
        if let Some(inlet) = self.inlet.as_mut() {
            self.put_status = inlet.try_put(batch);
        }
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.written.clear();
    }

    pub fn pending(&self) -> usize {
        self.flush_counter
    }

    pub fn available_capacity(&self) -> usize {
        self.inlet.as_ref().map_or(0, Inlet::available_capacity)
    }
}

/// Receiving side of a pool.
pub struct OutletPool<T> {
    addresses: BTreeSet<InterProcAddress>,
    outlet: Option<Outlet<Vec<T>>>,
    current: Vec<T>,
    /// Steps seen this epoch.
    consume_counter: usize,
    /// What the epoch's first step consumed; every member sees the same.
    epoch_consumed: usize,
    #[cfg(any(debug_assertions, feature = "check-invariants"))]
    stepped: HashSet<usize>,
}

impl<T> Default for OutletPool<T> {
    fn default() -> Self {
        Self {
            addresses: BTreeSet::new(),
            outlet: None,
            current: Vec::new(),
            consume_counter: 0,
            epoch_consumed: 0,
            #[cfg(any(debug_assertions, feature = "check-invariants"))]
            stepped: HashSet::new(),
        }
    }
}

impl<T> Member for OutletPool<T> {
    fn register(&mut self, address: InterProcAddress) {
        assert!(self.outlet.is_none(), "{address} joined an initialized pool");
        assert!(
            self.addresses.insert(address),
            "{address} registered twice"
        );
    }

    fn len(&self) -> usize {
        self.addresses.len()
    }
}

impl<T: Clone + Default + Send + 'static> OutletPool<T> {
    pub fn is_initialized(&self) -> bool {
        self.outlet.is_some()
    }

    pub fn initialize<C, K>(&mut self, comm: &C, codec: &K)
    where
        C: Communicator,
        K: Codec<Vec<T>>,
    {
        assert!(!self.is_initialized(), "OutletPool initialized twice");
        let rep = assert_agreement(&self.addresses);
        assert_eq!(
            rep.outlet_proc,
            comm.rank(),
            "OutletPool for {rep} initialized on rank {}",
            comm.rank()
        );
        let duct = IprobeDuct::<Vec<T>, C, K>::new(rep, comm.clone(), codec.clone());
        self.outlet = Some(Source::new(duct).into_outlet());
        log::debug!(
            "OutletPool for {rep} initialized with {} members",
            self.addresses.len()
        );
    }

    pub fn lookup(&self, address: &InterProcAddress) -> usize {
        assert!(self.is_initialized(), "lookup before initialize");
        position(&self.addresses, address)
    }

    /// Member `index`'s value from the current batch.
    pub fn get(&self, index: usize) -> T {
        self.current.get(index).cloned().unwrap_or_default()
    }

    pub fn try_consume_gets(&mut self, index: usize, requested: usize) -> usize {
        assert!(self.is_initialized(), "step before initialize");
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        assert!(
            self.stepped.insert(index),
            "pool slot {index} stepped twice in one epoch"
        );
        #[cfg(not(any(debug_assertions, feature = "check-invariants")))]
        let _ = index;
        if self.consume_counter == 0 {
            if let Some(outlet) = self.outlet.as_mut() {
                self.epoch_consumed = outlet.try_step(requested);
                if self.epoch_consumed > 0 {
                    self.current = outlet.get();
                }
            }
        }
        self.consume_counter += 1;
        if self.consume_counter == self.addresses.len() {
            self.consume_counter = 0;
            #[cfg(any(debug_assertions, feature = "check-invariants"))]
            self.stepped.clear();
        }
        self.epoch_consumed
    }

    pub fn pending(&self) -> usize {
        self.outlet.as_ref().map_or(0, Outlet::pending)
    }
}

/// Registries of inlet and outlet pools sharing one communicator and codec.
pub struct PooledBackEnd<T, C, K> {
    comm: C,
    codec: K,
    capacity: usize,
    inlets: Registry<InletPool<T>>,
    outlets: Registry<OutletPool<T>>,
}

impl<T, C, K> PooledBackEnd<T, C, K>
where
    T: Clone + Default + Send + 'static,
    C: Communicator,
    K: Codec<Vec<T>>,
{
    pub fn new(comm: C, codec: K, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            comm,
            codec,
            capacity,
            inlets: Registry::new(),
            outlets: Registry::new(),
        })
    }

    pub fn register_inlet(&self, address: InterProcAddress) -> Arc<Mutex<InletPool<T>>> {
        self.inlets.register(address, InletPool::default)
    }

    pub fn register_outlet(&self, address: InterProcAddress) -> Arc<Mutex<OutletPool<T>>> {
        self.outlets.register(address, OutletPool::default)
    }

    /// Call once after every edge has registered.
    pub fn initialize(&self) {
        self.inlets
            .initialize(|_, pool| pool.initialize(&self.comm, &self.codec, self.capacity));
        self.outlets
            .initialize(|_, pool| pool.initialize(&self.comm, &self.codec));
        log::debug!(
            "PooledBackEnd on rank {} initialized {} inlet and {} outlet pools",
            self.comm.rank(),
            self.inlets.num_pools(),
            self.outlets.num_pools()
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.inlets.is_initialized() && self.outlets.is_initialized()
    }
}

/// Per-edge sending duct writing one slot of an [`InletPool`].
pub struct PooledInletDuct<T> {
    address: InterProcAddress,
    pool: Arc<Mutex<InletPool<T>>>,
    index: OnceCell<usize>,
}

impl<T> PooledInletDuct<T>
where
    T: Clone + Default + Send + 'static,
{
    pub fn new<C, K>(address: InterProcAddress, backend: &PooledBackEnd<T, C, K>) -> Self
    where
        C: Communicator,
        K: Codec<Vec<T>>,
    {
        Self {
            address,
            pool: backend.register_inlet(address),
            index: OnceCell::new(),
        }
    }
}

impl<T> DuctImpl<T> for PooledInletDuct<T>
where
    T: Clone + Default + Send + 'static,
{
    fn try_put(&self, val: T) -> Result<(), T> {
        let mut pool = self.pool.lock();
        let index = *self.index.get_or_init(|| pool.lookup(&self.address));
        pool.try_put(val, index)
    }

    fn try_consume_gets(&self, _requested: usize) -> usize {
        wrong_direction("PooledInletDuct", "try_consume_gets")
    }

    fn get(&self) -> T {
        wrong_direction("PooledInletDuct", "get")
    }

    /// Members that have put this epoch.
    fn pending(&self) -> usize {
        self.pool.lock().pending()
    }

    fn available_capacity(&self) -> usize {
        self.pool.lock().available_capacity()
    }

    fn kind(&self) -> DuctKind {
        DuctKind::ProcInlet
    }

    fn name(&self) -> &'static str {
        "PooledInletDuct"
    }
}

/// Per-edge receiving duct reading one slot of an [`OutletPool`].
pub struct PooledOutletDuct<T> {
    address: InterProcAddress,
    pool: Arc<Mutex<OutletPool<T>>>,
    index: OnceCell<usize>,
}

impl<T> PooledOutletDuct<T>
where
    T: Clone + Default + Send + 'static,
{
    pub fn new<C, K>(address: InterProcAddress, backend: &PooledBackEnd<T, C, K>) -> Self
    where
        C: Communicator,
        K: Codec<Vec<T>>,
    {
        Self {
            address,
            pool: backend.register_outlet(address),
            index: OnceCell::new(),
        }
    }

    fn index(&self, pool: &OutletPool<T>) -> usize {
        *self.index.get_or_init(|| pool.lookup(&self.address))
    }
}

impl<T> DuctImpl<T> for PooledOutletDuct<T>
where
    T: Clone + Default + Send + 'static,
{
    fn try_put(&self, _val: T) -> Result<(), T> {
        wrong_direction("PooledOutletDuct", "try_put")
    }

    fn try_consume_gets(&self, requested: usize) -> usize {
        let mut pool = self.pool.lock();
        let index = self.index(&pool);
        pool.try_consume_gets(index, requested)
    }

    fn get(&self) -> T {
        let pool = self.pool.lock();
        pool.get(self.index(&pool))
    }

    fn pending(&self) -> usize {
        self.pool.lock().pending()
    }

    fn available_capacity(&self) -> usize {
        wrong_direction("PooledOutletDuct", "available_capacity")
    }

    fn kind(&self) -> DuctKind {
        DuctKind::ProcOutlet
    }

    fn name(&self) -> &'static str {
        "PooledOutletDuct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{CommId, LocalComm, LocalNetwork};
    use crate::ducts::proc::codec::BincodeCodec;

    fn address(tag: u32) -> InterProcAddress {
        InterProcAddress {
            outlet_proc: 1,
            inlet_proc: 0,
            outlet_thread: 0,
            inlet_thread: 0,
            tag,
            comm: CommId::WORLD,
        }
    }

    fn comms() -> (LocalComm, LocalComm, Arc<LocalNetwork>) {
        let net = LocalNetwork::new(2);
        let mut comms = net.communicators();
        let b = comms.pop().unwrap();
        let a = comms.pop().unwrap();
        (a, b, net)
    }

    #[test]
    fn lookup_follows_address_order() {
        let (a, _b, _net) = comms();
        let backend = PooledBackEnd::<u32, _, _>::new(a, BincodeCodec, 4);
        let ducts: Vec<_> = [9, 3, 5]
            .into_iter()
            .map(|tag| PooledInletDuct::new(address(tag), &backend))
            .collect();
        backend.initialize();
        let pool = ducts[0].pool.lock();
        assert_eq!(pool.lookup(&address(3)), 0);
        assert_eq!(pool.lookup(&address(5)), 1);
        assert_eq!(pool.lookup(&address(9)), 2);
    }

    #[test]
    fn batch_leaves_only_after_every_member_put() {
        let (a, b, _net) = comms();
        let send = PooledBackEnd::<u32, _, _>::new(a, BincodeCodec, 4);
        let recv = PooledBackEnd::<u32, _, _>::new(b, BincodeCodec, 4);
        let inlets: Vec<_> = (0..3)
            .map(|tag| PooledInletDuct::new(address(tag), &send))
            .collect();
        let outlets: Vec<_> = (0..3)
            .map(|tag| PooledOutletDuct::new(address(tag), &recv))
            .collect();
        send.initialize();
        recv.initialize();

        inlets[0].try_put(10).unwrap();
        inlets[1].try_put(11).unwrap();
        assert_eq!(outlets[0].pending(), 0);
        inlets[2].try_put(12).unwrap();
        assert_eq!(outlets[0].pending(), 1);

        for (i, outlet) in outlets.iter().enumerate() {
            assert_eq!(outlet.try_consume_gets(1), 1);
            assert_eq!(outlet.get(), 10 + i as u32);
        }
    }

    #[cfg(any(debug_assertions, feature = "check-invariants"))]
    #[test]
    fn double_write_in_one_epoch_panics() {
        let (a, _b, _net) = comms();
        let backend = PooledBackEnd::<u32, _, _>::new(a, BincodeCodec, 4);
        let first = PooledInletDuct::new(address(0), &backend);
        let _second = PooledInletDuct::new(address(1), &backend);
        backend.initialize();
        first.try_put(1).unwrap();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| first.try_put(2)));
        assert!(res.is_err());
    }

    #[test]
    fn registration_after_initialize_panics() {
        let (a, _b, _net) = comms();
        let backend = PooledBackEnd::<u32, _, _>::new(a, BincodeCodec, 4);
        let _first = PooledInletDuct::new(address(0), &backend);
        backend.initialize();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            PooledInletDuct::new(address(1), &backend)
        }));
        assert!(res.is_err());
    }
}
