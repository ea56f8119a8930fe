//! Tag-multiplexed aggregation: many edges' values travel as one map from
//! tag to values.
//!
//! Puts accumulate per tag, up to `per_tag_bound` values each. When every
//! member has called `try_flush` in the current epoch, the whole map goes
//! out as one message. The receiver splits each map back into per-tag
//! stepping queues.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

#[cfg(any(debug_assertions, feature = "check-invariants"))]
use hashbrown::HashSet;

use super::{Member, Registry};
use crate::conduit::duct::{DuctImpl, DuctKind, wrong_direction};
use crate::conduit::{Inlet, Outlet, Sink, Source};
use crate::distributed::{Communicator, Tag};
use crate::ducts::proc::address::InterProcAddress;
use crate::ducts::proc::codec::Codec;
use crate::ducts::proc::iprobe::IprobeDuct;
use crate::ducts::proc::isend::RingIsendDuct;

/// Wire message of an aggregator: values keyed by member tag.
pub type Aggregate<T> = BTreeMap<Tag, Vec<T>>;

fn representative(addresses: &BTreeSet<InterProcAddress>) -> InterProcAddress {
    let Some(rep) = addresses.first().copied() else {
        panic!("aggregator initialized without members");
    };
    for addr in addresses {
        assert!(
            addr.outlet_proc == rep.outlet_proc
                && addr.inlet_thread == rep.inlet_thread
                && addr.comm == rep.comm,
            "aggregator member {addr} disagrees with {rep}"
        );
    }
    rep
}

pub struct InletAggregator<T> {
    addresses: BTreeSet<InterProcAddress>,
    inlet: Option<Inlet<Aggregate<T>>>,
    buffer: Aggregate<T>,
    per_tag_bound: usize,
    /// Flushes seen this epoch.
    flush_counter: usize,
    #[cfg(any(debug_assertions, feature = "check-invariants"))]
    flushed: HashSet<Tag>,
}

impl<T> InletAggregator<T> {
    pub fn new(per_tag_bound: usize) -> Self {
        assert!(per_tag_bound > 0, "aggregator bound must be non-zero");
        Self {
            addresses: BTreeSet::new(),
            inlet: None,
            buffer: BTreeMap::new(),
            per_tag_bound,
            flush_counter: 0,
            #[cfg(any(debug_assertions, feature = "check-invariants"))]
            flushed: HashSet::new(),
        }
    }
}

impl<T> Member for InletAggregator<T> {
    fn register(&mut self, address: InterProcAddress) {
        assert!(self.inlet.is_none(), "{address} joined an initialized aggregator");
        assert!(self.addresses.insert(address), "{address} registered twice");
    }

    fn len(&self) -> usize {
        self.addresses.len()
    }
}

impl<T: Clone + Default + Send + 'static> InletAggregator<T> {
    pub fn is_initialized(&self) -> bool {
        self.inlet.is_some()
    }

    pub fn initialize<C, K>(&mut self, comm: &C, codec: &K, capacity: usize)
    where
        C: Communicator,
        K: Codec<Aggregate<T>>,
    {
        assert!(!self.is_initialized(), "InletAggregator initialized twice");
        let rep = representative(&self.addresses);
        assert_eq!(
            rep.inlet_proc,
            comm.rank(),
            "InletAggregator for {rep} initialized on rank {}",
            comm.rank()
        );
        let duct = RingIsendDuct::<Aggregate<T>, C, K>::new(rep, comm.clone(), codec.clone(), capacity);
        self.inlet = Some(Sink::new(duct).into_inlet());
        log::debug!(
            "InletAggregator for {rep} initialized with {} members",
            self.addresses.len()
        );
    }

    /// Buffer `val` under `tag`, or hand it back once `tag` holds
    /// `per_tag_bound` values.
    pub fn try_put(&mut self, val: T, tag: Tag) -> Result<(), T> {
        assert!(self.is_initialized(), "put before initialize");
        let queue = self.buffer.entry(tag).or_default();
        if queue.len() >= self.per_tag_bound {
            return Err(val);
        }
        queue.push(val);
        Ok(())
    }

    /// Count `tag`'s flush for this epoch; the last member's call sends the
    /// aggregate. A refused send keeps the buffer for the next epoch.
    pub fn try_flush(&mut self, tag: Tag) -> bool {
        assert!(self.is_initialized(), "flush before initialize");
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        assert!(
            self.flushed.insert(tag),
            "tag {tag} flushed twice in one epoch"
        );
        self.flush_counter += 1;
        if self.flush_counter < self.addresses.len() {
            return true;
        }
        self.flush_counter = 0;
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.flushed.clear();

        let Some(inlet) = self.inlet.as_mut() else {
            return false;
        };
        if self.buffer.is_empty() {
            return inlet.try_flush();
        }
        match inlet.try_put_or_return(std::mem::take(&mut self.buffer)) {
            Ok(()) => inlet.try_flush(),
            Err(batch) => {
                log::trace!("aggregate of {} tags held back", batch.len());
                self.buffer = batch;
                false
            }
        }
    }

    pub fn pending(&self, tag: Tag) -> usize {
        self.buffer.get(&tag).map_or(0, Vec::len)
    }

    pub fn available_capacity(&self, tag: Tag) -> usize {
        self.per_tag_bound - self.pending(tag)
    }
}

#[derive(Default)]
struct TagQueue<T> {
    current: T,
    queue: VecDeque<T>,
}

pub struct OutletAggregator<T> {
    addresses: BTreeSet<InterProcAddress>,
    outlet: Option<Outlet<Aggregate<T>>>,
    queues: HashMap<Tag, TagQueue<T>>,
}

impl<T> Default for OutletAggregator<T> {
    fn default() -> Self {
        Self {
            addresses: BTreeSet::new(),
            outlet: None,
            queues: HashMap::new(),
        }
    }
}

impl<T> Member for OutletAggregator<T> {
    fn register(&mut self, address: InterProcAddress) {
        assert!(self.outlet.is_none(), "{address} joined an initialized aggregator");
        assert!(self.addresses.insert(address), "{address} registered twice");
    }

    fn len(&self) -> usize {
        self.addresses.len()
    }
}

impl<T: Clone + Default + Send + 'static> OutletAggregator<T> {
    pub fn is_initialized(&self) -> bool {
        self.outlet.is_some()
    }

    pub fn initialize<C, K>(&mut self, comm: &C, codec: &K)
    where
        C: Communicator,
        K: Codec<Aggregate<T>>,
    {
        assert!(!self.is_initialized(), "OutletAggregator initialized twice");
        let rep = representative(&self.addresses);
        assert_eq!(
            rep.outlet_proc,
            comm.rank(),
            "OutletAggregator for {rep} initialized on rank {}",
            comm.rank()
        );
        self.queues = self
            .addresses
            .iter()
            .map(|addr| (addr.tag, TagQueue::default()))
            .collect();
        let duct = IprobeDuct::<Aggregate<T>, C, K>::new(rep, comm.clone(), codec.clone());
        self.outlet = Some(Source::new(duct).into_outlet());
        log::debug!(
            "OutletAggregator for {rep} initialized with {} members",
            self.addresses.len()
        );
    }

    /// Split every arrived aggregate into the per-tag queues.
    fn refill(&mut self) {
        let Some(outlet) = self.outlet.as_mut() else {
            return;
        };
        while outlet.try_step(1) == 1 {
            for (tag, vals) in outlet.get() {
                match self.queues.get_mut(&tag) {
                    Some(q) => q.queue.extend(vals),
                    None => log::warn!("aggregate carried unregistered tag {tag}"),
                }
            }
        }
    }

    fn queue_mut(&mut self, tag: Tag) -> &mut TagQueue<T> {
        match self.queues.get_mut(&tag) {
            Some(q) => q,
            None => panic!("tag {tag} is not a member of this aggregator"),
        }
    }

    pub fn try_consume_gets(&mut self, tag: Tag, requested: usize) -> usize {
        self.refill();
        let q = self.queue_mut(tag);
        let num_consumed = requested.min(q.queue.len());
        for _ in 0..num_consumed {
            if let Some(val) = q.queue.pop_front() {
                q.current = val;
            }
        }
        num_consumed
    }

    pub fn get(&mut self, tag: Tag) -> T {
        self.queue_mut(tag).current.clone()
    }

    pub fn pending(&mut self, tag: Tag) -> usize {
        self.refill();
        self.queue_mut(tag).queue.len()
    }
}

pub struct AggregatedBackEnd<T, C, K> {
    comm: C,
    codec: K,
    capacity: usize,
    per_tag_bound: usize,
    inlets: Registry<InletAggregator<T>>,
    outlets: Registry<OutletAggregator<T>>,
}

impl<T, C, K> AggregatedBackEnd<T, C, K>
where
    T: Clone + Default + Send + 'static,
    C: Communicator,
    K: Codec<Aggregate<T>>,
{
    pub fn new(comm: C, codec: K, capacity: usize, per_tag_bound: usize) -> Arc<Self> {
        Arc::new(Self {
            comm,
            codec,
            capacity,
            per_tag_bound,
            inlets: Registry::new(),
            outlets: Registry::new(),
        })
    }

    pub fn register_inlet(&self, address: InterProcAddress) -> Arc<Mutex<InletAggregator<T>>> {
        let bound = self.per_tag_bound;
        self.inlets.register(address, || InletAggregator::new(bound))
    }

    pub fn register_outlet(&self, address: InterProcAddress) -> Arc<Mutex<OutletAggregator<T>>> {
        self.outlets.register(address, OutletAggregator::default)
    }

    pub fn initialize(&self) {
        self.inlets
            .initialize(|_, agg| agg.initialize(&self.comm, &self.codec, self.capacity));
        self.outlets
            .initialize(|_, agg| agg.initialize(&self.comm, &self.codec));
        log::debug!(
            "AggregatedBackEnd on rank {} initialized {} inlet and {} outlet aggregators",
            self.comm.rank(),
            self.inlets.num_pools(),
            self.outlets.num_pools()
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.inlets.is_initialized() && self.outlets.is_initialized()
    }
}

/// Per-edge sending duct buffering into an [`InletAggregator`]. Values
/// leave only through [`try_flush`](DuctImpl::try_flush).
pub struct AggregatedInletDuct<T> {
    tag: Tag,
    aggregator: Arc<Mutex<InletAggregator<T>>>,
}

impl<T: Clone + Default + Send + 'static> AggregatedInletDuct<T> {
    pub fn new<C, K>(address: InterProcAddress, backend: &AggregatedBackEnd<T, C, K>) -> Self
    where
        C: Communicator,
        K: Codec<Aggregate<T>>,
    {
        Self {
            tag: address.tag,
            aggregator: backend.register_inlet(address),
        }
    }
}

impl<T: Clone + Default + Send + 'static> DuctImpl<T> for AggregatedInletDuct<T> {
    fn try_put(&self, val: T) -> Result<(), T> {
        self.aggregator.lock().try_put(val, self.tag)
    }

    fn try_flush(&self) -> bool {
        self.aggregator.lock().try_flush(self.tag)
    }

    fn try_consume_gets(&self, _requested: usize) -> usize {
        wrong_direction("AggregatedInletDuct", "try_consume_gets")
    }

    fn get(&self) -> T {
        wrong_direction("AggregatedInletDuct", "get")
    }

    /// Values buffered under this edge's tag, not yet flushed.
    fn pending(&self) -> usize {
        self.aggregator.lock().pending(self.tag)
    }

    fn available_capacity(&self) -> usize {
        self.aggregator.lock().available_capacity(self.tag)
    }

    fn kind(&self) -> DuctKind {
        DuctKind::ProcInlet
    }

    fn name(&self) -> &'static str {
        "AggregatedInletDuct"
    }
}

/// Per-edge receiving duct stepping this edge's queue in an
/// [`OutletAggregator`].
pub struct AggregatedOutletDuct<T> {
    tag: Tag,
    aggregator: Arc<Mutex<OutletAggregator<T>>>,
}

impl<T: Clone + Default + Send + 'static> AggregatedOutletDuct<T> {
    pub fn new<C, K>(address: InterProcAddress, backend: &AggregatedBackEnd<T, C, K>) -> Self
    where
        C: Communicator,
        K: Codec<Aggregate<T>>,
    {
        Self {
            tag: address.tag,
            aggregator: backend.register_outlet(address),
        }
    }
}

impl<T: Clone + Default + Send + 'static> DuctImpl<T> for AggregatedOutletDuct<T> {
    fn try_put(&self, _val: T) -> Result<(), T> {
        wrong_direction("AggregatedOutletDuct", "try_put")
    }

    fn try_consume_gets(&self, requested: usize) -> usize {
        self.aggregator.lock().try_consume_gets(self.tag, requested)
    }

    fn get(&self) -> T {
        self.aggregator.lock().get(self.tag)
    }

    fn pending(&self) -> usize {
        self.aggregator.lock().pending(self.tag)
    }

    fn available_capacity(&self) -> usize {
        wrong_direction("AggregatedOutletDuct", "available_capacity")
    }

    fn kind(&self) -> DuctKind {
        DuctKind::ProcOutlet
    }

    fn name(&self) -> &'static str {
        "AggregatedOutletDuct"
    }
}
