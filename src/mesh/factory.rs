//! Transport selection for [`Mesh`](super::Mesh) construction.
//!
//! A factory hands the mesh one fresh duct implementation per placement
//! decision. Intra- and cross-thread ducts are the same for every factory;
//! factories differ in how they build the two halves of a process-crossing
//! edge.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::conduit::DuctImpl;
use crate::conduit_error::ConduitError;
use crate::distributed::{CommId, Communicator, OneSided};
use crate::ducts::proc::backend::aggregator::Aggregate;
use crate::ducts::proc::backend::{
    AggregatedBackEnd, AggregatedInletDuct, AggregatedOutletDuct, PooledBackEnd,
    PooledInletDuct, PooledOutletDuct,
};
use crate::ducts::proc::{
    Codec, DequeIsendDuct, InterProcAddress, IprobeDuct, RingIrecvDuct, RingIsendDuct,
    WindowInletDuct, WindowOutletDuct,
};
use crate::ducts::{IntraDuct, ThreadDuct};
use crate::topology::ProcId;

/// Default per-duct capacity.
pub const DEFAULT_BUFFER: usize = 1024;

pub trait DuctFactory<T>: Send + Sync
where
    T: Clone + Default + Send + 'static,
{
    fn capacity(&self) -> usize;

    /// Process whose halves of process-crossing edges this factory builds.
    fn local_proc(&self) -> ProcId;

    fn comm_id(&self) -> CommId {
        CommId::WORLD
    }

    fn intra(&self) -> Box<dyn DuctImpl<T>> {
        Box::new(IntraDuct::new(self.capacity()))
    }

    fn thread(&self) -> Box<dyn DuctImpl<T>> {
        Box::new(ThreadDuct::new(self.capacity()))
    }

    fn proc_inlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>>;

    fn proc_outlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>>;

    /// Called once after every duct has been built.
    fn finalize(&self) {}
}

/// Factory for meshes confined to one process.
#[derive(Clone, Debug)]
pub struct LocalFactory {
    capacity: usize,
}

impl LocalFactory {
    pub fn new(capacity: usize) -> Result<Self, ConduitError> {
        if capacity == 0 {
            return Err(ConduitError::ZeroCapacity);
        }
        Ok(Self { capacity })
    }
}

impl Default for LocalFactory {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER,
        }
    }
}

impl<T: Clone + Default + Send + 'static> DuctFactory<T> for LocalFactory {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn local_proc(&self) -> ProcId {
        0
    }

    fn proc_inlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>> {
        panic!("LocalFactory cannot build a process-crossing duct for {address}")
    }

    fn proc_outlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>> {
        panic!("LocalFactory cannot build a process-crossing duct for {address}")
    }
}

/// What the sending half does with puts beyond its bound.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PutSide {
    #[default]
    Dropping,
    Growing,
}

/// How the receiving half learns about arrivals.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GetSide {
    /// Pre-posted fixed-size receives; needs a fixed-length codec.
    Ring,
    /// Probe and receive on demand; any codec.
    #[default]
    Probe,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcTransport {
    pub put: PutSide,
    pub get: GetSide,
}

/// One physical point-to-point channel per process-crossing edge.
pub struct StandardFactory<T, C, K> {
    comm: C,
    codec: K,
    capacity: usize,
    transport: ProcTransport,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, C, K> StandardFactory<T, C, K>
where
    C: Communicator,
    K: Codec<T>,
{
    /// # Errors
    ///
    /// [`ConduitError::ZeroCapacity`] for a zero capacity and
    /// [`ConduitError::VariableLengthCodec`] for a ring get side over a
    /// codec without a fixed length.
    pub fn new(
        comm: C,
        codec: K,
        capacity: usize,
        transport: ProcTransport,
    ) -> Result<Self, ConduitError> {
        if capacity == 0 {
            return Err(ConduitError::ZeroCapacity);
        }
        if transport.get == GetSide::Ring && codec.fixed_len().is_none() {
            return Err(ConduitError::VariableLengthCodec("RingIrecvDuct"));
        }
        Ok(Self {
            comm,
            codec,
            capacity,
            transport,
            _marker: PhantomData,
        })
    }

    pub fn transport(&self) -> ProcTransport {
        self.transport
    }
}

impl<T, C, K> DuctFactory<T> for StandardFactory<T, C, K>
where
    T: Clone + Default + Send + 'static,
    C: Communicator,
    K: Codec<T>,
{
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn local_proc(&self) -> ProcId {
        self.comm.rank()
    }

    fn comm_id(&self) -> CommId {
        self.comm.comm_id()
    }

    fn proc_inlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>> {
        let (comm, codec) = (self.comm.clone(), self.codec.clone());
        match self.transport.put {
            PutSide::Dropping => Box::new(RingIsendDuct::<T, C, K>::new(
                address,
                comm,
                codec,
                self.capacity,
            )),
            PutSide::Growing => Box::new(DequeIsendDuct::<T, C, K>::new(
                address,
                comm,
                codec,
                self.capacity,
            )),
        }
    }

    fn proc_outlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>> {
        let (comm, codec) = (self.comm.clone(), self.codec.clone());
        match self.transport.get {
            GetSide::Ring => {
                match RingIrecvDuct::<T, C, K>::new(address, comm, codec, self.capacity) {
                    Ok(duct) => Box::new(duct),
                    // checked in `new`
                    Err(e) => panic!("{e}"),
                }
            }
            GetSide::Probe => Box::new(IprobeDuct::<T, C, K>::new(address, comm, codec)),
        }
    }
}

/// Process-crossing edges between the same endpoint pair share one
/// fixed-slot batch per epoch.
///
/// The backend initializes in [`finalize`](DuctFactory::finalize), so a
/// factory serves exactly one mesh.
pub struct PooledFactory<T, C, K> {
    backend: Arc<PooledBackEnd<T, C, K>>,
    rank: ProcId,
    comm_id: CommId,
    capacity: usize,
}

impl<T, C, K> PooledFactory<T, C, K>
where
    T: Clone + Default + Send + 'static,
    C: Communicator,
    K: Codec<Vec<T>>,
{
    pub fn new(comm: C, codec: K, capacity: usize) -> Result<Self, ConduitError> {
        if capacity == 0 {
            return Err(ConduitError::ZeroCapacity);
        }
        Ok(Self {
            rank: comm.rank(),
            comm_id: comm.comm_id(),
            backend: PooledBackEnd::new(comm, codec, capacity),
            capacity,
        })
    }

    pub fn backend(&self) -> &Arc<PooledBackEnd<T, C, K>> {
        &self.backend
    }
}

impl<T, C, K> DuctFactory<T> for PooledFactory<T, C, K>
where
    T: Clone + Default + Send + 'static,
    C: Communicator,
    K: Codec<Vec<T>>,
{
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn local_proc(&self) -> ProcId {
        self.rank
    }

    fn comm_id(&self) -> CommId {
        self.comm_id
    }

    fn proc_inlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>> {
        Box::new(PooledInletDuct::new(address, &self.backend))
    }

    fn proc_outlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>> {
        Box::new(PooledOutletDuct::new(address, &self.backend))
    }

    fn finalize(&self) {
        self.backend.initialize();
    }
}

/// Process-crossing edges between the same endpoint pair share one
/// tag-keyed aggregate, flushed once per epoch.
pub struct AggregatedFactory<T, C, K> {
    backend: Arc<AggregatedBackEnd<T, C, K>>,
    rank: ProcId,
    comm_id: CommId,
    capacity: usize,
}

impl<T, C, K> AggregatedFactory<T, C, K>
where
    T: Clone + Default + Send + 'static,
    C: Communicator,
    K: Codec<Aggregate<T>>,
{
    pub fn new(
        comm: C,
        codec: K,
        capacity: usize,
        per_tag_bound: usize,
    ) -> Result<Self, ConduitError> {
        if capacity == 0 || per_tag_bound == 0 {
            return Err(ConduitError::ZeroCapacity);
        }
        Ok(Self {
            rank: comm.rank(),
            comm_id: comm.comm_id(),
            backend: AggregatedBackEnd::new(comm, codec, capacity, per_tag_bound),
            capacity,
        })
    }

    pub fn backend(&self) -> &Arc<AggregatedBackEnd<T, C, K>> {
        &self.backend
    }
}

impl<T, C, K> DuctFactory<T> for AggregatedFactory<T, C, K>
where
    T: Clone + Default + Send + 'static,
    C: Communicator,
    K: Codec<Aggregate<T>>,
{
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn local_proc(&self) -> ProcId {
        self.rank
    }

    fn comm_id(&self) -> CommId {
        self.comm_id
    }

    fn proc_inlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>> {
        Box::new(AggregatedInletDuct::new(address, &self.backend))
    }

    fn proc_outlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>> {
        Box::new(AggregatedOutletDuct::new(address, &self.backend))
    }

    fn finalize(&self) {
        self.backend.initialize();
    }
}

/// One-sided windows: receivers always see the newest value.
pub struct WindowFactory<T, C, K> {
    comm: C,
    codec: K,
    capacity: usize,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, C: OneSided, K: Codec<T>> WindowFactory<T, C, K> {
    pub fn new(comm: C, codec: K, capacity: usize) -> Result<Self, ConduitError> {
        if capacity == 0 {
            return Err(ConduitError::ZeroCapacity);
        }
        Ok(Self {
            comm,
            codec,
            capacity,
            _marker: PhantomData,
        })
    }
}

impl<T, C, K> DuctFactory<T> for WindowFactory<T, C, K>
where
    T: Clone + Default + Send + 'static,
    C: OneSided,
    K: Codec<T>,
{
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn local_proc(&self) -> ProcId {
        self.comm.rank()
    }

    fn comm_id(&self) -> CommId {
        self.comm.comm_id()
    }

    fn proc_inlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>> {
        Box::new(WindowInletDuct::<T, C, K>::new(
            address,
            self.comm.clone(),
            self.codec.clone(),
            self.capacity,
        ))
    }

    fn proc_outlet(&self, address: InterProcAddress) -> Box<dyn DuctImpl<T>> {
        Box::new(WindowOutletDuct::<T, C, K>::new(
            address,
            self.comm.clone(),
            self.codec.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conduit::DuctKind;
    use crate::distributed::{CommId, LocalNetwork, NoComm};
    use crate::ducts::proc::{BincodeCodec, PodCodec};

    #[test]
    fn ring_get_side_needs_fixed_length() {
        let transport = ProcTransport {
            put: PutSide::Dropping,
            get: GetSide::Ring,
        };
        let res = StandardFactory::<String, _, _>::new(NoComm, BincodeCodec, 8, transport);
        assert_eq!(
            res.err(),
            Some(ConduitError::VariableLengthCodec("RingIrecvDuct"))
        );
        assert!(StandardFactory::<u64, _, _>::new(NoComm, PodCodec, 8, transport).is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(LocalFactory::new(0).err(), Some(ConduitError::ZeroCapacity));
        let res = StandardFactory::<u64, _, _>::new(
            NoComm,
            PodCodec,
            0,
            ProcTransport::default(),
        );
        assert_eq!(res.err(), Some(ConduitError::ZeroCapacity));
    }

    #[test]
    fn standard_factory_builds_configured_halves() {
        let net = LocalNetwork::new(2);
        let comm = net.communicators().remove(0);
        let transport = ProcTransport {
            put: PutSide::Growing,
            get: GetSide::Probe,
        };
        let factory = StandardFactory::<u64, _, _>::new(comm, PodCodec, 4, transport).unwrap();
        let inlet_addr = InterProcAddress {
            outlet_proc: 1,
            inlet_proc: 0,
            outlet_thread: 0,
            inlet_thread: 0,
            tag: 1,
            comm: CommId::WORLD,
        };
        let outlet_addr = InterProcAddress {
            outlet_proc: 0,
            inlet_proc: 1,
            ..inlet_addr
        };
        let inlet = factory.proc_inlet(inlet_addr);
        let outlet = factory.proc_outlet(outlet_addr);
        assert_eq!(inlet.name(), "DequeIsendDuct");
        assert_eq!(inlet.kind(), DuctKind::ProcInlet);
        assert_eq!(outlet.name(), "IprobeDuct");
        assert_eq!(DuctFactory::<u64>::thread(&factory).kind(), DuctKind::Thread);
    }
}
