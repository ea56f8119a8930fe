//! Placement-aware channel construction.
//!
//! [`Mesh::new`] turns a [`Topology`] plus node→thread and node→process
//! assignments into live inlet/outlet handles:
//!
//! 1. every edge starts as one intra-thread duct shared by its two handles;
//! 2. edges whose endpoints sit on different threads of the same process get
//!    a cross-thread duct emplaced in place, visible to both handles;
//! 3. edges that cross processes are split: on the factory's local process
//!    the handle that lives here is rebound to a sending or receiving half
//!    addressed by the edge id;
//! 4. the factory finalizes any shared backend.
//!
//! Handles of nodes placed on other processes stay behind as inert
//! placeholders and are dropped by [`Mesh::into_submeshes`].

pub mod factory;
pub mod node;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::conduit::{Duct, Inlet, Outlet};
use crate::conduit_error::ConduitError;
use crate::distributed::Tag;
use crate::ducts::proc::InterProcAddress;
use crate::topology::{NodeId, ProcId, ThreadId, Topology};

pub use factory::{
    AggregatedFactory, DEFAULT_BUFFER, DuctFactory, GetSide, LocalFactory, PooledFactory,
    ProcTransport, PutSide, StandardFactory, WindowFactory,
};
pub use node::{MeshNode, MeshNodeInput, MeshNodeOutput};

/// Nodes one worker thread drives, with their ids.
pub type Submesh<T> = Vec<(NodeId, MeshNode<T>)>;

pub struct Mesh<T> {
    nodes: Vec<Option<MeshNode<T>>>,
    threads: Vec<ThreadId>,
    procs: Vec<ProcId>,
    local_proc: ProcId,
}

impl<T: Clone + Default + Send + 'static> Mesh<T> {
    /// # Errors
    ///
    /// [`ConduitError::TagOutOfRange`] if a process-crossing edge id does
    /// not fit a message tag.
    pub fn new<F, TA, PA>(
        topology: &Topology,
        thread_assignment: TA,
        proc_assignment: PA,
        factory: &F,
    ) -> Result<Self, ConduitError>
    where
        F: DuctFactory<T> + ?Sized,
        TA: Fn(NodeId) -> ThreadId,
        PA: Fn(NodeId) -> ProcId,
    {
        let threads: Vec<ThreadId> = (0..topology.len()).map(thread_assignment).collect();
        let procs: Vec<ProcId> = (0..topology.len()).map(proc_assignment).collect();
        let local_proc = factory.local_proc();

        let mut nodes = build_nodes(topology, factory)?;
        emplace_thread_ducts(topology, &threads, &procs, &mut nodes, factory);
        split_proc_ducts(topology, &threads, &procs, local_proc, &mut nodes, factory)?;
        factory.finalize();

        log::debug!(
            "mesh of {} nodes and {} edges built for process {local_proc}",
            topology.len(),
            topology.num_edges()
        );
        Ok(Self {
            nodes: nodes.into_iter().map(Some).collect(),
            threads,
            procs,
            local_proc,
        })
    }
}

/// One shared intra-thread duct per edge.
fn build_nodes<T, F>(topology: &Topology, factory: &F) -> Result<Vec<MeshNode<T>>, ConduitError>
where
    T: Clone + Default + Send + 'static,
    F: DuctFactory<T> + ?Sized,
{
    let mut inlets = BTreeMap::new();
    let mut outlets = BTreeMap::new();
    for edge in topology.edges() {
        let duct = Arc::new(Duct::new(factory.intra()));
        inlets.insert(edge, Inlet::new(Arc::clone(&duct)));
        outlets.insert(edge, Outlet::new(duct));
    }
    topology
        .nodes()
        .iter()
        .map(|tn| {
            let inputs = tn
                .inputs
                .iter()
                .map(|&e| {
                    let outlet = outlets.remove(&e).ok_or(ConduitError::DuplicateInput(e))?;
                    Ok(MeshNodeInput::new(e, outlet))
                })
                .collect::<Result<_, ConduitError>>()?;
            let outputs = tn
                .outputs
                .iter()
                .map(|&e| {
                    let inlet = inlets.remove(&e).ok_or(ConduitError::DuplicateOutput(e))?;
                    Ok(MeshNodeOutput::new(e, inlet))
                })
                .collect::<Result<_, ConduitError>>()?;
            Ok(MeshNode::new(inputs, outputs))
        })
        .collect()
}

fn emplace_thread_ducts<T, F>(
    topology: &Topology,
    threads: &[ThreadId],
    procs: &[ProcId],
    nodes: &mut [MeshNode<T>],
    factory: &F,
) where
    T: Clone + Default + Send + 'static,
    F: DuctFactory<T> + ?Sized,
{
    for (node_id, node) in nodes.iter_mut().enumerate() {
        for input in node.inputs_mut() {
            let Some(their_node) = topology.producer_of(input.edge()) else {
                continue;
            };
            if procs[node_id] == procs[their_node] && threads[node_id] != threads[their_node] {
                log::debug!(
                    "edge {} ({their_node} -> {node_id}) crosses threads {} -> {}",
                    input.edge(),
                    threads[their_node],
                    threads[node_id]
                );
                input.emplace_duct_boxed(factory.thread());
            }
        }
    }
}

fn edge_tag(edge: usize) -> Result<Tag, ConduitError> {
    Tag::try_from(edge).map_err(|_| ConduitError::TagOutOfRange(edge))
}

fn split_proc_ducts<T, F>(
    topology: &Topology,
    threads: &[ThreadId],
    procs: &[ProcId],
    local_proc: ProcId,
    nodes: &mut [MeshNode<T>],
    factory: &F,
) -> Result<(), ConduitError>
where
    T: Clone + Default + Send + 'static,
    F: DuctFactory<T> + ?Sized,
{
    let comm = factory.comm_id();
    for (node_id, node) in nodes.iter_mut().enumerate() {
        let my_proc = procs[node_id];
        if my_proc != local_proc {
            continue;
        }
        for input in node.inputs_mut() {
            let Some(their_node) = topology.producer_of(input.edge()) else {
                continue;
            };
            if procs[their_node] == my_proc {
                continue;
            }
            let address = InterProcAddress {
                outlet_proc: my_proc,
                inlet_proc: procs[their_node],
                outlet_thread: threads[node_id],
                inlet_thread: threads[their_node],
                tag: edge_tag(input.edge())?,
                comm,
            };
            log::debug!("edge {} receives over {address}", input.edge());
            input.split_duct_boxed(factory.proc_outlet(address));
        }
        for output in node.outputs_mut() {
            let Some(their_node) = topology.consumer_of(output.edge()) else {
                continue;
            };
            if procs[their_node] == my_proc {
                continue;
            }
            let address = InterProcAddress {
                outlet_proc: procs[their_node],
                inlet_proc: my_proc,
                outlet_thread: threads[their_node],
                inlet_thread: threads[node_id],
                tag: edge_tag(output.edge())?,
                comm,
            };
            log::debug!("edge {} sends over {address}", output.edge());
            output.split_duct_boxed(factory.proc_inlet(address));
        }
    }
    Ok(())
}

impl<T> Mesh<T> {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn local_proc(&self) -> ProcId {
        self.local_proc
    }

    pub fn thread_of(&self, node: NodeId) -> Result<ThreadId, ConduitError> {
        self.threads
            .get(node)
            .copied()
            .ok_or(ConduitError::UnknownNode(node))
    }

    pub fn proc_of(&self, node: NodeId) -> Result<ProcId, ConduitError> {
        self.procs
            .get(node)
            .copied()
            .ok_or(ConduitError::UnknownNode(node))
    }

    /// `None` for unknown or already-taken nodes.
    pub fn node(&self, node: NodeId) -> Option<&MeshNode<T>> {
        self.nodes.get(node)?.as_ref()
    }

    pub fn node_mut(&mut self, node: NodeId) -> Option<&mut MeshNode<T>> {
        self.nodes.get_mut(node)?.as_mut()
    }

    pub fn take_node(&mut self, node: NodeId) -> Option<MeshNode<T>> {
        self.nodes.get_mut(node)?.take()
    }

    /// Remove and return the local process's nodes assigned to `thread`.
    pub fn take_submesh(&mut self, thread: ThreadId) -> Submesh<T> {
        let mut res = Vec::new();
        for (id, slot) in self.nodes.iter_mut().enumerate() {
            if self.threads[id] == thread && self.procs[id] == self.local_proc {
                if let Some(node) = slot.take() {
                    res.push((id, node));
                }
            }
        }
        res
    }

    /// Local nodes grouped by thread; nodes of other processes are dropped.
    pub fn into_submeshes(self) -> BTreeMap<ThreadId, Submesh<T>> {
        let mut res: BTreeMap<ThreadId, Submesh<T>> = BTreeMap::new();
        for (id, slot) in self.nodes.into_iter().enumerate() {
            if self.procs[id] != self.local_proc {
                continue;
            }
            if let Some(node) = slot {
                res.entry(self.threads[id]).or_default().push((id, node));
            }
        }
        res
    }
}

impl<T: Send> Mesh<T> {
    /// Run `work` once per local thread id, each on its own scoped OS thread,
    /// and collect the results. A panicking worker is re-raised here.
    pub fn run_threads<F, R>(self, work: F) -> BTreeMap<ThreadId, R>
    where
        F: Fn(ThreadId, Submesh<T>) -> R + Sync,
        R: Send,
    {
        let submeshes = self.into_submeshes();
        let work = &work;
        std::thread::scope(|s| {
            let handles: Vec<_> = submeshes
                .into_iter()
                .map(|(thread, submesh)| (thread, s.spawn(move || work(thread, submesh))))
                .collect();
            handles
                .into_iter()
                .map(|(thread, handle)| match handle.join() {
                    Ok(res) => (thread, res),
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

impl<T> std::fmt::Debug for Mesh<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("len", &self.nodes.len())
            .field("local_proc", &self.local_proc)
            .field("threads", &self.threads)
            .field("procs", &self.procs)
            .finish()
    }
}
