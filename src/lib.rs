#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-conduit
//!
//! mesh-conduit is a placement-aware message transport for simulations whose
//! work is split into many small computation nodes. Nodes talk through
//! one-way, bounded, non-blocking channels; the same channel API works
//! whether both ends live on one thread, on two threads of one process, or
//! in different processes.
//!
//! ## Features
//! - [`Inlet`](conduit::Inlet)/[`Outlet`](conduit::Outlet) handles over a
//!   swappable [`DuctImpl`](conduit::DuctImpl) transport
//! - Single-thread rings, lock-free SPSC rings across threads
//! - Non-blocking send/receive ducts over a pluggable
//!   [`Communicator`](distributed::Communicator): an in-process
//!   [`LocalNetwork`](distributed::LocalNetwork) for tests and MPI behind
//!   `mpi-support`
//! - Pooled and aggregated backends that carry many edges over one message
//! - A [`Mesh`](mesh::Mesh) compiler that wires a [`Topology`](topology::Topology)
//!   into handles according to a thread and process assignment
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-conduit = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! ```
//! use mesh_conduit::prelude::*;
//!
//! let (mut inlet, mut outlet) = Conduit::<u32>::new(4).into_parts();
//! assert_eq!(outlet.get(), 0);
//! assert!(inlet.try_put(7));
//! assert_eq!(outlet.get_next(), 7);
//! ```
//!
//! ## Debug checks
//!
//! Debug builds, or builds with the `check-invariants` feature, audit that at
//! most one thread drives each side of a duct at a time and that pooled slots
//! are written at most once per epoch. Violations panic.

pub mod conduit;
pub mod conduit_error;
pub mod distributed;
pub mod ducts;
pub mod mesh;
pub mod parallel;
pub mod topology;
pub mod utility;

pub use conduit_error::ConduitError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::conduit::{Conduit, Duct, DuctImpl, DuctKind, Inlet, Outlet, Sink, Source};
    pub use crate::conduit_error::ConduitError;
    pub use crate::distributed::{CommId, Communicator, LocalComm, LocalNetwork, NoComm, Tag};
    #[cfg(feature = "mpi-support")]
    pub use crate::distributed::MpiComm;
    pub use crate::ducts::proc::{BincodeCodec, Codec, InterProcAddress, PodCodec};
    pub use crate::ducts::{IntraDuct, ThreadDuct};
    pub use crate::mesh::{
        AggregatedFactory, DuctFactory, GetSide, LocalFactory, Mesh, MeshNode, PooledFactory,
        ProcTransport, PutSide, StandardFactory, Submesh, WindowFactory,
    };
    pub use crate::topology::{EdgeId, NodeId, ProcId, ThreadId, TopoNode, Topology, assign};
}
