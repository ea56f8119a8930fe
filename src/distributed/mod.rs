//! Process-level communication backends.

pub mod communicator;
pub mod local;
#[cfg(feature = "mpi-support")]
pub mod mpi;

pub use communicator::{CommId, Communicator, NoComm, NoRequest, OneSided, Tag};
pub use local::{LocalComm, LocalNetwork, LocalRequest};
#[cfg(feature = "mpi-support")]
pub use self::mpi::{MpiComm, MpiRequest};
