//! Process-crossing transports.
//!
//! A process-crossing edge is split into two independent halves: the inlet
//! process holds a sending duct and the outlet process a receiving duct,
//! both keyed by the same [`InterProcAddress`]. Payloads travel as bytes
//! produced by a [`Codec`].

pub mod address;
pub mod backend;
pub mod codec;
pub mod iprobe;
pub mod irecv;
pub mod isend;
pub mod window;

pub use address::{InterProcAddress, PoolKey};
pub use codec::{BincodeCodec, Codec, PodCodec};
pub use iprobe::IprobeDuct;
pub use irecv::RingIrecvDuct;
pub use isend::{DequeIsendDuct, Dropping, Growing, IsendDuct, PutPolicy, RingIsendDuct};
pub use window::{WindowInletDuct, WindowOutletDuct};
