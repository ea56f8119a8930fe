//! Channel handles: the duct contract and the inlet/outlet pair built on it.

pub mod duct;
pub mod inlet;
pub mod outlet;
pub mod pair;

pub use duct::{Duct, DuctImpl, DuctKind};
pub use inlet::{Inlet, InletStats};
pub use outlet::{Outlet, OutletStats};
pub use pair::{Conduit, Sink, Source};
