//! Transport implementations of the duct contract.

pub mod intra;
pub mod proc;
pub mod thread;

pub use intra::IntraDuct;
pub use thread::ThreadDuct;
