//! Thin façade over the non-blocking point-to-point primitives the
//! inter-process ducts are built on.
//!
//! Messages are *contiguous byte buffers* ([`Bytes`]). Every posted send or
//! receive yields a request handle; completion is observed only through the
//! non-blocking [`test`](Communicator::test). A request must end its life in
//! exactly one of two ways: a `test` that reports completion, or a
//! [`cancel`](Communicator::cancel). Dropping an unfinished request leaks it.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::topology::ProcId;

/// Message tag distinguishing channels between the same pair of processes.
pub type Tag = u32;

/// Identity of a process group. Ducts sharing a pool must share a group.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CommId(pub u32);

impl CommId {
    pub const WORLD: CommId = CommId(0);
}

impl fmt::Display for CommId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "comm{}", self.0)
    }
}

/// Non-blocking point-to-point communication.
pub trait Communicator: Clone + Send + Sync + 'static {
    /// Handle for an in-flight send or receive.
    type Request: Send + 'static;

    fn rank(&self) -> ProcId;

    fn size(&self) -> usize;

    fn comm_id(&self) -> CommId {
        CommId::WORLD
    }

    /// Post a send of `payload` to `dest`.
    fn isend(&self, dest: ProcId, tag: Tag, payload: Bytes) -> Self::Request;

    /// Post a receive of at most `len` bytes from `source`.
    fn irecv(&self, source: ProcId, tag: Tag, len: usize) -> Self::Request;

    /// Non-blocking completion test. Returns the received bytes for a
    /// receive, or an empty buffer for a send, once the request finished.
    fn test(&self, request: &mut Self::Request) -> Option<Bytes>;

    /// Cancel and release a request that has not been observed complete.
    fn cancel(&self, request: Self::Request);

    /// Byte length of the next unmatched message from `source`, if any.
    fn iprobe(&self, source: ProcId, tag: Tag) -> Option<usize>;

    /// Blocking receive; callers use it after a successful `iprobe`.
    fn recv(&self, source: ProcId, tag: Tag, len: usize) -> Bytes;

    /// Collective barrier across the group.
    fn barrier(&self);

    /// Spin until `request` completes. Only for teardown paths.
    fn wait(&self, mut request: Self::Request) -> Bytes {
        loop {
            if let Some(bytes) = self.test(&mut request) {
                return bytes;
            }
            std::hint::spin_loop();
        }
    }
}

/// One-sided extension: write into a remote-accessible window.
pub trait OneSided: Communicator {
    /// Post a put of `payload` into window `window` exposed by `target`.
    fn rput(&self, target: ProcId, window: Tag, payload: Bytes) -> Self::Request;

    /// Latest contents of this rank's window `window`.
    fn read_window(&self, window: Tag) -> Option<Bytes>;
}

/// Single-process communicator for meshes that never cross a process
/// boundary. Any attempt to move bytes through it panics.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

/// Uninhabited request type of [`NoComm`].
#[derive(Debug)]
pub enum NoRequest {}

impl Communicator for NoComm {
    type Request = NoRequest;

    fn rank(&self) -> ProcId {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn isend(&self, dest: ProcId, tag: Tag, _payload: Bytes) -> NoRequest {
        panic!("NoComm cannot send (dest {dest}, tag {tag})")
    }

    fn irecv(&self, source: ProcId, tag: Tag, _len: usize) -> NoRequest {
        panic!("NoComm cannot receive (source {source}, tag {tag})")
    }

    fn test(&self, request: &mut NoRequest) -> Option<Bytes> {
        match *request {}
    }

    fn cancel(&self, request: NoRequest) {
        match request {}
    }

    fn iprobe(&self, _source: ProcId, _tag: Tag) -> Option<usize> {
        None
    }

    fn recv(&self, source: ProcId, tag: Tag, _len: usize) -> Bytes {
        panic!("NoComm cannot receive (source {source}, tag {tag})")
    }

    fn barrier(&self) {}
}
