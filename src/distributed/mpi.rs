//! MPI backend, enabled by the `mpi-support` feature.
//!
//! Requests are driven through the raw bindings because they outlive any
//! lexical scope: a duct posts them in one call and tests or cancels them in
//! a later one. Each request owns the storage its buffer points into.

use std::mem::MaybeUninit;
use std::os::raw::c_int;

use bytes::Bytes;
use mpi::ffi;
use mpi::raw::AsRaw;
use mpi::traits::Communicator as _;

use super::communicator::{CommId, Communicator, Tag};
use crate::topology::ProcId;

fn raw_tag(tag: Tag) -> c_int {
    match c_int::try_from(tag) {
        Ok(tag) => tag,
        Err(_) => panic!("tag {tag} exceeds the MPI tag range"),
    }
}

fn raw_rank(rank: ProcId) -> c_int {
    match c_int::try_from(rank) {
        Ok(rank) => rank,
        Err(_) => panic!("rank {rank} exceeds the MPI rank range"),
    }
}

fn raw_len(len: usize) -> c_int {
    match c_int::try_from(len) {
        Ok(len) => len,
        Err(_) => panic!("message of {len} bytes exceeds the MPI count range"),
    }
}

enum Storage {
    Send(Bytes),
    Recv(Box<[u8]>),
}

/// In-flight MPI request plus the buffer it reads from or writes into.
pub struct MpiRequest {
    raw: ffi::MPI_Request,
    storage: Storage,
}

// SAFETY: the handle is an opaque token owned by exactly one duct, and the
// buffer it references moves with it.
unsafe impl Send for MpiRequest {}

/// Communicator backed by a raw MPI communicator handle.
#[derive(Clone)]
pub struct MpiComm {
    raw: ffi::MPI_Comm,
    rank: ProcId,
    size: usize,
    id: CommId,
}

// SAFETY: MPI must be initialized with `Threading::Multiple` when ranks are
// driven from several threads; the handle itself is immutable.
unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl MpiComm {
    /// Wrap the world communicator of an initialized universe.
    pub fn world(universe: &mpi::environment::Universe) -> Self {
        Self::from_comm(&universe.world(), CommId::WORLD)
    }

    pub fn from_comm<C: mpi::traits::Communicator + AsRaw<Raw = ffi::MPI_Comm>>(
        comm: &C,
        id: CommId,
    ) -> Self {
        Self {
            raw: comm.as_raw(),
            rank: comm.rank() as ProcId,
            size: comm.size() as usize,
            id,
        }
    }
}

impl std::fmt::Debug for MpiComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpiComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("id", &self.id)
            .finish()
    }
}

impl Communicator for MpiComm {
    type Request = MpiRequest;

    fn rank(&self) -> ProcId {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn comm_id(&self) -> CommId {
        self.id
    }

    fn isend(&self, dest: ProcId, tag: Tag, payload: Bytes) -> MpiRequest {
        let mut raw = MaybeUninit::<ffi::MPI_Request>::uninit();
        // SAFETY: `payload` is kept alive in the returned request.
        unsafe {
            ffi::MPI_Isend(
                payload.as_ptr().cast(),
                raw_len(payload.len()),
                ffi::RSMPI_UINT8_T,
                raw_rank(dest),
                raw_tag(tag),
                self.raw,
                raw.as_mut_ptr(),
            );
            MpiRequest {
                raw: raw.assume_init(),
                storage: Storage::Send(payload),
            }
        }
    }

    fn irecv(&self, source: ProcId, tag: Tag, len: usize) -> MpiRequest {
        let mut buffer = vec![0u8; len].into_boxed_slice();
        let mut raw = MaybeUninit::<ffi::MPI_Request>::uninit();
        // SAFETY: the boxed buffer does not move when the request moves.
        unsafe {
            ffi::MPI_Irecv(
                buffer.as_mut_ptr().cast(),
                raw_len(len),
                ffi::RSMPI_UINT8_T,
                raw_rank(source),
                raw_tag(tag),
                self.raw,
                raw.as_mut_ptr(),
            );
            MpiRequest {
                raw: raw.assume_init(),
                storage: Storage::Recv(buffer),
            }
        }
    }

    fn test(&self, request: &mut MpiRequest) -> Option<Bytes> {
        let mut flag: c_int = 0;
        let mut status = MaybeUninit::<ffi::MPI_Status>::uninit();
        // SAFETY: `request.raw` is a live request handle.
        unsafe {
            ffi::MPI_Test(&mut request.raw, &mut flag, status.as_mut_ptr());
        }
        if flag == 0 {
            return None;
        }
        match std::mem::replace(&mut request.storage, Storage::Recv(Box::default())) {
            Storage::Send(_) => Some(Bytes::new()),
            Storage::Recv(buffer) => {
                let mut count: c_int = 0;
                // SAFETY: the status was filled in by the completed test.
                unsafe {
                    ffi::MPI_Get_count(status.as_ptr(), ffi::RSMPI_UINT8_T, &mut count);
                }
                let mut bytes = Vec::from(buffer);
                bytes.truncate(count.max(0) as usize);
                Some(Bytes::from(bytes))
            }
        }
    }

    fn cancel(&self, mut request: MpiRequest) {
        // SAFETY: the request is live; freeing it after cancel is permitted
        // and the buffer stays alive until this function returns.
        unsafe {
            ffi::MPI_Cancel(&mut request.raw);
            ffi::MPI_Request_free(&mut request.raw);
        }
    }

    fn iprobe(&self, source: ProcId, tag: Tag) -> Option<usize> {
        let mut flag: c_int = 0;
        let mut status = MaybeUninit::<ffi::MPI_Status>::uninit();
        let mut count: c_int = 0;
        // SAFETY: plain probe; status is read only if a message matched.
        unsafe {
            ffi::MPI_Iprobe(
                raw_rank(source),
                raw_tag(tag),
                self.raw,
                &mut flag,
                status.as_mut_ptr(),
            );
            if flag == 0 {
                return None;
            }
            ffi::MPI_Get_count(status.as_ptr(), ffi::RSMPI_UINT8_T, &mut count);
        }
        Some(count.max(0) as usize)
    }

    fn recv(&self, source: ProcId, tag: Tag, len: usize) -> Bytes {
        let mut buffer = vec![0u8; len];
        let mut status = MaybeUninit::<ffi::MPI_Status>::uninit();
        let mut count: c_int = 0;
        // SAFETY: `buffer` outlives the blocking call.
        unsafe {
            ffi::MPI_Recv(
                buffer.as_mut_ptr().cast(),
                raw_len(len),
                ffi::RSMPI_UINT8_T,
                raw_rank(source),
                raw_tag(tag),
                self.raw,
                status.as_mut_ptr(),
            );
            ffi::MPI_Get_count(status.as_ptr(), ffi::RSMPI_UINT8_T, &mut count);
        }
        buffer.truncate(count.max(0) as usize);
        Bytes::from(buffer)
    }

    fn barrier(&self) {
        // SAFETY: collective over a valid communicator.
        unsafe {
            ffi::MPI_Barrier(self.raw);
        }
    }
}
