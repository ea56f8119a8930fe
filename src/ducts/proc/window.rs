//! One-sided transport: the sender overwrites a window on the receiving
//! process and the receiver reads whatever is there.
//!
//! Each payload is prefixed with an 8-byte little-endian revision so the
//! receiver can tell how many puts landed since it last looked. Values put
//! in between are overwritten; stepping always jumps to the newest.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use super::address::InterProcAddress;
use super::codec::{Codec, decode_or_panic, encode_or_panic};
use crate::conduit::duct::{DuctImpl, DuctKind, wrong_direction};
use crate::distributed::OneSided;
use crate::utility::RingBuffer;

const REVISION_LEN: usize = std::mem::size_of::<u64>();

struct PutState<R> {
    revision: u64,
    puts: RingBuffer<Option<R>>,
}

pub struct WindowInletDuct<T, C: OneSided, K> {
    address: InterProcAddress,
    comm: C,
    codec: K,
    state: Mutex<PutState<C::Request>>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, C: OneSided, K: Codec<T>> WindowInletDuct<T, C, K> {
    pub fn new(address: InterProcAddress, comm: C, codec: K, capacity: usize) -> Self {
        assert!(capacity > 0, "WindowInletDuct capacity must be non-zero");
        Self {
            address,
            comm,
            codec,
            state: Mutex::new(PutState {
                revision: 0,
                puts: RingBuffer::new(capacity),
            }),
            _marker: PhantomData,
        }
    }
}

impl<T, C: OneSided, K> WindowInletDuct<T, C, K> {
    fn reap(&self, puts: &mut RingBuffer<Option<C::Request>>) {
        while let Some(slot) = puts.tail_mut() {
            if let Some(request) = slot.as_mut() {
                if self.comm.test(request).is_none() {
                    break;
                }
            }
            puts.pop_tail();
        }
    }
}

impl<T, C, K> DuctImpl<T> for WindowInletDuct<T, C, K>
where
    T: Send,
    C: OneSided,
    K: Codec<T>,
{
    fn try_put(&self, val: T) -> Result<(), T> {
        let mut state = self.state.lock();
        self.reap(&mut state.puts);
        if state.puts.is_full() {
            return Err(val);
        }
        state.revision += 1;
        let body = encode_or_panic(&self.codec, &val);
        let mut payload = BytesMut::with_capacity(REVISION_LEN + body.len());
        payload.put_u64_le(state.revision);
        payload.put_slice(&body);
        let request = self
            .comm
            .rput(self.address.outlet_proc, self.address.tag, payload.freeze());
        let _ = state.puts.push_head(Some(request));
        Ok(())
    }

    fn try_consume_gets(&self, _requested: usize) -> usize {
        wrong_direction("WindowInletDuct", "try_consume_gets")
    }

    fn get(&self) -> T {
        wrong_direction("WindowInletDuct", "get")
    }

    fn pending(&self) -> usize {
        let mut state = self.state.lock();
        self.reap(&mut state.puts);
        state.puts.len()
    }

    fn available_capacity(&self) -> usize {
        let mut state = self.state.lock();
        self.reap(&mut state.puts);
        state.puts.available()
    }

    fn kind(&self) -> DuctKind {
        DuctKind::ProcInlet
    }

    fn name(&self) -> &'static str {
        "WindowInletDuct"
    }
}

impl<T, C: OneSided, K> Drop for WindowInletDuct<T, C, K> {
    fn drop(&mut self) {
        let puts = &mut self.state.get_mut().puts;
        while let Some(slot) = puts.pop_tail() {
            if let Some(mut request) = slot {
                if self.comm.test(&mut request).is_none() {
                    self.comm.cancel(request);
                }
            }
        }
    }
}

struct ReadState<T> {
    revision: u64,
    current: T,
}

pub struct WindowOutletDuct<T, C, K> {
    address: InterProcAddress,
    comm: C,
    codec: K,
    state: Mutex<ReadState<T>>,
}

impl<T: Default, C: OneSided, K: Codec<T>> WindowOutletDuct<T, C, K> {
    pub fn new(address: InterProcAddress, comm: C, codec: K) -> Self {
        Self {
            address,
            comm,
            codec,
            state: Mutex::new(ReadState {
                revision: 0,
                current: T::default(),
            }),
        }
    }
}

impl<T, C: OneSided, K> WindowOutletDuct<T, C, K> {
    /// Newest window contents and their revision, if any put landed.
    fn peek(&self) -> Option<(u64, Bytes)> {
        let mut bytes = self.comm.read_window(self.address.tag)?;
        assert!(
            bytes.len() >= REVISION_LEN,
            "window for {} holds a truncated payload",
            self.address
        );
        let revision = bytes.get_u64_le();
        Some((revision, bytes))
    }
}

impl<T, C, K> DuctImpl<T> for WindowOutletDuct<T, C, K>
where
    T: Clone + Default + Send,
    C: OneSided,
    K: Codec<T>,
{
    fn try_put(&self, _val: T) -> Result<(), T> {
        wrong_direction("WindowOutletDuct", "try_put")
    }

    /// Jumps to the newest value; reports how many revisions were passed,
    /// capped at `requested`.
    fn try_consume_gets(&self, requested: usize) -> usize {
        if requested == 0 {
            return 0;
        }
        let mut state = self.state.lock();
        let Some((revision, body)) = self.peek() else {
            return 0;
        };
        if revision <= state.revision {
            return 0;
        }
        let skipped = revision - state.revision;
        state.current = decode_or_panic(&self.codec, &body);
        state.revision = revision;
        usize::try_from(skipped).map_or(requested, |n| n.min(requested))
    }

    fn get(&self) -> T {
        self.state.lock().current.clone()
    }

    fn pending(&self) -> usize {
        let state = self.state.lock();
        match self.peek() {
            Some((revision, _)) if revision > state.revision => {
                usize::try_from(revision - state.revision).unwrap_or(usize::MAX)
            }
            _ => 0,
        }
    }

    fn available_capacity(&self) -> usize {
        wrong_direction("WindowOutletDuct", "available_capacity")
    }

    fn kind(&self) -> DuctKind {
        DuctKind::ProcOutlet
    }

    fn name(&self) -> &'static str {
        "WindowOutletDuct"
    }
}
