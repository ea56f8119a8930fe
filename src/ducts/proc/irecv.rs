//! Receiving half built on a ring of pre-posted fixed-size receives.
//!
//! The ring holds `N + 1` slots: the tail slot is the current value and the
//! `N` slots after it each carry one posted receive. Receives complete in
//! posting order for a given `(source, tag)`, so the number of values ready
//! to consume is the length of the completed prefix after the tail.
//! Consuming a value reposts its receive at the head.

use std::marker::PhantomData;

use bytes::Bytes;
use parking_lot::Mutex;

use super::address::InterProcAddress;
use super::codec::{Codec, decode_or_panic};
use crate::conduit::duct::{DuctImpl, DuctKind, wrong_direction};
use crate::conduit_error::ConduitError;
use crate::distributed::Communicator;
use crate::utility::RingBuffer;

struct RecvSlot<R> {
    bytes: Bytes,
    request: Option<R>,
}

impl<R> Default for RecvSlot<R> {
    fn default() -> Self {
        Self {
            bytes: Bytes::new(),
            request: None,
        }
    }
}

struct RecvState<T, R> {
    slots: RingBuffer<RecvSlot<R>>,
    /// Decoded current value, dropped whenever the tail moves.
    current: Option<T>,
}

pub struct RingIrecvDuct<T, C: Communicator, K> {
    address: InterProcAddress,
    comm: C,
    codec: K,
    msg_len: usize,
    state: Mutex<RecvState<T, C::Request>>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, C, K> RingIrecvDuct<T, C, K>
where
    T: Default,
    C: Communicator,
    K: Codec<T>,
{
    /// Posts `capacity` receives immediately.
    ///
    /// # Errors
    ///
    /// [`ConduitError::VariableLengthCodec`] if `codec` has no fixed length,
    /// [`ConduitError::ZeroCapacity`] if `capacity == 0`.
    pub fn new(
        address: InterProcAddress,
        comm: C,
        codec: K,
        capacity: usize,
    ) -> Result<Self, ConduitError> {
        let msg_len = codec
            .fixed_len()
            .ok_or(ConduitError::VariableLengthCodec("RingIrecvDuct"))?;
        if capacity == 0 {
            return Err(ConduitError::ZeroCapacity);
        }
        assert_eq!(
            address.outlet_proc,
            comm.rank(),
            "RingIrecvDuct for {address} built on rank {}",
            comm.rank()
        );
        let mut slots = RingBuffer::new(capacity + 1);
        let _ = slots.push_head(RecvSlot::default());
        for _ in 0..capacity {
            let request = comm.irecv(address.inlet_proc, address.tag, msg_len);
            let _ = slots.push_head(RecvSlot {
                bytes: Bytes::new(),
                request: Some(request),
            });
        }
        Ok(Self {
            address,
            comm,
            codec,
            msg_len,
            state: Mutex::new(RecvState {
                slots,
                current: Some(T::default()),
            }),
            _marker: PhantomData,
        })
    }
}

impl<T, C: Communicator, K> RingIrecvDuct<T, C, K> {
    pub fn address(&self) -> &InterProcAddress {
        &self.address
    }

    /// Length of the completed prefix after the current slot.
    fn count_ready(&self, state: &mut RecvState<T, C::Request>) -> usize {
        let mut ready = 0;
        for n in 1..state.slots.len() {
            let Some(slot) = state.slots.get_mut(n) else {
                break;
            };
            if let Some(request) = slot.request.as_mut() {
                match self.comm.test(request) {
                    Some(bytes) => {
                        slot.bytes = bytes;
                        slot.request = None;
                    }
                    None => break,
                }
            }
            ready += 1;
        }
        ready
    }

    /// Retire the current slot and repost its receive at the head.
    fn advance(&self, state: &mut RecvState<T, C::Request>) {
        state.slots.pop_tail();
        let request = self
            .comm
            .irecv(self.address.inlet_proc, self.address.tag, self.msg_len);
        let _ = state.slots.push_head(RecvSlot {
            bytes: Bytes::new(),
            request: Some(request),
        });
        state.current = None;
    }
}

impl<T, C, K> DuctImpl<T> for RingIrecvDuct<T, C, K>
where
    T: Clone + Default + Send,
    C: Communicator,
    K: Codec<T>,
{
    fn try_put(&self, _val: T) -> Result<(), T> {
        wrong_direction("RingIrecvDuct", "try_put")
    }

    fn try_consume_gets(&self, requested: usize) -> usize {
        let mut state = self.state.lock();
        let window = state.slots.len() - 1;
        let mut consumed = 0;
        while consumed < requested {
            let ready = self.count_ready(&mut state);
            let batch = ready.min(requested - consumed);
            for _ in 0..batch {
                self.advance(&mut state);
            }
            consumed += batch;
            // only a fully drained window can have more behind it
            if ready < window || batch < ready {
                break;
            }
        }
        consumed
    }

    fn get(&self) -> T {
        let mut state = self.state.lock();
        if let Some(val) = &state.current {
            return val.clone();
        }
        let val: T = match state.slots.tail() {
            Some(slot) => decode_or_panic(&self.codec, &slot.bytes),
            None => unreachable!("RingIrecvDuct lost its current slot"),
        };
        state.current = Some(val.clone());
        val
    }

    fn pending(&self) -> usize {
        let mut state = self.state.lock();
        self.count_ready(&mut state)
    }

    fn available_capacity(&self) -> usize {
        wrong_direction("RingIrecvDuct", "available_capacity")
    }

    fn kind(&self) -> DuctKind {
        DuctKind::ProcOutlet
    }

    fn name(&self) -> &'static str {
        "RingIrecvDuct"
    }
}

impl<T, C: Communicator, K> Drop for RingIrecvDuct<T, C, K> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let mut cancelled = 0;
        while let Some(slot) = state.slots.pop_tail() {
            if let Some(request) = slot.request {
                self.comm.cancel(request);
                cancelled += 1;
            }
        }
        log::debug!(
            "RingIrecvDuct for {} cancelled {cancelled} posted receives",
            self.address
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{CommId, LocalComm, LocalNetwork};
    use crate::ducts::proc::codec::{BincodeCodec, PodCodec};
    use crate::ducts::proc::isend::RingIsendDuct;
    use std::sync::Arc;

    fn address() -> InterProcAddress {
        InterProcAddress {
            outlet_proc: 1,
            inlet_proc: 0,
            outlet_thread: 0,
            inlet_thread: 0,
            tag: 4,
            comm: CommId::WORLD,
        }
    }

    fn comms() -> (LocalComm, LocalComm, Arc<LocalNetwork>) {
        let net = LocalNetwork::new(2);
        let mut comms = net.communicators();
        let b = comms.pop().unwrap();
        let a = comms.pop().unwrap();
        (a, b, net)
    }

    #[test]
    fn variable_length_codec_is_rejected() {
        let (_a, b, _net) = comms();
        let res = RingIrecvDuct::<Vec<u8>, _, _>::new(address(), b, BincodeCodec, 2);
        assert_eq!(
            res.err(),
            Some(ConduitError::VariableLengthCodec("RingIrecvDuct"))
        );
    }

    #[test]
    fn initial_value_is_default() {
        let (_a, b, _net) = comms();
        let duct = RingIrecvDuct::<u64, _, _>::new(address(), b, PodCodec, 2).unwrap();
        assert_eq!(duct.get(), 0);
        assert_eq!(duct.pending(), 0);
        assert_eq!(duct.try_consume_gets(1), 0);
    }

    #[test]
    fn values_arrive_in_order() {
        let (a, b, _net) = comms();
        let send = RingIsendDuct::<u64, _, _>::new(address(), a, PodCodec, 8);
        let recv = RingIrecvDuct::<u64, _, _>::new(address(), b, PodCodec, 4).unwrap();
        for v in [10, 20, 30] {
            send.try_put(v).unwrap();
        }
        assert_eq!(recv.pending(), 3);
        let mut seen = Vec::new();
        while recv.try_consume_gets(1) == 1 {
            seen.push(recv.get());
        }
        assert_eq!(seen, vec![10, 20, 30]);
        assert_eq!(recv.get(), 30);
    }

    #[test]
    fn bulk_consume_drains_past_one_window() {
        let (a, b, _net) = comms();
        let send = RingIsendDuct::<u32, _, _>::new(address(), a, PodCodec, 16);
        let recv = RingIrecvDuct::<u32, _, _>::new(address(), b, PodCodec, 4).unwrap();
        for v in 1..=10 {
            send.try_put(v).unwrap();
        }
        assert_eq!(recv.try_consume_gets(usize::MAX), 10);
        assert_eq!(recv.get(), 10);
    }

    #[test]
    fn teardown_leaves_no_requests() {
        let (a, b, net) = comms();
        {
            let send = RingIsendDuct::<u32, _, _>::new(address(), a, PodCodec, 8);
            let recv = RingIrecvDuct::<u32, _, _>::new(address(), b, PodCodec, 2).unwrap();
            for v in 0..5 {
                send.try_put(v).unwrap();
            }
            recv.try_consume_gets(1);
        }
        assert_eq!(net.live_requests(), 0);
    }
}
