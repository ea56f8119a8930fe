//! Receiving half that probes for arrivals and receives them on demand.
//!
//! Nothing is posted ahead of time, so messages may have any length. The
//! duct keeps two receive buffers: the front one holds the current value and
//! arrivals land in the back one before the two are swapped.

use std::marker::PhantomData;

use bytes::Bytes;
use parking_lot::Mutex;

use super::address::InterProcAddress;
use super::codec::{Codec, decode_or_panic};
use crate::conduit::duct::{DuctImpl, DuctKind, wrong_direction};
use crate::distributed::Communicator;

struct ProbeState<T> {
    buffers: [Bytes; 2],
    front: usize,
    /// Decoded front buffer; `None` once a newer arrival replaced it.
    current: Option<T>,
}

pub struct IprobeDuct<T, C: Communicator, K> {
    address: InterProcAddress,
    comm: C,
    codec: K,
    state: Mutex<ProbeState<T>>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, C, K> IprobeDuct<T, C, K>
where
    T: Default,
    C: Communicator,
    K: Codec<T>,
{
    pub fn new(address: InterProcAddress, comm: C, codec: K) -> Self {
        assert_eq!(
            address.outlet_proc,
            comm.rank(),
            "IprobeDuct for {address} built on rank {}",
            comm.rank()
        );
        Self {
            address,
            comm,
            codec,
            state: Mutex::new(ProbeState {
                buffers: [Bytes::new(), Bytes::new()],
                front: 0,
                current: Some(T::default()),
            }),
            _marker: PhantomData,
        }
    }

    pub fn address(&self) -> &InterProcAddress {
        &self.address
    }
}

impl<T, C, K> DuctImpl<T> for IprobeDuct<T, C, K>
where
    T: Clone + Default + Send,
    C: Communicator,
    K: Codec<T>,
{
    fn try_put(&self, _val: T) -> Result<(), T> {
        wrong_direction("IprobeDuct", "try_put")
    }

    fn try_consume_gets(&self, requested: usize) -> usize {
        let mut state = self.state.lock();
        let (source, tag) = (self.address.inlet_proc, self.address.tag);
        let mut consumed = 0;
        while consumed < requested {
            let Some(len) = self.comm.iprobe(source, tag) else {
                break;
            };
            let back = 1 - state.front;
            state.buffers[back] = self.comm.recv(source, tag, len);
            state.front = back;
            consumed += 1;
        }
        if consumed > 0 {
            state.current = None;
        }
        consumed
    }

    fn get(&self) -> T {
        let mut state = self.state.lock();
        if let Some(val) = &state.current {
            return val.clone();
        }
        let val: T = decode_or_panic(&self.codec, &state.buffers[state.front]);
        state.current = Some(val.clone());
        val
    }

    /// Lower bound: `1` if at least one message is waiting.
    fn pending(&self) -> usize {
        let _state = self.state.lock();
        usize::from(
            self.comm
                .iprobe(self.address.inlet_proc, self.address.tag)
                .is_some(),
        )
    }

    fn available_capacity(&self) -> usize {
        wrong_direction("IprobeDuct", "available_capacity")
    }

    fn kind(&self) -> DuctKind {
        DuctKind::ProcOutlet
    }

    fn name(&self) -> &'static str {
        "IprobeDuct"
    }
}

impl<T, C: Communicator, K> Drop for IprobeDuct<T, C, K> {
    fn drop(&mut self) {
        let (source, tag) = (self.address.inlet_proc, self.address.tag);
        let mut drained = 0;
        while let Some(len) = self.comm.iprobe(source, tag) {
            self.comm.recv(source, tag, len);
            drained += 1;
        }
        if drained > 0 {
            log::debug!("IprobeDuct for {} drained {drained} messages", self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{CommId, LocalComm, LocalNetwork};
    use crate::ducts::proc::codec::BincodeCodec;
    use crate::ducts::proc::isend::DequeIsendDuct;
    use std::sync::Arc;

    fn address() -> InterProcAddress {
        InterProcAddress {
            outlet_proc: 1,
            inlet_proc: 0,
            outlet_thread: 0,
            inlet_thread: 0,
            tag: 2,
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
    fn variable_length_values_arrive_in_order() {
        let (a, b, _net) = comms();
        let send = DequeIsendDuct::<String, _, _>::new(address(), a, BincodeCodec, 4);
        let recv = IprobeDuct::<String, _, _>::new(address(), b, BincodeCodec);
        assert_eq!(recv.get(), "");
        for s in ["a", "bbbb", "cc"] {
            send.try_put(s.to_string()).unwrap();
        }
        assert_eq!(recv.pending(), 1);
        assert_eq!(recv.try_consume_gets(2), 2);
        assert_eq!(recv.get(), "bbbb");
        assert_eq!(recv.try_consume_gets(5), 1);
        assert_eq!(recv.get(), "cc");
        assert_eq!(recv.pending(), 0);
    }

    #[test]
    fn drop_drains_waiting_messages() {
        let (a, b, net) = comms();
        let send = DequeIsendDuct::<String, _, _>::new(address(), a, BincodeCodec, 4);
        {
            let _recv = IprobeDuct::<String, _, _>::new(address(), b, BincodeCodec);
            send.try_put("late".to_string()).unwrap();
        }
        assert_eq!(net.unmatched_messages(), 0);
        drop(send);
        assert_eq!(net.live_requests(), 0);
    }
}
