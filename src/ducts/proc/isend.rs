//! Sending halves built on non-blocking sends.
//!
//! Each put encodes the value and posts one send. Outstanding sends are kept
//! oldest-first together with the payload they read from; completed ones are
//! reaped from the front before every put. [`RingIsendDuct`] caps the number
//! of outstanding sends and drops puts beyond that; [`DequeIsendDuct`] grows
//! without bound.

use std::collections::VecDeque;
use std::marker::PhantomData;

use bytes::Bytes;
use parking_lot::Mutex;

use super::address::InterProcAddress;
use super::codec::{Codec, encode_or_panic};
use crate::conduit::duct::{DuctImpl, DuctKind, wrong_direction};
use crate::distributed::Communicator;
use crate::utility::RingBuffer;

/// An outstanding send and the payload storage it references.
pub struct SendSlot<R> {
    payload: Bytes,
    request: Option<R>,
}

impl<R> Default for SendSlot<R> {
    fn default() -> Self {
        Self {
            payload: Bytes::new(),
            request: None,
        }
    }
}

/// Oldest-first store of outstanding sends.
pub trait SendQueue<S>: Send {
    fn with_bound(bound: usize) -> Self;
    fn front_mut(&mut self) -> Option<&mut S>;
    fn pop_front(&mut self) -> Option<S>;
    fn push_back(&mut self, slot: S) -> Result<(), S>;
    fn len(&self) -> usize;
    fn available(&self) -> usize;
}

impl<S: Default + Send> SendQueue<S> for RingBuffer<S> {
    fn with_bound(bound: usize) -> Self {
        RingBuffer::new(bound)
    }

    fn front_mut(&mut self) -> Option<&mut S> {
        self.tail_mut()
    }

    fn pop_front(&mut self) -> Option<S> {
        self.pop_tail()
    }

    fn push_back(&mut self, slot: S) -> Result<(), S> {
        self.push_head(slot)
    }

    fn len(&self) -> usize {
        RingBuffer::len(self)
    }

    fn available(&self) -> usize {
        RingBuffer::available(self)
    }
}

impl<S: Send> SendQueue<S> for VecDeque<S> {
    fn with_bound(bound: usize) -> Self {
        VecDeque::with_capacity(bound)
    }

    fn front_mut(&mut self) -> Option<&mut S> {
        VecDeque::front_mut(self)
    }

    fn pop_front(&mut self) -> Option<S> {
        VecDeque::pop_front(self)
    }

    fn push_back(&mut self, slot: S) -> Result<(), S> {
        VecDeque::push_back(self, slot);
        Ok(())
    }

    fn len(&self) -> usize {
        VecDeque::len(self)
    }

    fn available(&self) -> usize {
        usize::MAX
    }
}

/// What a sending duct does when its outstanding sends reach the bound.
pub trait PutPolicy: Send + Sync + 'static {
    type Queue<S: Default + Send>: SendQueue<S>;
    const NAME: &'static str;
}

/// Refuse the put: bounded ring.
#[derive(Debug)]
pub enum Dropping {}

/// Keep every put: unbounded deque.
#[derive(Debug)]
pub enum Growing {}

impl PutPolicy for Dropping {
    type Queue<S: Default + Send> = RingBuffer<S>;
    const NAME: &'static str = "RingIsendDuct";
}

impl PutPolicy for Growing {
    type Queue<S: Default + Send> = VecDeque<S>;
    const NAME: &'static str = "DequeIsendDuct";
}

pub type RingIsendDuct<T, C, K> = IsendDuct<T, C, K, Dropping>;
pub type DequeIsendDuct<T, C, K> = IsendDuct<T, C, K, Growing>;

pub struct IsendDuct<T, C: Communicator, K, P: PutPolicy> {
    address: InterProcAddress,
    comm: C,
    codec: K,
    sends: Mutex<P::Queue<SendSlot<C::Request>>>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, C, K, P> IsendDuct<T, C, K, P>
where
    C: Communicator,
    K: Codec<T>,
    P: PutPolicy,
{
    /// # Panics
    ///
    /// Panics if `capacity == 0` or if `address` does not send from the
    /// calling rank.
    pub fn new(address: InterProcAddress, comm: C, codec: K, capacity: usize) -> Self {
        assert!(capacity > 0, "{} capacity must be non-zero", P::NAME);
        assert_eq!(
            address.inlet_proc,
            comm.rank(),
            "{} for {address} built on rank {}",
            P::NAME,
            comm.rank()
        );
        Self {
            address,
            comm,
            codec,
            sends: Mutex::new(P::Queue::with_bound(capacity)),
            _marker: PhantomData,
        }
    }

    pub fn address(&self) -> &InterProcAddress {
        &self.address
    }
}

impl<T, C: Communicator, K, P: PutPolicy> IsendDuct<T, C, K, P> {
    /// Release completed sends from the front; stops at the first one
    /// still in flight so order is preserved.
    fn reap(&self, sends: &mut P::Queue<SendSlot<C::Request>>) -> usize {
        let mut reaped = 0;
        while let Some(slot) = sends.front_mut() {
            let done = match slot.request.as_mut() {
                Some(request) => self.comm.test(request).is_some(),
                None => true,
            };
            if !done {
                break;
            }
            sends.pop_front();
            reaped += 1;
        }
        reaped
    }
}

impl<T, C, K, P> DuctImpl<T> for IsendDuct<T, C, K, P>
where
    T: Send,
    C: Communicator,
    K: Codec<T>,
    P: PutPolicy,
{
    fn try_put(&self, val: T) -> Result<(), T> {
        let mut sends = self.sends.lock();
        self.reap(&mut sends);
        if sends.available() == 0 {
            log::trace!("{} full for {}", P::NAME, self.address);
            return Err(val);
        }
        let payload = encode_or_panic(&self.codec, &val);
        let request = self
            .comm
            .isend(self.address.outlet_proc, self.address.tag, payload.clone());
        let pushed = sends.push_back(SendSlot {
            payload,
            request: Some(request),
        });
        debug_assert!(pushed.is_ok());
        Ok(())
    }

    fn try_flush(&self) -> bool {
        let mut sends = self.sends.lock();
        self.reap(&mut sends);
        true
    }

    fn try_consume_gets(&self, _requested: usize) -> usize {
        wrong_direction(P::NAME, "try_consume_gets")
    }

    fn get(&self) -> T {
        wrong_direction(P::NAME, "get")
    }

    /// Sends still in flight.
    fn pending(&self) -> usize {
        let mut sends = self.sends.lock();
        self.reap(&mut sends);
        sends.len()
    }

    fn available_capacity(&self) -> usize {
        let mut sends = self.sends.lock();
        self.reap(&mut sends);
        sends.available()
    }

    fn kind(&self) -> DuctKind {
        DuctKind::ProcInlet
    }

    fn name(&self) -> &'static str {
        P::NAME
    }
}

impl<T, C: Communicator, K, P: PutPolicy> Drop for IsendDuct<T, C, K, P> {
    fn drop(&mut self) {
        let sends = self.sends.get_mut();
        let (mut cancelled, mut lost_bytes) = (0, 0);
        while let Some(mut slot) = sends.pop_front() {
            // test first so finished sends are reaped rather than cancelled
            if let Some(mut request) = slot.request.take() {
                if self.comm.test(&mut request).is_none() {
                    self.comm.cancel(request);
                    cancelled += 1;
                    lost_bytes += slot.payload.len();
                }
            }
        }
        if cancelled > 0 {
            log::warn!(
                "{} for {} cancelled {cancelled} outstanding sends ({lost_bytes} bytes)",
                P::NAME,
                self.address
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{CommId, LocalComm, LocalNetwork};
    use crate::ducts::proc::codec::PodCodec;

    fn address() -> InterProcAddress {
        InterProcAddress {
            outlet_proc: 1,
            inlet_proc: 0,
            outlet_thread: 0,
            inlet_thread: 0,
            tag: 11,
            comm: CommId::WORLD,
        }
    }

    fn comms() -> (LocalComm, LocalComm, std::sync::Arc<LocalNetwork>) {
        let net = LocalNetwork::new(2);
        let mut comms = net.communicators();
        let b = comms.pop().unwrap();
        let a = comms.pop().unwrap();
        (a, b, net)
    }

    #[test]
    fn ring_drops_past_capacity() {
        let (a, _b, _net) = comms();
        let duct = RingIsendDuct::<u32, _, _>::new(address(), a, PodCodec, 2);
        assert!(duct.try_put(1).is_ok());
        assert!(duct.try_put(2).is_ok());
        assert_eq!(duct.try_put(3), Err(3));
        assert_eq!(duct.pending(), 2);
    }

    #[test]
    fn completed_sends_free_capacity() {
        let (a, b, _net) = comms();
        let duct = RingIsendDuct::<u32, _, _>::new(address(), a, PodCodec, 1);
        assert!(duct.try_put(7).is_ok());
        assert_eq!(&b.recv(0, 11, 4)[..], &7u32.to_ne_bytes());
        assert!(duct.try_put(8).is_ok());
    }

    #[test]
    fn deque_never_drops() {
        let (a, _b, _net) = comms();
        let duct = DequeIsendDuct::<u32, _, _>::new(address(), a, PodCodec, 1);
        for v in 0..100 {
            assert!(duct.try_put(v).is_ok());
        }
        assert_eq!(duct.pending(), 100);
        assert_eq!(duct.name(), "DequeIsendDuct");
    }

    #[test]
    fn drop_cancels_outstanding_sends() {
        let (a, _b, net) = comms();
        {
            let duct = DequeIsendDuct::<u32, _, _>::new(address(), a, PodCodec, 4);
            for v in 0..5 {
                duct.try_put(v).unwrap();
            }
            assert_eq!(net.live_requests(), 5);
        }
        assert_eq!(net.live_requests(), 0);
        assert_eq!(net.unmatched_messages(), 0);
    }

    #[test]
    fn get_side_is_rejected() {
        let (a, _b, _net) = comms();
        let duct = RingIsendDuct::<u32, _, _>::new(address(), a, PodCodec, 1);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| duct.get()));
        assert!(res.is_err());
    }
}
