mod support;

use mesh_conduit::ducts::proc::{DequeIsendDuct, IprobeDuct, RingIrecvDuct, RingIsendDuct};
use mesh_conduit::prelude::*;

const SENT: [u32; 4] = [0, 10, 20, 30];

fn address() -> InterProcAddress {
    InterProcAddress {
        outlet_proc: 1,
        inlet_proc: 0,
        outlet_thread: 0,
        inlet_thread: 0,
        tag: 7,
        comm: CommId::WORLD,
    }
}

#[test]
fn ring_sends_reach_probe_receiver() {
    let (received, net) = support::run_ranks(2, |comm| {
        let mut got = Vec::new();
        if comm.rank() == 0 {
            let mut inlet =
                Sink::new(RingIsendDuct::<u32, _, _>::new(address(), comm.clone(), PodCodec, 4))
                    .into_inlet();
            for v in SENT {
                inlet.sure_put(v);
            }
            comm.barrier();
        } else {
            let mut outlet =
                Source::new(IprobeDuct::<u32, _, _>::new(address(), comm.clone(), PodCodec))
                    .into_outlet();
            assert_eq!(outlet.get(), 0);
            for _ in SENT {
                got.push(outlet.get_next());
            }
            comm.barrier();
        }
        got
    });
    assert_eq!(received[1], SENT);
    assert_eq!(net.live_requests(), 0);
    assert_eq!(net.unmatched_messages(), 0);
}

#[test]
fn deque_sends_reach_ring_receiver() {
    let (received, net) = support::run_ranks(2, |comm| {
        let mut got = Vec::new();
        if comm.rank() == 0 {
            let mut inlet = Sink::new(DequeIsendDuct::<u32, _, _>::new(
                address(),
                comm.clone(),
                PodCodec,
                1,
            ))
            .into_inlet();
            for v in SENT {
                assert!(inlet.try_put(v));
            }
            comm.barrier();
        } else {
            let duct = RingIrecvDuct::<u32, _, _>::new(address(), comm.clone(), PodCodec, 8)
                .unwrap();
            let mut outlet = Source::new(duct).into_outlet();
            for _ in SENT {
                got.push(outlet.get_next());
            }
            comm.barrier();
        }
        got
    });
    assert_eq!(received[1], SENT);
    // reposted receives were cancelled on drop
    assert_eq!(net.live_requests(), 0);
}

/// Polls `jump_get` on the receiving rank while the sender is mid-stream.
/// Returns how many polls the receiver made.
fn jump_get_while_sending(ring_outlet: bool) -> usize {
    let (polls, net) = support::run_ranks(2, |comm| {
        let mut polls = 0;
        if comm.rank() == 0 {
            let mut inlet =
                Sink::new(RingIsendDuct::<u32, _, _>::new(address(), comm.clone(), PodCodec, 4))
                    .into_inlet();
            comm.barrier();
            for v in &SENT[..3] {
                inlet.sure_put(*v);
            }
            comm.barrier();
            inlet.sure_put(SENT[3]);
            comm.barrier();
        } else {
            let mut outlet = if ring_outlet {
                let duct = RingIrecvDuct::<u32, _, _>::new(address(), comm.clone(), PodCodec, 4)
                    .unwrap();
                Source::new(duct).into_outlet()
            } else {
                Source::new(IprobeDuct::<u32, _, _>::new(address(), comm.clone(), PodCodec))
                    .into_outlet()
            };
            comm.barrier();
            let mut last = 0;
            while last != SENT[2] {
                last = outlet.jump_get();
                assert!(SENT.contains(&last), "unexpected value {last}");
                polls += 1;
            }
            comm.barrier();
            // the last value is still on its way when polling resumes
            while last != SENT[3] {
                last = outlet.jump_get();
                assert!(SENT.contains(&last), "unexpected value {last}");
                polls += 1;
            }
            comm.barrier();
        }
        polls
    });
    assert_eq!(net.live_requests(), 0);
    polls[1]
}

#[test]
fn ring_outlet_jump_get_sees_only_sent_values() {
    assert!(jump_get_while_sending(true) >= 2);
}

#[test]
fn on_demand_outlet_jump_get_sees_only_sent_values() {
    assert!(jump_get_while_sending(false) >= 2);
}

#[test]
fn ring_irecv_rejects_variable_length_codec() {
    let net = LocalNetwork::new(2);
    let comm = net.communicators().pop().unwrap();
    let res = RingIrecvDuct::<Vec<u8>, _, _>::new(address(), comm, BincodeCodec, 4);
    assert!(matches!(res, Err(ConduitError::VariableLengthCodec(_))));
}

#[test]
fn unreceived_sends_are_cancelled_on_drop() {
    let net = LocalNetwork::new(2);
    let comm = net.communicators().swap_remove(0);
    {
        let mut inlet =
            Sink::new(RingIsendDuct::<u32, _, _>::new(address(), comm, PodCodec, 2)).into_inlet();
        assert!(inlet.try_put(1));
        assert!(inlet.try_put(2));
        assert!(!inlet.try_put(3));
        assert_eq!(net.unmatched_messages(), 2);
    }
    assert_eq!(net.unmatched_messages(), 0);
    assert_eq!(net.live_requests(), 0);
}
