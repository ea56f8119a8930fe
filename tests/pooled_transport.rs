mod support;

use mesh_conduit::prelude::*;

const FAN_IN: usize = 3;

#[test]
fn pool_flushes_only_when_every_member_put() {
    let net = LocalNetwork::new(2);
    let comms = net.communicators();
    let topo = support::fan_in(FAN_IN);
    let procs = support::fan_in_procs(FAN_IN);

    let send_factory = PooledFactory::<u32, _, _>::new(comms[0].clone(), BincodeCodec, 4).unwrap();
    let recv_factory = PooledFactory::<u32, _, _>::new(comms[1].clone(), BincodeCodec, 4).unwrap();
    let mut senders = Mesh::new(&topo, assign::integrated, procs.clone(), &send_factory).unwrap();
    let mut receivers = Mesh::new(&topo, assign::integrated, procs, &recv_factory).unwrap();
    assert!(send_factory.backend().is_initialized());

    for node in 0..FAN_IN - 1 {
        let out = senders.node_mut(node).unwrap().output(0);
        assert_eq!(out.duct_kind(), DuctKind::ProcInlet);
        assert!(out.try_put(10 * (node as u32 + 1)));
    }
    assert_eq!(net.unmatched_messages(), 0);

    assert!(senders.node_mut(FAN_IN - 1).unwrap().output(0).try_put(30));
    assert_eq!(net.unmatched_messages(), 1);

    let consumer = receivers.node_mut(FAN_IN).unwrap();
    let mut got = Vec::new();
    for edge in 0..FAN_IN {
        let input = consumer.input_for(edge).unwrap();
        assert_eq!(input.try_step(1), 1);
        got.push(input.get());
    }
    assert_eq!(got, vec![10, 20, 30]);

    drop(senders);
    drop(receivers);
    drop(send_factory);
    drop(recv_factory);
    assert_eq!(net.live_requests(), 0);
}

#[test]
fn aggregator_batches_variable_counts_per_edge() {
    let net = LocalNetwork::new(2);
    let comms = net.communicators();
    let topo = support::fan_in(FAN_IN);
    let procs = support::fan_in_procs(FAN_IN);

    let send_factory =
        AggregatedFactory::<u32, _, _>::new(comms[0].clone(), BincodeCodec, 4, 8).unwrap();
    let recv_factory =
        AggregatedFactory::<u32, _, _>::new(comms[1].clone(), BincodeCodec, 4, 8).unwrap();
    let mut senders = Mesh::new(&topo, assign::integrated, procs.clone(), &send_factory).unwrap();
    let mut receivers = Mesh::new(&topo, assign::integrated, procs, &recv_factory).unwrap();

    // producer i puts i + 1 values, then every producer flushes once
    for node in 0..FAN_IN {
        let out = senders.node_mut(node).unwrap().output(0);
        for k in 0..=node {
            assert!(out.try_put((100 * node + k) as u32));
        }
    }
    for node in 0..FAN_IN {
        assert_eq!(net.unmatched_messages(), 0);
        assert!(senders.node_mut(node).unwrap().output(0).try_flush());
    }
    assert_eq!(net.unmatched_messages(), 1);

    let consumer = receivers.node_mut(FAN_IN).unwrap();
    for edge in 0..FAN_IN {
        let input = consumer.input_for(edge).unwrap();
        assert_eq!(input.pending(), edge + 1);
        let vals: Vec<u32> = (0..=edge).map(|_| input.get_next()).collect();
        let expect: Vec<u32> = (0..=edge).map(|k| (100 * edge + k) as u32).collect();
        assert_eq!(vals, expect);
        assert_eq!(input.try_step(1), 0);
    }
}

#[test]
fn aggregator_bound_refuses_extra_puts() {
    let net = LocalNetwork::new(2);
    let comm = net.communicators().swap_remove(0);
    let factory = AggregatedFactory::<u32, _, _>::new(comm, BincodeCodec, 4, 2).unwrap();
    let mut mesh = Mesh::new(
        &support::fan_in(1),
        assign::integrated,
        support::fan_in_procs(1),
        &factory,
    )
    .unwrap();
    let out = mesh.node_mut(0).unwrap().output(0);
    assert!(out.try_put(1));
    assert!(out.try_put(2));
    assert_eq!(out.available_capacity(), 0);
    assert!(!out.try_put(3));
    assert!(out.try_flush());
    assert_eq!(out.available_capacity(), 2);
}

#[test]
fn pooled_factory_rejects_zero_capacity() {
    let net = LocalNetwork::new(1);
    let comm = net.communicators().swap_remove(0);
    assert!(matches!(
        PooledFactory::<u32, _, _>::new(comm, BincodeCodec, 0),
        Err(ConduitError::ZeroCapacity)
    ));
}
