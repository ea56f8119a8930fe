//! Topology builders and rank drivers shared by the integration tests.
#![allow(dead_code)]

use mesh_conduit::distributed::{LocalComm, LocalNetwork};
use mesh_conduit::topology::{NodeId, TopoNode, Topology};
use std::sync::Arc;

/// Node `i` reads edge `i - 1` and writes edge `i`.
pub fn ring(n: usize) -> Topology {
    Topology::new(
        (0..n)
            .map(|i| TopoNode::new(vec![(i + n - 1) % n], vec![i]))
            .collect(),
    )
    .unwrap()
}

/// Every ordered pair of distinct nodes joined by one edge.
pub fn all_to_all(n: usize) -> Topology {
    let mut nodes = vec![TopoNode::default(); n];
    let mut edge = 0;
    for from in 0..n {
        for to in (0..n).filter(|&to| to != from) {
            nodes[from].outputs.push(edge);
            nodes[to].inputs.push(edge);
            edge += 1;
        }
    }
    Topology::new(nodes).unwrap()
}

/// `fan_in` producers each writing one edge into a single consumer, which is
/// the last node.
pub fn fan_in(fan_in: usize) -> Topology {
    let mut nodes: Vec<TopoNode> = (0..fan_in)
        .map(|i| TopoNode::new(vec![], vec![i]))
        .collect();
    nodes.push(TopoNode::new((0..fan_in).collect(), vec![]));
    Topology::new(nodes).unwrap()
}

/// The consumer of [`fan_in`] sits alone on process 1.
pub fn fan_in_procs(fan_in: usize) -> impl Fn(NodeId) -> usize + Clone {
    move |node| usize::from(node == fan_in)
}

/// Run `work` once per rank of a fresh network, each on its own thread.
pub fn run_ranks<R, F>(size: usize, work: F) -> (Vec<R>, Arc<LocalNetwork>)
where
    R: Send,
    F: Fn(LocalComm) -> R + Sync,
{
    let net = LocalNetwork::new(size);
    let comms = net.communicators();
    let work = &work;
    let res = std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| s.spawn(move || work(comm)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect()
    });
    (res, net)
}
