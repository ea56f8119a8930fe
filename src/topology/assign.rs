//! Stock node placements for `Fn(NodeId) -> ThreadId` and
//! `Fn(NodeId) -> ProcId` arguments.

use super::NodeId;

/// Every node on part 0.
pub fn integrated(_node: NodeId) -> usize {
    0
}

/// One part per node.
pub fn segregated(node: NodeId) -> usize {
    node
}

/// Nodes dealt to `num_parts` parts in turn.
pub fn round_robin(num_parts: usize) -> impl Fn(NodeId) -> usize + Clone + Send + Sync {
    assert!(num_parts > 0, "round_robin needs at least one part");
    move |node| node % num_parts
}

/// `num_nodes` nodes cut into `num_parts` contiguous blocks whose sizes
/// differ by at most one, larger blocks first.
pub fn contiguous(
    num_nodes: usize,
    num_parts: usize,
) -> impl Fn(NodeId) -> usize + Clone + Send + Sync {
    assert!(num_parts > 0, "contiguous needs at least one part");
    let base = num_nodes / num_parts;
    let extra = num_nodes % num_parts;
    move |node| {
        let big = extra * (base + 1);
        if node < big {
            node / (base + 1)
        } else {
            extra + (node - big) / base.max(1)
        }
    }
}
