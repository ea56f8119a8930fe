//! Logical graph of computation nodes joined by directed edges.
//!
//! A [`Topology`] says nothing about placement; it only lists, for every
//! node, which edges it reads from and which it writes to. Every edge has
//! exactly one producer and exactly one consumer. A node may consume its
//! own output.

pub mod assign;

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::conduit_error::ConduitError;

pub type NodeId = usize;
pub type EdgeId = usize;
pub type ThreadId = usize;
pub type ProcId = usize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopoNode {
    pub inputs: Vec<EdgeId>,
    pub outputs: Vec<EdgeId>,
}

impl TopoNode {
    pub fn new(inputs: Vec<EdgeId>, outputs: Vec<EdgeId>) -> Self {
        Self { inputs, outputs }
    }
}

/// Validated node list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TopoNode>", into = "Vec<TopoNode>")]
pub struct Topology {
    nodes: Vec<TopoNode>,
    /// edge -> (producer, consumer)
    endpoints: BTreeMap<EdgeId, (NodeId, NodeId)>,
}

impl Topology {
    /// # Errors
    ///
    /// Returns a [`ConduitError`] naming the first edge, in ascending edge
    /// order, that lacks a unique producer or consumer.
    pub fn new(nodes: Vec<TopoNode>) -> Result<Self, ConduitError> {
        let mut producers = BTreeMap::new();
        let mut consumers = BTreeMap::new();
        for (node_id, node) in nodes.iter().enumerate() {
            for &edge in &node.outputs {
                if producers.insert(edge, node_id).is_some() {
                    return Err(ConduitError::DuplicateOutput(edge));
                }
            }
            for &edge in &node.inputs {
                if consumers.insert(edge, node_id).is_some() {
                    return Err(ConduitError::DuplicateInput(edge));
                }
            }
        }
        if let Some(&edge) = consumers.keys().find(|e| !producers.contains_key(*e)) {
            return Err(ConduitError::MissingOutput(edge));
        }
        if let Some(&edge) = producers.keys().find(|e| !consumers.contains_key(*e)) {
            return Err(ConduitError::MissingInput(edge));
        }
        let endpoints = producers
            .into_iter()
            .map(|(edge, producer)| (edge, (producer, consumers[&edge])))
            .collect();
        Ok(Self { nodes, endpoints })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TopoNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Result<&TopoNode, ConduitError> {
        self.nodes.get(id).ok_or(ConduitError::UnknownNode(id))
    }

    pub fn num_edges(&self) -> usize {
        self.endpoints.len()
    }

    /// Edge ids in ascending order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.endpoints.keys().copied()
    }

    pub fn producer_of(&self, edge: EdgeId) -> Option<NodeId> {
        self.endpoints.get(&edge).map(|&(p, _)| p)
    }

    pub fn consumer_of(&self, edge: EdgeId) -> Option<NodeId> {
        self.endpoints.get(&edge).map(|&(_, c)| c)
    }

    /// Distinct nodes `id` sends to, ascending.
    pub fn successors(&self, id: NodeId) -> Result<Vec<NodeId>, ConduitError> {
        Ok(self
            .node(id)?
            .outputs
            .iter()
            .filter_map(|&e| self.consumer_of(e))
            .sorted()
            .dedup()
            .collect())
    }
}

impl TryFrom<Vec<TopoNode>> for Topology {
    type Error = ConduitError;

    fn try_from(nodes: Vec<TopoNode>) -> Result<Self, Self::Error> {
        Self::new(nodes)
    }
}

impl From<Topology> for Vec<TopoNode> {
    fn from(topology: Topology) -> Self {
        topology.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(n: usize) -> Vec<TopoNode> {
        (0..n)
            .map(|i| TopoNode::new(vec![(i + n - 1) % n], vec![i]))
            .collect()
    }

    #[test]
    fn ring_is_valid() {
        let topo = Topology::new(ring(4)).unwrap();
        assert_eq!(topo.len(), 4);
        assert_eq!(topo.num_edges(), 4);
        assert_eq!(topo.producer_of(0), Some(0));
        assert_eq!(topo.consumer_of(0), Some(1));
        assert_eq!(topo.successors(3).unwrap(), vec![0]);
    }

    #[test]
    fn self_loop_is_allowed() {
        let topo = Topology::new(vec![TopoNode::new(vec![0], vec![0])]).unwrap();
        assert_eq!(topo.producer_of(0), topo.consumer_of(0));
    }

    #[test]
    fn duplicate_producer_is_rejected() {
        let nodes = vec![
            TopoNode::new(vec![], vec![0]),
            TopoNode::new(vec![], vec![0]),
            TopoNode::new(vec![0], vec![]),
        ];
        assert_eq!(Topology::new(nodes), Err(ConduitError::DuplicateOutput(0)));
    }

    #[test]
    fn dangling_edges_are_rejected() {
        let no_producer = vec![TopoNode::new(vec![3], vec![])];
        assert_eq!(
            Topology::new(no_producer),
            Err(ConduitError::MissingOutput(3))
        );
        let no_consumer = vec![TopoNode::new(vec![], vec![5])];
        assert_eq!(
            Topology::new(no_consumer),
            Err(ConduitError::MissingInput(5))
        );
    }

    #[test]
    fn unknown_node_lookup() {
        let topo = Topology::new(ring(2)).unwrap();
        assert_eq!(topo.node(7), Err(ConduitError::UnknownNode(7)));
    }

    #[test]
    fn json_round_trip_revalidates() {
        let topo = Topology::new(ring(3)).unwrap();
        let json = serde_json::to_string(&topo).unwrap();
        let back: Topology = serde_json::from_str(&json).unwrap();
        assert_eq!(back, topo);

        let bad = r#"[{"inputs":[1],"outputs":[]}]"#;
        assert!(serde_json::from_str::<Topology>(bad).is_err());
    }
}
