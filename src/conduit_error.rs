//! ConduitError: Unified error type for mesh-conduit construction APIs
//!
//! Only construction-time failures (malformed topologies, incompatible
//! transport configuration) are reported through this type. Capacity
//! exhaustion is an expected condition signalled through return values, and
//! contract violations on a live duct fail fast with a panic.

use thiserror::Error;

use crate::topology::{EdgeId, NodeId};

/// Unified error type for mesh-conduit operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConduitError {
    /// An edge was listed as the output of more than one node.
    #[error("Topology error: edge `{0}` is produced by more than one node")]
    DuplicateOutput(EdgeId),
    /// An edge was listed as the input of more than one node.
    #[error("Topology error: edge `{0}` is consumed by more than one node")]
    DuplicateInput(EdgeId),
    /// An edge has a consumer but no producer.
    #[error("Topology error: edge `{0}` has no producing node")]
    MissingOutput(EdgeId),
    /// An edge has a producer but no consumer.
    #[error("Topology error: edge `{0}` has no consuming node")]
    MissingInput(EdgeId),
    /// Node lookup outside the topology.
    #[error("Unknown node `{0}`")]
    UnknownNode(NodeId),
    /// Edge ids double as message tags and must fit the tag range.
    #[error("Edge `{0}` does not fit in a message tag")]
    TagOutOfRange(EdgeId),
    /// A receive ring needs every message to have the same byte length.
    #[error("Transport `{0}` requires a fixed-size codec")]
    VariableLengthCodec(&'static str),
    /// Capacity must leave room for at least one in-flight value.
    #[error("Duct capacity must be non-zero")]
    ZeroCapacity,
    /// A value could not be serialized for transport.
    #[error("Encode error: {0}")]
    Encode(String),
    /// Payload bytes could not be turned back into a value.
    #[error("Decode error: {0}")]
    Decode(String),
}
