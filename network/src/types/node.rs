use serde::{Deserialize, Serialize};

use crate::types::{NodeEndpoint, NodeId};

/// How important it is for the session layer to stay connected to a peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeerType {
    Required,
    #[default]
    Optional,
}

/// A peer as seen by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub endpoint: NodeEndpoint,
    pub peer_type: PeerType,
}

impl Node {
    pub fn new(id: NodeId, endpoint: NodeEndpoint) -> Self {
        Self {
            id,
            endpoint,
            peer_type: PeerType::Optional,
        }
    }
}

/// Provenance of a node handed to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRelation {
    /// Loaded from a persisted store and assumed live; bucketed immediately.
    Known,
    /// Heard about over the network; bucketed only after a completed
    /// ping round-trip.
    Unknown,
}
