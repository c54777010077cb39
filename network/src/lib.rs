pub use self::crypto::Keypair;
pub use self::discovery::{
    codec, xor_distance, DiscoveryConfig, NodeEntry, NodeTable, NodeTableBuilder,
};
pub use self::types::{
    EventSink, Node, NodeEndpoint, NodeEvent, NodeId, NodeRelation, PeerType,
};

mod crypto;
mod discovery;
mod types;
mod udp;

pub mod proto {
    pub mod discovery;
}
