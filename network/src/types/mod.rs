pub use self::endpoint::NodeEndpoint;
pub use self::node::{Node, NodeRelation, PeerType};
pub use self::node_event::{EventSink, NodeEvent};
pub use self::node_id::NodeId;

mod endpoint;
mod node;
mod node_event;
mod node_id;

pub(crate) use self::endpoint::is_routable;
