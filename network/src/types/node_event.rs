use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Table membership change, delivered to the [`EventSink`] via
/// `NodeTable::process_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEvent {
    Added(NodeId),
    Dropped(NodeId),
}

/// Consumer of table membership changes.
///
/// Events are queued as they happen and handed over on the thread that
/// calls `NodeTable::process_events`; the sink is never invoked while
/// any table lock is held.
pub trait EventSink: Send + Sync + 'static {
    fn handle(&self, event: NodeEvent);
}
