use std::collections::hash_map;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use lodestone_util::time::now_sec;
use lodestone_util::FastHashMap;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use self::codec::{Packet, PacketBody};
use self::routing::BucketUpdate;
use crate::crypto::Keypair;
use crate::proto::discovery as proto;
use crate::types::{is_routable, EventSink, Node, NodeEndpoint, NodeEvent, NodeId, NodeRelation};
use crate::udp::{self, OutboundQueue};

pub use self::config::DiscoveryConfig;
pub use self::routing::{xor_distance, NodeEntry};

pub mod codec;

mod background_tasks;
mod config;
mod lookup;
mod routing;

pub struct NodeTableBuilder {
    keypair: Keypair,
    local_endpoint: NodeEndpoint,
    config: DiscoveryConfig,
    enabled: bool,
}

impl NodeTableBuilder {
    pub fn with_config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Skips opening the socket and starting discovery. The table stays
    /// queryable but learns nothing on its own.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Binds the discovery socket and starts the maintenance loops.
    ///
    /// Must be called from within a tokio runtime when discovery is
    /// enabled. Binding failures surface here; nothing else about the
    /// table can fail synchronously.
    pub fn build(self) -> Result<NodeTable> {
        let Self {
            keypair,
            mut local_endpoint,
            config,
            enabled,
        } = self;

        let socket = if enabled {
            let socket = udp::bind(local_endpoint.udp_addr())
                .context("failed to open discovery socket")?;
            if let Ok(addr) = socket.local_addr() {
                local_endpoint.udp_port = addr.port();
            }
            Some(Arc::new(socket))
        } else {
            None
        };

        let outbound = socket.clone().map(udp::spawn_sender);

        let inner = Arc::new(NodeTableInner {
            local_identifier: keypair.id().identifier(),
            keypair,
            config,
            nodes: Mutex::new(AllNodes {
                entries: FastHashMap::default(),
                local_endpoint,
            }),
            state: Mutex::new(routing::RoutingTable::new()),
            evictions: Mutex::new(FastHashMap::default()),
            find_node_timeouts: Mutex::new(Vec::new()),
            events: Mutex::new(VecDeque::new()),
            event_sink: Mutex::new(None),
            socket: socket.clone(),
            outbound,
            shutdown: Arc::new(Notify::new()),
        });

        if let Some(socket) = socket {
            inner.start_listener(socket);
            inner.start_discovery_loop();
        }

        Ok(NodeTable { inner })
    }
}

/// Kademlia-style node table over a signed UDP discovery protocol.
///
/// Starting from a bootstrap set the table continuously crawls for more
/// peers, keeps a freshness-biased view of them in 256 distance-indexed
/// buckets, and verifies liveness before anything is evicted. The session
/// layer polls [`snapshot`](Self::snapshot) / [`node`](Self::node) and
/// drains membership events via [`process_events`](Self::process_events).
pub struct NodeTable {
    inner: Arc<NodeTableInner>,
}

impl NodeTable {
    pub fn builder(keypair: Keypair, local_endpoint: NodeEndpoint) -> NodeTableBuilder {
        NodeTableBuilder {
            keypair,
            local_endpoint,
            config: DiscoveryConfig::default(),
            enabled: true,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        self.inner.keypair.id()
    }

    /// The local endpoint, including anything learned from pong echoes.
    pub fn local_endpoint(&self) -> NodeEndpoint {
        self.inner.nodes.lock().unwrap().local_endpoint.clone()
    }

    pub fn add_node(&self, node: Node, relation: NodeRelation) {
        self.inner.add_node(node, relation);
    }

    /// Ids of every node in the registry, bucketed or not.
    pub fn nodes(&self) -> Vec<NodeId> {
        let nodes = self.inner.nodes.lock().unwrap();
        nodes.entries.keys().copied().collect()
    }

    /// All currently bucketed entries.
    pub fn snapshot(&self) -> Vec<Arc<NodeEntry>> {
        self.inner.state.lock().unwrap().snapshot()
    }

    pub fn node(&self, id: &NodeId) -> Option<Node> {
        let nodes = self.inner.nodes.lock().unwrap();
        nodes.entries.get(id).map(|entry| entry.to_node())
    }

    /// Removes a node from its bucket and the registry.
    pub fn drop_node(&self, id: &NodeId) {
        if let Some(entry) = self.inner.node_entry(id) {
            self.inner.drop_node(&entry);
        }
    }

    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.event_sink.lock().unwrap() = Some(sink);
    }

    /// Hands queued membership events to the sink on the caller's thread.
    pub fn process_events(&self) {
        let Some(sink) = self.inner.event_sink.lock().unwrap().clone() else {
            return;
        };

        let events = {
            let mut events = self.inner.events.lock().unwrap();
            std::mem::take(&mut *events)
        };

        for event in events {
            sink.handle(event);
        }
    }
}

impl Drop for NodeTable {
    fn drop(&mut self) {
        self.inner.shutdown.notify_waiters();
    }
}

struct AllNodes {
    entries: FastHashMap<NodeId, Arc<NodeEntry>>,
    local_endpoint: NodeEndpoint,
}

struct EvictionProbe {
    replacement_id: NodeId,
    started_at: Instant,
}

pub(crate) struct FindNodeTimeout {
    pub queried_id: NodeId,
    pub sent_at: Instant,
}

pub(crate) struct NodeTableInner {
    keypair: Keypair,
    local_identifier: [u8; 32],
    pub(crate) config: DiscoveryConfig,
    /// Master node registry and the local endpoint.
    nodes: Mutex<AllNodes>,
    /// Bucket array. Never locked while sending or firing events.
    state: Mutex<routing::RoutingTable>,
    /// In-flight eviction probes, keyed by the incumbent under test.
    /// Lock order when combined with `nodes`: `evictions` first.
    evictions: Mutex<FastHashMap<NodeId, EvictionProbe>>,
    /// Outstanding `FindNode` requests awaiting `Neighbours`.
    pub(crate) find_node_timeouts: Mutex<Vec<FindNodeTimeout>>,
    events: Mutex<VecDeque<NodeEvent>>,
    event_sink: Mutex<Option<Arc<dyn EventSink>>>,
    socket: Option<Arc<UdpSocket>>,
    outbound: Option<OutboundQueue>,
    shutdown: Arc<Notify>,
}

impl NodeTableInner {
    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn packet_expiry(&self) -> u32 {
        now_sec() + self.config.packet_expiry.as_secs() as u32
    }

    fn local_endpoint(&self) -> NodeEndpoint {
        self.nodes.lock().unwrap().local_endpoint.clone()
    }

    fn node_entry(&self, id: &NodeId) -> Option<Arc<NodeEntry>> {
        self.nodes.lock().unwrap().entries.get(id).cloned()
    }

    fn send_packet(&self, body: PacketBody, to: SocketAddr) {
        let Some(outbound) = &self.outbound else {
            return;
        };

        let datagram = codec::encode(&self.keypair, &body);
        if datagram.len() > codec::MAX_DATAGRAM_SIZE {
            tracing::warn!(len = datagram.len(), "sending oversized datagram");
        }
        tracing::trace!(%to, "sending {}", body.type_name());
        outbound.send(datagram, to);
    }

    fn ping(&self, to: &NodeEndpoint) {
        let source = self.local_endpoint();
        self.send_packet(
            PacketBody::Ping(proto::Ping {
                version: proto::PROTOCOL_VERSION,
                source,
                destination: to.clone(),
                expires_at: self.packet_expiry(),
            }),
            to.udp_addr(),
        );
    }

    fn add_node(self: &Arc<Self>, node: Node, relation: NodeRelation) {
        if &node.id == self.keypair.id() {
            return;
        }

        match relation {
            NodeRelation::Known => {
                let entry = Arc::new(NodeEntry::new(&self.local_identifier, node.clone(), false));
                self.nodes
                    .lock()
                    .unwrap()
                    .entries
                    .insert(node.id, entry);
                self.note_active_node(&node.id, node.endpoint.udp_addr());
            }
            NodeRelation::Unknown => {
                if node.id.is_zero() || !node.endpoint.is_specified() {
                    return;
                }

                {
                    let mut nodes = self.nodes.lock().unwrap();
                    if nodes.entries.contains_key(&node.id) {
                        return;
                    }
                    let entry =
                        Arc::new(NodeEntry::new(&self.local_identifier, node.clone(), true));
                    nodes.entries.insert(node.id, entry);
                }

                tracing::debug!(id = %node.id, endpoint = %node.endpoint, "adding pending node");
                self.ping(&node.endpoint);
            }
        }
    }

    /// The only path by which a node becomes bucketed. No-op until the
    /// peer has proven liveness (`pending` cleared).
    fn note_active_node(self: &Arc<Self>, id: &NodeId, observed: SocketAddr) {
        if id == self.keypair.id() {
            return;
        }
        let observed_endpoint = NodeEndpoint::from(observed);
        if !observed_endpoint.is_allowed(self.config.allow_local_endpoints) {
            return;
        }

        let Some(entry) = self.node_entry(id) else {
            return;
        };
        if entry.is_pending() {
            return;
        }

        tracing::trace!(%id, %observed, "noting active node");
        entry.set_udp_endpoint(observed.ip(), observed.port());

        let update = {
            let mut state = self.state.lock().unwrap();
            state.update(&entry)
        };

        match update {
            BucketUpdate::Refreshed => {}
            BucketUpdate::Added => self.push_event(NodeEvent::Added(*id)),
            BucketUpdate::Full { incumbent } => self.evict(incumbent, entry),
        }
    }

    /// Challenges a bucket's least-recently-seen entry before letting the
    /// replacement in. A probe already in flight for the same incumbent
    /// is left untouched.
    fn evict(self: &Arc<Self>, incumbent: Arc<NodeEntry>, replacement: Arc<NodeEntry>) {
        if !self.is_open() {
            return;
        }

        let start_sweep = {
            let mut evictions = self.evictions.lock().unwrap();
            let was_empty = evictions.is_empty();
            evictions
                .entry(*incumbent.id())
                .or_insert_with(|| EvictionProbe {
                    replacement_id: *replacement.id(),
                    started_at: Instant::now(),
                });
            was_empty
        };

        tracing::debug!(
            incumbent = %incumbent.id(),
            replacement = %replacement.id(),
            "starting eviction probe"
        );

        if start_sweep {
            self.spawn_eviction_sweep();
        }
        self.ping(&incumbent.endpoint());
    }

    fn drop_node(self: &Arc<Self>, entry: &Arc<NodeEntry>) {
        {
            let mut state = self.state.lock().unwrap();
            state.remove(entry);
        }
        {
            let mut nodes = self.nodes.lock().unwrap();
            nodes.entries.remove(entry.id());
        }

        tracing::debug!(id = %entry.id(), "dropping node");
        self.push_event(NodeEvent::Dropped(*entry.id()));
    }

    fn push_event(&self, event: NodeEvent) {
        if self.event_sink.lock().unwrap().is_none() {
            return;
        }
        self.events.lock().unwrap().push_back(event);
    }

    /// Entry point for every datagram read off the socket. Handler
    /// failures stay local to the packet; the listener never dies.
    pub(crate) fn handle_datagram(self: &Arc<Self>, data: &[u8], from: SocketAddr) {
        let packet = match codec::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(%from, "dropping malformed packet: {e}");
                return;
            }
        };

        if packet.body.expires_at() < now_sec() {
            tracing::debug!(%from, "dropping expired {} packet", packet.body.type_name());
            return;
        }

        tracing::trace!(%from, source_id = %packet.source_id, "received {}", packet.body.type_name());

        let Packet {
            hash,
            source_id,
            body,
        } = packet;
        let accepted = match body {
            PacketBody::Ping(body) => self.handle_ping(body, &source_id, from, &hash),
            PacketBody::Pong(body) => self.handle_pong(body, &source_id),
            PacketBody::FindNode(body) => self.handle_find_node(body, from),
            PacketBody::Neighbours(body) => self.handle_neighbours(body, &source_id, from),
        };

        if accepted {
            self.note_active_node(&source_id, from);
        }
    }

    fn handle_ping(
        self: &Arc<Self>,
        body: proto::Ping,
        source_id: &NodeId,
        from: SocketAddr,
        echo: &[u8; 32],
    ) -> bool {
        // the datagram origin wins over whatever the sender advertised
        let mut source = body.source;
        source.ip = from.ip();
        source.udp_port = from.port();

        self.add_node(Node::new(*source_id, source.clone()), NodeRelation::Unknown);

        self.send_packet(
            PacketBody::Pong(proto::Pong {
                destination: source,
                echo: *echo,
                expires_at: self.packet_expiry(),
            }),
            from,
        );
        true
    }

    fn handle_pong(self: &Arc<Self>, body: proto::Pong, source_id: &NodeId) -> bool {
        // an unexpired probe answered in time keeps the incumbent and
        // discards its would-be replacement
        let replacement_id = {
            let mut evictions = self.evictions.lock().unwrap();
            match evictions.entry(*source_id) {
                hash_map::Entry::Occupied(entry)
                    if entry.get().started_at.elapsed() <= self.config.request_timeout =>
                {
                    Some(entry.remove().replacement_id)
                }
                _ => None,
            }
        };

        match replacement_id {
            Some(replacement_id) => {
                if let Some(replacement) = self.node_entry(&replacement_id) {
                    self.drop_node(&replacement);
                }
                if let Some(incumbent) = self.node_entry(source_id) {
                    incumbent.set_pending(false);
                }
            }
            None => {
                if let Some(entry) = self.node_entry(source_id) {
                    entry.set_pending(false);
                }
            }
        }

        // learn our externally observed endpoint from the echo
        {
            let mut nodes = self.nodes.lock().unwrap();
            let local = &mut nodes.local_endpoint;
            if !is_routable(&local.ip) && is_routable(&body.destination.ip) {
                local.ip = body.destination.ip;
            }
            local.udp_port = body.destination.udp_port;
        }

        true
    }

    fn handle_find_node(self: &Arc<Self>, body: proto::FindNode, from: SocketAddr) -> bool {
        let target_identifier = body.target.identifier();
        let nearest = {
            let state = self.state.lock().unwrap();
            state.nearest(&target_identifier, self.config.allow_local_endpoints)
        };

        for chunk in nearest.chunks(codec::MAX_NEIGHBOURS_PER_DATAGRAM) {
            let nodes = chunk
                .iter()
                .map(|entry| proto::Neighbour {
                    endpoint: entry.endpoint(),
                    id: *entry.id(),
                })
                .collect();

            self.send_packet(
                PacketBody::Neighbours(proto::Neighbours {
                    nodes,
                    expires_at: self.packet_expiry(),
                }),
                from,
            );
        }
        true
    }

    fn handle_neighbours(
        self: &Arc<Self>,
        body: proto::Neighbours,
        source_id: &NodeId,
        from: SocketAddr,
    ) -> bool {
        // only accepted when we recently asked this peer; matching
        // timeout entries are consumed either way
        let expected = {
            let mut timeouts = self.find_node_timeouts.lock().unwrap();
            let mut expected = false;
            timeouts.retain(|timeout| {
                if &timeout.queried_id == source_id {
                    if timeout.sent_at.elapsed() < self.config.request_timeout {
                        expected = true;
                    }
                    false
                } else {
                    true
                }
            });
            expected
        };

        if !expected {
            tracing::warn!(%from, "dropping unsolicited neighbours packet");
            return false;
        }

        for neighbour in body.nodes {
            self.add_node(
                Node::new(neighbour.id, neighbour.endpoint),
                NodeRelation::Unknown,
            );
        }
        true
    }
}
