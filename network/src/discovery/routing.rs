use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::types::{Node, NodeEndpoint, NodeId, PeerType};

/// Number of distance classes for a 256-bit identifier space.
pub(crate) const BUCKET_COUNT: usize = 256;

/// Bucket capacity, `k` in [Kademlia].
pub(crate) const BUCKET_SIZE: usize = 16;

/// XOR distance between two identifiers: 256 minus the length of their
/// common prefix. Identical identifiers are at distance 0.
pub fn xor_distance(left: &[u8; 32], right: &[u8; 32]) -> u16 {
    for (i, (left, right)) in std::iter::zip(left.chunks(8), right.chunks(8)).enumerate() {
        let left = u64::from_be_bytes(left.try_into().unwrap());
        let right = u64::from_be_bytes(right.try_into().unwrap());
        let diff = left ^ right;
        if diff != 0 {
            return (MAX_XOR_DISTANCE - (i * 64 + diff.leading_zeros() as usize)) as u16;
        }
    }

    0
}

const MAX_XOR_DISTANCE: usize = 256;

/// A peer owned by the node registry. Buckets only hold weak handles to
/// these, so dropping one from the registry removes it from its bucket
/// on the next traversal.
pub struct NodeEntry {
    id: NodeId,
    identifier: [u8; 32],
    distance: u16,
    peer_type: PeerType,
    endpoint: Mutex<NodeEndpoint>,
    pending: AtomicBool,
}

impl NodeEntry {
    pub(crate) fn new(local_identifier: &[u8; 32], node: Node, pending: bool) -> Self {
        let identifier = node.id.identifier();
        Self {
            id: node.id,
            distance: xor_distance(local_identifier, &identifier),
            identifier,
            peer_type: node.peer_type,
            endpoint: Mutex::new(node.endpoint),
            pending: AtomicBool::new(pending),
        }
    }

    #[inline]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    #[inline]
    pub(crate) fn identifier(&self) -> &[u8; 32] {
        &self.identifier
    }

    /// Distance from the local node, fixed at construction.
    #[inline]
    pub fn distance(&self) -> u16 {
        self.distance
    }

    pub fn endpoint(&self) -> NodeEndpoint {
        self.endpoint.lock().unwrap().clone()
    }

    /// Whether the peer still awaits its first completed ping round-trip.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Relaxed)
    }

    pub(crate) fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::Relaxed);
    }

    /// Trust-on-last-sight: adopt the datagram origin as the peer's
    /// discovery endpoint, keeping the advertised TCP port.
    pub(crate) fn set_udp_endpoint(&self, ip: IpAddr, udp_port: u16) {
        let mut endpoint = self.endpoint.lock().unwrap();
        endpoint.ip = ip;
        endpoint.udp_port = udp_port;
    }

    pub fn to_node(&self) -> Node {
        Node {
            id: self.id,
            endpoint: self.endpoint(),
            peer_type: self.peer_type,
        }
    }
}

impl std::fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEntry")
            .field("id", &self.id)
            .field("distance", &self.distance)
            .field("endpoint", &self.endpoint())
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Outcome of placing an active node into its bucket.
pub(crate) enum BucketUpdate {
    /// Already present; spliced to the most-recently-seen position.
    Refreshed,
    /// Appended as the most-recently-seen entry.
    Added,
    /// Bucket is at capacity; the least-recently-seen entry must prove
    /// liveness before anything changes.
    Full { incumbent: Arc<NodeEntry> },
}

#[derive(Default)]
struct NodeBucket {
    /// Ordered least-recently-seen (front) to most-recently-seen (back).
    nodes: VecDeque<Weak<NodeEntry>>,
}

/// 256 buckets indexed by distance from the local node; bucket `i` holds
/// entries at distance `i + 1`.
pub(crate) struct RoutingTable {
    buckets: [NodeBucket; BUCKET_COUNT],
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| NodeBucket::default()),
        }
    }

    fn bucket_mut(&mut self, distance: u16) -> &mut NodeBucket {
        debug_assert!((1..=BUCKET_COUNT as u16).contains(&distance));
        &mut self.buckets[(distance.clamp(1, BUCKET_COUNT as u16) - 1) as usize]
    }

    /// Places an entry as the most-recently-seen node of its bucket.
    ///
    /// A stale front handle counts as free space: it is pruned and the
    /// new entry appended without an eviction probe.
    pub fn update(&mut self, entry: &Arc<NodeEntry>) -> BucketUpdate {
        let bucket = self.bucket_mut(entry.distance());
        let weak = Arc::downgrade(entry);

        if let Some(index) = bucket.nodes.iter().position(|node| node.ptr_eq(&weak)) {
            if let Some(node) = bucket.nodes.remove(index) {
                bucket.nodes.push_back(node);
            }
            return BucketUpdate::Refreshed;
        }

        if bucket.nodes.len() < BUCKET_SIZE {
            bucket.nodes.push_back(weak);
            return BucketUpdate::Added;
        }

        match bucket.nodes.front().and_then(Weak::upgrade) {
            Some(incumbent) => BucketUpdate::Full { incumbent },
            None => {
                bucket.nodes.pop_front();
                bucket.nodes.push_back(weak);
                BucketUpdate::Added
            }
        }
    }

    pub fn remove(&mut self, entry: &Arc<NodeEntry>) {
        let weak = Arc::downgrade(entry);
        self.bucket_mut(entry.distance())
            .nodes
            .retain(|node| !node.ptr_eq(&weak));
    }

    /// All currently bucketed live entries.
    pub fn snapshot(&self) -> Vec<Arc<NodeEntry>> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.nodes.iter().filter_map(Weak::upgrade))
            .collect()
    }

    /// Up to [`BUCKET_SIZE`] live entries with allowed endpoints, ordered
    /// by ascending distance to `target`.
    pub fn nearest(&self, target: &[u8; 32], allow_local: bool) -> Vec<Arc<NodeEntry>> {
        let mut found = Vec::new();
        for bucket in &self.buckets {
            for node in &bucket.nodes {
                let Some(entry) = node.upgrade() else { continue };
                if !entry.endpoint().is_allowed(allow_local) {
                    continue;
                }
                found.push((xor_distance(target, entry.identifier()), entry));
            }
        }

        found.sort_unstable_by(|(left, _), (right, _)| left.cmp(right));
        found.truncate(BUCKET_SIZE);
        found.into_iter().map(|(_, entry)| entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn make_entry(local_identifier: &[u8; 32], seed: u16) -> Arc<NodeEntry> {
        let id = rand::random::<NodeId>();
        let endpoint =
            NodeEndpoint::from_str(&format!("203.0.113.{}:{}", seed % 250 + 1, 30000 + seed))
                .unwrap();
        Arc::new(NodeEntry::new(
            local_identifier,
            Node::new(id, endpoint),
            false,
        ))
    }

    /// Entries sharing one bucket, generated until enough random ids land
    /// at the same distance from the local identifier.
    fn entries_in_one_bucket(local_identifier: &[u8; 32], count: usize) -> Vec<Arc<NodeEntry>> {
        let mut by_distance = lodestone_util::FastHashMap::<u16, Vec<Arc<NodeEntry>>>::default();
        for seed in 0.. {
            let entry = make_entry(local_identifier, seed);
            let bucket = by_distance.entry(entry.distance()).or_default();
            bucket.push(entry);
            if bucket.len() == count {
                return by_distance
                    .into_values()
                    .find(|entries| entries.len() == count)
                    .unwrap();
            }
        }
        unreachable!()
    }

    #[test]
    fn distance_properties() {
        assert_eq!(xor_distance(&[0; 32], &[0; 32]), 0);

        let mut msb = [0u8; 32];
        msb[0] = 0x80;
        assert_eq!(xor_distance(&[0; 32], &msb), 256);

        let mut second = [0u8; 32];
        second[0] = 0x40;
        assert_eq!(xor_distance(&[0; 32], &second), 255);

        let mut lsb = [0u8; 32];
        lsb[31] = 0x01;
        assert_eq!(xor_distance(&[0; 32], &lsb), 1);

        // symmetric
        assert_eq!(xor_distance(&msb, &second), xor_distance(&second, &msb));
    }

    #[test]
    fn entry_distance_matches_identifiers() {
        let local = rand::random::<NodeId>().identifier();
        let entry = make_entry(&local, 0);
        assert_eq!(
            entry.distance(),
            xor_distance(&local, &entry.id().identifier())
        );
    }

    #[test]
    fn update_is_lru() {
        let local = rand::random::<NodeId>().identifier();
        let entries = entries_in_one_bucket(&local, 3);

        let mut table = RoutingTable::new();
        for entry in &entries {
            assert!(matches!(table.update(entry), BucketUpdate::Added));
        }

        // re-noting the first entry splices it to the tail
        assert!(matches!(table.update(&entries[0]), BucketUpdate::Refreshed));
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.last().unwrap().id(), entries[0].id());

        // and does so idempotently
        assert!(matches!(table.update(&entries[0]), BucketUpdate::Refreshed));
        assert_eq!(table.snapshot().len(), 3);
    }

    #[test]
    fn full_bucket_names_the_least_recently_seen() {
        let local = rand::random::<NodeId>().identifier();
        let entries = entries_in_one_bucket(&local, BUCKET_SIZE + 1);

        let mut table = RoutingTable::new();
        for entry in &entries[..BUCKET_SIZE] {
            assert!(matches!(table.update(entry), BucketUpdate::Added));
        }

        match table.update(&entries[BUCKET_SIZE]) {
            BucketUpdate::Full { incumbent } => assert_eq!(incumbent.id(), entries[0].id()),
            _ => panic!("expected a full bucket"),
        }
        assert_eq!(table.snapshot().len(), BUCKET_SIZE);
    }

    #[test]
    fn stale_front_is_pruned_without_probe() {
        let local = rand::random::<NodeId>().identifier();
        let mut entries = entries_in_one_bucket(&local, BUCKET_SIZE + 1);

        let mut table = RoutingTable::new();
        for entry in &entries[..BUCKET_SIZE] {
            table.update(entry);
        }

        // dropping the strong owner of the front entry frees its slot
        let front = entries.remove(0);
        drop(front);

        assert!(matches!(
            table.update(&entries[BUCKET_SIZE - 1]),
            BucketUpdate::Added
        ));
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), BUCKET_SIZE);
        assert_eq!(
            snapshot.last().unwrap().id(),
            entries[BUCKET_SIZE - 1].id()
        );
    }

    #[test]
    fn remove_drops_the_entry() {
        let local = rand::random::<NodeId>().identifier();
        let entries = entries_in_one_bucket(&local, 2);

        let mut table = RoutingTable::new();
        for entry in &entries {
            table.update(entry);
        }

        table.remove(&entries[0]);
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), entries[1].id());
    }

    #[test]
    fn nearest_orders_by_target_distance() {
        let local = rand::random::<NodeId>().identifier();

        let mut table = RoutingTable::new();
        let mut entries = Vec::new();
        for seed in 0..32 {
            let entry = make_entry(&local, seed);
            table.update(&entry);
            entries.push(entry);
        }

        let target = rand::random::<NodeId>().identifier();
        let nearest = table.nearest(&target, false);

        assert!(!nearest.is_empty());
        assert!(nearest.len() <= BUCKET_SIZE);
        for pair in nearest.windows(2) {
            assert!(
                xor_distance(&target, pair[0].identifier())
                    <= xor_distance(&target, pair[1].identifier())
            );
        }
    }

    #[test]
    fn nearest_skips_disallowed_endpoints() {
        let local = rand::random::<NodeId>().identifier();

        let mut table = RoutingTable::new();
        let public = make_entry(&local, 0);
        table.update(&public);

        let private = Arc::new(NodeEntry::new(
            &local,
            Node::new(
                rand::random(),
                NodeEndpoint::from_str("192.168.1.1:30303").unwrap(),
            ),
            false,
        ));
        table.update(&private);

        let target = rand::random::<NodeId>().identifier();
        let nearest = table.nearest(&target, false);
        assert_eq!(nearest.len(), 1);
        assert_eq!(nearest[0].id(), public.id());

        // both are visible when local endpoints are permitted
        assert_eq!(table.nearest(&target, true).len(), 2);
    }
}
