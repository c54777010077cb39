use std::sync::Weak;
use std::time::Instant;

use lodestone_util::FastHashSet;

use crate::discovery::{codec, FindNodeTimeout, NodeTableInner};
use crate::proto::discovery as proto;
use crate::types::NodeId;

/// Number of concurrent `FindNode` requests per round, `α` in [Kademlia].
pub(crate) const ALPHA: usize = 3;

/// Upper bound on lookup rounds.
pub(crate) const MAX_DISCOVERY_ROUNDS: usize = 8;

/// Iterative lookup for peers close to `target`.
///
/// Each round queries up to [`ALPHA`] of the closest not-yet-tried peers,
/// then waits out a fixed window for `Neighbours` responses to populate
/// the registry before the next round. Termination is round-counted, not
/// result-driven; the caller schedules the next crawl afterwards.
pub(crate) async fn discover(this: &Weak<NodeTableInner>, target: NodeId) {
    let target_identifier = target.identifier();
    let mut tried = FastHashSet::<NodeId>::default();

    for round in 0..MAX_DISCOVERY_ROUNDS {
        let round_delay = {
            let Some(this) = this.upgrade() else { return };
            if !this.is_open() {
                return;
            }

            let queried = this.send_find_node_round(&target, &target_identifier, &mut tried);
            if queried == 0 {
                tracing::debug!(round, "lookup terminated: no untried candidates");
                return;
            }

            tracing::trace!(round, queried, target = %target, "sent lookup round");
            this.config.request_timeout * 2
        };

        tokio::time::sleep(round_delay).await;
    }

    tracing::debug!(target = %target, "lookup terminated after {MAX_DISCOVERY_ROUNDS} rounds");
}

impl NodeTableInner {
    /// Sends one round of `FindNode` requests and registers the expected
    /// responders. Returns how many peers were queried.
    pub(crate) fn send_find_node_round(
        &self,
        target: &NodeId,
        target_identifier: &[u8; 32],
        tried: &mut FastHashSet<NodeId>,
    ) -> usize {
        let nearest = {
            let state = self.state.lock().unwrap();
            state.nearest(target_identifier, self.config.allow_local_endpoints)
        };

        let mut queried = 0;
        for entry in nearest {
            if queried == ALPHA {
                break;
            }
            if !tried.insert(*entry.id()) {
                continue;
            }

            {
                let mut timeouts = self.find_node_timeouts.lock().unwrap();
                // long-forgotten requests are of no further interest
                timeouts.retain(|timeout| timeout.sent_at.elapsed() < self.config.request_timeout);
                timeouts.push(FindNodeTimeout {
                    queried_id: *entry.id(),
                    sent_at: Instant::now(),
                });
            }

            self.send_packet(
                codec::PacketBody::FindNode(proto::FindNode {
                    target: *target,
                    expires_at: self.packet_expiry(),
                }),
                entry.endpoint().udp_addr(),
            );
            queried += 1;
        }

        queried
    }
}
