use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::discovery::{codec, lookup, NodeTableInner};
use crate::types::NodeId;

impl NodeTableInner {
    /// Drives the socket read callback. Exits on table shutdown.
    pub(crate) fn start_listener(self: &Arc<Self>, socket: Arc<UdpSocket>) {
        let this = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tracing::debug!("discovery listener started");

            let mut buf = vec![0; codec::MAX_DATAGRAM_SIZE];
            loop {
                let received = tokio::select! {
                    _ = shutdown.notified() => break,
                    received = socket.recv_from(&mut buf) => received,
                };

                match received {
                    Ok((len, from)) => {
                        let Some(this) = this.upgrade() else { break };
                        this.handle_datagram(&buf[..len], from);
                    }
                    Err(e) => {
                        tracing::debug!("failed to receive datagram: {e}");
                    }
                }
            }

            tracing::debug!("discovery listener finished");
        });
    }

    /// Periodic random-target crawl refreshing the buckets.
    pub(crate) fn start_discovery_loop(self: &Arc<Self>) {
        let this = Arc::downgrade(self);

        tokio::spawn(async move {
            tracing::debug!("discovery loop started");

            loop {
                let period = match this.upgrade() {
                    Some(this) => this.config.bucket_refresh_period,
                    None => break,
                };
                tokio::time::sleep(period).await;

                let target = rand::random::<NodeId>();
                lookup::discover(&this, target).await;

                if this.strong_count() == 0 {
                    break;
                }
            }

            tracing::debug!("discovery loop finished");
        });
    }

    /// Sweeps timed-out eviction probes. Runs only while probes are in
    /// flight; `evict` restarts it when the map refills.
    pub(crate) fn spawn_eviction_sweep(self: &Arc<Self>) {
        let this = Arc::downgrade(self);
        let interval = self.config.eviction_check_interval;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(this) = this.upgrade() else { break };
                if !this.check_evictions() {
                    break;
                }
            }
        });
    }

    /// Resolves probes older than the request timeout: the incumbent is
    /// deemed dead, dropped, and its replacement promoted. Returns whether
    /// any probe is still outstanding.
    fn check_evictions(self: &Arc<Self>) -> bool {
        let mut dropped = Vec::new();
        let mut promoted = Vec::new();

        // snapshot under the locks, act after release
        let remaining = {
            let mut evictions = self.evictions.lock().unwrap();
            let nodes = self.nodes.lock().unwrap();

            evictions.retain(|incumbent_id, probe| {
                if probe.started_at.elapsed() <= self.config.request_timeout {
                    return true;
                }

                if let Some(incumbent) = nodes.entries.get(incumbent_id) {
                    dropped.push(incumbent.clone());
                    if let Some(replacement) = nodes.entries.get(&probe.replacement_id) {
                        promoted.push(replacement.clone());
                    }
                }
                false
            });

            !evictions.is_empty()
        };

        for entry in &dropped {
            tracing::debug!(id = %entry.id(), "eviction probe timed out");
            self.drop_node(entry);
        }
        for entry in promoted {
            self.note_active_node(entry.id(), entry.endpoint().udp_addr());
        }

        remaining
    }
}
