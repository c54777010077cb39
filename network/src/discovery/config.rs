use std::time::Duration;

use lodestone_util::serde_helpers;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How long a probed peer has to answer before it is considered dead.
    ///
    /// Default: 300 ms.
    #[serde(with = "serde_helpers::humantime")]
    pub request_timeout: Duration,

    /// Cadence of the eviction sweep while probes are in flight.
    ///
    /// Default: 75 ms.
    #[serde(with = "serde_helpers::humantime")]
    pub eviction_check_interval: Duration,

    /// Delay between random-target discovery crawls.
    ///
    /// Default: 7200 ms.
    #[serde(with = "serde_helpers::humantime")]
    pub bucket_refresh_period: Duration,

    /// Validity window stamped on outbound packets; inbound packets past
    /// their window are dropped.
    ///
    /// Default: 60 seconds.
    #[serde(with = "serde_helpers::humantime")]
    pub packet_expiry: Duration,

    /// Accept loopback/private peer endpoints. Off outside of tests.
    ///
    /// Default: no.
    pub allow_local_endpoints: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(300),
            eviction_check_interval: Duration::from_millis(75),
            bucket_refresh_period: Duration::from_millis(7200),
            packet_expiry: Duration::from_secs(60),
            allow_local_endpoints: false,
        }
    }
}
