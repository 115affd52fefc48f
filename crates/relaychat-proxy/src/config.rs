//! Proxy configuration.

use std::time::Duration;

use relaychat_pool::PoolConfig;
use relaychat_protocol::FrameLimit;
use relaychat_tick::TickConfig;
use serde::{Deserialize, Serialize};

/// Settings for a [`ProxyMessageManager`](crate::ProxyMessageManager).
///
/// Every field has a default, so a partial document deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Workers that run outbound sends.
    pub pool: PoolConfig,

    /// Cadence of the merged-table broadcast.
    pub tick: TickConfig,

    /// Largest frame handed to the transport.
    pub frame_limit: FrameLimit,

    /// Bound on a single transport send. `None` waits indefinitely.
    pub send_timeout: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig {
                name: "proxy-send".to_string(),
                ..PoolConfig::default()
            },
            tick: TickConfig::default(),
            frame_limit: FrameLimit::default(),
            send_timeout: None,
        }
    }
}
