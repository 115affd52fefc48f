//! Backend configuration.

use std::time::Duration;

use relaychat_pool::PoolConfig;
use relaychat_protocol::FrameLimit;
use serde::{Deserialize, Serialize};

/// Settings for a [`BackendMessenger`](crate::BackendMessenger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Workers that run upstream sends. A backend only talks to the proxy,
    /// so it needs far fewer than the proxy does.
    pub pool: PoolConfig,

    /// Largest frame handed to the transport.
    pub frame_limit: FrameLimit,

    /// How often the local table is pushed upstream by
    /// [`BackendMessenger::spawn_push`](crate::BackendMessenger::spawn_push).
    pub push_interval: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig {
                workers: 2,
                name: "backend-send".to_string(),
                ..PoolConfig::default()
            },
            frame_limit: FrameLimit::default(),
            push_interval: Duration::from_secs(5),
        }
    }
}
