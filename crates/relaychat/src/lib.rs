//! # relaychat
//!
//! Keeps player display names consistent across a cluster of game servers
//! that sit behind one proxy.
//!
//! Each backend pushes its own name table to the proxy; the proxy merges
//! every table and broadcasts the result back on a fixed period, so any
//! server can resolve the display name of any online player.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use relaychat::prelude::*;
//!
//! # async fn run() -> Result<(), RelaychatError> {
//! relaychat::logging::init();
//!
//! // Proxy process
//! let hub = Arc::new(WebSocketHub::bind("0.0.0.0:25580").await?);
//! let proxy = ProxyMessageManager::new(hub, ProxyConfig::default());
//! let _broadcast = proxy.spawn_broadcast();
//!
//! // Backend process
//! let backend =
//!     BackendMessenger::connect("ws://proxy:25580", "survival", BackendConfig::default()).await?;
//! let _ = backend.update_names(&NameTable::new());
//! # Ok(())
//! # }
//! ```

mod error;
pub mod logging;

pub use error::RelaychatError;

pub use relaychat_backend as backend;
pub use relaychat_pool as pool;
pub use relaychat_protocol as protocol;
pub use relaychat_proxy as proxy;
pub use relaychat_tick as tick;
pub use relaychat_transport as transport;

pub mod prelude {
    pub use crate::RelaychatError;
    pub use relaychat_backend::{BackendConfig, BackendMessenger, ClusterNames};
    pub use relaychat_pool::{PoolConfig, TaskHandle};
    pub use relaychat_protocol::{Message, NameTable, SendOutcome, SendReport, commands};
    pub use relaychat_proxy::{ProxyConfig, ProxyMessageManager};
    pub use relaychat_tick::TickConfig;
    pub use relaychat_transport::{
        Channel, ChannelTransport, EndpointId, EndpointInfo, MemoryHub, Recipient, WebSocketHub,
        WebSocketUplink,
    };
}
