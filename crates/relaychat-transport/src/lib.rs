//! Channel transport abstraction for relaychat.
//!
//! The proxy and its backends exchange opaque binary frames over two fixed
//! logical channels. This crate provides the [`ChannelTransport`] trait that
//! both process roles program against, plus two implementations:
//!
//! - [`MemoryHub`] / [`MemoryLink`]: in-process links, used by tests and
//!   the cluster simulation.
//! - [`WebSocketHub`] / [`WebSocketUplink`]: real network links
//!   (feature `websocket`, on by default).
//!
//! # Delivery
//!
//! Best effort. Frames handed to one `send` call on the same endpoint
//! arrive in order; nothing is promised across calls or endpoints, and there
//! are no acknowledgements or retries.

mod endpoint;
mod error;
mod listeners;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use endpoint::{EndpointId, EndpointInfo, Recipient};
pub use error::TransportError;
pub use listeners::Listeners;
pub use memory::{MemoryHub, MemoryLink};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketHub, WebSocketUplink};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

/// The two logical channels. There are no others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Backend → proxy traffic.
    ServerToProxy,
    /// Proxy → backend traffic.
    ProxyToServer,
}

impl Channel {
    /// Wire name of the channel.
    pub fn name(self) -> &'static str {
        match self {
            Channel::ServerToProxy => "relaychat:proxy",
            Channel::ProxyToServer => "relaychat:server",
        }
    }

    /// Looks a channel up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "relaychat:proxy" => Some(Channel::ServerToProxy),
            "relaychat:server" => Some(Channel::ProxyToServer),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Link lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A peer finished its hello and can now exchange frames.
    Connected(EndpointInfo),
    /// A peer went away. Its id is never reused.
    Disconnected(EndpointId),
}

/// Callback invoked once per inbound frame with the source endpoint.
pub type FrameHandler = Arc<dyn Fn(EndpointId, Bytes) + Send + Sync>;

/// Callback invoked on every link lifecycle change.
pub type LinkHandler = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Sends and receives raw frames on the logical channels.
///
/// Implementations differ per process role but expose the same contract.
/// Handlers may be invoked from transport-owned tasks, so they must be
/// cheap and must not block.
pub trait ChannelTransport: Send + Sync + 'static {
    /// Hands one frame to the transport for delivery to `endpoint`.
    ///
    /// Returns `true` if the transport accepted the frame and `false` if it
    /// was refused (unknown endpoint, link not forwarding, link closed).
    /// `true` is not an acknowledgement of receipt.
    fn send(
        &self,
        endpoint: EndpointId,
        channel: Channel,
        frame: Bytes,
    ) -> impl Future<Output = bool> + Send;

    /// Registers a handler for frames arriving on `channel`.
    fn on_receive(&self, channel: Channel, handler: FrameHandler);

    /// Registers a handler for link lifecycle events.
    fn on_link(&self, handler: LinkHandler);
}
