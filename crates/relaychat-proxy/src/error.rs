//! Error types for the proxy layer.

use relaychat_protocol::ProtocolError;
use relaychat_transport::EndpointId;

/// Errors reported by [`ProxyMessageManager`](crate::ProxyMessageManager)
/// operations that act on the registry.
///
/// Send operations never return these; their failures are logged and
/// recorded in the task's report.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The recipient has no endpoint able to carry plugin messages.
    #[error("recipient cannot receive relay messages")]
    UnroutableRecipient,

    /// The endpoint is not linked to this proxy.
    #[error("endpoint {0} is not linked")]
    UnknownEndpoint(EndpointId),

    /// An inbound message could not be interpreted.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
