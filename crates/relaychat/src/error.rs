//! Unified error type for relaychat.

use relaychat_backend::BackendError;
use relaychat_pool::PoolError;
use relaychat_protocol::ProtocolError;
use relaychat_proxy::ProxyError;
use relaychat_transport::TransportError;

/// Top-level error wrapping every crate-specific error, so `?` works across
/// layers when using the `relaychat` meta-crate.
#[derive(Debug, thiserror::Error)]
pub enum RelaychatError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
