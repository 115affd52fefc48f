/// Errors that can occur while setting up or running a transport.
///
/// Sending a frame never produces one of these: a refused frame is reported
/// through the `false` return of [`ChannelTransport::send`](crate::ChannelTransport::send).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding or accepting links failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Connecting to the proxy failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The peer did not complete the link hello.
    #[error("link handshake failed: {0}")]
    Handshake(String),

    /// The link was closed.
    #[error("link closed: {0}")]
    LinkClosed(String),
}
