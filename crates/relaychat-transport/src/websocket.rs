//! WebSocket transport using `tokio-tungstenite`.
//!
//! The proxy runs a [`WebSocketHub`]; every backend opens one
//! [`WebSocketUplink`] to it. A link starts with a text message carrying
//! the backend's label. After that each binary WebSocket message is one
//! frame on one channel:
//!
//! ```text
//! [name_len: u16 BE][channel name][frame bytes]
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::{
    Channel, ChannelTransport, EndpointId, EndpointInfo, FrameHandler,
    LinkEvent, LinkHandler, Listeners, TransportError,
};

/// How long a fresh link may take to send its hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Counter for link ids. Starts at 1; 0 is reserved for the proxy.
static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

type Outbox = mpsc::UnboundedSender<Message>;

/// Wraps a frame with its channel name.
fn wrap(channel: Channel, frame: &[u8]) -> Bytes {
    let name = channel.name().as_bytes();
    let mut buf = BytesMut::with_capacity(2 + name.len() + frame.len());
    buf.put_u16(name.len() as u16);
    buf.put_slice(name);
    buf.put_slice(frame);
    buf.freeze()
}

/// Splits a link message into channel and frame. `None` if the header is
/// damaged or names an unknown channel.
fn unwrap(mut data: Bytes) -> Option<(Channel, Bytes)> {
    if data.remaining() < 2 {
        return None;
    }
    let len = data.get_u16() as usize;
    if data.remaining() < len {
        return None;
    }
    let name = data.split_to(len);
    let channel = Channel::from_name(std::str::from_utf8(&name).ok()?)?;
    Some((channel, data))
}

/// Drains an outbox into the socket until either side closes.
async fn write_loop<W>(mut sink: W, mut outbox: mpsc::UnboundedReceiver<Message>)
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    while let Some(msg) = outbox.recv().await {
        if let Err(e) = sink.send(msg).await {
            tracing::debug!(error = %e, "link write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

/// Reads frames off the socket and hands them to `listeners` as coming
/// from `source`. Returns when the link closes.
async fn read_loop<R>(mut stream: R, source: EndpointId, listeners: &Listeners)
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Binary(data)) => match unwrap(data) {
                Some((channel, frame)) => {
                    listeners.deliver(channel, source, frame);
                }
                None => {
                    tracing::debug!(%source, "dropping link message with bad channel header");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue, // ping/pong/text after hello
            Err(e) => {
                tracing::debug!(%source, error = %e, "link read failed");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Proxy side
// ---------------------------------------------------------------------------

struct HubShared {
    links: RwLock<HashMap<EndpointId, (EndpointInfo, Outbox)>>,
    listeners: Listeners,
}

/// Proxy-side WebSocket transport. Accepts backend links.
pub struct WebSocketHub {
    shared: Arc<HubShared>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl WebSocketHub {
    /// Binds to `addr` and starts accepting backend links.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let local_addr = listener.local_addr().map_err(TransportError::AcceptFailed)?;
        tracing::info!(%local_addr, "relay hub listening");

        let shared = Arc::new(HubShared {
            links: RwLock::new(HashMap::new()),
            listeners: Listeners::new(),
        });
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));

        Ok(Self {
            shared,
            local_addr,
            accept_task,
        })
    }

    /// The address the hub is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Backends with a live link.
    pub fn endpoints(&self) -> Vec<EndpointInfo> {
        let mut endpoints: Vec<EndpointInfo> = self
            .shared
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|(info, _)| info.clone())
            .collect();
        endpoints.sort_by_key(EndpointInfo::id);
        endpoints
    }

    /// Stops accepting new links. Existing links stay up until they close.
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for WebSocketHub {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl ChannelTransport for WebSocketHub {
    async fn send(&self, endpoint: EndpointId, channel: Channel, frame: Bytes) -> bool {
        let outbox = self
            .shared
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&endpoint)
            .map(|(_, outbox)| outbox.clone());
        match outbox {
            Some(outbox) => outbox
                .send(Message::Binary(wrap(channel, &frame)))
                .is_ok(),
            None => false,
        }
    }

    fn on_receive(&self, channel: Channel, handler: FrameHandler) {
        self.shared.listeners.add_frame_handler(channel, handler);
    }

    fn on_link(&self, handler: LinkHandler) {
        self.shared.listeners.add_link_handler(handler);
    }
}

/// Pause after a failed `accept`, doubling while failures repeat.
#[derive(Debug)]
struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    const FIRST: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_secs(1);

    fn new() -> Self {
        Self { next: Self::FIRST }
    }

    fn failed(&mut self) -> Duration {
        let wait = self.next;
        self.next = (self.next * 2).min(Self::MAX);
        wait
    }

    fn succeeded(&mut self) {
        self.next = Self::FIRST;
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<HubShared>) {
    let mut backoff = AcceptBackoff::new();
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                backoff.succeeded();
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Err(e) = serve_link(stream, addr, shared).await {
                        tracing::debug!(%addr, error = %e, "link ended with error");
                    }
                });
            }
            Err(e) => {
                let wait = backoff.failed();
                tracing::error!(error = %e, retry_in = ?wait, "accept failed");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

async fn serve_link(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    shared: Arc<HubShared>,
) -> Result<(), TransportError> {
    let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
        TransportError::AcceptFailed(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            e,
        ))
    })?;
    let (sink, mut stream) = ws.split();

    let label = match tokio::time::timeout(HELLO_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(Message::Text(label)))) => label.as_str().to_owned(),
        Ok(Some(Ok(other))) => {
            return Err(TransportError::Handshake(format!(
                "expected text hello, got {other:?}"
            )));
        }
        Ok(Some(Err(e))) => return Err(TransportError::Handshake(e.to_string())),
        Ok(None) => return Err(TransportError::LinkClosed("closed before hello".into())),
        Err(_) => return Err(TransportError::Handshake("hello timed out".into())),
    };

    let id = EndpointId::new(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed));
    let info = EndpointInfo::new(id, label);
    let (outbox, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(sink, rx));

    shared
        .links
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id, (info.clone(), outbox));
    tracing::info!(endpoint = %info, %addr, "backend linked");
    shared.listeners.announce(LinkEvent::Connected(info.clone()));

    read_loop(&mut stream, id, &shared.listeners).await;

    shared
        .links
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
    writer.abort();
    tracing::info!(endpoint = %info, "backend unlinked");
    shared.listeners.announce(LinkEvent::Disconnected(id));
    Ok(())
}

// ---------------------------------------------------------------------------
// Backend side
// ---------------------------------------------------------------------------

/// Backend-side WebSocket transport: one link to the proxy.
pub struct WebSocketUplink {
    outbox: Outbox,
    listeners: Arc<Listeners>,
    tasks: [JoinHandle<()>; 2],
}

impl WebSocketUplink {
    /// Connects to the hub at `url` (e.g. `ws://127.0.0.1:7600`) and
    /// introduces this backend as `label`.
    pub async fn connect(url: &str, label: &str) -> Result<Self, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;
        let (sink, stream) = ws.split();

        let (outbox, rx) = mpsc::unbounded_channel();
        outbox
            .send(Message::Text(label.to_owned().into()))
            .map_err(|_| TransportError::LinkClosed("writer gone before hello".into()))?;
        let writer = tokio::spawn(write_loop(sink, rx));

        let listeners = Arc::new(Listeners::new());
        let reader_listeners = Arc::clone(&listeners);
        let reader = tokio::spawn(async move {
            read_loop(stream, EndpointId::PROXY, &reader_listeners).await;
            tracing::info!("proxy link closed");
            reader_listeners.announce(LinkEvent::Disconnected(EndpointId::PROXY));
        });

        tracing::info!(url, label, "linked to proxy");
        Ok(Self {
            outbox,
            listeners,
            tasks: [writer, reader],
        })
    }

    /// Whether the link is still up.
    pub fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }
}

impl Drop for WebSocketUplink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl ChannelTransport for WebSocketUplink {
    async fn send(&self, endpoint: EndpointId, channel: Channel, frame: Bytes) -> bool {
        if endpoint != EndpointId::PROXY {
            return false;
        }
        self.outbox
            .send(Message::Binary(wrap(channel, &frame)))
            .is_ok()
    }

    fn on_receive(&self, channel: Channel, handler: FrameHandler) {
        self.listeners.add_frame_handler(channel, handler);
    }

    fn on_link(&self, handler: LinkHandler) {
        self.listeners.add_link_handler(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_keeps_channel_and_frame() {
        let data = wrap(Channel::ProxyToServer, b"\x00\x01payload");
        let (channel, frame) = unwrap(data).expect("header should parse");
        assert_eq!(channel, Channel::ProxyToServer);
        assert_eq!(frame.as_ref(), b"\x00\x01payload");
    }

    #[test]
    fn test_unwrap_rejects_short_header() {
        assert!(unwrap(Bytes::from_static(b"\x00")).is_none());
        assert!(unwrap(Bytes::from_static(b"\x00\x10abc")).is_none());
    }

    #[test]
    fn test_unwrap_rejects_unknown_channel() {
        let mut buf = BytesMut::new();
        buf.put_u16(5);
        buf.put_slice(b"bogus");
        assert!(unwrap(buf.freeze()).is_none());
    }

    #[test]
    fn test_accept_backoff_grows_then_resets() {
        let mut backoff = AcceptBackoff::new();
        let waits: Vec<_> = (0..9).map(|_| backoff.failed()).collect();
        assert_eq!(waits[0], Duration::from_millis(10));
        assert_eq!(waits[1], Duration::from_millis(20));
        assert!(waits.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(waits[8], AcceptBackoff::MAX);

        backoff.succeeded();
        assert_eq!(backoff.failed(), AcceptBackoff::FIRST);
    }
}
