//! In-process transport.
//!
//! A [`MemoryHub`] plays the proxy side; every [`MemoryLink`] attached to it
//! plays one backend. Frames are handed to the receiving side's handlers
//! inline, on the sender's task.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;

use crate::{
    Channel, ChannelTransport, EndpointId, EndpointInfo, FrameHandler,
    LinkEvent, LinkHandler, Listeners,
};

struct HubInner {
    next_id: AtomicU64,
    links: RwLock<BTreeMap<EndpointId, Arc<LinkInner>>>,
    listeners: Listeners,
}

struct LinkInner {
    info: EndpointInfo,
    listeners: Listeners,
    forwarding: AtomicBool,
}

impl HubInner {
    fn link(&self, id: EndpointId) -> Option<Arc<LinkInner>> {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

/// Proxy side of the in-process transport.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                next_id: AtomicU64::new(1),
                links: RwLock::new(BTreeMap::new()),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Connects a new backend with the given label.
    pub fn attach(&self, label: impl Into<String>) -> MemoryLink {
        let id = EndpointId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let info = EndpointInfo::new(id, label);
        let link = Arc::new(LinkInner {
            info: info.clone(),
            listeners: Listeners::new(),
            forwarding: AtomicBool::new(true),
        });
        self.inner
            .links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&link));

        tracing::debug!(endpoint = %info, "memory link attached");
        self.inner.listeners.announce(LinkEvent::Connected(info));

        MemoryLink {
            hub: Arc::clone(&self.inner),
            link,
        }
    }

    /// Disconnects a backend. Returns `false` if it was not attached.
    pub fn detach(&self, id: EndpointId) -> bool {
        let removed = self
            .inner
            .links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let Some(link) = removed else {
            return false;
        };
        tracing::debug!(endpoint = %link.info, "memory link detached");
        self.inner.listeners.announce(LinkEvent::Disconnected(id));
        link.listeners
            .announce(LinkEvent::Disconnected(EndpointId::PROXY));
        true
    }

    /// Makes the hub refuse (or accept again) frames for one backend.
    ///
    /// Models a server that is still registered but currently has no
    /// connection able to forward plugin messages.
    pub fn set_forwarding(&self, id: EndpointId, forwarding: bool) {
        if let Some(link) = self.inner.link(id) {
            link.forwarding.store(forwarding, Ordering::SeqCst);
        }
    }

    /// Currently attached backends, in attach order.
    pub fn endpoints(&self) -> Vec<EndpointInfo> {
        self.inner
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|link| link.info.clone())
            .collect()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTransport for MemoryHub {
    async fn send(&self, endpoint: EndpointId, channel: Channel, frame: Bytes) -> bool {
        let Some(link) = self.inner.link(endpoint) else {
            return false;
        };
        if !link.forwarding.load(Ordering::SeqCst) {
            return false;
        }
        link.listeners.deliver(channel, EndpointId::PROXY, frame);
        true
    }

    fn on_receive(&self, channel: Channel, handler: FrameHandler) {
        self.inner.listeners.add_frame_handler(channel, handler);
    }

    fn on_link(&self, handler: LinkHandler) {
        self.inner.listeners.add_link_handler(handler);
    }
}

/// Backend side of the in-process transport.
#[derive(Clone)]
pub struct MemoryLink {
    hub: Arc<HubInner>,
    link: Arc<LinkInner>,
}

impl MemoryLink {
    /// This backend as the hub knows it.
    pub fn info(&self) -> &EndpointInfo {
        &self.link.info
    }

    pub fn id(&self) -> EndpointId {
        self.link.info.id()
    }
}

impl ChannelTransport for MemoryLink {
    async fn send(&self, endpoint: EndpointId, channel: Channel, frame: Bytes) -> bool {
        if endpoint != EndpointId::PROXY {
            return false;
        }
        // A detached link can no longer reach the hub.
        if self.hub.link(self.id()).is_none() {
            return false;
        }
        self.hub.listeners.deliver(channel, self.id(), frame);
        true
    }

    fn on_receive(&self, channel: Channel, handler: FrameHandler) {
        self.link.listeners.add_frame_handler(channel, handler);
    }

    fn on_link(&self, handler: LinkHandler) {
        self.link.listeners.add_link_handler(handler);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn collect(
        transport: &impl ChannelTransport,
        channel: Channel,
    ) -> Arc<Mutex<Vec<(EndpointId, Bytes)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        transport.on_receive(
            channel,
            Arc::new(move |source, frame| sink.lock().unwrap().push((source, frame))),
        );
        seen
    }

    #[tokio::test]
    async fn test_hub_to_link_delivery() {
        let hub = MemoryHub::new();
        let link = hub.attach("lobby");
        let seen = collect(&link, Channel::ProxyToServer);

        let ok = hub
            .send(link.id(), Channel::ProxyToServer, Bytes::from_static(b"hi"))
            .await;

        assert!(ok);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(EndpointId::PROXY, Bytes::from_static(b"hi"))]);
    }

    #[tokio::test]
    async fn test_link_to_hub_carries_source_id() {
        let hub = MemoryHub::new();
        let seen = collect(&hub, Channel::ServerToProxy);
        let a = hub.attach("a");
        let b = hub.attach("b");

        assert!(a.send(EndpointId::PROXY, Channel::ServerToProxy, Bytes::from_static(b"1")).await);
        assert!(b.send(EndpointId::PROXY, Channel::ServerToProxy, Bytes::from_static(b"2")).await);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, a.id());
        assert_eq!(seen[1].0, b.id());
    }

    #[tokio::test]
    async fn test_send_to_unknown_endpoint_is_refused() {
        let hub = MemoryHub::new();
        let ok = hub
            .send(EndpointId::new(99), Channel::ProxyToServer, Bytes::new())
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_non_forwarding_link_refuses_frames() {
        let hub = MemoryHub::new();
        let link = hub.attach("lobby");
        let seen = collect(&link, Channel::ProxyToServer);
        hub.set_forwarding(link.id(), false);

        assert!(!hub.send(link.id(), Channel::ProxyToServer, Bytes::new()).await);
        assert!(seen.lock().unwrap().is_empty());

        hub.set_forwarding(link.id(), true);
        assert!(hub.send(link.id(), Channel::ProxyToServer, Bytes::new()).await);
    }

    #[tokio::test]
    async fn test_detach_announces_and_blocks_traffic() {
        let hub = MemoryHub::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        hub.on_link(Arc::new(move |ev| sink.lock().unwrap().push(ev)));

        let link = hub.attach("lobby");
        assert!(hub.detach(link.id()));
        assert!(!hub.detach(link.id()));

        assert!(!link.send(EndpointId::PROXY, Channel::ServerToProxy, Bytes::new()).await);
        let events = events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            &[
                LinkEvent::Connected(link.info().clone()),
                LinkEvent::Disconnected(link.id()),
            ]
        );
    }

    #[tokio::test]
    async fn test_link_only_addresses_proxy() {
        let hub = MemoryHub::new();
        let link = hub.attach("lobby");
        assert!(!link.send(EndpointId::new(5), Channel::ServerToProxy, Bytes::new()).await);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let hub = MemoryHub::new();
        let first = hub.attach("lobby");
        hub.detach(first.id());
        let second = hub.attach("lobby");
        assert_ne!(first.id(), second.id());
        assert_eq!(hub.endpoints(), vec![second.info().clone()]);
    }
}
