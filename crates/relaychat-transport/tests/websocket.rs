//! Integration tests for the WebSocket transport.
//!
//! These spin up a real hub and a real uplink on a loopback port and check
//! that frames flow both ways with the right source ids.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use relaychat_transport::{
        Channel, ChannelTransport, EndpointId, LinkEvent, WebSocketHub,
        WebSocketUplink,
    };
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting")
            .expect("channel closed")
    }

    fn frames(
        transport: &impl ChannelTransport,
        channel: Channel,
    ) -> mpsc::UnboundedReceiver<(EndpointId, Bytes)> {
        let (tx, rx) = mpsc::unbounded_channel();
        transport.on_receive(
            channel,
            Arc::new(move |source, frame| {
                let _ = tx.send((source, frame));
            }),
        );
        rx
    }

    fn links(transport: &impl ChannelTransport) -> mpsc::UnboundedReceiver<LinkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        transport.on_link(Arc::new(move |ev| {
            let _ = tx.send(ev);
        }));
        rx
    }

    #[tokio::test]
    async fn test_hub_and_uplink_exchange_frames() {
        let hub = WebSocketHub::bind("127.0.0.1:0").await.expect("should bind");
        let mut hub_links = links(&hub);
        let mut upstream = frames(&hub, Channel::ServerToProxy);
        let url = format!("ws://{}", hub.local_addr());

        let uplink = WebSocketUplink::connect(&url, "survival")
            .await
            .expect("should connect");
        let mut downstream = frames(&uplink, Channel::ProxyToServer);

        let info = match next(&mut hub_links).await {
            LinkEvent::Connected(info) => info,
            other => panic!("expected Connected, got {other:?}"),
        };
        assert_eq!(info.label(), "survival");
        assert_eq!(hub.endpoints(), vec![info.clone()]);

        // Backend → proxy.
        assert!(
            uplink
                .send(EndpointId::PROXY, Channel::ServerToProxy, Bytes::from_static(b"up"))
                .await
        );
        let (source, frame) = next(&mut upstream).await;
        assert_eq!(source, info.id());
        assert_eq!(frame.as_ref(), b"up");

        // Proxy → backend, several frames in one burst keep their order.
        for part in [&b"one"[..], b"two", b"three"] {
            assert!(
                hub.send(info.id(), Channel::ProxyToServer, Bytes::copy_from_slice(part))
                    .await
            );
        }
        for expected in [&b"one"[..], b"two", b"three"] {
            let (source, frame) = next(&mut downstream).await;
            assert_eq!(source, EndpointId::PROXY);
            assert_eq!(frame.as_ref(), expected);
        }
    }

    #[tokio::test]
    async fn test_hub_refuses_unknown_endpoint() {
        let hub = WebSocketHub::bind("127.0.0.1:0").await.expect("should bind");
        let ok = hub
            .send(EndpointId::new(u64::MAX), Channel::ProxyToServer, Bytes::new())
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_dropping_uplink_unlinks_endpoint() {
        let hub = WebSocketHub::bind("127.0.0.1:0").await.expect("should bind");
        let mut hub_links = links(&hub);
        let url = format!("ws://{}", hub.local_addr());

        let uplink = WebSocketUplink::connect(&url, "lobby")
            .await
            .expect("should connect");
        let id = match next(&mut hub_links).await {
            LinkEvent::Connected(info) => info.id(),
            other => panic!("expected Connected, got {other:?}"),
        };

        drop(uplink);

        assert_eq!(next(&mut hub_links).await, LinkEvent::Disconnected(id));
        assert!(!hub.send(id, Channel::ProxyToServer, Bytes::new()).await);
    }
}
