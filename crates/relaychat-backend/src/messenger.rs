//! Backend → proxy sends and inbound broadcast handling.

use std::sync::Arc;

use relaychat_pool::{TaskHandle, WorkerPool};
use relaychat_protocol::{
    Courier, DispatchTable, FrameCodec, FrameLimit, Message, NameTable, SendReport, commands,
};
use relaychat_tick::{PeriodicTask, TickConfig, spawn_periodic};
use relaychat_transport::{
    Channel, ChannelTransport, EndpointInfo, LinkEvent, WebSocketUplink,
};

use crate::{BackendConfig, BackendError, ClusterNames};

/// A backend's connection to the proxy.
///
/// Cheap to clone. Must be created inside a Tokio runtime.
pub struct BackendMessenger<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    courier: Courier<T>,
    pool: WorkerPool,
    dispatch: Arc<DispatchTable>,
    names: Arc<ClusterNames>,
    config: BackendConfig,
}

impl<T> Clone for BackendMessenger<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl BackendMessenger<WebSocketUplink> {
    /// Connects to a proxy's WebSocket hub at `url`, announcing `label`.
    pub async fn connect(
        url: &str,
        label: &str,
        config: BackendConfig,
    ) -> Result<Self, BackendError> {
        let uplink = WebSocketUplink::connect(url, label).await?;
        Ok(Self::new(Arc::new(uplink), config))
    }
}

impl<T: ChannelTransport> BackendMessenger<T> {
    /// Wires a messenger to `transport` and starts applying `UpdateAllNames`
    /// frames from the proxy to [`names`](Self::names).
    pub fn new(transport: Arc<T>, config: BackendConfig) -> Self {
        let codec = FrameCodec::new(FrameLimit::new(config.frame_limit.get()));
        let courier = Courier::new(Arc::clone(&transport), codec, Channel::ServerToProxy);
        let names = Arc::new(ClusterNames::new());
        let dispatch = Arc::new(DispatchTable::new());

        let cache = Arc::clone(&names);
        dispatch.register(commands::UPDATE_ALL_NAMES, move |source, args| {
            match cache.apply_update(args) {
                Ok(update) => tracing::trace!(%source, ?update, "cluster names updated"),
                Err(e) => tracing::debug!(%source, error = %e, "ignoring name broadcast"),
            }
        });
        dispatch.attach(transport.as_ref(), Channel::ProxyToServer);

        let cache = Arc::clone(&names);
        transport.on_link(Arc::new(move |event| match event {
            LinkEvent::Connected(info) => {
                tracing::info!(endpoint = %info, "proxy link up");
                // A new proxy may number its broadcasts from anywhere.
                cache.forget_broadcasts();
            }
            LinkEvent::Disconnected(id) => tracing::info!(endpoint = %id, "proxy link down"),
        }));

        Self {
            inner: Arc::new(Inner {
                courier,
                pool: WorkerPool::new(config.pool.clone()),
                dispatch,
                names,
                config,
            }),
        }
    }

    /// Sends one message to the proxy.
    pub fn send_message<S: AsRef<str>>(&self, command: &str, args: &[S]) -> TaskHandle<SendReport> {
        let message = Message::new(command, args.iter().map(AsRef::as_ref));
        let courier = self.inner.courier.clone();
        self.inner
            .pool
            .submit(async move { courier.deliver(&[EndpointInfo::proxy()], message).await })
    }

    /// Pushes this backend's whole name table to the proxy, replacing what
    /// the proxy held for it.
    pub fn update_names(&self, table: &NameTable) -> TaskHandle<SendReport> {
        let joined = table.join();
        if joined.len() < table.len() {
            tracing::debug!(
                kept = joined.len(),
                total = table.len(),
                "some local names cannot be relayed"
            );
        }
        self.send_message(commands::UPDATE_NAMES, &[joined.keys, joined.values])
    }

    /// Calls `source` every push interval and sends what it returns with
    /// [`update_names`](Self::update_names).
    pub fn spawn_push<F>(&self, source: F) -> PeriodicTask
    where
        F: Fn() -> NameTable + Send + 'static,
    {
        let messenger = self.clone();
        let tick = TickConfig::with_period(self.inner.config.push_interval);
        spawn_periodic(tick, move |_tick| {
            let _ = messenger.update_names(&source());
        })
    }

    /// The cluster-wide names last broadcast by the proxy.
    pub fn names(&self) -> &Arc<ClusterNames> {
        &self.inner.names
    }

    /// Inbound command handlers for the proxy → server channel.
    pub fn dispatch(&self) -> &Arc<DispatchTable> {
        &self.inner.dispatch
    }

    pub fn config(&self) -> &BackendConfig {
        &self.inner.config
    }
}
