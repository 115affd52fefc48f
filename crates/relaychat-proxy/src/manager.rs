//! The proxy message manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use relaychat_pool::{TaskHandle, WorkerPool};
use relaychat_protocol::{
    Courier, DispatchTable, FrameCodec, FrameLimit, JoinedNames, Message, NameTable, PartMarker,
    SendReport, commands,
};
use relaychat_tick::{PeriodicTask, spawn_periodic};
use relaychat_transport::{
    Channel, ChannelTransport, EndpointId, EndpointInfo, LinkEvent, Recipient,
};

use crate::registry::Registry;
use crate::{EndpointSummary, ProxyConfig, ProxyError, TableState};

/// Relays name tables between backends and sends proxy → backend messages.
///
/// Cheap to clone; clones share the registry, pool and dispatch table.
/// Must be created inside a Tokio runtime.
///
/// Send operations never block the caller: the target set is computed on
/// the calling thread, then a pool task encodes and writes the frames and
/// the caller gets a [`TaskHandle`] back straight away.
pub struct ProxyMessageManager<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    /// Single lock over every endpoint and its table.
    registry: RwLock<Registry>,
    courier: Courier<T>,
    pool: WorkerPool,
    dispatch: Arc<DispatchTable>,
    config: ProxyConfig,
    /// Number for the next split name broadcast.
    next_broadcast: AtomicU64,
}

impl<T> Clone for ProxyMessageManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ChannelTransport> ProxyMessageManager<T> {
    /// Wires a manager to `transport`: link events feed the registry and
    /// `UpdateNames` frames on the server → proxy channel replace tables.
    pub fn new(transport: Arc<T>, config: ProxyConfig) -> Self {
        let codec = FrameCodec::new(FrameLimit::new(config.frame_limit.get()));
        let courier = Courier::new(Arc::clone(&transport), codec, Channel::ProxyToServer)
            .with_timeout(config.send_timeout);
        let dispatch = Arc::new(DispatchTable::new());

        let inner = Arc::new(Inner {
            registry: RwLock::new(Registry::default()),
            courier,
            pool: WorkerPool::new(config.pool.clone()),
            dispatch: Arc::clone(&dispatch),
            config,
            next_broadcast: AtomicU64::new(broadcast_epoch()),
        });

        let weak = Arc::downgrade(&inner);
        transport.on_link(Arc::new(move |event| {
            if let Some(manager) = Self::upgrade(&weak) {
                manager.on_link_event(event);
            }
        }));

        let weak = Arc::downgrade(&inner);
        dispatch.register(commands::UPDATE_NAMES, move |source, args| {
            let Some(manager) = Self::upgrade(&weak) else {
                return;
            };
            if let Err(e) = manager.apply_update_names(source, args) {
                tracing::debug!(%source, error = %e, "ignoring name update");
            }
        });
        dispatch.attach(transport.as_ref(), Channel::ServerToProxy);

        Self { inner }
    }

    fn upgrade(weak: &Weak<Inner<T>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected(info) => self.link_endpoint(info),
            LinkEvent::Disconnected(id) => {
                self.unlink_endpoint(id);
            }
        }
    }

    /// Registers an endpoint. Transports do this through link events; hosts
    /// call it directly for endpoints that linked before the manager existed.
    pub fn link_endpoint(&self, info: EndpointInfo) {
        let label = info.to_string();
        if self.registry_mut().link(info) {
            tracing::info!(endpoint = %label, "endpoint linked");
        }
    }

    /// Forgets an endpoint and its name table.
    pub fn unlink_endpoint(&self, id: EndpointId) -> Option<EndpointSummary> {
        let removed = self.registry_mut().unlink(id);
        if let Some(summary) = &removed {
            tracing::info!(
                endpoint = %summary.endpoint,
                names = summary.names,
                "endpoint unlinked"
            );
        }
        removed
    }

    /// Records how many players are connected through an endpoint. Only
    /// endpoints with players receive broadcasts.
    pub fn set_player_count(&self, id: EndpointId, players: usize) -> Result<(), ProxyError> {
        if self.registry_mut().set_players(id, players) {
            Ok(())
        } else {
            Err(ProxyError::UnknownEndpoint(id))
        }
    }

    /// Replaces an endpoint's whole name table.
    pub fn replace_names(&self, id: EndpointId, table: NameTable) -> Result<TableState, ProxyError> {
        let entries = table.len();
        let state = self
            .registry_mut()
            .replace_table(id, table)
            .ok_or(ProxyError::UnknownEndpoint(id))?;
        tracing::debug!(endpoint = %id, entries, %state, "name table updated");
        Ok(state)
    }

    fn apply_update_names(&self, source: EndpointId, args: &[String]) -> Result<TableState, ProxyError> {
        let [keys, values] = args else {
            return Err(relaychat_protocol::ProtocolError::InvalidMessage(format!(
                "{} expects 2 arguments, got {}",
                commands::UPDATE_NAMES,
                args.len()
            ))
            .into());
        };
        let table = NameTable::from_joined(keys, values)?;
        self.replace_names(source, table)
    }

    /// Every linked endpoint, ordered by id.
    pub fn endpoints(&self) -> Vec<EndpointSummary> {
        self.registry().summaries()
    }

    /// Current table of one endpoint. `None` until its first update.
    pub fn name_table(&self, id: EndpointId) -> Option<NameTable> {
        self.registry().table(id).cloned()
    }

    /// Union of every endpoint's table, as the next broadcast would send it.
    pub fn merged_names(&self) -> NameTable {
        self.registry().merged()
    }

    /// Inbound command handlers for the server → proxy channel. Hosts may
    /// register their own commands here.
    pub fn dispatch(&self) -> &Arc<DispatchTable> {
        &self.inner.dispatch
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    /// Send tasks waiting for a worker.
    pub fn queued_sends(&self) -> usize {
        self.inner.pool.queued()
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Sends one message to one recipient.
    ///
    /// A recipient without a message sink gets nothing and the handle is
    /// already resolved to `false`. Otherwise the handle resolves to `true`
    /// once the send task has run; transport refusals are logged, not
    /// surfaced.
    pub fn send_message<R, S>(&self, recipient: &R, command: &str, args: &[S]) -> TaskHandle<bool>
    where
        R: Recipient + ?Sized,
        S: AsRef<str>,
    {
        let Some(endpoint) = recipient.message_sink() else {
            tracing::debug!(
                command,
                error = %ProxyError::UnroutableRecipient,
                "not sending relay message"
            );
            return TaskHandle::ready(false);
        };

        let targets = [endpoint.clone()];
        let message = Message::new(command, args.iter().map(AsRef::as_ref));
        let courier = self.inner.courier.clone();
        self.inner.pool.submit(async move {
            courier.deliver(&targets, message).await;
            true
        })
    }

    /// Sends one message to every endpoint that has players online.
    pub fn send_message_to_all<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
    ) -> TaskHandle<SendReport> {
        self.send_message_to_all_where(command, args, |_| true)
    }

    /// Sends one message to every endpoint that has players online and
    /// satisfies `predicate`.
    ///
    /// The target set is fixed when this returns; endpoints linking or
    /// unlinking afterwards do not change it. One task sends to each target
    /// in turn, and a refusal by one target does not stop the others.
    pub fn send_message_to_all_where<S, P>(
        &self,
        command: &str,
        args: &[S],
        predicate: P,
    ) -> TaskHandle<SendReport>
    where
        S: AsRef<str>,
        P: Fn(&EndpointInfo) -> bool,
    {
        let message = Message::new(command, args.iter().map(AsRef::as_ref));
        // The predicate runs outside the registry lock.
        let candidates = self.registry().with_players();
        let targets: Vec<EndpointInfo> = candidates.into_iter().filter(|e| predicate(e)).collect();
        if targets.is_empty() {
            tracing::trace!(%message, "no endpoints to send to");
            return TaskHandle::ready(SendReport::empty(message));
        }

        let courier = self.inner.courier.clone();
        self.inner
            .pool
            .submit(async move { courier.deliver(&targets, message).await })
    }

    /// Broadcasts the merged name table to every endpoint with players.
    ///
    /// A table that fits one frame goes out as `UpdateAllNames(keys,
    /// values)`. A larger one is cut into entry batches, each sent as
    /// `UpdateAllNames(keys, values, "b:i/n")`, where `b` numbers the
    /// broadcast; receivers apply the union once all `n` parts of one
    /// broadcast are in, and drop parts of broadcasts older than the newest
    /// they have seen. Entries that cannot be joined (empty key, or a
    /// comma in the key or value) are left out.
    pub fn update_all_names(&self) -> TaskHandle<Vec<SendReport>> {
        let (merged, targets) = {
            let registry = self.registry();
            (registry.merged(), registry.with_players())
        };
        if targets.is_empty() {
            tracing::trace!(names = merged.len(), "no endpoints to broadcast names to");
            return TaskHandle::ready(Vec::new());
        }

        let messages = self.name_broadcast(&merged);
        tracing::trace!(
            names = merged.len(),
            parts = messages.len(),
            endpoints = targets.len(),
            "broadcasting merged names"
        );

        let courier = self.inner.courier.clone();
        self.inner.pool.submit(async move {
            let mut reports = Vec::with_capacity(messages.len());
            for message in messages {
                reports.push(courier.deliver(&targets, message).await);
            }
            reports
        })
    }

    fn name_broadcast(&self, merged: &NameTable) -> Vec<Message> {
        let codec = self.inner.courier.codec();
        let whole = JoinedNames::from_entries(merged.iter());
        if whole.size() <= codec.args_budget(commands::UPDATE_ALL_NAMES, 2) {
            return vec![Message::new(
                commands::UPDATE_ALL_NAMES,
                [whole.keys, whole.values],
            )];
        }

        let budget = codec
            .args_budget(commands::UPDATE_ALL_NAMES, 3)
            .saturating_sub(PartMarker::MAX_ENCODED_LEN);
        let batches = JoinedNames::batched(merged.iter(), budget);
        let total = batches.len() as u32;
        let broadcast = self.inner.next_broadcast.fetch_add(1, Ordering::Relaxed);
        batches
            .into_iter()
            .zip(0..)
            .map(|(batch, index)| {
                let marker = PartMarker {
                    broadcast,
                    index,
                    total,
                };
                Message::new(
                    commands::UPDATE_ALL_NAMES,
                    [batch.keys, batch.values, marker.to_string()],
                )
            })
            .collect()
    }

    /// Runs [`update_all_names`](Self::update_all_names) on the configured
    /// period until the returned task is stopped or dropped.
    pub fn spawn_broadcast(&self) -> PeriodicTask {
        let weak = Arc::downgrade(&self.inner);
        spawn_periodic(self.inner.config.tick.clone(), move |_tick| {
            if let Some(manager) = Self::upgrade(&weak) {
                let _ = manager.update_all_names();
            }
        })
    }
}

/// First broadcast number of a new manager. Milliseconds since the epoch,
/// so a restarted proxy keeps numbering above what backends have seen.
fn broadcast_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(1, |elapsed| elapsed.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use relaychat_protocol::decode;
    use relaychat_transport::{FrameHandler, LinkHandler};

    use super::*;

    #[derive(Default)]
    struct Sink {
        sent: Mutex<Vec<(EndpointId, Bytes)>>,
    }

    impl ChannelTransport for Sink {
        async fn send(&self, endpoint: EndpointId, _channel: Channel, frame: Bytes) -> bool {
            self.sent.lock().unwrap().push((endpoint, frame));
            true
        }

        fn on_receive(&self, _channel: Channel, _handler: FrameHandler) {}

        fn on_link(&self, _handler: LinkHandler) {}
    }

    fn manager(frame_limit: usize) -> ProxyMessageManager<Sink> {
        let config = ProxyConfig {
            frame_limit: FrameLimit::new(frame_limit),
            ..ProxyConfig::default()
        };
        ProxyMessageManager::new(Arc::new(Sink::default()), config)
    }

    #[tokio::test]
    async fn test_small_table_is_one_unmarked_message() {
        let m = manager(FrameLimit::DEFAULT);
        let table: NameTable = [("p1", Some("Alice")), ("p2", None)].into_iter().collect();
        let messages = m.name_broadcast(&table);
        assert_eq!(messages, vec![Message::new("UpdateAllNames", ["p1,p2", "Alice,"])]);
    }

    #[tokio::test]
    async fn test_large_table_is_split_into_marked_parts() {
        let m = manager(128);
        let table: NameTable = (0..40)
            .map(|i| (format!("player{i:02}"), Some(format!("Name{i:02}"))))
            .collect();

        let messages = m.name_broadcast(&table);
        assert!(messages.len() > 1);

        let total = messages.len() as u32;
        let first: PartMarker = messages[0].args[2].parse().unwrap();
        let mut rebuilt = NameTable::new();
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(message.args.len(), 3);
            let marker: PartMarker = message.args[2].parse().unwrap();
            assert_eq!(marker, PartMarker::new(first.broadcast, i as u32, total).unwrap());
            let frames = m.inner.courier.codec().encode_message(message).unwrap();
            assert_eq!(frames.len(), 1, "each part fits one frame");
            let part = NameTable::from_joined(&message.args[0], &message.args[1]).unwrap();
            rebuilt.extend_from(&part);
        }
        assert_eq!(rebuilt, table);
    }

    #[tokio::test]
    async fn test_each_split_broadcast_gets_a_newer_number() {
        let m = manager(128);
        let table: NameTable = (0..40)
            .map(|i| (format!("player{i:02}"), Some(format!("Name{i:02}"))))
            .collect();

        let number = |messages: Vec<Message>| -> Vec<u64> {
            messages
                .iter()
                .map(|msg| msg.args[2].parse::<PartMarker>().unwrap().broadcast)
                .collect()
        };
        let first = number(m.name_broadcast(&table));
        let second = number(m.name_broadcast(&table));

        assert!(first.iter().all(|&b| b == first[0]));
        assert!(second.iter().all(|&b| b == second[0]));
        assert!(second[0] > first[0]);
    }

    #[tokio::test]
    async fn test_empty_registry_broadcast_sends_nothing() {
        let m = manager(FrameLimit::DEFAULT);
        let reports = m.update_all_names().await.unwrap();
        assert!(reports.is_empty());
        assert!(m.inner.courier.transport().sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_names_with_wrong_arity_is_rejected() {
        let m = manager(FrameLimit::DEFAULT);
        m.link_endpoint(EndpointInfo::new(EndpointId::new(1), "lobby"));
        let err = m
            .apply_update_names(EndpointId::new(1), &["p1".to_string()])
            .unwrap_err();
        assert!(matches!(err, ProxyError::Protocol(_)));
        assert!(m.name_table(EndpointId::new(1)).is_none());
    }

    #[tokio::test]
    async fn test_send_message_frames_decode() {
        let m = manager(FrameLimit::DEFAULT);
        let target = EndpointInfo::new(EndpointId::new(4), "survival");
        assert!(m.send_message(&target, "Ping", &["a", ""]).await.unwrap());

        let sent = m.inner.courier.transport().sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, EndpointId::new(4));
        assert_eq!(decode(&sent[0].1).unwrap(), Message::new("Ping", ["a", ""]));
    }
}
