//! Handler registry shared by the transport implementations.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;

use crate::{Channel, EndpointId, FrameHandler, LinkEvent, LinkHandler};

/// Frame and link handlers registered on a transport.
///
/// Handlers are cloned out of the lock before they run, so a handler may
/// register further handlers without deadlocking.
#[derive(Default)]
pub struct Listeners {
    frames: RwLock<HashMap<Channel, Vec<FrameHandler>>>,
    links: RwLock<Vec<LinkHandler>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frame_handler(&self, channel: Channel, handler: FrameHandler) {
        self.frames
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel)
            .or_default()
            .push(handler);
    }

    pub fn add_link_handler(&self, handler: LinkHandler) {
        self.links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Runs every handler registered for `channel`.
    ///
    /// Returns the number of handlers invoked. Frames on a channel nobody
    /// listens to are dropped.
    pub fn deliver(&self, channel: Channel, source: EndpointId, frame: Bytes) -> usize {
        let handlers = self
            .frames
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::trace!(%channel, %source, "no listener for frame, dropping");
        }
        for handler in &handlers {
            handler(source, frame.clone());
        }
        handlers.len()
    }

    pub fn announce(&self, event: LinkEvent) {
        let handlers = self
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            handler(event.clone());
        }
    }
}
