//! Command dispatch for inbound frames.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use relaychat_transport::{Channel, ChannelTransport, EndpointId};

use crate::{Message, codec};

/// Handler for one command: receives the source endpoint and the decoded
/// arguments.
pub type CommandHandler = Arc<dyn Fn(EndpointId, &[String]) + Send + Sync>;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// A handler ran.
    Handled,
    /// The frame decoded but nobody handles its command.
    Unknown(String),
    /// The frame did not decode.
    Malformed,
}

/// Maps command names to handlers.
///
/// Lookup is an exact, case-sensitive match. There is no deduplication:
/// the same frame dispatched twice runs its handler twice.
#[derive(Default)]
pub struct DispatchTable {
    handlers: RwLock<HashMap<String, CommandHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `command`, replacing any previous handler.
    pub fn register<F>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(EndpointId, &[String]) + Send + Sync + 'static,
    {
        let command = command.into();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command.clone(), Arc::new(handler));
        if previous.is_some() {
            tracing::debug!(command, "replaced command handler");
        }
    }

    /// Removes the handler for `command`. Returns whether one existed.
    pub fn unregister(&self, command: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(command)
            .is_some()
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Decodes one frame and runs the matching handler.
    ///
    /// Malformed frames and unknown commands are logged and dropped; neither
    /// is reported back to the sender.
    pub fn dispatch(&self, source: EndpointId, frame: &[u8]) -> Dispatched {
        match codec::decode(frame) {
            Ok(message) => self.dispatch_message(source, &message),
            Err(e) => {
                tracing::debug!(%source, error = %e, bytes = frame.len(), "dropping malformed frame");
                Dispatched::Malformed
            }
        }
    }

    /// Runs the handler for an already decoded message.
    pub fn dispatch_message(&self, source: EndpointId, message: &Message) -> Dispatched {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.command)
            .cloned();

        match handler {
            Some(handler) => {
                tracing::trace!(%source, command = %message.command, args = message.args.len(), "dispatching");
                handler(source, &message.args);
                Dispatched::Handled
            }
            None => {
                tracing::debug!(%source, command = %message.command, "ignoring unknown command");
                Dispatched::Unknown(message.command.clone())
            }
        }
    }

    /// Feeds every frame arriving on `channel` through this table.
    pub fn attach<T: ChannelTransport>(self: &Arc<Self>, transport: &T, channel: Channel) {
        let table = Arc::clone(self);
        transport.on_receive(
            channel,
            Arc::new(move |source, frame| {
                table.dispatch(source, &frame);
            }),
        );
    }
}
