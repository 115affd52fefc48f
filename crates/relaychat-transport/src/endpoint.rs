//! Endpoint identity and the message-sink capability.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque identifier for one link between the proxy and a backend.
///
/// Identifiers are allocated per connection, so a backend that reconnects
/// gets a fresh id even if it reports the same label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(u64);

impl EndpointId {
    /// The proxy as seen from a backend. Backends only ever talk to this one.
    pub const PROXY: EndpointId = EndpointId(0);

    /// Creates a new `EndpointId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// A connected endpoint: its identity plus a label used in diagnostics.
///
/// Equality and hashing only look at the id. Two links that happen to carry
/// the same label are still different endpoints.
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    id: EndpointId,
    label: String,
}

impl EndpointInfo {
    pub fn new(id: EndpointId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }

    /// Describes the proxy from a backend's point of view.
    pub fn proxy() -> Self {
        Self::new(EndpointId::PROXY, "proxy")
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for EndpointInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EndpointInfo {}

impl Hash for EndpointInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// Anything a caller may try to address a message to.
///
/// Only recipients that forward plugin messages expose a sink endpoint.
/// Sending to anything else is a no-op that resolves to `false`.
pub trait Recipient {
    /// The endpoint messages for this recipient travel through, if any.
    fn message_sink(&self) -> Option<&EndpointInfo>;
}

impl Recipient for EndpointInfo {
    fn message_sink(&self) -> Option<&EndpointInfo> {
        Some(self)
    }
}

impl<R: Recipient + ?Sized> Recipient for &R {
    fn message_sink(&self) -> Option<&EndpointInfo> {
        (**self).message_sink()
    }
}

impl<R: Recipient> Recipient for Option<R> {
    fn message_sink(&self) -> Option<&EndpointInfo> {
        self.as_ref().and_then(Recipient::message_sink)
    }
}
