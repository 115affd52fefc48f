//! Message and frame types.

use std::fmt;

use bytes::Bytes;

/// Command names understood by relaychat processes.
pub mod commands {
    /// Backend → proxy: the backend's whole local name table.
    ///
    /// Arguments: comma-joined keys, comma-joined values.
    pub const UPDATE_NAMES: &str = "UpdateNames";

    /// Proxy → backend: the merged table of every linked backend.
    ///
    /// Arguments: comma-joined keys, comma-joined values, and for split
    /// broadcasts a third `broadcast:index/total` part marker.
    pub const UPDATE_ALL_NAMES: &str = "UpdateAllNames";
}

/// A command name plus its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: String,
    pub args: Vec<String>,
}

impl Message {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.command, self.args)
    }
}

/// One encoded unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Cheap handle to the frame bytes, for handing to a transport.
    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
