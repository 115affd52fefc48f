//! Error types for the backend layer.

use relaychat_protocol::ProtocolError;
use relaychat_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A split broadcast part arrived without the parts before it.
    #[error("name broadcast part {index}/{total} arrived out of sequence")]
    PartOutOfSequence { index: u32, total: u32 },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
