//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding or interpreting frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame's byte layout is inconsistent: a declared length runs past
    /// the end of the buffer, the argument count does not match the fields
    /// present, a string is not UTF-8, or bytes are left over.
    ///
    /// Malformed frames are dropped by the receiver; they are never fatal.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The command name alone does not fit in a frame.
    #[error("command of {len} bytes does not fit a {limit}-byte frame")]
    CommandTooLarge { len: usize, limit: usize },

    /// One argument is larger than a frame can carry, so it cannot be
    /// placed in any chunk.
    #[error("argument {index} of {len} bytes exceeds the {budget}-byte frame budget")]
    ArgumentTooLarge {
        index: usize,
        len: usize,
        budget: usize,
    },

    /// The frame decoded fine but its arguments do not make sense for the
    /// command (wrong count, mismatched name lists, bad part marker).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
