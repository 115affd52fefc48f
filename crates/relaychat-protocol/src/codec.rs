//! Binary frame codec.
//!
//! A frame is a complete, self-describing message:
//!
//! ```text
//! [cmd_len: u32 BE][command][arg_count: u32 BE]
//! [len_0: u32 BE][arg_0] ... [len_n-1: u32 BE][arg_n-1]
//! ```
//!
//! Strings are always length-prefixed, never delimited, so arguments may
//! contain any text including commas and NUL bytes. There is no version
//! field: every process in a cluster must run the same layout.
//!
//! When a message does not fit in one frame the arguments are spread over
//! several frames at argument boundaries. Each frame repeats the command
//! and decodes on its own; a consumer sees one message per frame.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{Frame, Message, ProtocolError};

/// Size of every length and count prefix.
const PREFIX: usize = 4;

/// Upper bound on the size of one encoded frame, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameLimit(usize);

impl FrameLimit {
    /// Largest payload a plugin-message channel accepts.
    pub const DEFAULT: usize = 32_766;
    /// Anything smaller cannot hold a useful command.
    pub const MIN: usize = 64;

    /// Creates a limit, raising values below [`Self::MIN`].
    pub fn new(bytes: usize) -> Self {
        if bytes < Self::MIN {
            tracing::warn!(bytes, min = Self::MIN, "frame limit too small, raising");
            return Self(Self::MIN);
        }
        Self(bytes)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for FrameLimit {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Encodes messages into frames and decodes frames back into messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    limit: FrameLimit,
}

impl FrameCodec {
    pub fn new(limit: FrameLimit) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> FrameLimit {
        self.limit
    }

    /// Bytes left for argument text when `arg_count` arguments of
    /// `command` share one frame.
    pub fn args_budget(&self, command: &str, arg_count: usize) -> usize {
        self.limit
            .get()
            .saturating_sub(header_len(command) + arg_count * PREFIX)
    }

    /// Encodes `command` and `args` into one or more frames.
    ///
    /// # Errors
    /// [`ProtocolError::CommandTooLarge`] if the command alone overflows a
    /// frame, [`ProtocolError::ArgumentTooLarge`] if a single argument
    /// cannot fit in any frame.
    pub fn encode<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
    ) -> Result<Vec<Frame>, ProtocolError> {
        let limit = self.limit.get();
        let header = header_len(command);
        if header > limit {
            return Err(ProtocolError::CommandTooLarge {
                len: command.len(),
                limit,
            });
        }
        let budget = limit - header;

        let mut chunks: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut used = 0;
        for (index, arg) in args.iter().enumerate() {
            let arg = arg.as_ref();
            let cost = PREFIX + arg.len();
            if cost > budget {
                return Err(ProtocolError::ArgumentTooLarge {
                    index,
                    len: arg.len(),
                    budget: budget.saturating_sub(PREFIX),
                });
            }
            if used + cost > budget && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                used = 0;
            }
            current.push(arg);
            used += cost;
        }
        if !current.is_empty() || chunks.is_empty() {
            chunks.push(current);
        }

        if chunks.len() > 1 {
            tracing::debug!(command, frames = chunks.len(), "message split across frames");
        }
        Ok(chunks
            .iter()
            .map(|chunk| write_frame(command, chunk))
            .collect())
    }

    pub fn encode_message(&self, message: &Message) -> Result<Vec<Frame>, ProtocolError> {
        self.encode(&message.command, &message.args)
    }

    /// Decodes one frame.
    ///
    /// Frames larger than this codec's limit are still accepted; the limit
    /// only constrains what we produce.
    ///
    /// # Errors
    /// [`ProtocolError::MalformedFrame`] on any layout inconsistency.
    pub fn decode(&self, data: &[u8]) -> Result<Message, ProtocolError> {
        decode(data)
    }
}

fn header_len(command: &str) -> usize {
    PREFIX + command.len() + PREFIX
}

fn write_frame(command: &str, args: &[&str]) -> Frame {
    let size = header_len(command) + args.iter().map(|a| PREFIX + a.len()).sum::<usize>();
    let mut buf = BytesMut::with_capacity(size);
    buf.put_u32(command.len() as u32);
    buf.put_slice(command.as_bytes());
    buf.put_u32(args.len() as u32);
    for arg in args {
        buf.put_u32(arg.len() as u32);
        buf.put_slice(arg.as_bytes());
    }
    Frame::from(buf.freeze())
}

/// Decodes one frame without needing a codec instance.
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    let mut buf = data;
    let command = read_str(&mut buf, "command")?.to_owned();

    if buf.remaining() < PREFIX {
        return Err(ProtocolError::MalformedFrame(
            "missing argument count".into(),
        ));
    }
    let count = buf.get_u32() as usize;
    // Every argument needs at least its length prefix.
    if count > buf.remaining() / PREFIX {
        return Err(ProtocolError::MalformedFrame(format!(
            "argument count {count} does not fit the {} bytes that follow",
            buf.remaining()
        )));
    }

    let mut args = Vec::with_capacity(count);
    for index in 0..count {
        let arg = read_str(&mut buf, "argument").map_err(|e| match e {
            ProtocolError::MalformedFrame(reason) => {
                ProtocolError::MalformedFrame(format!("{reason} (argument {index} of {count})"))
            }
            other => other,
        })?;
        args.push(arg.to_owned());
    }

    if buf.has_remaining() {
        return Err(ProtocolError::MalformedFrame(format!(
            "{} trailing bytes after {count} arguments",
            buf.remaining()
        )));
    }
    Ok(Message { command, args })
}

fn read_str<'a>(buf: &mut &'a [u8], what: &str) -> Result<&'a str, ProtocolError> {
    if buf.remaining() < PREFIX {
        return Err(ProtocolError::MalformedFrame(format!(
            "truncated {what} length"
        )));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::MalformedFrame(format!(
            "{what} declares {len} bytes but {} remain",
            buf.remaining()
        )));
    }
    let (head, rest) = buf.split_at(len);
    *buf = rest;
    std::str::from_utf8(head)
        .map_err(|_| ProtocolError::MalformedFrame(format!("{what} is not valid UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(limit: usize) -> FrameCodec {
        FrameCodec::new(FrameLimit::new(limit))
    }

    #[test]
    fn test_encode_single_frame_round_trip() {
        let c = FrameCodec::default();
        let frames = c.encode("UpdateNames", &["p1,p2", "Alice,"]).unwrap();
        assert_eq!(frames.len(), 1);

        let msg = c.decode(frames[0].as_bytes()).unwrap();
        assert_eq!(msg, Message::new("UpdateNames", ["p1,p2", "Alice,"]));
    }

    #[test]
    fn test_encode_no_args_still_produces_a_frame() {
        let c = FrameCodec::default();
        let frames = c.encode::<&str>("Ping", &[]).unwrap();
        assert_eq!(frames.len(), 1);
        let msg = c.decode(frames[0].as_bytes()).unwrap();
        assert_eq!(msg.command, "Ping");
        assert!(msg.args.is_empty());
    }

    #[test]
    fn test_empty_strings_survive() {
        let c = FrameCodec::default();
        let frames = c.encode("", &["", "", "x"]).unwrap();
        let msg = c.decode(frames[0].as_bytes()).unwrap();
        assert_eq!(msg, Message::new("", ["", "", "x"]));
    }

    #[test]
    fn test_layout_is_length_prefixed() {
        let c = FrameCodec::default();
        let frames = c.encode("Cmd", &["a,b"]).unwrap();
        let expected: &[u8] = &[
            0, 0, 0, 3, b'C', b'm', b'd', // command
            0, 0, 0, 1, // arg count
            0, 0, 0, 3, b'a', b',', b'b', // arg 0
        ];
        assert_eq!(frames[0].as_bytes(), expected);
    }

    #[test]
    fn test_oversized_message_is_split_at_argument_boundaries() {
        let c = codec(64);
        let args: Vec<String> = (0..10).map(|i| format!("arg-{i:02}-xxxx")).collect();

        let frames = c.encode("Bulk", &args).unwrap();

        assert!(frames.len() > 1, "expected a split, got {} frame(s)", frames.len());
        let mut rebuilt = Vec::new();
        for frame in &frames {
            assert!(frame.len() <= 64, "frame of {} bytes over limit", frame.len());
            let msg = c.decode(frame.as_bytes()).expect("each frame decodes alone");
            assert_eq!(msg.command, "Bulk");
            assert!(!msg.args.is_empty());
            rebuilt.extend(msg.args);
        }
        assert_eq!(rebuilt, args);
    }

    #[test]
    fn test_argument_larger_than_frame_is_rejected() {
        let c = codec(64);
        let big = "x".repeat(100);
        let err = c.encode("Bulk", &["ok", big.as_str()]).unwrap_err();
        assert!(
            matches!(err, ProtocolError::ArgumentTooLarge { index: 1, len: 100, .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn test_command_larger_than_frame_is_rejected() {
        let c = codec(64);
        let cmd = "C".repeat(64);
        let err = c.encode::<&str>(&cmd, &[]).unwrap_err();
        assert!(matches!(err, ProtocolError::CommandTooLarge { len: 64, limit: 64 }));
    }

    #[test]
    fn test_args_budget_matches_what_fits() {
        let c = codec(64);
        let budget = c.args_budget("Cmd", 2);
        let half = budget / 2;
        let a = "a".repeat(half);
        let b = "b".repeat(budget - half);
        assert_eq!(c.encode("Cmd", &[&a, &b]).unwrap().len(), 1);

        let b = "b".repeat(budget - half + 1);
        assert_eq!(c.encode("Cmd", &[&a, &b]).unwrap().len(), 2);
    }

    #[test]
    fn test_frame_limit_clamps_to_minimum() {
        assert_eq!(FrameLimit::new(1).get(), FrameLimit::MIN);
        assert_eq!(FrameLimit::default().get(), 32_766);
    }

    #[test]
    fn test_decode_truncated_argument_is_malformed() {
        let c = FrameCodec::default();
        let frame = c.encode("Cmd", &["hello"]).unwrap().remove(0);
        let cut = &frame.as_bytes()[..frame.len() - 2];
        assert!(matches!(c.decode(cut), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_count_mismatch_is_malformed() {
        let c = FrameCodec::default();
        let mut bytes = c.encode("Cmd", &["a"]).unwrap().remove(0).as_bytes().to_vec();
        // Claim two arguments while only one follows.
        bytes[10] = 2;
        assert!(matches!(c.decode(&bytes), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_huge_count_is_malformed_without_allocating() {
        let bytes = [0, 0, 0, 1, b'C', 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(decode(&bytes), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_trailing_bytes_is_malformed() {
        let c = FrameCodec::default();
        let mut bytes = c.encode("Cmd", &["a"]).unwrap().remove(0).as_bytes().to_vec();
        bytes.push(0);
        assert!(matches!(c.decode(&bytes), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_invalid_utf8_is_malformed() {
        let bytes = [0, 0, 0, 1, 0xff, 0, 0, 0, 0];
        assert!(matches!(decode(&bytes), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_empty_input_is_malformed() {
        assert!(matches!(decode(&[]), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_frame_limit_deserializes_from_plain_number() {
        let limit: FrameLimit = serde_json::from_str("4096").unwrap();
        assert_eq!(limit.get(), 4096);
    }
}
