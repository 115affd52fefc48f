//! Wire protocol for relaychat.
//!
//! - **Codec** ([`FrameCodec`]): command + arguments ⇄ binary frames,
//!   splitting oversized messages at argument boundaries.
//! - **Names** ([`NameTable`], [`JoinedNames`], [`PartMarker`]): the
//!   display-name tables and their comma-joined form.
//! - **Dispatch** ([`DispatchTable`]): routes decoded frames to command
//!   handlers.
//! - **Courier** ([`Courier`]): encodes a message once and pushes its
//!   frames to a set of endpoints, recording a [`SendOutcome`] per endpoint.
//!
//! ```text
//! Transport (bytes) → Codec (Message) → DispatchTable (handler)
//! ```

mod codec;
mod courier;
mod dispatch;
mod error;
mod names;
mod types;

pub use codec::{FrameCodec, FrameLimit, decode};
pub use courier::{Courier, RejectReason, SendOutcome, SendReport};
pub use dispatch::{CommandHandler, DispatchTable, Dispatched};
pub use error::ProtocolError;
pub use names::{JoinedNames, NameTable, PartMarker, SEPARATOR};
pub use types::{Frame, Message, commands};
