//! Backend side of relaychat.
//!
//! A backend owns the authoritative display names of its own players. It
//! pushes its whole local table to the proxy (`UpdateNames`) and receives
//! the merged table of the cluster back (`UpdateAllNames`), which
//! [`ClusterNames`] keeps so any online player's name can be resolved
//! locally.

mod config;
mod error;
mod messenger;
mod names;

pub use config::BackendConfig;
pub use error::BackendError;
pub use messenger::BackendMessenger;
pub use names::{ClusterNames, NameUpdate};
