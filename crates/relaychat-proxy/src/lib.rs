//! Proxy side of relaychat.
//!
//! The proxy knows nothing about display names on its own. Each backend
//! pushes its local table with `UpdateNames`; the proxy keeps one table per
//! linked backend and, on a fixed period, merges them and broadcasts the
//! result to every backend with players online as `UpdateAllNames`.
//!
//! # Key types
//!
//! - [`ProxyMessageManager`]: owns the endpoint registry, the send pool and
//!   the dispatch table for inbound frames
//! - [`ProxyConfig`]: pool, ticker, frame limit and send timeout settings
//! - [`TableState`]: lifecycle of one endpoint's name table

mod config;
mod error;
mod manager;
mod registry;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use manager::ProxyMessageManager;
pub use registry::{EndpointSummary, TableState};
