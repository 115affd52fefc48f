//! Cluster-wide name cache fed by `UpdateAllNames`.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use relaychat_protocol::{NameTable, PartMarker, ProtocolError, commands};

use crate::BackendError;

/// What an `UpdateAllNames` frame did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameUpdate {
    /// The view was replaced; it now holds `entries` names.
    Applied { entries: usize },
    /// A part of a split broadcast was stored; the view is unchanged until
    /// all `total` parts are in.
    Pending { received: u32, total: u32 },
    /// The part belongs to a broadcast older than the newest one seen, or
    /// to one already applied, and was dropped.
    Stale { broadcast: u64 },
}

/// Parts of a split broadcast collected so far.
#[derive(Debug)]
struct Pending {
    broadcast: u64,
    total: u32,
    parts: BTreeMap<u32, NameTable>,
}

#[derive(Debug, Default)]
struct State {
    view: NameTable,
    pending: Option<Pending>,
    /// Newest broadcast number started so far.
    latest: Option<u64>,
}

/// The last complete merged table the proxy broadcast.
#[derive(Debug, Default)]
pub struct ClusterNames {
    state: RwLock<State>,
}

impl ClusterNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display-name override for `key`, if any server has one.
    pub fn resolve(&self, key: &str) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .view
            .get(key)
            .flatten()
            .map(str::to_owned)
    }

    /// Whether `key` is online anywhere in the cluster.
    pub fn is_known(&self, key: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .view
            .contains_key(key)
    }

    pub fn snapshot(&self) -> NameTable {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .view
            .clone()
    }

    /// Applies the arguments of one `UpdateAllNames` frame.
    ///
    /// Two arguments replace the view at once. Three arguments carry a
    /// part marker: parts are held back until every part `0..total` of one
    /// broadcast has arrived, then their union replaces the view. Part 0 of
    /// a newer broadcast starts a new set, dropping any incomplete one;
    /// parts of older broadcasts are dropped.
    pub fn apply_update(&self, args: &[String]) -> Result<NameUpdate, BackendError> {
        match args {
            [keys, values] => {
                let table = NameTable::from_joined(keys, values)?;
                let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                if let Some(stale) = state.pending.take() {
                    tracing::debug!(
                        received = stale.parts.len(),
                        total = stale.total,
                        "whole-table update supersedes incomplete broadcast"
                    );
                }
                state.view = table;
                Ok(NameUpdate::Applied {
                    entries: state.view.len(),
                })
            }
            [keys, values, marker] => {
                let marker: PartMarker = marker.parse()?;
                let table = NameTable::from_joined(keys, values)?;
                self.apply_part(marker, table)
            }
            _ => Err(ProtocolError::InvalidMessage(format!(
                "{} expects 2 or 3 arguments, got {}",
                commands::UPDATE_ALL_NAMES,
                args.len()
            ))
            .into()),
        }
    }

    /// Forgets broadcast numbering, so the next part 0 starts a set
    /// whatever its number. Called when the proxy link comes up.
    pub fn forget_broadcasts(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.pending = None;
        state.latest = None;
    }

    fn apply_part(&self, marker: PartMarker, table: NameTable) -> Result<NameUpdate, BackendError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        match state.latest {
            Some(latest) if marker.broadcast < latest => {
                tracing::debug!(broadcast = marker.broadcast, latest, "dropping part of older name broadcast");
                return Ok(NameUpdate::Stale {
                    broadcast: marker.broadcast,
                });
            }
            Some(latest) if marker.broadcast == latest => {}
            _ => {
                if marker.index != 0 {
                    return Err(BackendError::PartOutOfSequence {
                        index: marker.index,
                        total: marker.total,
                    });
                }
                if let Some(stale) = state.pending.take() {
                    tracing::debug!(
                        broadcast = stale.broadcast,
                        received = stale.parts.len(),
                        total = stale.total,
                        "dropping incomplete name broadcast"
                    );
                }
                state.latest = Some(marker.broadcast);
                state.pending = Some(Pending {
                    broadcast: marker.broadcast,
                    total: marker.total,
                    parts: BTreeMap::new(),
                });
            }
        }

        let pending = match state.pending.as_mut() {
            Some(pending) if pending.total == marker.total => pending,
            Some(_) => {
                return Err(BackendError::PartOutOfSequence {
                    index: marker.index,
                    total: marker.total,
                });
            }
            None => {
                return Ok(NameUpdate::Stale {
                    broadcast: marker.broadcast,
                });
            }
        };
        pending.parts.insert(marker.index, table);

        let received = pending.parts.len() as u32;
        if received < pending.total {
            return Ok(NameUpdate::Pending {
                received,
                total: pending.total,
            });
        }

        let mut view = NameTable::new();
        if let Some(done) = state.pending.take() {
            for part in done.parts.values() {
                view.extend_from(part);
            }
        }
        state.view = view;
        Ok(NameUpdate::Applied {
            entries: state.view.len(),
        })
    }
}
