//! Linked endpoints and their name tables.

use std::collections::BTreeMap;
use std::fmt;

use relaychat_protocol::NameTable;
use relaychat_transport::{EndpointId, EndpointInfo};

// ---------------------------------------------------------------------------
// TableState
// ---------------------------------------------------------------------------

/// Lifecycle of one endpoint's name table.
///
/// ```text
/// Absent → Populated → Replaced (→ Replaced …)
/// ```
///
/// An endpoint starts `Absent` when it links. Its first `UpdateNames`
/// populates the table, every later one replaces it wholesale. When the
/// endpoint unlinks, its entry (table included) is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Absent,
    Populated,
    Replaced,
}

impl TableState {
    /// State after one more wholesale update.
    pub fn after_update(self) -> Self {
        match self {
            Self::Absent => Self::Populated,
            Self::Populated | Self::Replaced => Self::Replaced,
        }
    }

    pub fn has_table(self) -> bool {
        !matches!(self, Self::Absent)
    }
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "Absent"),
            Self::Populated => write!(f, "Populated"),
            Self::Replaced => write!(f, "Replaced"),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Read-only view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSummary {
    pub endpoint: EndpointInfo,
    pub players: usize,
    pub state: TableState,
    /// Entries in the endpoint's current table.
    pub names: usize,
}

#[derive(Debug)]
struct EndpointEntry {
    info: EndpointInfo,
    players: usize,
    state: TableState,
    table: NameTable,
}

impl EndpointEntry {
    fn summary(&self) -> EndpointSummary {
        EndpointSummary {
            endpoint: self.info.clone(),
            players: self.players,
            state: self.state,
            names: self.table.len(),
        }
    }
}

/// Every linked endpoint, keyed (and iterated) by id.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: BTreeMap<EndpointId, EndpointEntry>,
}

impl Registry {
    /// Adds an endpoint with no players and no table. Returns `false` if it
    /// was already linked; the existing entry is kept.
    pub(crate) fn link(&mut self, info: EndpointInfo) -> bool {
        if self.entries.contains_key(&info.id()) {
            return false;
        }
        self.entries.insert(
            info.id(),
            EndpointEntry {
                info,
                players: 0,
                state: TableState::Absent,
                table: NameTable::new(),
            },
        );
        true
    }

    pub(crate) fn unlink(&mut self, id: EndpointId) -> Option<EndpointSummary> {
        self.entries.remove(&id).map(|entry| entry.summary())
    }

    pub(crate) fn set_players(&mut self, id: EndpointId, players: usize) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.players = players;
                true
            }
            None => false,
        }
    }

    /// Swaps in a new table. Returns the resulting state, or `None` for an
    /// endpoint that is not linked.
    pub(crate) fn replace_table(&mut self, id: EndpointId, table: NameTable) -> Option<TableState> {
        let entry = self.entries.get_mut(&id)?;
        entry.table = table;
        entry.state = entry.state.after_update();
        Some(entry.state)
    }

    pub(crate) fn table(&self, id: EndpointId) -> Option<&NameTable> {
        self.entries
            .get(&id)
            .filter(|entry| entry.state.has_table())
            .map(|entry| &entry.table)
    }

    pub(crate) fn info(&self, id: EndpointId) -> Option<&EndpointInfo> {
        self.entries.get(&id).map(|entry| &entry.info)
    }

    pub(crate) fn summaries(&self) -> Vec<EndpointSummary> {
        self.entries.values().map(EndpointEntry::summary).collect()
    }

    /// Union of every endpoint's table. On a key present in several tables
    /// the endpoint with the highest id wins.
    pub(crate) fn merged(&self) -> NameTable {
        let mut merged = NameTable::new();
        for entry in self.entries.values() {
            merged.extend_from(&entry.table);
        }
        merged
    }

    /// Endpoints with at least one player.
    pub(crate) fn with_players(&self) -> Vec<EndpointInfo> {
        self.entries
            .values()
            .filter(|entry| entry.players > 0)
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
