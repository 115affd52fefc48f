//! Name tables and their comma-joined wire form.
//!
//! On the wire a table travels as two parallel strings: every key joined
//! with `,` and every value joined with `,`, position `i` of one matching
//! position `i` of the other. A missing override is an empty segment.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

/// Separator between entries in the joined form.
pub const SEPARATOR: char = ',';

/// Player key → display-name override. `None` means "use the default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTable(BTreeMap<String, Option<String>>);

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the override for `key`, returning the previous entry.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: Option<String>,
    ) -> Option<Option<String>> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Option<String>> {
        self.0.remove(key)
    }

    /// `None` if the key is unknown, `Some(None)` if it is known without an
    /// override.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.0.get(key).map(Option::as_deref)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Copies every entry of `other` into this table; `other` wins on
    /// conflicts.
    pub fn extend_from(&mut self, other: &NameTable) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn join(&self) -> JoinedNames {
        JoinedNames::from_entries(self.iter())
    }

    /// Parses the joined form back into a table. Later duplicates win.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] if the two lists differ in length.
    pub fn from_joined(keys: &str, values: &str) -> Result<Self, ProtocolError> {
        if keys.is_empty() {
            if values.is_empty() {
                return Ok(Self::new());
            }
            return Err(ProtocolError::InvalidMessage(
                "values present without keys".into(),
            ));
        }

        let keys: Vec<&str> = keys.split(SEPARATOR).collect();
        let values: Vec<&str> = values.split(SEPARATOR).collect();
        if keys.len() != values.len() {
            return Err(ProtocolError::InvalidMessage(format!(
                "{} keys but {} values",
                keys.len(),
                values.len()
            )));
        }

        Ok(keys
            .into_iter()
            .zip(values)
            .map(|(k, v)| (k, (!v.is_empty()).then_some(v)))
            .collect())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, Option<V>)> for NameTable {
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.map(Into::into)))
                .collect(),
        )
    }
}

/// A table (or a slice of one) in its two-string wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinedNames {
    pub keys: String,
    pub values: String,
    entries: usize,
}

impl JoinedNames {
    /// Joins entries in iteration order.
    ///
    /// Entries whose key is empty or whose key or value contains the
    /// separator cannot be represented and are left out.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut joined = Self::default();
        for (key, value) in entries {
            joined.push(key, value);
        }
        joined
    }

    /// Splits entries into batches whose joined keys plus joined values
    /// take at most `budget` bytes. An entry that alone exceeds the budget
    /// is left out.
    pub fn batched<'a, I>(entries: I, budget: usize) -> Vec<JoinedNames>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut batches = Vec::new();
        let mut current = Self::default();
        for (key, value) in entries {
            let alone = key.len() + value.map_or(0, str::len);
            if alone > budget {
                tracing::warn!(key, bytes = alone, budget, "name entry too large for any frame, skipping");
                continue;
            }
            if current.size_with(key, value) > budget {
                batches.push(std::mem::take(&mut current));
            }
            current.push(key, value);
        }
        if current.entries > 0 || batches.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// Appends one entry. Returns `false` if the entry was left out.
    pub fn push(&mut self, key: &str, value: Option<&str>) -> bool {
        let value = value.unwrap_or("");
        if key.is_empty() || key.contains(SEPARATOR) || value.contains(SEPARATOR) {
            tracing::debug!(key, "name entry contains separator, leaving it out");
            return false;
        }
        if self.entries > 0 {
            self.keys.push(SEPARATOR);
            self.values.push(SEPARATOR);
        }
        self.keys.push_str(key);
        self.values.push_str(value);
        self.entries += 1;
        true
    }

    /// Number of entries joined so far.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Combined byte size of both strings.
    pub fn size(&self) -> usize {
        self.keys.len() + self.values.len()
    }

    fn size_with(&self, key: &str, value: Option<&str>) -> usize {
        let separators = if self.entries > 0 { 2 } else { 0 };
        self.size() + separators + key.len() + value.map_or(0, str::len)
    }

    pub fn to_table(&self) -> Result<NameTable, ProtocolError> {
        NameTable::from_joined(&self.keys, &self.values)
    }
}

/// Position of one batch within a split broadcast, written
/// `broadcast:index/total`.
///
/// `broadcast` numbers the broadcast the batch belongs to. Senders give each
/// split broadcast a larger number than the one before, so receivers can
/// tell parts of interleaved broadcasts apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartMarker {
    pub broadcast: u64,
    pub index: u32,
    pub total: u32,
}

impl PartMarker {
    /// Longest possible encoding (`u64::MAX:u32::MAX/u32::MAX`).
    pub const MAX_ENCODED_LEN: usize = 42;

    pub fn new(broadcast: u64, index: u32, total: u32) -> Result<Self, ProtocolError> {
        if total == 0 || index >= total {
            return Err(ProtocolError::InvalidMessage(format!(
                "part {index} of {total} is out of range"
            )));
        }
        Ok(Self {
            broadcast,
            index,
            total,
        })
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }
}

impl fmt::Display for PartMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.broadcast, self.index, self.total)
    }
}

impl FromStr for PartMarker {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ProtocolError::InvalidMessage(format!("bad part marker {s:?}"));
        let (broadcast, position) = s.split_once(':').ok_or_else(bad)?;
        let (index, total) = position.split_once('/').ok_or_else(bad)?;
        let broadcast = broadcast.parse().map_err(|_| bad())?;
        let index = index.parse().map_err(|_| bad())?;
        let total = total.parse().map_err(|_| bad())?;
        Self::new(broadcast, index, total)
    }
}
