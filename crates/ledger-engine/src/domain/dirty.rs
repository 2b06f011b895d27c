//! # Dirty-Set Accumulator
//!
//! Per-slice scratch space. Apply rules never touch a record store directly:
//! every created or modified entity is staged here and becomes visible to
//! later operations of the same slice through `get`. At commit the ledger
//! drains the map into the stores (`add_entry` for created, `update_entry`
//! for updated) and then advances the checkpoints. An aborted slice simply
//! drops the map.

use std::collections::BTreeMap;
use std::sync::Arc;

/// How a staged entity reaches its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyKind {
    /// New record, flushed with `add_entry`.
    Created,
    /// Existing record, flushed with `update_entry`.
    Updated,
}

/// Staged entities of one kind, keyed by record index.
#[derive(Debug)]
pub struct DirtyMap<K, V> {
    entries: BTreeMap<K, (DirtyKind, Arc<V>)>,
}

impl<K: Ord + Copy, V> Default for DirtyMap<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy, V> DirtyMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&mut self, key: K, value: V) {
        self.entries.insert(key, (DirtyKind::Created, Arc::new(value)));
    }

    /// Stage a modification. An entity created earlier in the same slice
    /// stays `Created`.
    pub fn updated(&mut self, key: K, value: V) {
        let kind = match self.entries.get(&key) {
            Some((DirtyKind::Created, _)) => DirtyKind::Created,
            _ => DirtyKind::Updated,
        };
        self.entries.insert(key, (kind, Arc::new(value)));
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).map(|(_, value)| Arc::clone(value))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn kind(&self, key: &K) -> Option<DirtyKind> {
        self.entries.get(key).map(|(kind, _)| *kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Staged entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, DirtyKind, &Arc<V>)> {
        self.entries
            .iter()
            .map(|(key, (kind, value))| (key, *kind, value))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
