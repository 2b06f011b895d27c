//! # Record Store Adapters
//!
//! - `memory` - in-process stores; reopening returns the committed state, so
//!   tests can simulate a restart
//! - `file` - one CRC-guarded image file per store, replaced atomically on
//!   every commit
//!
//! Both share `StagedImage`: committed records plus the writes staged since
//! the last commit.

mod file;
mod memory;

pub use file::{FileRecordStore, FileStorageProvider};
pub use memory::{MemoryRecordStore, MemoryStorageProvider};

use crate::domain::errors::StoreError;
use crate::ports::outbound::RecordLayout;
use ledger_types::Checkpoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Committed content of a store, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoreImage {
    /// `Some(size)` for fixed-record stores.
    pub record_size: Option<usize>,
    pub records: BTreeMap<u64, Vec<u8>>,
    pub checkpoint: Checkpoint,
}

impl StoreImage {
    pub fn empty(layout: RecordLayout) -> Self {
        Self {
            record_size: record_size(layout),
            ..Self::default()
        }
    }
}

fn record_size(layout: RecordLayout) -> Option<usize> {
    match layout {
        RecordLayout::Fixed { record_size } => Some(record_size),
        RecordLayout::Append => None,
    }
}

/// Committed image plus staged writes.
#[derive(Debug)]
pub(crate) struct StagedImage {
    name: String,
    layout: RecordLayout,
    committed: StoreImage,
    pending: BTreeMap<u64, Vec<u8>>,
}

impl StagedImage {
    /// Wrap a loaded image, rejecting one written with another layout.
    pub fn open(name: &str, layout: RecordLayout, committed: StoreImage) -> Result<Self, StoreError> {
        if committed.record_size != record_size(layout) {
            return Err(StoreError::LayoutMismatch {
                store: name.to_string(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            layout,
            committed,
            pending: BTreeMap::new(),
        })
    }

    pub fn fresh(name: &str, layout: RecordLayout) -> Self {
        Self {
            name: name.to_string(),
            layout,
            committed: StoreImage::empty(layout),
            pending: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    pub fn get(&self, index: u64) -> Option<Vec<u8>> {
        self.committed.records.get(&index).cloned()
    }

    pub fn contains(&self, index: u64) -> bool {
        self.pending.contains_key(&index) || self.committed.records.contains_key(&index)
    }

    pub fn stage_add(&mut self, index: u64, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.check_size(&bytes)?;
        if self.contains(index) {
            return Err(StoreError::AlreadyExists {
                store: self.name.clone(),
                index,
            });
        }
        self.pending.insert(index, bytes);
        Ok(())
    }

    pub fn stage_update(&mut self, index: u64, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.check_size(&bytes)?;
        if !self.contains(index) {
            return Err(StoreError::NotFound {
                store: self.name.clone(),
                index,
            });
        }
        self.pending.insert(index, bytes);
        Ok(())
    }

    pub fn start_index(&self) -> Option<u64> {
        self.committed.records.keys().next().copied()
    }

    pub fn end_index(&self) -> Option<u64> {
        self.committed.records.keys().next_back().copied()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.committed.checkpoint
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn committed_len(&self) -> usize {
        self.committed.records.len()
    }

    /// Replace committed bytes in place, bypassing staging.
    pub fn overwrite_committed(&mut self, index: u64, bytes: Vec<u8>) {
        self.committed.records.insert(index, bytes);
    }

    /// The image a commit with `checkpoint` would produce.
    pub fn merged(&self, checkpoint: Checkpoint) -> StoreImage {
        let mut image = self.committed.clone();
        image
            .records
            .extend(self.pending.iter().map(|(k, v)| (*k, v.clone())));
        image.checkpoint = checkpoint;
        image
    }

    pub fn publish(&mut self, image: StoreImage) {
        self.committed = image;
        self.pending.clear();
    }

    pub fn discard(&mut self) {
        self.pending.clear();
    }

    fn check_size(&self, bytes: &[u8]) -> Result<(), StoreError> {
        match self.layout {
            RecordLayout::Fixed { record_size } if bytes.len() != record_size => {
                Err(StoreError::RecordSize {
                    store: self.name.clone(),
                    expected: record_size,
                    actual: bytes.len(),
                })
            }
            _ => Ok(()),
        }
    }
}
