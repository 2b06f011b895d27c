use super::StagedImage;
use crate::domain::errors::StoreError;
use crate::ports::outbound::{RecordLayout, RecordStore, StorageProvider};
use ledger_types::Checkpoint;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// In-memory record store for tests and light nodes.
#[derive(Debug)]
pub struct MemoryRecordStore {
    name: String,
    image: RwLock<StagedImage>,
    fail_commits: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new(name: &str, layout: RecordLayout) -> Self {
        Self {
            name: name.to_string(),
            image: RwLock::new(StagedImage::fresh(name, layout)),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Make every following `commit` fail (fault injection).
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of staged, uncommitted writes.
    pub fn pending_len(&self) -> usize {
        self.image.read().pending_len()
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.image.read().committed_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the committed bytes of a record (corruption injection).
    pub fn corrupt(&self, index: u64, bytes: Vec<u8>) {
        self.image.write().overwrite_committed(index, bytes);
    }
}

impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn layout(&self) -> RecordLayout {
        self.image.read().layout()
    }

    fn get_by_index(&self, index: u64) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.image.read().get(index))
    }

    fn add_entry(&self, index: u64, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.image.write().stage_add(index, bytes)
    }

    fn update_entry(&self, index: u64, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.image.write().stage_update(index, bytes)
    }

    fn contains_index(&self, index: u64) -> Result<bool, StoreError> {
        Ok(self.image.read().contains(index))
    }

    fn start_index(&self) -> Option<u64> {
        self.image.read().start_index()
    }

    fn end_index(&self) -> Option<u64> {
        self.image.read().end_index()
    }

    fn checkpoint(&self) -> Checkpoint {
        self.image.read().checkpoint()
    }

    fn commit(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Io(format!("commit of '{}' refused", self.name)));
        }
        let mut image = self.image.write();
        let merged = image.merged(checkpoint);
        image.publish(merged);
        Ok(())
    }

    fn discard(&self) {
        self.image.write().discard();
    }
}

/// Hands out `MemoryRecordStore`s by name.
///
/// Reopening a name returns the same store with its staged writes dropped,
/// which is what a restart looks like to the ledger.
#[derive(Debug, Default)]
pub struct MemoryStorageProvider {
    stores: Mutex<HashMap<String, Arc<MemoryRecordStore>>>,
    unavailable: AtomicBool,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open_store` fail (fault injection).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The store opened under `name`, if any.
    pub fn store(&self, name: &str) -> Option<Arc<MemoryRecordStore>> {
        self.stores.lock().get(name).cloned()
    }
}

impl StorageProvider for MemoryStorageProvider {
    fn open_store(&self, name: &str, layout: RecordLayout) -> Result<Arc<dyn RecordStore>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Io(format!("storage for '{}' unavailable", name)));
        }

        let mut stores = self.stores.lock();
        if let Some(existing) = stores.get(name) {
            if existing.layout() != layout {
                return Err(StoreError::LayoutMismatch {
                    store: name.to_string(),
                });
            }
            existing.discard();
            debug!("[store] reopened '{}' at {}", name, existing.checkpoint());
            return Ok(Arc::clone(existing) as Arc<dyn RecordStore>);
        }

        let store = Arc::new(MemoryRecordStore::new(name, layout));
        stores.insert(name.to_string(), Arc::clone(&store));
        Ok(store as Arc<dyn RecordStore>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_publishes_staged_writes() {
        let store = MemoryRecordStore::new("chains", RecordLayout::Append);
        store.add_entry(7, b"seven".to_vec()).unwrap();
        assert_eq!(store.get_by_index(7).unwrap(), None);

        let checkpoint = Checkpoint {
            last_block_id: 2,
            last_transaction_id: 5,
            last_transaction_hash: Some([1u8; 32]),
        };
        store.commit(checkpoint).unwrap();

        assert_eq!(store.get_by_index(7).unwrap(), Some(b"seven".to_vec()));
        assert_eq!(store.checkpoint(), checkpoint);
        assert_eq!((store.start_index(), store.end_index()), (Some(7), Some(7)));
    }

    #[test]
    fn test_failed_commit_keeps_previous_state() {
        let store = MemoryRecordStore::new("chains", RecordLayout::Append);
        store.add_entry(1, vec![1]).unwrap();
        store.set_fail_commits(true);

        assert!(store.commit(Checkpoint::default()).is_err());
        assert_eq!(store.get_by_index(1).unwrap(), None);
        assert_eq!(store.pending_len(), 1);

        store.discard();
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_reopen_drops_staged_writes() {
        let provider = MemoryStorageProvider::new();
        let store = provider.open_store("accounts", RecordLayout::Append).unwrap();
        store.add_entry(1, vec![1]).unwrap();
        store.commit(Checkpoint::default()).unwrap();
        store.add_entry(2, vec![2]).unwrap();

        let reopened = provider.open_store("accounts", RecordLayout::Append).unwrap();
        assert_eq!(reopened.get_by_index(1).unwrap(), Some(vec![1]));
        assert!(!reopened.contains_index(2).unwrap());
    }

    #[test]
    fn test_unavailable_provider() {
        let provider = MemoryStorageProvider::new();
        provider.set_unavailable(true);
        assert!(provider.open_store("accounts", RecordLayout::Append).is_err());
    }
}
