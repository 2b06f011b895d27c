//! In-memory transaction log.

use crate::domain::errors::StoreError;
use crate::domain::slice::{StoredTransaction, TransactionSlice};
use crate::ports::outbound::TransactionStorage;
use ledger_types::{Hash, OperationId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

const STORE_NAME: &str = "transactions";

#[derive(Debug, Default)]
struct Log {
    saved: BTreeMap<OperationId, StoredTransaction>,
    identifiers: HashSet<Hash>,
    staged: Vec<StoredTransaction>,
}

impl Log {
    fn last_id(&self) -> Option<OperationId> {
        self.staged
            .last()
            .map(|t| t.transaction_id)
            .or_else(|| self.saved.keys().next_back().copied())
    }
}

/// Transaction storage kept in memory.
///
/// Appends are staged per block and become history on `save`.
#[derive(Debug, Default)]
pub struct MemoryTransactionStorage {
    log: RwLock<Log>,
}

impl MemoryTransactionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saved transactions.
    pub fn len(&self) -> usize {
        self.log.read().saved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionStorage for MemoryTransactionStorage {
    fn append(&self, transaction: StoredTransaction) -> Result<(), StoreError> {
        let mut log = self.log.write();
        if let Some(last) = log.last_id() {
            if transaction.transaction_id <= last {
                return Err(StoreError::AlreadyExists {
                    store: STORE_NAME.to_string(),
                    index: transaction.transaction_id,
                });
            }
        }
        log.staged.push(transaction);
        Ok(())
    }

    fn save(&self) -> Result<(), StoreError> {
        let mut log = self.log.write();
        let staged = std::mem::take(&mut log.staged);
        for transaction in staged {
            log.identifiers.insert(transaction.identifier);
            log.saved.insert(transaction.transaction_id, transaction);
        }
        Ok(())
    }

    fn get_transaction(&self, transaction_id: OperationId) -> Result<Option<StoredTransaction>, StoreError> {
        Ok(self.log.read().saved.get(&transaction_id).cloned())
    }

    fn contains_identifier(&self, identifier: &Hash) -> Result<bool, StoreError> {
        Ok(self.log.read().identifiers.contains(identifier))
    }

    fn slice_after(&self, after: OperationId, limit: usize) -> Result<TransactionSlice, StoreError> {
        let log = self.log.read();
        let transactions: Vec<StoredTransaction> = log
            .saved
            .range((Bound::Excluded(after), Bound::Unbounded))
            .take(limit)
            .map(|(_, t)| t.clone())
            .collect();
        let slice_id = transactions.first().map_or(0, |t| t.block_id);
        Ok(TransactionSlice::new(slice_id, transactions))
    }

    fn last_transaction_id(&self) -> Option<OperationId> {
        self.log.read().saved.keys().next_back().copied()
    }
}
