//! Raw transaction log entries and slices of them.

use ledger_types::{sha256, BinaryRecord, BlockId, CodecError, Hash, OperationId};

/// A transaction as kept by transaction storage: the exact bytes that were
/// appended, plus the keys storage indexes it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransaction {
    pub block_id: BlockId,
    pub transaction_id: OperationId,
    /// Content identifier, for duplicate detection.
    pub identifier: Hash,
    pub raw: Vec<u8>,
}

impl StoredTransaction {
    /// Hash the next entry must link to.
    pub fn hash(&self) -> Hash {
        sha256(&self.raw)
    }

    pub fn decode<E: BinaryRecord>(&self) -> Result<E, CodecError> {
        E::from_bytes(&self.raw)
    }
}

/// A contiguous run of transactions handed to `build_meta_data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionSlice {
    pub slice_id: u64,
    pub transactions: Vec<StoredTransaction>,
}

impl TransactionSlice {
    pub fn new(slice_id: u64, transactions: Vec<StoredTransaction>) -> Self {
        Self {
            slice_id,
            transactions,
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn last_block_id(&self) -> Option<BlockId> {
        self.transactions.last().map(|t| t.block_id)
    }
}
