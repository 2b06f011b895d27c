//! # Domain Errors
//!
//! ## Taxonomy
//!
//! | Class | Example | Handling |
//! |-------|---------|----------|
//! | Integrity | hash-chain break, record id mismatch | fatal, ledger moves to `Failed` |
//! | Admission | any pipeline stage failure | typed `ResultCode`, never an error |
//! | Transient I/O | store open, disk read | logged, operation fails, no state change |
//! | Best effort | cache sweep, single-flight compute | logged and swallowed |
//!
//! Ordinary "precondition not met" cases during apply (duplicate create,
//! missing referenced entity) are not errors at all: apply rules return
//! `Ok(false)`.

use super::state::LedgerState;
use ledger_types::{CodecError, OperationId};
use thiserror::Error;

/// Errors raised by record stores and transaction storage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record {index} already exists in store '{store}'")]
    AlreadyExists { store: String, index: u64 },

    #[error("Record {index} not found in store '{store}'")]
    NotFound { store: String, index: u64 },

    #[error("Record size mismatch in store '{store}': expected {expected} bytes, got {actual}")]
    RecordSize {
        store: String,
        expected: usize,
        actual: usize,
    },

    #[error("Store '{store}' opened with a different layout")]
    LayoutMismatch { store: String },

    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Store corrupted: {0}")]
    Corrupted(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors raised by the ledger engine.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An entry does not link to the hash of its predecessor.
    #[error("Hash chain broken at transaction {transaction_id}: expected previous {expected}, found {found}")]
    HashChainBroken {
        transaction_id: OperationId,
        expected: String,
        found: String,
    },

    /// Entries of a slice are not strictly increasing.
    #[error("Transaction order violated: {found} follows {previous}")]
    OutOfOrder {
        previous: OperationId,
        found: OperationId,
    },

    /// Ids are not contiguous: entries between `after` and `found` are missing.
    #[error("Transactions missing between {after} and {found}")]
    MissingEntries {
        after: OperationId,
        found: OperationId,
    },

    /// A stored entry could not be decoded.
    #[error("Undecodable entry at position {position} of slice {slice_id}: {source}")]
    UndecodableEntry {
        slice_id: u64,
        position: usize,
        source: CodecError,
    },

    /// A decoded record carries a different id than the one requested.
    #[error("Record id mismatch in store '{store}': requested {requested}, found {found}")]
    RecordIdMismatch {
        store: String,
        requested: u64,
        found: u64,
    },

    /// A persisted record could not be decoded.
    #[error("Corrupted record {index} in store '{store}': {source}")]
    CorruptedRecord {
        store: String,
        index: u64,
        source: CodecError,
    },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Encoding error: {0}")]
    Codec(#[from] CodecError),

    /// Meta storage has not been created yet.
    #[error("Meta storage for '{0}' is not open")]
    StorageNotOpen(String),

    #[error("Cannot {operation} while ledger is {state}")]
    InvalidState {
        operation: &'static str,
        state: LedgerState,
    },

    #[error("Ledger is {0} and does not serve reads")]
    NotReadable(LedgerState),

    /// An external collaborator (attachment store, service) failed.
    #[error("Collaborator failure: {0}")]
    Collaborator(String),
}

impl LedgerError {
    /// Integrity violations: the ledger can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::HashChainBroken { .. }
                | LedgerError::OutOfOrder { .. }
                | LedgerError::MissingEntries { .. }
                | LedgerError::UndecodableEntry { .. }
                | LedgerError::RecordIdMismatch { .. }
                | LedgerError::CorruptedRecord { .. }
        )
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let broken = LedgerError::HashChainBroken {
            transaction_id: 4,
            expected: "aa".into(),
            found: "bb".into(),
        };
        assert!(broken.is_fatal());
        assert!(broken.to_string().contains("transaction 4"));

        let io: LedgerError = StoreError::Io("disk gone".into()).into();
        assert!(!io.is_fatal());

        let mismatch = LedgerError::RecordIdMismatch {
            store: "accounts".into(),
            requested: 1,
            found: 2,
        };
        assert!(mismatch.is_fatal());
    }
}
