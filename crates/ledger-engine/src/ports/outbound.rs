//! # Outbound Ports (Driven Ports)
//!
//! Collaborators the ledgers consume. The engine ships in-process adapters
//! for all of them (see `adapters`); a node plugs in its disc storage engine,
//! crypto provider and service bridge here.

use crate::domain::errors::StoreError;
use crate::domain::slice::{StoredTransaction, TransactionSlice};
use async_trait::async_trait;
use ledger_types::{
    AttachmentInfo, ChainId, ChainKey, Checkpoint, DataTransaction, Hash, OperationId, PublicKey,
    Signature,
};
use std::sync::Arc;

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Physical layout of a record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    /// Every record is exactly `record_size` bytes (random-access entities).
    Fixed { record_size: usize },
    /// Variable-length records appended over time.
    Append,
}

/// A persisted store of records addressed by index.
///
/// ## Commit Protocol
///
/// `add_entry` and `update_entry` only stage writes. `commit` publishes all
/// staged writes together with the new checkpoint, atomically; `discard`
/// drops them. Reads never observe staged writes.
pub trait RecordStore: Send + Sync {
    fn name(&self) -> &str;

    fn layout(&self) -> RecordLayout;

    /// Committed bytes of record `index`.
    fn get_by_index(&self, index: u64) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stage a new record. Fails if `index` is committed or staged already.
    fn add_entry(&self, index: u64, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Stage a replacement. Fails if `index` does not exist.
    fn update_entry(&self, index: u64, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// True if `index` is committed or staged.
    fn contains_index(&self, index: u64) -> Result<bool, StoreError>;

    /// Lowest committed index.
    fn start_index(&self) -> Option<u64>;

    /// Highest committed index.
    fn end_index(&self) -> Option<u64>;

    /// Last committed checkpoint.
    fn checkpoint(&self) -> Checkpoint;

    fn commit(&self, checkpoint: Checkpoint) -> Result<(), StoreError>;

    fn discard(&self);
}

/// Opens (or creates) named record stores.
pub trait StorageProvider: Send + Sync {
    /// Reopening a name returns the committed state of the previous instance.
    fn open_store(&self, name: &str, layout: RecordLayout) -> Result<Arc<dyn RecordStore>, StoreError>;
}

/// Raw transaction log of one ledger.
pub trait TransactionStorage: Send + Sync {
    /// Stage a sealed transaction for its block.
    fn append(&self, transaction: StoredTransaction) -> Result<(), StoreError>;

    /// Flush staged transactions into history.
    fn save(&self) -> Result<(), StoreError>;

    fn get_transaction(&self, transaction_id: OperationId) -> Result<Option<StoredTransaction>, StoreError>;

    /// True if a saved transaction has this content identifier.
    fn contains_identifier(&self, identifier: &Hash) -> Result<bool, StoreError>;

    /// Up to `limit` saved transactions with id greater than `after`.
    fn slice_after(&self, after: OperationId, limit: usize) -> Result<TransactionSlice, StoreError>;

    /// Highest saved transaction id.
    fn last_transaction_id(&self) -> Option<OperationId>;
}

// =============================================================================
// CRYPTOGRAPHY AND QUORUM
// =============================================================================

pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool;
}

/// The local node's chain key.
pub trait NodeSigner: Send + Sync {
    fn key_index(&self) -> u16;

    fn chain_index(&self) -> u32;

    fn public_key(&self) -> PublicKey;

    fn sign(&self, message: &[u8]) -> Signature;
}

/// Decides whether verified signers form a quorum of the eligible keys.
pub trait QuorumValidator: Send + Sync {
    /// `eligible` are the keys valid for the block, `verified` the indices
    /// of those whose signature checked out.
    fn has_quorum(&self, eligible: &[ChainKey], verified: &[u16]) -> bool;
}

// =============================================================================
// SERVICE COLLABORATORS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceVerdict {
    Ok,
    PurchaseRequired,
    Error,
}

/// Business-level answer of a chain's backing service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    pub verdict: ServiceVerdict,
    pub user_code: i64,
    pub message: Option<String>,
}

impl ServiceResponse {
    pub fn ok() -> Self {
        Self {
            verdict: ServiceVerdict::Ok,
            user_code: 0,
            message: None,
        }
    }

    pub fn purchase_required(user_code: i64) -> Self {
        Self {
            verdict: ServiceVerdict::PurchaseRequired,
            user_code,
            message: None,
        }
    }

    pub fn error(user_code: i64, message: impl Into<String>) -> Self {
        Self {
            verdict: ServiceVerdict::Error,
            user_code,
            message: Some(message.into()),
        }
    }
}

/// The service that backs a service chain.
#[async_trait]
pub trait ServiceHost: Send + Sync {
    /// True if the service is registered and reachable.
    fn is_available(&self) -> bool;

    /// Purchase item the transaction needs, if any.
    fn required_purchase(&self, transaction: &DataTransaction) -> Option<u32>;

    /// Business-specific content check. The only suspending stage of
    /// admission.
    async fn validate_content(&self, transaction: &DataTransaction) -> ServiceResponse;
}

/// Out-of-band attachment uploads.
pub trait AttachmentStore: Send + Sync {
    fn is_uploaded(&self, chain_id: ChainId, attachment: &AttachmentInfo) -> bool;

    /// Bind uploaded attachments to the transaction that references them.
    fn persist(
        &self,
        chain_id: ChainId,
        transaction_id: OperationId,
        attachments: &[AttachmentInfo],
    ) -> Result<(), StoreError>;
}

/// Abstract clock (for testability).
pub trait TimeSource: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> u64;
}
