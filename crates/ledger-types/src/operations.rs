//! # Operations and Transactions
//!
//! The append-only entries replayed by the ledgers.
//!
//! - `CoreOperation`: registry ledger entries (accounts, chain registrations,
//!   revenue, balances, observed block states).
//! - `DataTransaction`: service ledger entries, signed by an account and
//!   admitted through the validation pipeline before inclusion.
//!
//! Both carry a `Validation` envelope that links an entry to the hash of the
//! raw bytes of the entry before it (the hash chain).

use crate::codec::{BinaryRecord, CodecError};
use crate::entities::{
    AccountId, BlockId, ChainBlockState, ChainId, ChainKey, ChainType, Hash, OperationId,
    PublicKey, PurchaseInfo, ServiceAccountKey, Signature, ZERO_HASH,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};
use std::fmt;

/// Key index reserved for "signed directly with the registry account key".
pub const CORE_ACCOUNT_KEY_INDEX: u16 = u16::MAX;

/// Hash-chain link of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Validation {
    /// SHA-256 of the raw bytes of the preceding entry.
    pub previous_hash: Hash,
}

impl Validation {
    pub fn new(previous_hash: Hash) -> Self {
        Self { previous_hash }
    }

    /// Link for the first entry of a ledger.
    pub fn genesis() -> Self {
        Self::new(ZERO_HASH)
    }

    pub fn links_to(&self, previous_hash: &Hash) -> bool {
        &self.previous_hash == previous_hash
    }
}

/// SHA-256 of arbitrary bytes.
pub fn sha256(bytes: &[u8]) -> Hash {
    Sha256::digest(bytes).into()
}

/// An entry of an append-only ledger log.
pub trait LedgerEntry: BinaryRecord {
    /// Ledger-scoped id, 0 until the entry is appended.
    fn entry_id(&self) -> OperationId;

    fn timestamp(&self) -> u64;

    fn validation(&self) -> &Validation;

    /// Assign the ledger id and hash-chain link when appending.
    fn link(&mut self, entry_id: OperationId, validation: Validation);

    /// Content identifier used for duplicate detection. Independent of the
    /// ledger id and link, so it is known before the entry is appended.
    fn identifier(&self) -> Result<Hash, CodecError>;
}

// =============================================================================
// REGISTRY OPERATIONS
// =============================================================================

/// Creates a registry account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOperation {
    pub account_id: AccountId,
    pub public_key: PublicKey,
}

/// Registers a chain or applies deltas to an existing registration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainInfoOperation {
    pub chain_id: ChainId,
    pub account_id: AccountId,
    pub is_new: bool,
    pub name: Option<String>,
    pub website: Option<String>,
    pub endpoints_added: Vec<String>,
    pub endpoints_removed: Vec<String>,
    pub keys_added: Vec<ChainKey>,
    pub keys_revoked: Vec<u16>,
    pub purchases_added: Vec<PurchaseInfo>,
    pub purchases_removed: Vec<u32>,
}

impl ChainInfoOperation {
    pub fn new_chain(chain_id: ChainId, account_id: AccountId, name: impl Into<String>) -> Self {
        Self {
            chain_id,
            account_id,
            is_new: true,
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn update(chain_id: ChainId, account_id: AccountId) -> Self {
        Self {
            chain_id,
            account_id,
            is_new: false,
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints_added.push(endpoint.into());
        self
    }

    pub fn without_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints_removed.push(endpoint.into());
        self
    }

    pub fn with_key(mut self, key: ChainKey) -> Self {
        self.keys_added.push(key);
        self
    }

    pub fn revoking_key(mut self, key_index: u16) -> Self {
        self.keys_revoked.push(key_index);
        self
    }

    pub fn with_purchase(mut self, purchase: PurchaseInfo) -> Self {
        self.purchases_added.push(purchase);
        self
    }

    pub fn without_purchase(mut self, purchase_item_id: u32) -> Self {
        self.purchases_removed.push(purchase_item_id);
        self
    }
}

/// Sets the revenue parameters of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueOperation {
    pub chain_id: ChainId,
    pub revenue: u32,
    pub revenue_factor: u32,
}

/// Signed balance change of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalanceUpdate {
    pub account_id: AccountId,
    pub balance_change: i64,
}

/// Revenue paid by a chain to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenuePayout {
    pub chain_id: ChainId,
    pub account_id: AccountId,
    pub amount: u64,
}

/// Batched balance and payout accounting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountUpdateOperation {
    pub updates: Vec<AccountBalanceUpdate>,
    pub revenues: Vec<RevenuePayout>,
}

/// Block state of one chain slot, reported to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStateUpdate {
    pub chain_id: ChainId,
    pub state: ChainBlockState,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockStateOperation {
    pub states: Vec<ChainStateUpdate>,
}

/// Typed payload of a registry operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreOperationPayload {
    Account(AccountOperation),
    ChainInfo(ChainInfoOperation),
    Revenue(RevenueOperation),
    AccountUpdate(AccountUpdateOperation),
    BlockState(BlockStateOperation),
}

impl CoreOperationPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            CoreOperationPayload::Account(_) => "account",
            CoreOperationPayload::ChainInfo(_) => "chain-info",
            CoreOperationPayload::Revenue(_) => "revenue",
            CoreOperationPayload::AccountUpdate(_) => "account-update",
            CoreOperationPayload::BlockState(_) => "block-state",
        }
    }
}

/// A registry ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreOperation {
    pub operation_id: OperationId,
    pub timestamp: u64,
    pub validation: Validation,
    pub payload: CoreOperationPayload,
}

impl CoreOperation {
    /// Unlinked operation; id and link are assigned on append.
    pub fn new(timestamp: u64, payload: CoreOperationPayload) -> Self {
        Self {
            operation_id: 0,
            timestamp,
            validation: Validation::default(),
            payload,
        }
    }
}

impl BinaryRecord for CoreOperation {}

impl LedgerEntry for CoreOperation {
    fn entry_id(&self) -> OperationId {
        self.operation_id
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn validation(&self) -> &Validation {
        &self.validation
    }

    fn link(&mut self, entry_id: OperationId, validation: Validation) {
        self.operation_id = entry_id;
        self.validation = validation;
    }

    fn identifier(&self) -> Result<Hash, CodecError> {
        let bytes = bincode::serialize(&(self.timestamp, &self.payload))
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(sha256(&bytes))
    }
}

// =============================================================================
// SERVICE TRANSACTIONS
// =============================================================================

/// Reference to an uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub name: String,
    pub hash: Hash,
    pub size: u64,
}

/// Capability data attached to a transaction, interpreted by the feature
/// handler registered for `feature_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureData {
    pub feature_id: u16,
    pub data: Vec<u8>,
}

/// Typed payload of a service transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataPayload {
    /// Creates the sender's service account, optionally with a first key.
    Join { key: Option<ServiceAccountKey> },
    /// Records a purchase entitlement for an advertised item.
    Purchase { purchase_item_id: u32 },
    /// Opaque service content.
    Data { content: Vec<u8> },
    /// Binds previously uploaded attachments to the ledger.
    Attachment { attachments: Vec<AttachmentInfo> },
    /// Request addressed to a feature handler.
    FeatureRequest { feature_id: u16, request: Vec<u8> },
}

impl DataPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            DataPayload::Join { .. } => "join",
            DataPayload::Purchase { .. } => "purchase",
            DataPayload::Data { .. } => "data",
            DataPayload::Attachment { .. } => "attachment",
            DataPayload::FeatureRequest { .. } => "feature-request",
        }
    }
}

/// A service ledger entry.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTransaction {
    /// Assigned on inclusion, 0 while the transaction awaits admission.
    pub transaction_id: OperationId,
    pub validation: Validation,
    pub chain_id: ChainId,
    pub chain_index: u32,
    pub account_id: AccountId,
    /// Signing key index, `CORE_ACCOUNT_KEY_INDEX` for the registry key.
    pub key_index: u16,
    pub timestamp: u64,
    pub payload: DataPayload,
    pub features: Vec<FeatureData>,
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

/// The part of a data transaction covered by its signature.
#[derive(Serialize)]
struct SignedContent<'a> {
    chain_id: ChainId,
    chain_index: u32,
    account_id: AccountId,
    key_index: u16,
    timestamp: u64,
    payload: &'a DataPayload,
    features: &'a [FeatureData],
}

impl DataTransaction {
    /// Unsigned, unlinked transaction.
    pub fn new(
        chain_id: ChainId,
        chain_index: u32,
        account_id: AccountId,
        key_index: u16,
        timestamp: u64,
        payload: DataPayload,
    ) -> Self {
        Self {
            transaction_id: 0,
            validation: Validation::default(),
            chain_id,
            chain_index,
            account_id,
            key_index,
            timestamp,
            payload,
            features: Vec::new(),
            signature: [0u8; 64],
        }
    }

    pub fn with_feature(mut self, feature: FeatureData) -> Self {
        self.features.push(feature);
        self
    }

    pub fn is_core_signed(&self) -> bool {
        self.key_index == CORE_ACCOUNT_KEY_INDEX
    }

    /// SHA-256 over the signed content.
    pub fn signing_hash(&self) -> Result<Hash, CodecError> {
        let content = SignedContent {
            chain_id: self.chain_id,
            chain_index: self.chain_index,
            account_id: self.account_id,
            key_index: self.key_index,
            timestamp: self.timestamp,
            payload: &self.payload,
            features: &self.features,
        };
        let bytes = bincode::serialize(&content).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(sha256(&bytes))
    }
}

impl BinaryRecord for DataTransaction {}

impl LedgerEntry for DataTransaction {
    fn entry_id(&self) -> OperationId {
        self.transaction_id
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn validation(&self) -> &Validation {
        &self.validation
    }

    fn link(&mut self, entry_id: OperationId, validation: Validation) {
        self.transaction_id = entry_id;
        self.validation = validation;
    }

    fn identifier(&self) -> Result<Hash, CodecError> {
        self.signing_hash()
    }
}

// =============================================================================
// BLOCK SIGNATURES
// =============================================================================

/// One vote on a block.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    pub key_index: u16,
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

/// The signature-relevant view of a produced block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignatures {
    pub chain_type: ChainType,
    pub chain_id: ChainId,
    pub chain_index: u32,
    pub block_id: BlockId,
    pub timestamp: u64,
    pub block_hash: Hash,
    pub signatures: Vec<BlockSignature>,
}

impl fmt::Display for BlockSignatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} chain {}/{} block {} ({}..)",
            self.chain_type,
            self.chain_id,
            self.chain_index,
            self.block_id,
            hex::encode(&self.block_hash[..4])
        )
    }
}
