//! # Ledger Entities
//!
//! Persisted state derived from replaying operations.
//!
//! ## Clusters
//!
//! - **Identity**: `AccountId`, `ChainId`, keys and hashes
//! - **Registry**: `Account`, `ChainRegistration`, `ChainKey`, `PurchaseInfo`
//! - **Service**: `ServiceAccount`, `ServiceAccountKey`, `Purchase`
//! - **Replay**: `Checkpoint`

use crate::codec::BinaryRecord;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::BitOr;

// =============================================================================
// CLUSTER A: IDENTITY
// =============================================================================

/// A 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// Registry account identifier.
pub type AccountId = u64;

/// Chain identifier. `CORE_CHAIN_ID` is the registry chain itself.
pub type ChainId = u32;

/// Ledger-scoped, strictly increasing operation / transaction id.
pub type OperationId = u64;

/// Block identifier. Block 1 is the genesis block.
pub type BlockId = u64;

/// All-zero hash, used as "no predecessor".
pub const ZERO_HASH: Hash = [0u8; 32];

/// The privileged root chain. Its registration has no owning account.
pub const CORE_CHAIN_ID: ChainId = 0;

/// Id of the first block of every chain.
pub const GENESIS_BLOCK_ID: BlockId = 1;

/// Kind of chain a block or key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainType {
    /// The registry chain.
    Core,
    /// Service chain (service accounts, purchases).
    Service,
    /// Data chain attached to a service chain.
    Data,
}

impl ChainType {
    /// Key capability a block signer of this chain type must carry.
    pub fn vote_flag(self) -> ChainKeyFlags {
        match self {
            ChainType::Core => ChainKeyFlags::CORE_VOTE,
            ChainType::Service => ChainKeyFlags::SERVICE_VOTE,
            ChainType::Data => ChainKeyFlags::DATA_VOTE,
        }
    }
}

/// Capability flags carried by a chain key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChainKeyFlags(pub u16);

impl ChainKeyFlags {
    pub const NONE: Self = Self(0);
    /// May sign registry blocks.
    pub const CORE_VOTE: Self = Self(1);
    /// May sign service chain blocks.
    pub const SERVICE_VOTE: Self = Self(1 << 1);
    /// May sign data chain blocks.
    pub const DATA_VOTE: Self = Self(1 << 2);
    /// Identifies a node allowed to admit and co-sign service transactions.
    pub const SERVICE_NODE: Self = Self(1 << 3);

    /// True if every bit of `other` is set.
    pub fn contains(self, other: ChainKeyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ChainKeyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// =============================================================================
// CLUSTER B: REGISTRY
// =============================================================================

/// A registry account.
///
/// Created once by an `Account` operation and never deleted.
/// The encoding is fixed width (`RECORD_SIZE`) so accounts live in a
/// fixed-record store indexed by `account_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub public_key: PublicKey,
    pub balance: u64,
    /// Id of the last operation that touched this account.
    pub last_transaction_id: OperationId,
    /// Sum of all revenue paid out to this account.
    pub total_revenue_payout: u64,
}

impl Account {
    /// Exact byte width of an encoded account.
    pub const RECORD_SIZE: usize = 64;

    pub fn new(account_id: AccountId, public_key: PublicKey, created_by: OperationId) -> Self {
        Self {
            account_id,
            public_key,
            balance: 0,
            last_transaction_id: created_by,
            total_revenue_payout: 0,
        }
    }
}

impl BinaryRecord for Account {}

/// A signing key registered for a chain.
///
/// Used for block votes and for identifying service nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainKey {
    pub key_index: u16,
    pub chain_index: u32,
    pub public_key: PublicKey,
    pub flags: ChainKeyFlags,
    /// Timestamp of the operation that added the key.
    pub created: u64,
    /// Expiry timestamp, 0 = never.
    pub expires: u64,
    /// Timestamp of the revoking operation.
    pub revoked: Option<u64>,
}

impl ChainKey {
    pub fn new(key_index: u16, chain_index: u32, public_key: PublicKey, flags: ChainKeyFlags) -> Self {
        Self {
            key_index,
            chain_index,
            public_key,
            flags,
            created: 0,
            expires: 0,
            revoked: None,
        }
    }

    pub fn with_expiry(mut self, expires: u64) -> Self {
        self.expires = expires;
        self
    }

    /// True if the key may be used at `timestamp`.
    pub fn is_valid_at(&self, timestamp: u64) -> bool {
        if timestamp < self.created {
            return false;
        }
        if self.expires != 0 && timestamp >= self.expires {
            return false;
        }
        match self.revoked {
            Some(revoked) => timestamp < revoked,
            None => true,
        }
    }
}

/// A purchasable item advertised by a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseInfo {
    pub purchase_item_id: u32,
    pub group_id: u16,
    pub price: u64,
    /// Entitlement lifetime in seconds, 0 = permanent.
    pub duration: u64,
    pub description: String,
}

/// Latest block state observed for one `(chain_type, chain_index)` of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlockState {
    pub chain_type: ChainType,
    pub chain_index: u32,
    pub last_block_id: BlockId,
    pub last_transaction_id: OperationId,
    pub last_block_hash: Hash,
}

/// Registration record of a chain.
///
/// Created exactly once per `chain_id` by a "new chain" operation; every later
/// change is a delta applied by the registry ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRegistration {
    pub chain_id: ChainId,
    pub account_id: AccountId,
    pub name: String,
    pub website: String,
    pub endpoints: BTreeSet<String>,
    pub chain_keys: Vec<ChainKey>,
    pub purchases: BTreeMap<u32, PurchaseInfo>,
    pub revenue: u32,
    pub revenue_factor: u32,
    pub total_revenue_payout: u64,
    pub block_states: Vec<ChainBlockState>,
    pub last_transaction_id: OperationId,
}

impl ChainRegistration {
    pub fn new(chain_id: ChainId, account_id: AccountId, name: String, website: String) -> Self {
        Self {
            chain_id,
            account_id,
            name,
            website,
            endpoints: BTreeSet::new(),
            chain_keys: Vec::new(),
            purchases: BTreeMap::new(),
            revenue: 0,
            revenue_factor: 0,
            total_revenue_payout: 0,
            block_states: Vec::new(),
            last_transaction_id: 0,
        }
    }

    /// Most recently added key with this index.
    pub fn chain_key(&self, key_index: u16) -> Option<&ChainKey> {
        self.chain_keys.iter().rev().find(|k| k.key_index == key_index)
    }

    /// Keys valid at `timestamp` for `chain_index` that carry all of `flags`.
    pub fn valid_keys(
        &self,
        chain_index: u32,
        timestamp: u64,
        flags: ChainKeyFlags,
    ) -> impl Iterator<Item = &ChainKey> {
        self.chain_keys.iter().filter(move |k| {
            k.chain_index == chain_index && k.flags.contains(flags) && k.is_valid_at(timestamp)
        })
    }

    pub fn block_state(&self, chain_type: ChainType, chain_index: u32) -> Option<&ChainBlockState> {
        self.block_states
            .iter()
            .find(|s| s.chain_type == chain_type && s.chain_index == chain_index)
    }

    /// Insert or replace the block state for the state's `(chain_type, chain_index)`.
    pub fn set_block_state(&mut self, state: ChainBlockState) {
        match self
            .block_states
            .iter_mut()
            .find(|s| s.chain_type == state.chain_type && s.chain_index == state.chain_index)
        {
            Some(existing) => *existing = state,
            None => self.block_states.push(state),
        }
    }
}

impl BinaryRecord for ChainRegistration {}

// =============================================================================
// CLUSTER C: SERVICE
// =============================================================================

/// A per-service signing key of a service account.
///
/// `authorization` is the owning registry account's signature over
/// `authorization_message`, so a service key is only usable together with the
/// core account key that granted it.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    pub key_index: u16,
    pub public_key: PublicKey,
    pub created: u64,
    /// Expiry timestamp, 0 = never.
    pub expires: u64,
    pub revoked: Option<u64>,
    #[serde_as(as = "Bytes")]
    pub authorization: Signature,
}

impl ServiceAccountKey {
    /// Bytes the registry account signs to grant this key.
    pub fn authorization_message(&self, chain_id: ChainId, account_id: AccountId) -> Vec<u8> {
        let mut message = Vec::with_capacity(64);
        message.extend_from_slice(b"service-account-key");
        message.extend_from_slice(&chain_id.to_le_bytes());
        message.extend_from_slice(&account_id.to_le_bytes());
        message.extend_from_slice(&self.key_index.to_le_bytes());
        message.extend_from_slice(&self.public_key);
        message.extend_from_slice(&self.expires.to_le_bytes());
        message
    }

    /// Usable at `timestamp`, ignoring expiry.
    pub fn is_active_at(&self, timestamp: u64) -> bool {
        timestamp >= self.created && self.revoked.map_or(true, |r| timestamp < r)
    }

    pub fn is_expired_at(&self, timestamp: u64) -> bool {
        self.expires != 0 && timestamp >= self.expires
    }
}

/// A purchase entitlement held by a service account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub purchase_item_id: u32,
    pub group_id: u16,
    /// 0 = permanent.
    pub expires: u64,
}

impl Purchase {
    pub fn is_valid_at(&self, timestamp: u64) -> bool {
        self.expires == 0 || timestamp < self.expires
    }
}

/// An account on a service chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub chain_id: ChainId,
    pub account_id: AccountId,
    pub keys: Vec<ServiceAccountKey>,
    pub purchases: Vec<Purchase>,
    pub last_transaction_id: OperationId,
}

impl ServiceAccount {
    pub fn new(chain_id: ChainId, account_id: AccountId, created_by: OperationId) -> Self {
        Self {
            chain_id,
            account_id,
            keys: Vec::new(),
            purchases: Vec::new(),
            last_transaction_id: created_by,
        }
    }

    /// Most recently added key with this index.
    pub fn key(&self, key_index: u16) -> Option<&ServiceAccountKey> {
        self.keys.iter().rev().find(|k| k.key_index == key_index)
    }

    pub fn has_purchase(&self, purchase_item_id: u32, timestamp: u64) -> bool {
        self.purchases
            .iter()
            .any(|p| p.purchase_item_id == purchase_item_id && p.is_valid_at(timestamp))
    }
}

impl BinaryRecord for ServiceAccount {}

// =============================================================================
// CLUSTER D: REPLAY
// =============================================================================

/// Replay position persisted with every record store commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_block_id: BlockId,
    pub last_transaction_id: OperationId,
    /// Hash of the raw bytes of the last applied transaction.
    pub last_transaction_hash: Option<Hash>,
}

impl Checkpoint {
    /// True if `operation_id` has already been folded into this checkpoint.
    pub fn covers(&self, operation_id: OperationId) -> bool {
        operation_id <= self.last_transaction_id
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} / transaction {}",
            self.last_block_id, self.last_transaction_id
        )
    }
}

impl BinaryRecord for Checkpoint {}
