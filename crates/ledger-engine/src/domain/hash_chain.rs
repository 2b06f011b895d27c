//! # Transaction Hash Chain
//!
//! Entry `n` carries `Validation { previous_hash: sha256(raw(n - 1)) }`.
//! Flipping any byte of an entry changes its hash, so the link of the next
//! entry no longer verifies.
//!
//! ## Slice Boundaries
//!
//! Inside a slice every entry is checked against its predecessor and ids are
//! contiguous. The anchor is the id and hash recorded with the checkpoint:
//!
//! - an entry carrying the anchor id must hash to the anchor hash,
//! - the first entry above the anchor must be `anchor + 1` and link to it.
//!
//! Without an anchor (fresh store, or boundary checks off) the first entry of
//! a slice is exempt.

use super::errors::{LedgerError, LedgerResult};
use super::slice::StoredTransaction;
use ledger_types::{sha256, BlockId, CodecError, Hash, LedgerEntry, OperationId, Validation, ZERO_HASH};

/// Checks links and ordering of consecutive entries.
#[derive(Debug, Clone, Default)]
pub struct HashChainVerifier {
    anchor: Option<(OperationId, Hash)>,
    previous: Option<(OperationId, Hash)>,
}

impl HashChainVerifier {
    /// `anchor` is the id and hash of the last entry applied before this slice.
    pub fn new(anchor: Option<(OperationId, Hash)>) -> Self {
        Self {
            anchor,
            previous: None,
        }
    }

    pub fn verify<E: LedgerEntry>(&mut self, entry: &E, raw: &[u8]) -> LedgerResult<()> {
        let id = entry.entry_id();
        let expected = match (self.previous, self.anchor) {
            (Some((previous_id, _)), _) if id <= previous_id => {
                return Err(LedgerError::OutOfOrder {
                    previous: previous_id,
                    found: id,
                });
            }
            (Some((previous_id, _)), _) if id != previous_id + 1 => {
                return Err(LedgerError::MissingEntries {
                    after: previous_id,
                    found: id,
                });
            }
            (Some((_, hash)), _) => Some(hash),
            (None, Some((anchor_id, hash))) if anchor_id.checked_add(1) == Some(id) => Some(hash),
            (None, Some((anchor_id, _))) if id > anchor_id => {
                return Err(LedgerError::MissingEntries {
                    after: anchor_id,
                    found: id,
                });
            }
            (None, _) => None,
        };

        if let Some(expected) = expected {
            if !entry.validation().links_to(&expected) {
                return Err(LedgerError::HashChainBroken {
                    transaction_id: id,
                    expected: hex::encode(expected),
                    found: hex::encode(entry.validation().previous_hash),
                });
            }
        }

        let hash = sha256(raw);
        if let Some((anchor_id, anchor_hash)) = self.anchor {
            if id == anchor_id && hash != anchor_hash {
                return Err(LedgerError::HashChainBroken {
                    transaction_id: id,
                    expected: hex::encode(anchor_hash),
                    found: hex::encode(hash),
                });
            }
        }

        self.previous = Some((id, hash));
        Ok(())
    }

    /// Id and hash of the last verified entry.
    pub fn last(&self) -> Option<(OperationId, Hash)> {
        self.previous
    }
}

/// Assigns ids and links to new entries.
///
/// Used by block producers and tests to build logs the replay accepts.
#[derive(Debug, Clone)]
pub struct HashChainWriter {
    next_id: OperationId,
    previous_hash: Hash,
}

impl Default for HashChainWriter {
    fn default() -> Self {
        Self {
            next_id: 1,
            previous_hash: ZERO_HASH,
        }
    }
}

impl HashChainWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue a log whose last entry had `last_id` and hashed to `last_hash`.
    pub fn resume(last_id: OperationId, last_hash: Hash) -> Self {
        Self {
            next_id: last_id + 1,
            previous_hash: last_hash,
        }
    }

    pub fn next_id(&self) -> OperationId {
        self.next_id
    }

    pub fn previous_hash(&self) -> Hash {
        self.previous_hash
    }

    /// Link `entry` to the chain and encode it.
    pub fn seal<E: LedgerEntry>(
        &mut self,
        block_id: BlockId,
        mut entry: E,
    ) -> Result<StoredTransaction, CodecError> {
        entry.link(self.next_id, Validation::new(self.previous_hash));
        let raw = entry.to_bytes()?;
        let stored = StoredTransaction {
            block_id,
            transaction_id: self.next_id,
            identifier: entry.identifier()?,
            raw,
        };
        self.previous_hash = stored.hash();
        self.next_id += 1;
        Ok(stored)
    }
}
