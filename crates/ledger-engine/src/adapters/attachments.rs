//! In-memory attachment store.

use crate::domain::errors::StoreError;
use crate::ports::outbound::AttachmentStore;
use ledger_types::{AttachmentInfo, ChainId, Hash, OperationId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct Attachments {
    /// Completed uploads per chain.
    uploaded: HashSet<(ChainId, Hash)>,
    /// Attachments bound to transactions.
    persisted: HashMap<(ChainId, Hash), OperationId>,
}

/// Tracks completed uploads and binds them to transactions on consume.
#[derive(Debug, Default)]
pub struct MemoryAttachmentStore {
    inner: RwLock<Attachments>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed upload.
    pub fn mark_uploaded(&self, chain_id: ChainId, hash: Hash) {
        self.inner.write().uploaded.insert((chain_id, hash));
    }

    /// Transaction an attachment was bound to.
    pub fn owner(&self, chain_id: ChainId, hash: &Hash) -> Option<OperationId> {
        self.inner.read().persisted.get(&(chain_id, *hash)).copied()
    }
}

impl AttachmentStore for MemoryAttachmentStore {
    fn is_uploaded(&self, chain_id: ChainId, attachment: &AttachmentInfo) -> bool {
        self.inner
            .read()
            .uploaded
            .contains(&(chain_id, attachment.hash))
    }

    fn persist(
        &self,
        chain_id: ChainId,
        transaction_id: OperationId,
        attachments: &[AttachmentInfo],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(missing) = attachments
            .iter()
            .find(|a| !inner.uploaded.contains(&(chain_id, a.hash)))
        {
            return Err(StoreError::NotFound {
                store: format!("attachments/{}", missing.name),
                index: transaction_id,
            });
        }
        for attachment in attachments {
            inner
                .persisted
                .insert((chain_id, attachment.hash), transaction_id);
        }
        Ok(())
    }
}
