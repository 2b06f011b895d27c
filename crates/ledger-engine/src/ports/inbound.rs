//! # Inbound Ports (Driving Ports)
//!
//! What the ledgers offer to block production, request handling and to each
//! other.

use crate::domain::errors::LedgerResult;
use async_trait::async_trait;
use ledger_types::{Account, AccountId, ChainId, ChainRegistration, DataTransaction, ValidationOutcome};
use std::sync::Arc;

/// Read access to registry state.
///
/// Implemented by the registry ledger; service ledgers depend on it for
/// account and chain lookups.
pub trait RegistryView: Send + Sync {
    fn account(&self, account_id: AccountId) -> LedgerResult<Option<Arc<Account>>>;

    fn chain_registration(&self, chain_id: ChainId) -> LedgerResult<Option<Arc<ChainRegistration>>>;
}

/// Admission of new transactions into a service ledger.
#[async_trait]
pub trait TransactionAdmission: Send + Sync {
    /// Run the admission pipeline. Never fails: every rejection is a
    /// `ResultCode`.
    async fn validate(&self, transaction: &DataTransaction) -> ValidationOutcome;
}
