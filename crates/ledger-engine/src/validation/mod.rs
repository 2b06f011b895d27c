//! # Admission Pipeline
//!
//! Decides whether a data transaction may enter a service chain. Stages run in
//! order and the first failing stage determines the result:
//!
//! | # | Stage | Failure |
//! |---|-------|---------|
//! | 1 | chain registration exists | `ChainNotFound` |
//! | 2 | backing service available | `ChainServiceUnavailable` |
//! | 3 | this node's key valid for the chain | `ChainNodeInvalid` |
//! | 4 | structure and content limits | `InvalidTransaction` / `InvalidContent` |
//! | 5 | identifier not in history | `AlreadyProcessed` |
//! | 6 | paying registry account exists | `InvalidCoreAccount` |
//! | 7 | signature (core key, or service key + core grant) | `InvalidServiceAccount`, `InvalidServiceAccountKey`, `Expired`, `InvalidSignature` |
//! | 8 | feature handlers | handler's result |
//! | 9 | attachments uploaded | `AttachementsNotUploaded` |
//! | 10 | purchase entitlement held | `PurchaseRequired` |
//! | 11 | service content check | `PurchaseRequired` / `ChainServiceErrorResponse` |
//! | 12 | node co-signature | `Ok` |
//!
//! Only stage 11 suspends. Nothing in the pipeline mutates ledger state, and
//! no stage ever fails with an error: internal faults surface as `Unknown`.

pub mod features;

pub use features::{feature_inputs, FeatureCheck, FeatureHandler, FeatureRegistry};

use crate::domain::config::ValidationConfig;
use crate::domain::errors::LedgerError;
use crate::ledger::service::ServiceState;
use crate::ledger::Ledger;
use crate::ports::inbound::TransactionAdmission;
use crate::ports::outbound::ServiceVerdict;
use async_trait::async_trait;
use ledger_types::{
    Account, ChainRegistration, DataPayload, DataTransaction, Hash, LedgerEntry, NodeCoSignature,
    ResultCode, ServiceAccount, ValidationOutcome, CORE_ACCOUNT_KEY_INDEX,
};
use std::sync::Arc;
use tracing::{debug, warn};

type Admission<T> = Result<T, ValidationOutcome>;

fn reject(result: ResultCode, message: impl Into<String>) -> ValidationOutcome {
    ValidationOutcome::rejected(result).with_message(message)
}

fn internal(error: LedgerError) -> ValidationOutcome {
    warn!("[service] admission aborted: {}", error);
    reject(ResultCode::Unknown, error.to_string())
}

impl Ledger<ServiceState> {
    /// Run the admission pipeline for `transaction`.
    pub async fn validate(&self, transaction: &DataTransaction) -> ValidationOutcome {
        match self.admit(transaction).await {
            Ok(co_signature) => ValidationOutcome::accepted(co_signature),
            Err(outcome) => {
                debug!(
                    "[service] {} rejected {} from account {}: {}",
                    self.chain_id(),
                    transaction.payload.kind(),
                    transaction.account_id,
                    outcome
                );
                outcome
            }
        }
    }

    async fn admit(&self, transaction: &DataTransaction) -> Admission<NodeCoSignature> {
        self.ensure_readable().map_err(internal)?;
        let state = self.kind();
        let deps = state.deps();
        let now = deps.time.now();

        let registration = deps
            .registry
            .chain_registration(transaction.chain_id)
            .map_err(internal)?
            .ok_or_else(|| reject(ResultCode::ChainNotFound, "chain is not registered"))?;

        if !deps.service.is_available() {
            return Err(reject(ResultCode::ChainServiceUnavailable, "service unavailable"));
        }

        if !state.node_key_valid() {
            return Err(reject(ResultCode::ChainNodeInvalid, "node key not valid for chain"));
        }

        self.check_structure(transaction, &registration, now)?;

        let identifier = transaction
            .identifier()
            .map_err(|e| reject(ResultCode::InvalidTransaction, e.to_string()))?;
        if deps
            .transactions
            .contains_identifier(&identifier)
            .map_err(|e| internal(e.into()))?
        {
            return Err(ValidationOutcome::rejected(ResultCode::AlreadyProcessed));
        }

        let core_account = deps
            .registry
            .account(transaction.account_id)
            .map_err(internal)?
            .ok_or_else(|| reject(ResultCode::InvalidCoreAccount, "unknown account"))?;

        let service_account = self.check_signature(transaction, &identifier, &core_account, now)?;

        self.check_features(transaction)?;

        if let DataPayload::Attachment { attachments } = &transaction.payload {
            let chain_id = self.chain_id();
            if let Some(missing) = attachments
                .iter()
                .find(|a| !deps.attachments.is_uploaded(chain_id, a))
            {
                return Err(reject(
                    ResultCode::AttachementsNotUploaded,
                    format!("attachment '{}' not uploaded", missing.name),
                ));
            }
        }

        if let Some(item) = deps.service.required_purchase(transaction) {
            let held = service_account
                .as_ref()
                .is_some_and(|account| account.has_purchase(item, now));
            if !held {
                return Err(reject(
                    ResultCode::PurchaseRequired,
                    format!("purchase item {} required", item),
                ));
            }
        }

        let response = deps.service.validate_content(transaction).await;
        match response.verdict {
            ServiceVerdict::Ok => {}
            ServiceVerdict::PurchaseRequired => {
                let mut outcome = ValidationOutcome::rejected(ResultCode::PurchaseRequired)
                    .with_user_code(response.user_code);
                outcome.message = response.message;
                return Err(outcome);
            }
            ServiceVerdict::Error => {
                let mut outcome = ValidationOutcome::rejected(ResultCode::ChainServiceErrorResponse)
                    .with_user_code(response.user_code);
                outcome.message = response.message;
                return Err(outcome);
            }
        }

        let key_index = deps.signer.key_index();
        let message = NodeCoSignature::message(&identifier, self.chain_id(), key_index);
        Ok(NodeCoSignature {
            chain_id: self.chain_id(),
            key_index,
            signature: deps.signer.sign(&message),
        })
    }

    fn check_structure(
        &self,
        transaction: &DataTransaction,
        registration: &ChainRegistration,
        now: u64,
    ) -> Admission<()> {
        let limits: &ValidationConfig = &self.config().validation;
        let signer = &self.kind().deps().signer;

        if transaction.chain_id != self.chain_id() {
            return Err(reject(ResultCode::InvalidTransaction, "wrong chain"));
        }
        if transaction.chain_index != signer.chain_index() {
            return Err(reject(ResultCode::InvalidTransaction, "wrong chain index"));
        }
        if transaction.timestamp > now.saturating_add(limits.max_future_skew_secs) {
            return Err(reject(ResultCode::InvalidTransaction, "timestamp in the future"));
        }
        if now > transaction.timestamp.saturating_add(limits.max_age_secs) {
            return Err(reject(ResultCode::InvalidTransaction, "timestamp too old"));
        }

        let content_ok = |bytes: &[u8]| !bytes.is_empty() && bytes.len() <= limits.max_content_size;
        match &transaction.payload {
            DataPayload::Join { key } => {
                if !transaction.is_core_signed() {
                    return Err(reject(
                        ResultCode::InvalidTransaction,
                        "join must be signed with the core account key",
                    ));
                }
                if key.as_ref().is_some_and(|k| k.key_index == CORE_ACCOUNT_KEY_INDEX) {
                    return Err(reject(ResultCode::InvalidContent, "reserved key index"));
                }
            }
            DataPayload::Purchase { purchase_item_id } => {
                if !registration.purchases.contains_key(purchase_item_id) {
                    return Err(reject(
                        ResultCode::InvalidContent,
                        format!("purchase item {} not offered", purchase_item_id),
                    ));
                }
            }
            DataPayload::Data { content } => {
                if !content_ok(content) {
                    return Err(reject(ResultCode::InvalidContent, "content size out of range"));
                }
            }
            DataPayload::FeatureRequest { request, .. } => {
                if !content_ok(request) {
                    return Err(reject(ResultCode::InvalidContent, "request size out of range"));
                }
            }
            DataPayload::Attachment { attachments } => {
                if attachments.is_empty() || attachments.len() > limits.max_attachments {
                    return Err(reject(ResultCode::InvalidContent, "attachment count out of range"));
                }
                if attachments.iter().any(|a| a.size > limits.max_attachment_size) {
                    return Err(reject(ResultCode::InvalidContent, "attachment too large"));
                }
            }
        }
        Ok(())
    }

    /// Returns the service account when one exists.
    fn check_signature(
        &self,
        transaction: &DataTransaction,
        identifier: &Hash,
        core_account: &Account,
        now: u64,
    ) -> Admission<Option<Arc<ServiceAccount>>> {
        let verifier = &self.kind().deps().verifier;
        let service_account = self
            .get_service_account(transaction.account_id)
            .map_err(internal)?;

        if transaction.is_core_signed() {
            if !verifier.verify(&core_account.public_key, identifier, &transaction.signature) {
                return Err(reject(ResultCode::InvalidSignature, "core signature mismatch"));
            }
            return Ok(service_account);
        }

        let Some(account) = service_account else {
            return Err(reject(ResultCode::InvalidServiceAccount, "account has not joined"));
        };
        let Some(key) = account
            .key(transaction.key_index)
            .filter(|k| k.is_active_at(transaction.timestamp))
        else {
            return Err(reject(
                ResultCode::InvalidServiceAccountKey,
                format!("no active key {}", transaction.key_index),
            ));
        };
        if key.is_expired_at(transaction.timestamp) || key.is_expired_at(now) {
            return Err(reject(ResultCode::Expired, "service account key expired"));
        }

        let granted = verifier.verify(
            &core_account.public_key,
            &key.authorization_message(self.chain_id(), transaction.account_id),
            &key.authorization,
        );
        let signed = verifier.verify(&key.public_key, identifier, &transaction.signature);
        if !(granted && signed) {
            return Err(reject(ResultCode::InvalidSignature, "service signature mismatch"));
        }
        Ok(Some(account))
    }

    fn check_features(&self, transaction: &DataTransaction) -> Admission<()> {
        let features = &self.kind().deps().features;
        for (feature_id, data) in feature_inputs(transaction) {
            let Some(handler) = features.get(feature_id) else {
                return Err(reject(
                    ResultCode::InvalidTransaction,
                    format!("unknown feature {}", feature_id),
                ));
            };
            let check = handler.validate(transaction, data);
            if !check.is_ok() {
                let mut outcome =
                    ValidationOutcome::rejected(check.result).with_user_code(check.user_code);
                outcome.message = check.message;
                return Err(outcome);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionAdmission for Ledger<ServiceState> {
    async fn validate(&self, transaction: &DataTransaction) -> ValidationOutcome {
        Ledger::<ServiceState>::validate(self, transaction).await
    }
}
