//! # Admission Results
//!
//! The stable contract between the validation pipeline and the request
//! handling / networking layers: a `ResultCode`, an opaque user code chosen by
//! the service or a feature, a free-text message, and on success the node's
//! co-signature.

use crate::entities::{ChainId, Hash, Signature};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::fmt;

/// Outcome of admitting a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ResultCode {
    Ok = 0,
    ChainNotFound = 1,
    ChainServiceUnavailable = 2,
    ChainNodeInvalid = 3,
    InvalidTransaction = 4,
    InvalidContent = 5,
    AlreadyProcessed = 6,
    InvalidCoreAccount = 7,
    InvalidServiceAccount = 8,
    InvalidServiceAccountKey = 9,
    Expired = 10,
    InvalidSignature = 11,
    AttachementsNotUploaded = 12,
    PurchaseRequired = 13,
    ChainServiceErrorResponse = 14,
    Unknown = 0xFFFF,
}

impl ResultCode {
    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The node's signature binding its chain key to an admitted transaction.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCoSignature {
    pub chain_id: ChainId,
    pub key_index: u16,
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl NodeCoSignature {
    /// Bytes the node signs for a transaction identifier.
    pub fn message(identifier: &Hash, chain_id: ChainId, key_index: u16) -> Vec<u8> {
        let mut message = Vec::with_capacity(32 + 4 + 2 + 8);
        message.extend_from_slice(b"co-sign:");
        message.extend_from_slice(identifier);
        message.extend_from_slice(&chain_id.to_le_bytes());
        message.extend_from_slice(&key_index.to_le_bytes());
        message
    }
}

/// Full result of the admission pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub result: ResultCode,
    pub user_code: i64,
    pub message: Option<String>,
    pub co_signature: Option<NodeCoSignature>,
}

impl ValidationOutcome {
    pub fn accepted(co_signature: NodeCoSignature) -> Self {
        Self {
            result: ResultCode::Ok,
            user_code: 0,
            message: None,
            co_signature: Some(co_signature),
        }
    }

    pub fn rejected(result: ResultCode) -> Self {
        Self {
            result,
            user_code: 0,
            message: None,
            co_signature: None,
        }
    }

    pub fn with_user_code(mut self, user_code: i64) -> Self {
        self.user_code = user_code;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (user code {})", self.result, self.user_code)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_carries_no_co_signature() {
        let outcome = ValidationOutcome::rejected(ResultCode::Expired)
            .with_user_code(17)
            .with_message("key expired");

        assert!(!outcome.is_ok());
        assert!(outcome.co_signature.is_none());
        assert_eq!(outcome.to_string(), "Expired (user code 17): key expired");
    }

    #[test]
    fn test_co_signature_message_binds_chain_and_key() {
        let id = [4u8; 32];
        assert_ne!(
            NodeCoSignature::message(&id, 1, 0),
            NodeCoSignature::message(&id, 2, 0)
        );
        assert_ne!(
            NodeCoSignature::message(&id, 1, 0),
            NodeCoSignature::message(&id, 1, 1)
        );
    }
}
