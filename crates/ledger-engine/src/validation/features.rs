//! Pluggable feature handlers.
//!
//! A data transaction may carry `FeatureData` entries and a `FeatureRequest`
//! payload. Each feature id maps to one handler that checks the data during
//! admission and folds it into state during replay. The registry is a plain
//! value built once at startup and handed to the service ledger.

use crate::domain::errors::LedgerResult;
use ledger_types::{DataPayload, DataTransaction, ResultCode};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Verdict of one feature handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureCheck {
    pub result: ResultCode,
    pub user_code: i64,
    pub message: Option<String>,
}

impl FeatureCheck {
    pub fn ok() -> Self {
        Self {
            result: ResultCode::Ok,
            user_code: 0,
            message: None,
        }
    }

    pub fn reject(result: ResultCode, user_code: i64, message: impl Into<String>) -> Self {
        Self {
            result,
            user_code,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// `(feature_id, data)` pairs a transaction hands to feature handlers: its
/// `FeatureRequest` payload first, then the carried features in order.
pub fn feature_inputs(transaction: &DataTransaction) -> impl Iterator<Item = (u16, &[u8])> {
    let request = match &transaction.payload {
        DataPayload::FeatureRequest {
            feature_id,
            request,
        } => Some((*feature_id, request.as_slice())),
        _ => None,
    };
    request.into_iter().chain(
        transaction
            .features
            .iter()
            .map(|f| (f.feature_id, f.data.as_slice())),
    )
}

pub trait FeatureHandler: Send + Sync {
    fn feature_id(&self) -> u16;

    /// Admission check for `data` attached to `transaction`.
    fn validate(&self, transaction: &DataTransaction, data: &[u8]) -> FeatureCheck;

    /// Replay hook for an accepted transaction.
    fn consume(&self, _transaction: &DataTransaction, _data: &[u8]) -> LedgerResult<()> {
        Ok(())
    }
}

/// Feature handlers by feature id.
#[derive(Clone, Default)]
pub struct FeatureRegistry {
    handlers: BTreeMap<u16, Arc<dyn FeatureHandler>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler with the same id.
    pub fn register(&mut self, handler: Arc<dyn FeatureHandler>) {
        self.handlers.insert(handler.feature_id(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn FeatureHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, feature_id: u16) -> Option<&Arc<dyn FeatureHandler>> {
        self.handlers.get(&feature_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_types::FeatureData;

    struct MaxLen(usize);

    impl FeatureHandler for MaxLen {
        fn feature_id(&self) -> u16 {
            3
        }

        fn validate(&self, _transaction: &DataTransaction, data: &[u8]) -> FeatureCheck {
            if data.len() <= self.0 {
                FeatureCheck::ok()
            } else {
                FeatureCheck::reject(ResultCode::InvalidContent, 30, "too long")
            }
        }
    }

    #[test]
    fn test_register_replaces_same_id() {
        let registry = FeatureRegistry::new()
            .with_handler(Arc::new(MaxLen(1)))
            .with_handler(Arc::new(MaxLen(8)));
        assert_eq!(registry.len(), 1);

        let tx = DataTransaction::new(1, 0, 1, 0, 0, DataPayload::Data { content: vec![1] });
        let handler = registry.get(3).unwrap();
        assert!(handler.validate(&tx, &[0; 4]).is_ok());
        assert_eq!(handler.validate(&tx, &[0; 9]).user_code, 30);
        assert!(registry.get(4).is_none());
    }

    #[test]
    fn test_feature_inputs_request_first() {
        let tx = DataTransaction::new(
            1,
            0,
            1,
            0,
            0,
            DataPayload::FeatureRequest {
                feature_id: 9,
                request: vec![9],
            },
        )
        .with_feature(FeatureData {
            feature_id: 3,
            data: vec![3, 3],
        });

        let inputs: Vec<(u16, Vec<u8>)> = feature_inputs(&tx).map(|(id, d)| (id, d.to_vec())).collect();
        assert_eq!(inputs, vec![(9, vec![9]), (3, vec![3, 3])]);
    }
}
