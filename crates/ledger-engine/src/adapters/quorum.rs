//! Threshold quorum over eligible chain keys.

use crate::ports::outbound::QuorumValidator;
use ledger_types::ChainKey;
use std::collections::BTreeSet;

/// Quorum when at least `numerator / denominator` of the eligible keys
/// signed. Defaults to two thirds.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdQuorum {
    numerator: usize,
    denominator: usize,
}

impl Default for ThresholdQuorum {
    fn default() -> Self {
        Self {
            numerator: 2,
            denominator: 3,
        }
    }
}

impl ThresholdQuorum {
    pub fn new(numerator: usize, denominator: usize) -> Self {
        Self {
            numerator,
            denominator: denominator.max(1),
        }
    }
}

impl QuorumValidator for ThresholdQuorum {
    fn has_quorum(&self, eligible: &[ChainKey], verified: &[u16]) -> bool {
        if eligible.is_empty() {
            return false;
        }
        let eligible_indices: BTreeSet<u16> = eligible.iter().map(|k| k.key_index).collect();
        let signers = verified
            .iter()
            .copied()
            .collect::<BTreeSet<u16>>()
            .intersection(&eligible_indices)
            .count();
        signers * self.denominator >= eligible_indices.len() * self.numerator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_types::ChainKeyFlags;

    fn keys(n: u16) -> Vec<ChainKey> {
        (0..n)
            .map(|i| ChainKey::new(i, 0, [i as u8; 32], ChainKeyFlags::CORE_VOTE))
            .collect()
    }

    #[test]
    fn test_two_thirds() {
        let quorum = ThresholdQuorum::default();
        let eligible = keys(3);

        assert!(!quorum.has_quorum(&eligible, &[0]));
        assert!(quorum.has_quorum(&eligible, &[0, 2]));
    }

    #[test]
    fn test_duplicates_and_strangers_do_not_count() {
        let quorum = ThresholdQuorum::default();
        let eligible = keys(3);

        assert!(!quorum.has_quorum(&eligible, &[1, 1, 1]));
        assert!(!quorum.has_quorum(&eligible, &[1, 9]));
    }

    #[test]
    fn test_no_eligible_keys_never_quorate() {
        assert!(!ThresholdQuorum::default().has_quorum(&[], &[]));
    }
}
