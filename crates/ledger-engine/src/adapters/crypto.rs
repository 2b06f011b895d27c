//! Ed25519 signature verification and node signing.

use crate::ports::outbound::{NodeSigner, SignatureVerifier};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use ledger_types::{PublicKey, Signature};

/// Verifies Ed25519 signatures. Malformed keys never verify.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(signature);
        key.verify(message, &signature).is_ok()
    }
}

/// The node's chain key, held in memory.
pub struct Ed25519NodeSigner {
    key_index: u16,
    chain_index: u32,
    signing_key: SigningKey,
}

impl Ed25519NodeSigner {
    pub fn from_seed(seed: [u8; 32], key_index: u16, chain_index: u32) -> Self {
        Self {
            key_index,
            chain_index,
            signing_key: SigningKey::from_bytes(&seed),
        }
    }
}

impl NodeSigner for Ed25519NodeSigner {
    fn key_index(&self) -> u16 {
        self.key_index
    }

    fn chain_index(&self) -> u32 {
        self.chain_index
    }

    fn public_key(&self) -> PublicKey {
        self.signing_key.verifying_key().to_bytes()
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Ed25519NodeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519NodeSigner")
            .field("key_index", &self.key_index)
            .field("chain_index", &self.chain_index)
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}
