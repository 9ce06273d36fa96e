//! Cryptographic operations for the ledger
//!
//! This module provides:
//! - Ed25519 key pair generation, signing, and verification
//! - SHA-256 hashing for transactions and receipts

use crate::types::{Address, Signature};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

/// Ed25519 key pair; its public key is a ledger [`Address`]
#[derive(Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Create from seed (32 bytes) - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Ledger address of this key
    pub fn address(&self) -> Address {
        Address::new(self.verifying_key.to_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signature = self.signing_key.sign(message);
        Signature::from_bytes(signature.to_bytes())
    }
}

/// Verify a signature with a public key
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &[u8; 32]) -> bool {
    let dalek_sig = DalekSignature::from_bytes(signature.as_bytes());

    let verifying_key = match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key,
        Err(_) => return false,
    };

    verifying_key.verify_strict(message, &dalek_sig).is_ok()
}

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_seed() {
        let seed = [42u8; 32];
        let keypair1 = KeyPair::from_seed(&seed);
        let keypair2 = KeyPair::from_seed(&seed);

        assert_eq!(keypair1.address(), keypair2.address());
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(KeyPair::generate().address(), KeyPair::generate().address());
    }

    #[test]
    fn test_verify_signature_against_address() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"purchase");

        assert!(signature.verify(b"purchase", &keypair.address()));
        assert!(!signature.verify(b"purchase", &KeyPair::generate().address()));
    }

    #[test]
    fn test_garbage_signature_does_not_verify() {
        let keypair = KeyPair::generate();
        let garbage = Signature::from_bytes([0u8; 64]);
        assert!(!verify_signature(b"list", &garbage, keypair.address().as_bytes()));
    }

    #[test]
    fn test_hash_bytes() {
        assert_eq!(hash_bytes(b"a"), hash_bytes(b"a"));
        assert_ne!(hash_bytes(b"a"), hash_bytes(b"b"));
    }
}
