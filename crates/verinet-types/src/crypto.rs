//! Thin ed25519 helpers shared by votes, proposals, gossip envelopes and
//! evidence items.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::{Result, ValidatorId, VerinetError};

/// Sign `payload` and return the 64-byte signature as a `Vec`.
#[must_use]
pub fn sign(key: &SigningKey, payload: &[u8]) -> Vec<u8> {
    key.sign(payload).to_bytes().to_vec()
}

/// Verify an ed25519 signature against a raw 32-byte public key.
///
/// Malformed keys or signatures verify as `false`.
#[must_use]
pub fn verify(pubkey: &[u8; 32], payload: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(pubkey) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(payload, &sig).is_ok()
}

/// The [`ValidatorId`] that corresponds to a signing key.
#[must_use]
pub fn validator_id(key: &SigningKey) -> ValidatorId {
    ValidatorId(key.verifying_key().to_bytes())
}

/// Load a signing key from a 64-character hex seed.
pub fn signing_key_from_hex(seed_hex: &str) -> Result<SigningKey> {
    let bytes = hex::decode(seed_hex)
        .map_err(|e| VerinetError::Configuration(format!("invalid key hex: {e}")))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| VerinetError::Configuration("key seed must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Domain-separated SHA-256.
#[must_use]
pub fn digest(domain: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Fresh random signing key. Test-only.
#[cfg(any(test, feature = "test-helpers"))]
#[must_use]
pub fn generate_key() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let key = generate_key();
        let id = validator_id(&key);
        let sig = sign(&key, b"payload");
        assert!(verify(id.as_bytes(), b"payload", &sig));
        assert!(!verify(id.as_bytes(), b"tampered", &sig));
    }

    #[test]
    fn malformed_signature_is_rejected() {
        let key = generate_key();
        let id = validator_id(&key);
        assert!(!verify(id.as_bytes(), b"payload", &[0u8; 10]));
    }

    #[test]
    fn key_from_hex_seed() {
        let seed = "11".repeat(32);
        let a = signing_key_from_hex(&seed).unwrap();
        let b = signing_key_from_hex(&seed).unwrap();
        assert_eq!(validator_id(&a), validator_id(&b));
        assert!(signing_key_from_hex("abcd").is_err());
    }

    #[test]
    fn digest_is_length_prefixed() {
        let a = digest(b"d:", &[b"ab", b"c"]);
        let b = digest(b"d:", &[b"a", b"bc"]);
        assert_ne!(a, b);
    }
}
