//! Directory of trusted evidence sources and their public keys.

use std::collections::BTreeMap;

use verinet_types::{Result, VerinetError, crypto};

#[derive(Debug, Clone, Default)]
pub struct TrustedSources {
    keys: BTreeMap<String, [u8; 32]>,
}

impl TrustedSources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the key for `source`.
    pub fn insert(&mut self, source: impl Into<String>, public_key: [u8; 32]) {
        self.keys.insert(source.into(), public_key);
    }

    /// Add a source from a hex-encoded public key.
    pub fn insert_hex(&mut self, source: impl Into<String>, public_key_hex: &str) -> Result<()> {
        let bytes = hex::decode(public_key_hex)
            .map_err(|e| VerinetError::Configuration(format!("invalid source key hex: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            VerinetError::Configuration("source public key must be 32 bytes".to_string())
        })?;
        self.insert(source, key);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, source: &str) -> Option<&[u8; 32]> {
        self.keys.get(source)
    }

    /// Whether `signature` over `payload` verifies for a known source.
    /// Unknown sources never verify.
    #[must_use]
    pub fn verify(&self, source: &str, payload: &[u8], signature: &[u8]) -> bool {
        self.get(source)
            .is_some_and(|key| crypto::verify(key, payload, signature))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
