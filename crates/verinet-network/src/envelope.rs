//! Signed gossip envelope.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use verinet_types::{ConsensusMessage, MessageId, Result, ValidatorId, crypto};

/// A consensus message on the wire, signed by the peer that first sent it.
///
/// `hops` is not signed: forwarders increment it without re-signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: MessageId,
    pub origin: ValidatorId,
    pub hops: u8,
    pub payload: ConsensusMessage,
    pub signature: Vec<u8>,
}

impl MessageEnvelope {
    /// Wrap and sign `payload` as a fresh message from `key`'s holder.
    ///
    /// # Errors
    /// [`verinet_types::VerinetError::Serialization`] if the payload cannot
    /// be encoded for signing.
    pub fn sign(key: &SigningKey, payload: ConsensusMessage) -> Result<Self> {
        let mut envelope = Self {
            id: MessageId::new(),
            origin: crypto::validator_id(key),
            hops: 0,
            payload,
            signature: Vec::new(),
        };
        envelope.signature = crypto::sign(key, &envelope.signing_payload()?);
        Ok(envelope)
    }

    /// Format: `"verinet:envelope:v1:" || id || origin || json(payload)`
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(&self.payload)?;
        let mut payload = Vec::with_capacity(20 + 16 + 32 + body.len());
        payload.extend_from_slice(b"verinet:envelope:v1:");
        payload.extend_from_slice(self.id.0.as_bytes());
        payload.extend_from_slice(self.origin.as_bytes());
        payload.extend_from_slice(&body);
        Ok(payload)
    }

    /// Whether the origin's key signed this envelope. Encoding failures
    /// verify as `false`.
    #[must_use]
    pub fn verify(&self, public_key: &[u8; 32]) -> bool {
        self.signing_payload()
            .is_ok_and(|payload| crypto::verify(public_key, &payload, &self.signature))
    }

    /// Copy for forwarding, one hop further from the origin.
    #[must_use]
    pub fn forwarded(&self) -> Self {
        let mut copy = self.clone();
        copy.hops = copy.hops.saturating_add(1);
        copy
    }
}
