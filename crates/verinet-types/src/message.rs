//! Consensus protocol messages carried by the gossip layer.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::{EventId, EvidencePackage, ValidationResult, ValidatorId, VerificationEvent, Vote, crypto};

/// An event entering consensus, together with its evidence and the
/// submitting node's validation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub event: VerificationEvent,
    pub package: EvidencePackage,
    pub validation: ValidationResult,
}

impl Submission {
    /// The digest every vote on this submission binds to. View independent,
    /// so commit votes from earlier views still count after a view change.
    #[must_use]
    pub fn proposal_digest(&self) -> [u8; 32] {
        proposal_digest(&self.event, &self.validation.digest)
    }
}

/// Digest of an event bound to the evidence package it was validated with.
#[must_use]
pub fn proposal_digest(event: &VerificationEvent, evidence_digest: &[u8; 32]) -> [u8; 32] {
    crypto::digest(b"verinet:proposal:v1:", &[&event.digest(), evidence_digest])
}

/// Pre-prepare message from the proposer selected for `view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub event_id: EventId,
    pub view: u32,
    pub proposer: ValidatorId,
    pub proposal_digest: [u8; 32],
    pub signature: Vec<u8>,
}

impl Proposal {
    #[must_use]
    pub fn signed(key: &SigningKey, event_id: EventId, view: u32, proposal_digest: [u8; 32]) -> Self {
        let mut proposal = Self {
            event_id,
            view,
            proposer: crypto::validator_id(key),
            proposal_digest,
            signature: Vec::new(),
        };
        proposal.signature = crypto::sign(key, &proposal.signing_payload());
        proposal
    }

    /// Format: `"verinet:proposal_msg:v1:" || event_id || view || proposer || proposal_digest`
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(112);
        payload.extend_from_slice(b"verinet:proposal_msg:v1:");
        payload.extend_from_slice(self.event_id.0.as_bytes());
        payload.extend_from_slice(&self.view.to_le_bytes());
        payload.extend_from_slice(self.proposer.as_bytes());
        payload.extend_from_slice(&self.proposal_digest);
        payload
    }

    #[must_use]
    pub fn verify(&self) -> bool {
        crypto::verify(
            self.proposer.as_bytes(),
            &self.signing_payload(),
            &self.signature,
        )
    }
}

/// Everything a validator may say about a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// Opens a round. Sent by the node the event was submitted to.
    Submit(Box<Submission>),
    Proposal(Proposal),
    Vote(Vote),
    /// Cancellation sentinel; moves the round straight to `Rejected`.
    /// Honoured only from the node that submitted the event.
    Abort { event_id: EventId, reason: String },
}

impl ConsensusMessage {
    #[must_use]
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Submit(s) => s.event.id,
            Self::Proposal(p) => p.event_id,
            Self::Vote(v) => v.event_id,
            Self::Abort { event_id, .. } => *event_id,
        }
    }

    /// Short label for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Submit(_) => "submit",
            Self::Proposal(_) => "proposal",
            Self::Vote(_) => "vote",
            Self::Abort { .. } => "abort",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_signature_roundtrip() {
        let key = crypto::generate_key();
        let p = Proposal::signed(&key, EventId::new(), 2, [3; 32]);
        assert!(p.verify());

        let mut forged = p.clone();
        forged.view = 3;
        assert!(!forged.verify());
    }

    #[test]
    fn proposal_digest_binds_evidence() {
        let event = VerificationEvent::dummy(crate::EventType::ExportPermit);
        assert_ne!(
            proposal_digest(&event, &[1; 32]),
            proposal_digest(&event, &[2; 32])
        );
    }

    #[test]
    fn abort_reports_event_id() {
        let id = EventId::new();
        let msg = ConsensusMessage::Abort {
            event_id: id,
            reason: "withdrawn".into(),
        };
        assert_eq!(msg.event_id(), id);
        assert_eq!(msg.kind(), "abort");
    }
}
