//! Signed validator votes.

use std::fmt;

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::{EventId, ValidatorId, crypto};

/// Protocol phase a vote or proposal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Phase {
    PrePrepare,
    Prepare,
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrePrepare => write!(f, "PRE_PREPARE"),
            Self::Prepare => write!(f, "PREPARE"),
            Self::Commit => write!(f, "COMMIT"),
        }
    }
}

/// A validator's decision on a proposal.
///
/// `Abstain` counts toward the quorum denominator but never toward approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Approve,
    Reject,
    Abstain,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "APPROVE"),
            Self::Reject => write!(f, "REJECT"),
            Self::Abstain => write!(f, "ABSTAIN"),
        }
    }
}

/// One vote by one validator for one (event, phase, view).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub validator: ValidatorId,
    pub event_id: EventId,
    pub view: u32,
    pub phase: Phase,
    pub decision: Decision,
    /// Digest of the proposal being voted on (event digest bound to evidence).
    pub proposal_digest: [u8; 32],
    pub timestamp: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl Vote {
    /// Build and sign a vote.
    #[must_use]
    pub fn signed(
        key: &SigningKey,
        event_id: EventId,
        view: u32,
        phase: Phase,
        decision: Decision,
        proposal_digest: [u8; 32],
    ) -> Self {
        let mut vote = Self {
            validator: crypto::validator_id(key),
            event_id,
            view,
            phase,
            decision,
            proposal_digest,
            timestamp: Utc::now(),
            signature: Vec::new(),
        };
        vote.signature = crypto::sign(key, &vote.signing_payload());
        vote
    }

    /// Canonical signing payload.
    ///
    /// Format: `"verinet:vote:v1:" || validator || event_id || view || phase || decision || proposal_digest || timestamp_ms`
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(128);
        payload.extend_from_slice(b"verinet:vote:v1:");
        payload.extend_from_slice(self.validator.as_bytes());
        payload.extend_from_slice(self.event_id.0.as_bytes());
        payload.extend_from_slice(&self.view.to_le_bytes());
        payload.extend_from_slice(self.phase.to_string().as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.decision.to_string().as_bytes());
        payload.push(0);
        payload.extend_from_slice(&self.proposal_digest);
        payload.extend_from_slice(&self.timestamp.timestamp_millis().to_le_bytes());
        payload
    }

    /// Whether the signature verifies against the voter's own key.
    #[must_use]
    pub fn verify(&self) -> bool {
        crypto::verify(
            self.validator.as_bytes(),
            &self.signing_payload(),
            &self.signature,
        )
    }

    /// Strictly identical resubmission: same signed content and signature.
    #[must_use]
    pub fn is_identical(&self, other: &Self) -> bool {
        self.signing_payload() == other.signing_payload() && self.signature == other.signature
    }

    /// Two signed votes for the same slot with different decisions.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.validator == other.validator
            && self.event_id == other.event_id
            && self.phase == other.phase
            && self.view == other.view
            && self.decision != other.decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(key: &SigningKey, decision: Decision) -> Vote {
        Vote::signed(key, EventId::from_bytes([1; 16]), 0, Phase::Prepare, decision, [9; 32])
    }

    #[test]
    fn signed_vote_verifies() {
        let key = crypto::generate_key();
        let v = vote(&key, Decision::Approve);
        assert!(v.verify());
        assert_eq!(v.validator, crypto::validator_id(&key));
    }

    #[test]
    fn tampered_vote_fails_verification() {
        let key = crypto::generate_key();
        let mut v = vote(&key, Decision::Approve);
        v.decision = Decision::Reject;
        assert!(!v.verify());
    }

    #[test]
    fn vote_signed_by_other_key_fails() {
        let key = crypto::generate_key();
        let other = crypto::generate_key();
        let mut v = vote(&key, Decision::Approve);
        v.validator = crypto::validator_id(&other);
        assert!(!v.verify());
    }

    #[test]
    fn identical_and_conflicting() {
        let key = crypto::generate_key();
        let a = vote(&key, Decision::Approve);
        assert!(a.is_identical(&a.clone()));

        let b = vote(&key, Decision::Reject);
        assert!(!a.is_identical(&b));
        assert!(a.conflicts_with(&b));

        let mut later_view = b.clone();
        later_view.view = 1;
        assert!(!a.conflicts_with(&later_view));
    }
}
