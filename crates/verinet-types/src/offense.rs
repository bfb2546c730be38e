//! Slashable offenses routed to the incentive ledger.
//!
//! Offenses are internal events, never errors returned to callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventId, ValidatorId, Vote};

/// Offense taxonomy, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffenseType {
    /// Two signed, conflicting votes for the same slot.
    DoubleSigning,
    /// Coordinated misbehaviour established by governance.
    Collusion,
    /// A sustained non-participation pattern.
    Censorship,
    /// A single missed vote; treated as abstain.
    MissedVote,
}

impl fmt::Display for OffenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoubleSigning => write!(f, "DOUBLE_SIGNING"),
            Self::Collusion => write!(f, "COLLUSION"),
            Self::Censorship => write!(f, "CENSORSHIP"),
            Self::MissedVote => write!(f, "MISSED_VOTE"),
        }
    }
}

/// Proof attached to an offense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffenseEvidence {
    /// Both signed votes; anyone can re-verify them.
    ConflictingVotes { first: Box<Vote>, second: Box<Vote> },
    /// Consecutive rounds in which the validator stayed silent.
    MissedRounds { events: Vec<EventId> },
    /// Reference to a governance decision.
    GovernanceReport { reference: String },
}

/// A detected offense, awaiting slashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashableOffense {
    pub validator: ValidatorId,
    pub offense: OffenseType,
    pub event_id: Option<EventId>,
    pub view: Option<u32>,
    pub evidence: OffenseEvidence,
    pub detected_at: DateTime<Utc>,
}

impl SlashableOffense {
    /// Double-signing offense from two conflicting votes by the same validator.
    #[must_use]
    pub fn double_signing(first: Vote, second: Vote) -> Self {
        Self {
            validator: first.validator,
            offense: OffenseType::DoubleSigning,
            event_id: Some(first.event_id),
            view: Some(first.view),
            evidence: OffenseEvidence::ConflictingVotes {
                first: Box::new(first),
                second: Box::new(second),
            },
            detected_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn censorship(validator: ValidatorId, events: Vec<EventId>) -> Self {
        Self {
            validator,
            offense: OffenseType::Censorship,
            event_id: events.last().copied(),
            view: None,
            evidence: OffenseEvidence::MissedRounds { events },
            detected_at: Utc::now(),
        }
    }

    /// Collusion in the round for `event_id`, established by the governance
    /// decision `reference`.
    #[must_use]
    pub fn collusion(validator: ValidatorId, event_id: EventId, reference: impl Into<String>) -> Self {
        Self {
            validator,
            offense: OffenseType::Collusion,
            event_id: Some(event_id),
            view: None,
            evidence: OffenseEvidence::GovernanceReport {
                reference: reference.into(),
            },
            detected_at: Utc::now(),
        }
    }

    /// Re-check the attached proof. Governance reports are taken as given.
    #[must_use]
    pub fn is_proven(&self) -> bool {
        match &self.evidence {
            OffenseEvidence::ConflictingVotes { first, second } => {
                first.validator == self.validator
                    && first.conflicts_with(second)
                    && first.verify()
                    && second.verify()
            }
            OffenseEvidence::MissedRounds { events } => !events.is_empty(),
            OffenseEvidence::GovernanceReport { reference } => !reference.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Decision, Phase, crypto};

    #[test]
    fn double_signing_is_proven_by_two_signed_votes() {
        let key = crypto::generate_key();
        let event = EventId::new();
        let a = Vote::signed(&key, event, 0, Phase::Prepare, Decision::Approve, [1; 32]);
        let b = Vote::signed(&key, event, 0, Phase::Prepare, Decision::Reject, [1; 32]);
        let offense = SlashableOffense::double_signing(a, b);
        assert_eq!(offense.offense, OffenseType::DoubleSigning);
        assert!(offense.is_proven());
    }

    #[test]
    fn forged_second_vote_does_not_prove() {
        let key = crypto::generate_key();
        let event = EventId::new();
        let a = Vote::signed(&key, event, 0, Phase::Prepare, Decision::Approve, [1; 32]);
        let mut b = a.clone();
        b.decision = Decision::Reject;
        let offense = SlashableOffense::double_signing(a, b);
        assert!(!offense.is_proven());
    }

    #[test]
    fn censorship_references_last_event() {
        let events = vec![EventId::new(), EventId::new()];
        let offense = SlashableOffense::censorship(ValidatorId([1; 32]), events.clone());
        assert_eq!(offense.event_id, Some(events[1]));
        assert!(offense.is_proven());
    }
}
