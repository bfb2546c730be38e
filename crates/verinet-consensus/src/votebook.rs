//! Per-round vote storage with equivocation detection.
//!
//! Each (validator, phase, view) slot holds the first signed vote received.
//! Later votes for an occupied slot are compared against it: an exact copy
//! is a no-op, a different decision is double signing.

use std::collections::{BTreeMap, BTreeSet};

use verinet_types::{Decision, Phase, SlashableOffense, ValidatorId, Vote};

/// What happened when a vote was offered to the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteRecord {
    /// First vote for its slot; stored.
    Accepted,
    /// Byte-identical resubmission; round state unchanged.
    Duplicate,
    /// Same decision, re-signed with different content. The stored vote
    /// stands and the newcomer is dropped.
    Superseded,
    /// Different decision for an occupied slot.
    Conflict(Box<SlashableOffense>),
}

type Slot = (ValidatorId, Phase, u32);

#[derive(Debug, Clone, Default)]
pub struct VoteBook {
    votes: BTreeMap<Slot, Vote>,
}

impl VoteBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a vote. The caller has already verified its signature.
    pub fn insert(&mut self, vote: Vote) -> VoteRecord {
        let slot = (vote.validator, vote.phase, vote.view);
        match self.votes.get(&slot) {
            None => {
                self.votes.insert(slot, vote);
                VoteRecord::Accepted
            }
            Some(first) if first.is_identical(&vote) => VoteRecord::Duplicate,
            Some(first) if first.conflicts_with(&vote) => {
                VoteRecord::Conflict(Box::new(SlashableOffense::double_signing(first.clone(), vote)))
            }
            Some(_) => VoteRecord::Superseded,
        }
    }

    #[must_use]
    pub fn get(&self, validator: &ValidatorId, phase: Phase, view: u32) -> Option<&Vote> {
        self.votes.get(&(*validator, phase, view))
    }

    /// Votes cast in `phase` for exactly `view`.
    pub fn in_view(&self, phase: Phase, view: u32) -> impl Iterator<Item = &Vote> {
        self.votes
            .values()
            .filter(move |v| v.phase == phase && v.view == view)
    }

    /// Each validator's vote for `phase` from the highest view it voted in.
    #[must_use]
    pub fn latest(&self, phase: Phase) -> BTreeMap<ValidatorId, &Vote> {
        let mut latest: BTreeMap<ValidatorId, &Vote> = BTreeMap::new();
        for vote in self.votes.values().filter(|v| v.phase == phase) {
            // Slots iterate in ascending view order per validator.
            latest.insert(vote.validator, vote);
        }
        latest
    }

    /// Every vote in `phase`, all views, in slot order.
    #[must_use]
    pub fn all(&self, phase: Phase) -> Vec<Vote> {
        self.votes
            .values()
            .filter(|v| v.phase == phase)
            .cloned()
            .collect()
    }

    /// Validators that cast at least one vote of any kind.
    #[must_use]
    pub fn voters(&self) -> BTreeSet<ValidatorId> {
        self.votes.keys().map(|(id, _, _)| *id).collect()
    }

    /// Validators whose latest vote in any phase was a rejection.
    #[must_use]
    pub fn dissenters(&self) -> BTreeSet<ValidatorId> {
        let mut last: BTreeMap<ValidatorId, (u32, Phase, Decision)> = BTreeMap::new();
        for vote in self.votes.values() {
            let entry = last
                .entry(vote.validator)
                .or_insert((vote.view, vote.phase, vote.decision));
            if (vote.view, vote.phase) >= (entry.0, entry.1) {
                *entry = (vote.view, vote.phase, vote.decision);
            }
        }
        last.into_iter()
            .filter(|(_, (_, _, decision))| *decision == Decision::Reject)
            .map(|(id, _)| id)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use verinet_types::{EventId, OffenseType, crypto};

    fn vote(key: &SigningKey, phase: Phase, view: u32, decision: Decision) -> Vote {
        Vote::signed(key, EventId::from_bytes([5; 16]), view, phase, decision, [7; 32])
    }

    #[test]
    fn identical_vote_is_a_noop() {
        let key = crypto::generate_key();
        let v = vote(&key, Phase::Prepare, 0, Decision::Approve);
        let mut book = VoteBook::new();
        assert_eq!(book.insert(v.clone()), VoteRecord::Accepted);
        assert_eq!(book.insert(v), VoteRecord::Duplicate);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn conflicting_decision_produces_offense() {
        let key = crypto::generate_key();
        let mut book = VoteBook::new();
        book.insert(vote(&key, Phase::Commit, 1, Decision::Approve));
        let VoteRecord::Conflict(offense) = book.insert(vote(&key, Phase::Commit, 1, Decision::Reject))
        else {
            panic!("expected conflict");
        };
        assert_eq!(offense.offense, OffenseType::DoubleSigning);
        assert!(offense.is_proven());
        // First vote wins.
        let stored = book.get(&crypto::validator_id(&key), Phase::Commit, 1).unwrap();
        assert_eq!(stored.decision, Decision::Approve);
    }

    #[test]
    fn same_decision_in_another_view_is_a_new_slot() {
        let key = crypto::generate_key();
        let mut book = VoteBook::new();
        book.insert(vote(&key, Phase::Prepare, 0, Decision::Approve));
        assert_eq!(
            book.insert(vote(&key, Phase::Prepare, 1, Decision::Reject)),
            VoteRecord::Accepted
        );
        let latest = book.latest(Phase::Prepare);
        assert_eq!(latest[&crypto::validator_id(&key)].view, 1);
    }

    #[test]
    fn dissenters_follow_latest_vote() {
        let a = crypto::generate_key();
        let b = crypto::generate_key();
        let mut book = VoteBook::new();
        book.insert(vote(&a, Phase::Prepare, 0, Decision::Reject));
        book.insert(vote(&a, Phase::Commit, 0, Decision::Approve));
        book.insert(vote(&b, Phase::Prepare, 0, Decision::Reject));
        let dissent = book.dissenters();
        assert!(!dissent.contains(&crypto::validator_id(&a)));
        assert!(dissent.contains(&crypto::validator_id(&b)));
        assert_eq!(book.voters().len(), 2);
    }
}
