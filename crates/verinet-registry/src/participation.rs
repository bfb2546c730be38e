//! Non-participation tracking.
//!
//! A validator silent through a phase deadline is only treated as abstaining.
//! Silence across `missed_round_limit` consecutive finished rounds becomes a
//! censorship offense. Any vote resets the streak.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};
use verinet_types::{ConsensusRound, EventId, SlashableOffense, ValidatorId};

use crate::weight::VotingPower;

#[derive(Debug)]
pub struct ParticipationTracker {
    limit: u32,
    streaks: BTreeMap<ValidatorId, Vec<EventId>>,
    recorded: HashSet<EventId>,
}

impl ParticipationTracker {
    #[must_use]
    pub fn new(missed_round_limit: u32) -> Self {
        Self {
            limit: missed_round_limit.max(1),
            streaks: BTreeMap::new(),
            recorded: HashSet::new(),
        }
    }

    /// Fold a finished round into the streaks. Returns censorship offenses
    /// for validators whose streak reached the limit; their streak restarts.
    pub fn record(&mut self, round: &ConsensusRound, eligible: &VotingPower) -> Vec<SlashableOffense> {
        if !round.is_terminal() || !self.recorded.insert(round.event_id) {
            return Vec::new();
        }

        let silent: HashSet<&ValidatorId> = round.non_responding.iter().collect();
        let mut offenses = Vec::new();
        for id in eligible.ids() {
            if !silent.contains(id) {
                self.streaks.remove(id);
                continue;
            }
            let streak = self.streaks.entry(*id).or_default();
            streak.push(round.event_id);
            debug!(validator = %id, missed = streak.len(), "Validator silent for round");
            if streak.len() >= self.limit as usize {
                let events = std::mem::take(streak);
                warn!(validator = %id, rounds = events.len(), "Censorship pattern detected");
                offenses.push(SlashableOffense::censorship(*id, events));
            }
        }
        offenses
    }

    /// Current consecutive silent rounds for a validator.
    #[must_use]
    pub fn streak(&self, id: &ValidatorId) -> usize {
        self.streaks.get(id).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use verinet_types::{
        Category, EventType, OffenseType, PartyId, RegistryConfig, RejectReason, RoundOutcome,
        RoundStatus, Validator,
    };

    fn power(ids: &[ValidatorId]) -> VotingPower {
        let validators: Vec<Validator> = ids
            .iter()
            .map(|id| {
                Validator::new(*id, PartyId::new("op"), Category::Community, Decimal::from(10_000), Decimal::ONE)
            })
            .collect();
        VotingPower::from_validators(&RegistryConfig::default(), &validators)
    }

    fn round(silent: Vec<ValidatorId>) -> ConsensusRound {
        ConsensusRound {
            event_id: EventId::new(),
            event_type: EventType::DisputeResolution,
            view: 0,
            proposer: ValidatorId([0; 32]),
            status: RoundStatus::Rejected,
            prepare_votes: Vec::new(),
            commit_votes: Vec::new(),
            prepare_approval: Decimal::ZERO,
            commit_approval: Decimal::ZERO,
            threshold: Decimal::new(6767, 4),
            outcome: Some(RoundOutcome::Rejected(RejectReason::ViewChangesExhausted)),
            dissenting: Vec::new(),
            non_responding: silent,
            views: Vec::new(),
            opened_at: Utc::now(),
            closed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn streak_reaching_limit_yields_censorship() {
        let a = ValidatorId([1; 32]);
        let b = ValidatorId([2; 32]);
        let vp = power(&[a, b]);
        let mut tracker = ParticipationTracker::new(3);

        assert!(tracker.record(&round(vec![a]), &vp).is_empty());
        assert!(tracker.record(&round(vec![a]), &vp).is_empty());
        let offenses = tracker.record(&round(vec![a]), &vp);
        assert_eq!(offenses.len(), 1);
        assert_eq!(offenses[0].validator, a);
        assert_eq!(offenses[0].offense, OffenseType::Censorship);
        assert_eq!(tracker.streak(&a), 0);
        assert_eq!(tracker.streak(&b), 0);
    }

    #[test]
    fn voting_resets_streak() {
        let a = ValidatorId([1; 32]);
        let vp = power(&[a]);
        let mut tracker = ParticipationTracker::new(2);
        tracker.record(&round(vec![a]), &vp);
        tracker.record(&round(vec![]), &vp);
        assert_eq!(tracker.streak(&a), 0);
        assert!(tracker.record(&round(vec![a]), &vp).is_empty());
    }

    #[test]
    fn same_round_is_counted_once() {
        let a = ValidatorId([1; 32]);
        let vp = power(&[a]);
        let mut tracker = ParticipationTracker::new(2);
        let r = round(vec![a]);
        tracker.record(&r, &vp);
        tracker.record(&r, &vp);
        assert_eq!(tracker.streak(&a), 1);
    }
}
