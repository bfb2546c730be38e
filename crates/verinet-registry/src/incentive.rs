//! Incentive ledger: rewards and slashes.
//!
//! Every stake or reputation change made here is appended to an
//! append-only log of [`LedgerEntry`] values. Slashing is immediate and
//! irreversible; the registry ejects a validator whose stake drops below the
//! minimum.
//!
//! The same offense is typically reported by every honest validator that
//! saw it, so slashes are deduplicated by (validator, offense, event, view).
//! Rewards are paid at most once per event.

use std::collections::HashSet;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use verinet_types::{
    ConsensusRound, Decision, EventId, IncentiveConfig, LedgerEntry, LedgerEntryKind,
    OffenseType, Result, SlashableOffense, ValidatorId, VerinetError,
};

use crate::registry::ValidatorRegistry;
use crate::weight::VotingPower;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OffenseKey {
    validator: ValidatorId,
    offense: OffenseType,
    event_id: Option<EventId>,
    view: Option<u32>,
}

impl From<&SlashableOffense> for OffenseKey {
    fn from(o: &SlashableOffense) -> Self {
        Self {
            validator: o.validator,
            offense: o.offense,
            event_id: o.event_id,
            view: o.view,
        }
    }
}

/// Effect of one applied slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashReport {
    pub validator: ValidatorId,
    pub offense: OffenseType,
    pub amount: Decimal,
    pub resulting_stake: Decimal,
    /// Whether this slash pushed the validator out of the active set.
    pub ejected: bool,
}

#[derive(Debug)]
pub struct IncentiveLedger {
    config: IncentiveConfig,
    entries: Vec<LedgerEntry>,
    slashed: HashSet<OffenseKey>,
    rewarded: HashSet<EventId>,
}

impl IncentiveLedger {
    #[must_use]
    pub fn new(config: IncentiveConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            slashed: HashSet::new(),
            rewarded: HashSet::new(),
        }
    }

    /// Slash amount for an offense before capping at the current stake.
    #[must_use]
    pub fn slash_amount(&self, offense: OffenseType) -> Decimal {
        let m = &self.config.multipliers;
        let multiplier = match offense {
            OffenseType::DoubleSigning => m.double_signing,
            OffenseType::Collusion => m.collusion,
            OffenseType::Censorship => m.censorship,
            OffenseType::MissedVote => m.missed_vote,
        };
        self.config.slash_base_unit * multiplier
    }

    fn reputation_penalty(&self, offense: OffenseType) -> Decimal {
        match offense {
            OffenseType::DoubleSigning | OffenseType::Collusion => {
                self.config.double_signing_reputation_penalty
            }
            OffenseType::Censorship => self.config.censorship_reputation_penalty,
            OffenseType::MissedVote => Decimal::ZERO,
        }
    }

    // =================================================================
    // Slashing
    // =================================================================

    /// Apply an offense. Returns `None` if the same offense was already
    /// slashed.
    ///
    /// # Errors
    /// - [`VerinetError::IncentiveError`] if the attached proof does not hold.
    /// - [`VerinetError::ValidatorNotFound`] for unknown validators.
    pub fn slash(
        &mut self,
        registry: &mut ValidatorRegistry,
        offense: &SlashableOffense,
    ) -> Result<Option<SlashReport>> {
        if !offense.is_proven() {
            return Err(VerinetError::IncentiveError {
                reason: format!(
                    "{} against {} is not backed by valid evidence",
                    offense.offense, offense.validator
                ),
            });
        }
        let key = OffenseKey::from(offense);
        if self.slashed.contains(&key) {
            return Ok(None);
        }

        let id = offense.validator;
        let before = registry.get(&id)?.clone();
        let amount = self.slash_amount(offense.offense).min(before.stake);
        let penalty = self.reputation_penalty(offense.offense);
        self.slashed.insert(key);

        let mut reputation_delta = Decimal::ZERO;
        if penalty > Decimal::ZERO {
            let reputation = registry.update_reputation(&id, -penalty)?;
            reputation_delta = reputation - before.reputation;
            self.append(LedgerEntry {
                sequence: 0,
                validator: id,
                kind: LedgerEntryKind::ReputationPenalty,
                event_id: offense.event_id,
                view: offense.view,
                stake_delta: Decimal::ZERO,
                reputation_delta,
                resulting_stake: before.stake,
                timestamp: Utc::now(),
            });
        }

        let resulting_stake = if amount > Decimal::ZERO {
            let stake = registry.update_stake(&id, -amount)?;
            self.append(LedgerEntry {
                sequence: 0,
                validator: id,
                kind: LedgerEntryKind::Slash(offense.offense),
                event_id: offense.event_id,
                view: offense.view,
                stake_delta: -amount,
                reputation_delta: Decimal::ZERO,
                resulting_stake: stake,
                timestamp: Utc::now(),
            });
            stake
        } else {
            before.stake
        };

        let ejected = before.is_active() && !registry.is_active(&id);
        if ejected {
            self.append(LedgerEntry {
                sequence: 0,
                validator: id,
                kind: LedgerEntryKind::Ejection,
                event_id: offense.event_id,
                view: offense.view,
                stake_delta: Decimal::ZERO,
                reputation_delta: Decimal::ZERO,
                resulting_stake,
                timestamp: Utc::now(),
            });
        }

        warn!(
            validator = %id,
            offense = %offense.offense,
            %amount,
            %reputation_delta,
            %resulting_stake,
            ejected,
            "Validator slashed"
        );

        Ok(Some(SlashReport {
            validator: id,
            offense: offense.offense,
            amount,
            resulting_stake,
            ejected,
        }))
    }

    // =================================================================
    // Rewards
    // =================================================================

    /// Distribute the per-round reward among validators whose commit vote
    /// approved the committed outcome, proportional to voting power.
    ///
    /// Paid once per event; a second call returns no entries.
    ///
    /// # Errors
    /// [`VerinetError::IncentiveError`] if the round is not committed.
    pub fn reward(
        &mut self,
        registry: &mut ValidatorRegistry,
        round: &ConsensusRound,
        power: &VotingPower,
    ) -> Result<Vec<LedgerEntry>> {
        if !round.is_committed() {
            return Err(VerinetError::IncentiveError {
                reason: format!("round for {} is not committed", round.event_id),
            });
        }
        if !self.rewarded.insert(round.event_id) {
            return Ok(Vec::new());
        }

        let mut winners: Vec<ValidatorId> = round
            .commit_votes
            .iter()
            .filter(|v| v.decision == Decision::Approve)
            .map(|v| v.validator)
            .filter(|id| power.contains(id) && registry.is_active(id))
            .collect();
        winners.sort_unstable();
        winners.dedup();

        let pool = power.sum(&winners);
        if pool.is_zero() || self.config.reward_per_round.is_zero() {
            return Ok(Vec::new());
        }

        let mut paid = Vec::with_capacity(winners.len());
        for id in winners {
            let share = self.config.reward_per_round * power.power(&id) / pool;
            let stake = registry.update_stake(&id, share)?;
            let entry = self.append(LedgerEntry {
                sequence: 0,
                validator: id,
                kind: LedgerEntryKind::Reward,
                event_id: Some(round.event_id),
                view: Some(round.view),
                stake_delta: share,
                reputation_delta: Decimal::ZERO,
                resulting_stake: stake,
                timestamp: Utc::now(),
            });
            paid.push(entry);
        }
        info!(
            event_id = %round.event_id,
            recipients = paid.len(),
            pool = %self.config.reward_per_round,
            "Round rewards distributed"
        );
        Ok(paid)
    }

    // =================================================================
    // Log
    // =================================================================

    fn append(&mut self, mut entry: LedgerEntry) -> LedgerEntry {
        entry.sequence = self.entries.len() as u64;
        self.entries.push(entry.clone());
        entry
    }

    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Entries concerning one validator, oldest first.
    #[must_use]
    pub fn entries_for(&self, validator: &ValidatorId) -> Vec<&LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.validator == *validator)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
