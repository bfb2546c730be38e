//! One consensus round as seen by one validator.
//!
//! [`RoundMachine`] never reads the clock or touches the network. Every
//! input carries `now`, and every output is an [`Action`] for the caller to
//! perform, so two machines fed the same inputs end in the same state.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use verinet_registry::VotingPower;
use verinet_types::{
    ConsensusConfig, ConsensusMessage, ConsensusRound, Decision, EventId, Outcome, Phase,
    Proposal, RejectReason, Result, RoundOutcome, RoundStatus, SlashableOffense, Submission,
    ValidatorId, VerinetError, ViewRecord, Vote, crypto,
};

use crate::engine::Action;
use crate::evaluator::ProposalEvaluator;
use crate::proposer::select_proposer;
use crate::quorum::{self, Tally, Verdict};
use crate::votebook::{VoteBook, VoteRecord};

pub struct RoundMachine {
    submission: Submission,
    config: ConsensusConfig,
    power: VotingPower,
    threshold: Decimal,
    digest: [u8; 32],
    /// Node that sent the `Submit`; the only one allowed to abort.
    origin: ValidatorId,
    signer: Option<SigningKey>,
    decision: Decision,

    view: u32,
    proposer: ValidatorId,
    status: RoundStatus,
    phase_deadline: DateTime<Utc>,
    views: Vec<ViewRecord>,

    votes: VoteBook,
    ejected: BTreeSet<ValidatorId>,
    offenses: Vec<SlashableOffense>,

    outcome: Option<RoundOutcome>,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl RoundMachine {
    /// Open a round for `submission` with the voting power fixed at this
    /// moment. Returns the machine and the first actions (a proposal and a
    /// prepare vote when this validator proposes view 0).
    ///
    /// # Errors
    /// [`VerinetError::ConsensusFailure`] if no validator is eligible.
    pub fn open(
        submission: Submission,
        origin: ValidatorId,
        config: ConsensusConfig,
        power: VotingPower,
        signer: Option<SigningKey>,
        evaluator: &dyn ProposalEvaluator,
        now: DateTime<Utc>,
    ) -> Result<(Self, Vec<Action>)> {
        let event_id = submission.event.id;
        let Some(proposer) = select_proposer(config.proposer_selection, &power, event_id, 0) else {
            return Err(VerinetError::ConsensusFailure {
                event_id,
                reason: "no eligible validators".to_string(),
                dissenting: Vec::new(),
                non_responding: Vec::new(),
            });
        };

        let threshold = quorum::threshold(&config, &submission.event, submission.validation.compliance_score);
        let decision = evaluator.evaluate(&submission, now);
        let digest = submission.proposal_digest();
        let phase_deadline = deadline_after(now, &config);

        let mut machine = Self {
            submission,
            config,
            power,
            threshold,
            digest,
            origin,
            signer,
            decision,
            view: 0,
            proposer,
            status: RoundStatus::Proposed,
            phase_deadline,
            views: vec![ViewRecord {
                view: 0,
                proposer,
                started_at: now,
                timed_out: false,
            }],
            votes: VoteBook::new(),
            ejected: BTreeSet::new(),
            offenses: Vec::new(),
            outcome: None,
            opened_at: now,
            closed_at: None,
        };
        info!(
            event_id = %event_id,
            event_type = %machine.submission.event.event_type,
            validators = machine.power.len(),
            threshold = %machine.threshold,
            proposer = %proposer,
            "Consensus round opened"
        );

        let mut actions = Vec::new();
        if machine.submission.event.is_expired(now) {
            machine.finish(RoundOutcome::Rejected(RejectReason::EventExpired), now, &mut actions);
            return Ok((machine, actions));
        }
        machine.propose_if_leader(now, &mut actions);
        Ok((machine, actions))
    }

    // =================================================================
    // Inputs
    // =================================================================

    /// Handle a pre-prepare from the proposer of `proposal.view`.
    ///
    /// Stale views are ignored. A proposal for a later view moves this
    /// validator to that view.
    ///
    /// # Errors
    /// - [`VerinetError::InvalidSignature`] if the proposal is not signed by
    ///   its claimed proposer.
    /// - [`VerinetError::UnexpectedProposer`] if the signer is not the
    ///   proposer selected for the view.
    /// - [`VerinetError::MessageRejected`] if it proposes a different digest.
    pub fn on_proposal(&mut self, proposal: Proposal, now: DateTime<Utc>) -> Result<Vec<Action>> {
        let mut actions = Vec::new();
        if self.is_terminal() || proposal.view < self.view {
            return Ok(actions);
        }
        if !proposal.verify() {
            return Err(VerinetError::InvalidSignature(proposal.proposer));
        }
        let expected = select_proposer(
            self.config.proposer_selection,
            &self.power,
            self.event_id(),
            proposal.view,
        );
        if expected != Some(proposal.proposer) {
            return Err(VerinetError::UnexpectedProposer {
                proposer: proposal.proposer,
                event_id: self.event_id(),
            });
        }
        if proposal.proposal_digest != self.digest {
            return Err(VerinetError::MessageRejected {
                reason: format!("proposal for {} does not match submitted event", self.event_id()),
            });
        }

        if proposal.view > self.view {
            debug!(event_id = %self.event_id(), from = self.view, to = proposal.view, "Joining later view");
            self.enter_view(proposal.view, now);
        }
        if self.status != RoundStatus::Proposed {
            return Ok(actions);
        }
        self.accept_proposal(now, &mut actions);
        Ok(actions)
    }

    /// Record a signed vote and re-evaluate quorum.
    ///
    /// Votes keep being recorded after the round is final so late voters
    /// are not counted as silent.
    ///
    /// # Errors
    /// - [`VerinetError::NotEligible`] if the voter has no power in this round.
    /// - [`VerinetError::InvalidSignature`] if the signature does not verify.
    /// - [`VerinetError::MessageRejected`] for a vote on another proposal or
    ///   in the pre-prepare phase.
    /// - [`VerinetError::ConflictingVote`] if the voter already cast a
    ///   different decision for the same slot; the offense is queued.
    pub fn on_vote(&mut self, vote: Vote, now: DateTime<Utc>) -> Result<Vec<Action>> {
        let event_id = self.event_id();
        if !self.power.contains(&vote.validator) {
            return Err(VerinetError::NotEligible {
                validator: vote.validator,
                event_id,
            });
        }
        if !vote.verify() {
            return Err(VerinetError::InvalidSignature(vote.validator));
        }
        if vote.phase == Phase::PrePrepare || vote.proposal_digest != self.digest {
            return Err(VerinetError::MessageRejected {
                reason: format!("vote from {} does not bind the proposal for {event_id}", vote.validator),
            });
        }

        let validator = vote.validator;
        let (phase, view, decision) = (vote.phase, vote.view, vote.decision);
        match self.votes.insert(vote) {
            VoteRecord::Accepted => {
                debug!(%event_id, %validator, %phase, view, %decision, "Vote recorded");
            }
            VoteRecord::Duplicate | VoteRecord::Superseded => return Ok(Vec::new()),
            VoteRecord::Conflict(offense) => {
                warn!(%event_id, %validator, %phase, view, "Conflicting vote, double signing flagged");
                self.offenses.push(*offense);
                return Err(VerinetError::ConflictingVote { validator, event_id });
            }
        }

        let mut actions = Vec::new();
        self.evaluate(now, &mut actions);
        Ok(actions)
    }

    /// Cancel the round on behalf of `from`.
    ///
    /// # Errors
    /// [`VerinetError::MessageRejected`] unless `from` submitted the event.
    pub fn abort(&mut self, from: &ValidatorId, reason: String, now: DateTime<Utc>) -> Result<Vec<Action>> {
        if *from != self.origin {
            return Err(VerinetError::MessageRejected {
                reason: format!("abort for {} from {from}, not the submitter", self.event_id()),
            });
        }
        let mut actions = Vec::new();
        if !self.is_terminal() {
            self.finish(RoundOutcome::Rejected(RejectReason::Aborted(reason)), now, &mut actions);
        }
        Ok(actions)
    }

    /// Remove an ejected validator from the pending weight. Votes it already
    /// cast still count.
    pub fn on_ejected(&mut self, id: ValidatorId, now: DateTime<Utc>) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.power.contains(&id) || !self.ejected.insert(id) {
            return actions;
        }
        debug!(event_id = %self.event_id(), validator = %id, "Ejected validator leaves pending set");
        self.evaluate(now, &mut actions);
        actions
    }

    /// Advance time. Expires the event, or times out the phase and moves to
    /// the next view.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.is_terminal() {
            return actions;
        }
        if self.submission.event.is_expired(now) {
            self.finish(RoundOutcome::Rejected(RejectReason::EventExpired), now, &mut actions);
            return actions;
        }
        if now < self.phase_deadline {
            return actions;
        }

        let event_id = self.event_id();
        warn!(%event_id, view = self.view, status = %self.status, "Phase deadline elapsed");
        self.status = RoundStatus::TimedOut;
        if let Some(record) = self.views.last_mut() {
            record.timed_out = true;
        }
        actions.push(Action::Notify(Outcome::TimedOut {
            event_id,
            view: self.view,
        }));

        if self.view >= self.config.max_view_changes {
            self.finish(RoundOutcome::Rejected(RejectReason::ViewChangesExhausted), now, &mut actions);
            return actions;
        }
        self.enter_view(self.view + 1, now);
        self.propose_if_leader(now, &mut actions);
        actions
    }

    // =================================================================
    // Queries
    // =================================================================

    #[must_use]
    pub fn event_id(&self) -> EventId {
        self.submission.event.id
    }

    #[must_use]
    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    #[must_use]
    pub fn status(&self) -> RoundStatus {
        self.status
    }

    #[must_use]
    pub fn view(&self) -> u32 {
        self.view
    }

    #[must_use]
    pub fn threshold(&self) -> Decimal {
        self.threshold
    }

    #[must_use]
    pub fn voting_power(&self) -> &VotingPower {
        &self.power
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Earliest instant at which [`RoundMachine::tick`] can change state.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        if self.is_terminal() {
            None
        } else {
            Some(self.phase_deadline.min(self.submission.event.deadline))
        }
    }

    /// Double-signing offenses detected since the last call.
    pub fn take_offenses(&mut self) -> Vec<SlashableOffense> {
        std::mem::take(&mut self.offenses)
    }

    /// Prepare tally of the current view.
    #[must_use]
    pub fn prepare_tally(&self) -> Tally {
        let cast: Vec<&Vote> = self.votes.in_view(Phase::Prepare, self.view).collect();
        self.tally(cast)
    }

    /// Commit tally over each validator's latest commit vote, any view.
    #[must_use]
    pub fn commit_tally(&self) -> Tally {
        let latest = self.votes.latest(Phase::Commit);
        self.tally(latest.into_values().collect())
    }

    #[must_use]
    pub fn snapshot(&self) -> ConsensusRound {
        ConsensusRound {
            event_id: self.event_id(),
            event_type: self.submission.event.event_type,
            view: self.view,
            proposer: self.proposer,
            status: self.status,
            prepare_votes: self.votes.all(Phase::Prepare),
            commit_votes: self.votes.all(Phase::Commit),
            prepare_approval: self.prepare_tally().approval(),
            commit_approval: self.commit_tally().approval(),
            threshold: self.threshold,
            outcome: self.outcome.clone(),
            dissenting: self.dissenting(),
            non_responding: self.non_responding(),
            views: self.views.clone(),
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        }
    }

    /// Validators whose latest vote was a rejection.
    #[must_use]
    pub fn dissenting(&self) -> Vec<ValidatorId> {
        self.votes.dissenters().into_iter().collect()
    }

    /// Eligible, non-ejected validators that never voted in this round.
    #[must_use]
    pub fn non_responding(&self) -> Vec<ValidatorId> {
        let voters = self.votes.voters();
        self.power
            .ids()
            .filter(|id| !voters.contains(id) && !self.ejected.contains(id))
            .copied()
            .collect()
    }

    // =================================================================
    // Transitions
    // =================================================================

    fn enter_view(&mut self, view: u32, now: DateTime<Utc>) {
        if let Some(record) = self.views.last_mut() {
            record.timed_out = true;
        }
        // Eligibility is non-empty, so selection always succeeds here.
        let proposer = select_proposer(self.config.proposer_selection, &self.power, self.event_id(), view)
            .unwrap_or(self.proposer);
        self.view = view;
        self.proposer = proposer;
        self.status = RoundStatus::Proposed;
        self.phase_deadline = deadline_after(now, &self.config);
        self.views.push(ViewRecord {
            view,
            proposer,
            started_at: now,
            timed_out: false,
        });
        info!(event_id = %self.event_id(), view, proposer = %proposer, "View change");
    }

    fn propose_if_leader(&mut self, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        let Some(key) = self.signer.as_ref() else {
            return;
        };
        if crypto::validator_id(key) != self.proposer || self.ejected.contains(&self.proposer) {
            return;
        }
        let proposal = Proposal::signed(key, self.event_id(), self.view, self.digest);
        debug!(event_id = %self.event_id(), view = self.view, "Proposing");
        actions.push(Action::Broadcast(ConsensusMessage::Proposal(proposal)));
        self.accept_proposal(now, actions);
    }

    fn accept_proposal(&mut self, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        self.status = RoundStatus::PrePrepared;
        self.phase_deadline = deadline_after(now, &self.config);
        debug!(event_id = %self.event_id(), view = self.view, "Pre-prepared");
        self.cast(Phase::Prepare, actions);
        self.evaluate(now, actions);
    }

    /// Sign and record this validator's own vote for the current view.
    fn cast(&mut self, phase: Phase, actions: &mut Vec<Action>) {
        let Some(key) = self.signer.as_ref() else {
            return;
        };
        let me = crypto::validator_id(key);
        if !self.power.contains(&me)
            || self.ejected.contains(&me)
            || self.votes.get(&me, phase, self.view).is_some()
        {
            return;
        }
        let vote = Vote::signed(key, self.event_id(), self.view, phase, self.decision, self.digest);
        self.votes.insert(vote.clone());
        actions.push(Action::Broadcast(ConsensusMessage::Vote(vote)));
    }

    fn evaluate(&mut self, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        if self.is_terminal() {
            return;
        }

        if matches!(self.status, RoundStatus::Proposed | RoundStatus::PrePrepared) {
            match self.prepare_tally().verdict(self.threshold) {
                Verdict::Reached => {
                    self.status = RoundStatus::Prepared;
                    self.phase_deadline = deadline_after(now, &self.config);
                    debug!(event_id = %self.event_id(), view = self.view, "Prepared");
                    self.cast(Phase::Commit, actions);
                }
                Verdict::Unreachable => {
                    self.finish(RoundOutcome::Rejected(RejectReason::QuorumUnreachable), now, actions);
                    return;
                }
                Verdict::Pending => {}
            }
        } else if self.status == RoundStatus::Prepared {
            // A commit vote is owed once per view.
            self.cast(Phase::Commit, actions);
        }

        match self.commit_tally().verdict(self.threshold) {
            Verdict::Reached => self.finish(RoundOutcome::Committed, now, actions),
            Verdict::Unreachable => {
                self.finish(RoundOutcome::Rejected(RejectReason::QuorumUnreachable), now, actions);
            }
            Verdict::Pending => {}
        }
    }

    fn finish(&mut self, outcome: RoundOutcome, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        let event_id = self.event_id();
        self.closed_at = Some(now);
        let notice = match &outcome {
            RoundOutcome::Committed => {
                self.status = RoundStatus::Committed;
                info!(
                    %event_id,
                    view = self.view,
                    approval = %self.commit_tally().approval(),
                    "Round committed"
                );
                Outcome::Committed {
                    event_id,
                    view: self.view,
                }
            }
            RoundOutcome::Rejected(reason) => {
                self.status = RoundStatus::Rejected;
                let dissenting = self.dissenting();
                let non_responding = self.non_responding();
                info!(
                    %event_id,
                    view = self.view,
                    %reason,
                    dissenting = dissenting.len(),
                    non_responding = non_responding.len(),
                    "Round rejected"
                );
                Outcome::Rejected {
                    event_id,
                    reason: reason.clone(),
                    dissenting,
                    non_responding,
                }
            }
        };
        self.outcome = Some(outcome);
        actions.push(Action::Notify(notice));
    }

    fn tally(&self, cast: Vec<&Vote>) -> Tally {
        let mut tally = Tally::default();
        let mut voted = BTreeSet::new();
        for vote in cast {
            let power = self.power.power(&vote.validator);
            match vote.decision {
                Decision::Approve => tally.approve += power,
                Decision::Reject => tally.reject += power,
                Decision::Abstain => tally.abstain += power,
            }
            voted.insert(vote.validator);
        }
        tally.pending = self
            .power
            .ids()
            .filter(|id| !voted.contains(*id) && !self.ejected.contains(*id))
            .map(|id| self.power.power(id))
            .sum();
        tally
    }
}

fn deadline_after(now: DateTime<Utc>, config: &ConsensusConfig) -> DateTime<Utc> {
    let millis = i64::try_from(config.phase_timeout_ms).unwrap_or(i64::MAX);
    Duration::try_milliseconds(millis)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
