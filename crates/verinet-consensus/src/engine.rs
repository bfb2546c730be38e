//! A validator's consensus engine: every round it takes part in.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use tracing::{debug, warn};
use verinet_registry::{SharedRegistry, VotingPower};
use verinet_types::{
    ConsensusConfig, ConsensusMessage, ConsensusRound, EventId, Outcome, Result, SlashableOffense,
    Submission, ValidatorId, VerinetError, crypto,
};

use crate::evaluator::ProposalEvaluator;
use crate::round::RoundMachine;

/// Messages held back because they arrived before their round's `Submit`.
const MAX_EARLY_MESSAGES_PER_EVENT: usize = 1_024;

/// Distinct events with held-back messages.
const MAX_EARLY_EVENTS: usize = 256;

/// Messages for an event whose `Submit` has not arrived yet.
struct Early {
    /// Past this a round would have finished anyway.
    expires_at: DateTime<Utc>,
    messages: Vec<(ValidatorId, ConsensusMessage)>,
}

/// Side effects requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Gossip to every peer.
    Broadcast(ConsensusMessage),
    /// Tell outcome subscribers.
    Notify(Outcome),
}

/// Maps events to rounds for one validator (or for a non-voting observer).
///
/// The engine is the only writer of its validator's votes. It never blocks:
/// time only moves through `now` arguments and [`ConsensusEngine::tick`].
pub struct ConsensusEngine {
    config: ConsensusConfig,
    registry: SharedRegistry,
    local: ValidatorId,
    signer: Option<SigningKey>,
    evaluator: Arc<dyn ProposalEvaluator>,
    /// Peers besides this engine allowed to open rounds.
    submitters: BTreeSet<ValidatorId>,
    rounds: BTreeMap<EventId, RoundMachine>,
    early: HashMap<EventId, Early>,
    offenses: Vec<SlashableOffense>,
}

impl ConsensusEngine {
    /// Engine for a voting validator identified by `key`.
    #[must_use]
    pub fn validator(
        config: ConsensusConfig,
        registry: SharedRegistry,
        key: SigningKey,
        evaluator: Arc<dyn ProposalEvaluator>,
    ) -> Self {
        let local = crypto::validator_id(&key);
        Self::build(config, registry, local, Some(key), evaluator)
    }

    /// Engine that follows rounds without voting. `local` is the node's
    /// identity, used as the origin of events it submits.
    #[must_use]
    pub fn observer(
        config: ConsensusConfig,
        registry: SharedRegistry,
        local: ValidatorId,
        evaluator: Arc<dyn ProposalEvaluator>,
    ) -> Self {
        Self::build(config, registry, local, None, evaluator)
    }

    fn build(
        config: ConsensusConfig,
        registry: SharedRegistry,
        local: ValidatorId,
        signer: Option<SigningKey>,
        evaluator: Arc<dyn ProposalEvaluator>,
    ) -> Self {
        Self {
            config,
            registry,
            local,
            signer,
            evaluator,
            submitters: BTreeSet::new(),
            rounds: BTreeMap::new(),
            early: HashMap::new(),
            offenses: Vec::new(),
        }
    }

    /// Accept `Submit` messages from these peers as well as from this
    /// engine itself.
    #[must_use]
    pub fn with_submitters(mut self, submitters: impl IntoIterator<Item = ValidatorId>) -> Self {
        self.submitters.extend(submitters);
        self
    }

    #[must_use]
    pub fn local_id(&self) -> ValidatorId {
        self.local
    }

    #[must_use]
    pub fn may_submit(&self, id: &ValidatorId) -> bool {
        *id == self.local || self.submitters.contains(id)
    }

    // =================================================================
    // Inputs
    // =================================================================

    /// Open a round submitted locally and return the `Submit` broadcast
    /// followed by this engine's own first actions.
    ///
    /// # Errors
    /// See [`ConsensusEngine::open`].
    pub fn submit(&mut self, submission: Submission, now: DateTime<Utc>) -> Result<Vec<Action>> {
        let broadcast = Action::Broadcast(ConsensusMessage::Submit(Box::new(submission.clone())));
        let mut actions = self.open(self.local, submission, now)?;
        actions.insert(0, broadcast);
        Ok(actions)
    }

    /// Open a round for a submission sent by `origin`.
    ///
    /// Eligibility is fixed from the registry at this moment. Messages that
    /// arrived for the event earlier are replayed.
    ///
    /// # Errors
    /// - [`VerinetError::DuplicateEvent`] if a round for the event exists.
    /// - [`VerinetError::ConsensusFailure`] if no validator is eligible.
    pub fn open(&mut self, origin: ValidatorId, submission: Submission, now: DateTime<Utc>) -> Result<Vec<Action>> {
        let event_id = submission.event.id;
        if self.rounds.contains_key(&event_id) {
            return Err(VerinetError::DuplicateEvent(event_id));
        }
        let power = self
            .registry
            .read()
            .voting_power(&submission.event.required_categories);
        let (machine, mut actions) = RoundMachine::open(
            submission,
            origin,
            self.config.clone(),
            power,
            self.signer.clone(),
            self.evaluator.as_ref(),
            now,
        )?;
        self.rounds.insert(event_id, machine);

        let held = self.early.remove(&event_id).map(|e| e.messages).unwrap_or_default();
        for (from, message) in held {
            match self.handle(from, message, now) {
                Ok(more) => actions.extend(more),
                Err(err) => debug!(%event_id, error = %err, "Replayed message refused"),
            }
        }
        Ok(actions)
    }

    /// Feed a message received from peer `from`.
    ///
    /// Messages for unknown events are buffered until their `Submit` arrives,
    /// and only from active validators or authorised submitters.
    ///
    /// # Errors
    /// - [`VerinetError::MessageRejected`] for a `Submit` from a peer that
    ///   may not submit, or an early message from an unknown sender.
    ///
    /// Otherwise whatever the round refuses the message with. A
    /// [`VerinetError::ConflictingVote`] also queues a double-signing
    /// offense, collected with [`ConsensusEngine::take_offenses`].
    pub fn handle(&mut self, from: ValidatorId, message: ConsensusMessage, now: DateTime<Utc>) -> Result<Vec<Action>> {
        let event_id = message.event_id();
        if let ConsensusMessage::Submit(submission) = message {
            if !self.may_submit(&from) {
                warn!(%event_id, %from, "Submit from unauthorised peer refused");
                return Err(VerinetError::MessageRejected {
                    reason: format!("{from} may not submit events"),
                });
            }
            return self.open(from, *submission, now);
        }

        let Some(round) = self.rounds.get_mut(&event_id) else {
            return self.hold(from, message, now);
        };

        let result = match message {
            ConsensusMessage::Proposal(proposal) => round.on_proposal(proposal, now),
            ConsensusMessage::Vote(vote) => round.on_vote(vote, now),
            ConsensusMessage::Abort { reason, .. } => round.abort(&from, reason, now),
            ConsensusMessage::Submit(_) => Ok(Vec::new()),
        };
        self.offenses.extend(round.take_offenses());
        result
    }

    /// Cancel a round this node submitted and tell the other validators.
    ///
    /// # Errors
    /// - [`VerinetError::UnknownEvent`] if no round exists.
    /// - [`VerinetError::MessageRejected`] if this node is not the submitter.
    pub fn abort(&mut self, event_id: EventId, reason: &str, now: DateTime<Utc>) -> Result<Vec<Action>> {
        let round = self
            .rounds
            .get_mut(&event_id)
            .ok_or(VerinetError::UnknownEvent(event_id))?;
        let mut actions = vec![Action::Broadcast(ConsensusMessage::Abort {
            event_id,
            reason: reason.to_string(),
        })];
        actions.extend(round.abort(&self.local, reason.to_string(), now)?);
        Ok(actions)
    }

    fn hold(&mut self, from: ValidatorId, message: ConsensusMessage, now: DateTime<Utc>) -> Result<Vec<Action>> {
        let event_id = message.event_id();
        if !self.may_submit(&from) && !self.registry.read().is_active(&from) {
            return Err(VerinetError::MessageRejected {
                reason: format!("{from} is not an active validator"),
            });
        }
        if !self.early.contains_key(&event_id) && self.early.len() >= MAX_EARLY_EVENTS {
            warn!(%event_id, kind = message.kind(), "Too many events awaiting submission, dropping");
            return Ok(Vec::new());
        }
        let expires_at = early_expiry(now, &self.config);
        let early = self.early.entry(event_id).or_insert_with(|| Early {
            expires_at,
            messages: Vec::new(),
        });
        if early.messages.len() < MAX_EARLY_MESSAGES_PER_EVENT {
            early.messages.push((from, message));
        } else {
            warn!(%event_id, kind = message.kind(), "Early message buffer full, dropping");
        }
        Ok(Vec::new())
    }

    /// Advance every open round to `now` and forget held-back messages
    /// whose `Submit` never came.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Action> {
        self.early.retain(|event_id, early| {
            let live = early.expires_at > now;
            if !live {
                debug!(%event_id, held = early.messages.len(), "Dropping messages for an event never submitted");
            }
            live
        });
        self.rounds
            .values_mut()
            .filter(|r| !r.is_terminal())
            .flat_map(|r| r.tick(now))
            .collect()
    }

    /// A validator was ejected; drop it from every open round's pending set.
    pub fn on_ejected(&mut self, id: ValidatorId, now: DateTime<Utc>) -> Vec<Action> {
        self.rounds
            .values_mut()
            .filter(|r| !r.is_terminal())
            .flat_map(|r| r.on_ejected(id, now))
            .collect()
    }

    // =================================================================
    // Queries
    // =================================================================

    #[must_use]
    pub fn status(&self, event_id: &EventId) -> Option<ConsensusRound> {
        self.rounds.get(event_id).map(RoundMachine::snapshot)
    }

    #[must_use]
    pub fn voting_power(&self, event_id: &EventId) -> Option<&VotingPower> {
        self.rounds.get(event_id).map(RoundMachine::voting_power)
    }

    #[must_use]
    pub fn submission(&self, event_id: &EventId) -> Option<&Submission> {
        self.rounds.get(event_id).map(RoundMachine::submission)
    }

    /// Earliest deadline across open rounds and held-back messages.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.rounds
            .values()
            .filter_map(RoundMachine::next_deadline)
            .chain(self.early.values().map(|e| e.expires_at))
            .min()
    }

    /// Double-signing offenses observed since the last call.
    pub fn take_offenses(&mut self) -> Vec<SlashableOffense> {
        std::mem::take(&mut self.offenses)
    }

    /// Number of rounds still in progress.
    #[must_use]
    pub fn open_rounds(&self) -> usize {
        self.rounds.values().filter(|r| !r.is_terminal()).count()
    }

    /// Events with messages waiting for their `Submit`.
    #[must_use]
    pub fn held_events(&self) -> usize {
        self.early.len()
    }
}

/// Three phases per view, every view the round may use.
fn early_expiry(now: DateTime<Utc>, config: &ConsensusConfig) -> DateTime<Utc> {
    let views = i64::from(config.max_view_changes) + 1;
    let millis = i64::try_from(config.phase_timeout_ms)
        .unwrap_or(i64::MAX)
        .saturating_mul(3)
        .saturating_mul(views);
    Duration::try_milliseconds(millis)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
