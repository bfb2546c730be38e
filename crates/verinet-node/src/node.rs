//! The verification node: the network's front door.
//!
//! A node holds a trusted, non-voting identity on the gossip mesh. It
//! validates evidence before anything reaches the validators, opens rounds,
//! follows every round with an observer engine, and reacts to each outcome:
//!
//! ```text
//! submit_event ──→ EvidenceValidator ──→ observer engine ──Submit──→ validators
//!                                              │
//!             Committed ──→ anchor, settle, reward (after grace), publish
//!             Rejected  ──→ drop pending settlement, publish
//!             offenses  ──→ IncentiveLedger::slash ──→ ejection notice
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{Notify, broadcast};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use verinet_consensus::{Action, ConsensusEngine, EvidenceEvaluator};
use verinet_evidence::{Collaborators, EvidenceScreen, EvidenceValidator, TrustedSources};
use verinet_network::{GossipNetwork, GossipPeer, GossipSender};
use verinet_registry::{IncentiveLedger, ParticipationTracker, SharedRegistry, SlashReport};
use verinet_settlement::{SettlementCoordinator, settlement_outcome};
use verinet_types::constants::OUTCOME_CHANNEL_CAPACITY;
use verinet_types::services::{
    ComplianceService, CustodyService, IdentityService, LocationService, PaymentService,
};
use verinet_types::{
    CommittedEvent, ConsensusMessage, ConsensusRound, EventId, EvidencePackage, LedgerEntry, NodeConfig, Outcome,
    Result, SettlementTerms, SettlementTransaction, SlashableOffense, Submission, Validator,
    ValidatorId, VerificationEvent, VerinetError, crypto,
};

use crate::agent::until;
use crate::anchor::{AnchorLog, AnchorRecord};
use crate::authorizer::{AUTHORIZATION_SOURCE, ConsensusAuthorizer};
use crate::shutdown::ShutdownController;

/// External systems the node consults.
#[derive(Clone)]
pub struct NodeServices {
    pub identity: Arc<dyn IdentityService>,
    pub location: Arc<dyn LocationService>,
    pub compliance: Arc<dyn ComplianceService>,
    pub custody: Arc<dyn CustodyService>,
    pub payments: Arc<dyn PaymentService>,
}

pub struct VerificationNode {
    shared: Arc<NodeShared>,
    shutdown: ShutdownController,
    driver: JoinHandle<()>,
}

impl VerificationNode {
    /// Join `network` under `key` and start following rounds.
    ///
    /// The network's key directory must already trust the node's identity.
    /// The key also signs the evidence of high-value settlement
    /// authorizations; it is added to `sources` under
    /// [`AUTHORIZATION_SOURCE`].
    ///
    /// # Errors
    /// - [`VerinetError::Configuration`] if `config` does not validate.
    /// - [`VerinetError::IdentityRejected`] if the network does not know the key.
    pub fn start(
        config: NodeConfig,
        key: SigningKey,
        registry: SharedRegistry,
        network: &Arc<GossipNetwork>,
        mut sources: TrustedSources,
        services: NodeServices,
    ) -> Result<Self> {
        config.validate()?;
        let id = crypto::validator_id(&key);
        let peer = network.join(key.clone())?;
        sources.insert(AUTHORIZATION_SOURCE, *id.as_bytes());

        let evidence = EvidenceValidator::new(
            config.evidence.clone(),
            sources,
            Collaborators {
                identity: Arc::clone(&services.identity),
                location: Arc::clone(&services.location),
                custody: Arc::clone(&services.custody),
                compliance: Arc::clone(&services.compliance),
            },
        );
        let engine = ConsensusEngine::observer(
            config.consensus.clone(),
            registry.clone(),
            id,
            Arc::new(EvidenceEvaluator::new(Arc::clone(evidence.screen()))),
        );
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        let (ejections, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);

        let shared = Arc::new_cyclic(|node| {
            let settlement = SettlementCoordinator::new(
                config.settlement.clone(),
                Arc::clone(&services.payments),
                Arc::clone(&services.custody),
            )
            .with_authorizer(Arc::new(ConsensusAuthorizer::new(node.clone())));
            NodeShared {
                id,
                attestation: key,
                registry,
                identity: services.identity,
                evidence,
                engine: Mutex::new(engine),
                gossip: peer.sender(),
                wake: Notify::new(),
                incentives: Mutex::new(IncentiveLedger::new(config.incentive.clone())),
                participation: Mutex::new(ParticipationTracker::new(config.incentive.missed_round_limit)),
                settlement,
                pending: Mutex::new(HashMap::new()),
                anchors: Mutex::new(AnchorLog::new()),
                outcomes,
                ejections,
                config,
            }
        });

        let shutdown = ShutdownController::new();
        let driver = tokio::spawn(drive(Arc::clone(&shared), peer, shutdown.subscribe()));
        info!(node = %id, "Verification node started");
        Ok(Self {
            shared,
            shutdown,
            driver,
        })
    }

    #[must_use]
    pub fn id(&self) -> ValidatorId {
        self.shared.id
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.shared.registry
    }

    /// The offline evidence checks, over the same trusted sources the node
    /// validates with. Validators re-run them on every proposal.
    #[must_use]
    pub fn evidence_screen(&self) -> Arc<EvidenceScreen> {
        Arc::clone(self.shared.evidence.screen())
    }

    // =================================================================
    // Submission
    // =================================================================

    /// Validate the evidence and open a consensus round for `event`.
    ///
    /// # Errors
    /// - [`VerinetError::EvidenceValidationFailure`] or
    ///   [`VerinetError::EvidenceEventMismatch`] if the package does not pass.
    /// - [`VerinetError::DuplicateEvent`] if the event was already submitted.
    /// - [`VerinetError::ConsensusFailure`] if no validator is eligible.
    pub async fn submit_event(&self, event: VerificationEvent, package: EvidencePackage) -> Result<EventId> {
        self.shared.submit(event, package).await
    }

    /// As [`VerificationNode::submit_event`], and settle `terms` once the
    /// round commits. The settlement result arrives as a
    /// `SettlementCompleted` or `SettlementReversed` outcome.
    ///
    /// # Errors
    /// As [`VerificationNode::submit_event`], plus
    /// [`VerinetError::PreconditionFailure`] for a non-positive amount.
    pub async fn submit_event_with_settlement(
        &self,
        event: VerificationEvent,
        package: EvidencePackage,
        terms: SettlementTerms,
    ) -> Result<EventId> {
        if terms.amount <= Decimal::ZERO {
            return Err(VerinetError::PreconditionFailure {
                reason: format!("settlement amount must be positive, got {}", terms.amount),
            });
        }
        let event_id = event.id;
        match self.shared.pending.lock().entry(event_id) {
            Entry::Occupied(_) => return Err(VerinetError::DuplicateEvent(event_id)),
            Entry::Vacant(slot) => {
                slot.insert(terms);
            }
        }
        let submitted = self.shared.submit(event, package).await;
        if submitted.is_err() {
            self.shared.pending.lock().remove(&event_id);
        }
        submitted
    }

    /// Cancel a round this node submitted. Validators move it straight to
    /// `Rejected` and any pending settlement is dropped.
    ///
    /// # Errors
    /// [`VerinetError::UnknownEvent`] if the node never saw the event.
    pub fn cancel_event(&self, event_id: EventId) -> Result<()> {
        let actions = self
            .shared
            .engine
            .lock()
            .abort(event_id, "cancelled by submitter", Utc::now())?;
        info!(%event_id, "Event cancelled");
        self.shared.apply(actions);
        self.shared.wake.notify_one();
        Ok(())
    }

    // =================================================================
    // Queries
    // =================================================================

    /// Snapshot of the round as this node has observed it.
    ///
    /// # Errors
    /// [`VerinetError::UnknownEvent`] if the node never saw the event.
    pub fn get_consensus_status(&self, event_id: EventId) -> Result<ConsensusRound> {
        self.shared
            .engine
            .lock()
            .status(&event_id)
            .ok_or(VerinetError::UnknownEvent(event_id))
    }

    /// Current individual weight of a validator.
    ///
    /// # Errors
    /// [`VerinetError::ValidatorNotFound`] for unknown validators.
    pub fn get_validator_weight(&self, id: &ValidatorId) -> Result<Decimal> {
        self.shared.registry.read().compute_weight(id)
    }

    /// Latest settlement attempt for an event.
    #[must_use]
    pub fn settlement(&self, event_id: &EventId) -> Option<SettlementTransaction> {
        self.shared.settlement.for_event(event_id)
    }

    #[must_use]
    pub fn anchor_log(&self) -> AnchorLog {
        self.shared.anchors.lock().clone()
    }

    #[must_use]
    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.shared.incentives.lock().entries().to_vec()
    }

    /// Slash `validator` for colluding in the round for `event_id`, as
    /// established by the governance decision `reference`. Ejects the
    /// validator if its stake falls under the minimum.
    ///
    /// Returns `None` if collusion in that round was already slashed.
    ///
    /// # Errors
    /// - [`VerinetError::IncentiveError`] for an empty `reference`.
    /// - [`VerinetError::ValidatorNotFound`] for unknown validators.
    pub fn report_collusion(
        &self,
        validator: ValidatorId,
        event_id: EventId,
        reference: &str,
    ) -> Result<Option<SlashReport>> {
        let offense = SlashableOffense::collusion(validator, event_id, reference);
        info!(%validator, %event_id, reference, "Collusion reported");
        self.shared.slash(&offense)
    }

    // =================================================================
    // Subscriptions
    // =================================================================

    /// Every outcome from now on. A receiver that falls more than the
    /// channel capacity behind skips ahead.
    #[must_use]
    pub fn subscribe_to_outcomes(&self) -> broadcast::Receiver<Outcome> {
        self.shared.outcomes.subscribe()
    }

    /// Run `callback` for every outcome on a background task.
    pub fn on_outcome<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(Outcome) + Send + 'static,
    {
        let mut outcomes = self.subscribe_to_outcomes();
        tokio::spawn(async move {
            loop {
                match outcomes.recv().await {
                    Ok(outcome) => callback(outcome),
                    Err(RecvError::Lagged(missed)) => warn!(missed, "Outcome callback lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Validators ejected by slashing. Validator agents stop counting
    /// them in open rounds.
    #[must_use]
    pub fn subscribe_to_ejections(&self) -> broadcast::Receiver<ValidatorId> {
        self.shared.ejections.subscribe()
    }

    // =================================================================
    // Membership
    // =================================================================

    /// Admit a validator once the identity service confirms its operator
    /// is enrolled under the category it claims.
    ///
    /// # Errors
    /// - [`VerinetError::IdentityRejected`] if the operator is unknown,
    ///   revoked, or enrolled under another category.
    /// - Any registry error: duplicate, invalid stake or reputation.
    pub async fn register_validator(&self, validator: Validator) -> Result<ValidatorId> {
        let operator = validator.operator.clone();
        let record = self.shared.identity.verify_identity(&operator).await?;
        if !record.valid {
            return Err(VerinetError::IdentityRejected {
                reason: format!("{operator} is not a verified identity"),
            });
        }
        match record.category {
            Some(category) if category == validator.category => {}
            Some(category) => {
                return Err(VerinetError::IdentityRejected {
                    reason: format!("{operator} is enrolled as {category}, not {}", validator.category),
                });
            }
            None => {
                return Err(VerinetError::IdentityRejected {
                    reason: format!("{operator} has no stakeholder category"),
                });
            }
        }

        let category = validator.category;
        let id = self.shared.registry.write().register(validator)?;
        info!(validator = %id, %operator, %category, "Validator admitted");
        Ok(id)
    }

    /// Stop the driver task and wait for it.
    pub async fn shutdown(self) {
        self.shutdown.shutdown();
        if let Err(err) = self.driver.await {
            warn!(error = %err, "Node driver ended abnormally");
        }
        info!(node = %self.shared.id, "Verification node stopped");
    }
}

// =============================================================================
// Shared state
// =============================================================================

pub(crate) struct NodeShared {
    config: NodeConfig,
    id: ValidatorId,
    attestation: SigningKey,
    registry: SharedRegistry,
    identity: Arc<dyn IdentityService>,
    evidence: EvidenceValidator,
    engine: Mutex<ConsensusEngine>,
    gossip: GossipSender,
    /// Wakes the driver when a local call changes the next deadline.
    wake: Notify,
    incentives: Mutex<IncentiveLedger>,
    participation: Mutex<ParticipationTracker>,
    settlement: SettlementCoordinator,
    pending: Mutex<HashMap<EventId, SettlementTerms>>,
    anchors: Mutex<AnchorLog>,
    outcomes: broadcast::Sender<Outcome>,
    ejections: broadcast::Sender<ValidatorId>,
}

impl NodeShared {
    pub(crate) fn attestation_key(&self) -> &SigningKey {
        &self.attestation
    }

    pub(crate) fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Outcome> {
        self.outcomes.subscribe()
    }

    pub(crate) fn status(&self, event_id: &EventId) -> Option<ConsensusRound> {
        self.engine.lock().status(event_id)
    }

    pub(crate) async fn submit(self: &Arc<Self>, event: VerificationEvent, package: EvidencePackage) -> Result<EventId> {
        let event_id = event.id;
        if self.engine.lock().status(&event_id).is_some() {
            return Err(VerinetError::DuplicateEvent(event_id));
        }
        let validation = self.evidence.validate_for(&event, &package).await?;
        let event_type = event.event_type;
        let submission = Submission {
            event,
            package,
            validation,
        };
        let actions = self.engine.lock().submit(submission, Utc::now())?;
        info!(%event_id, %event_type, "Event submitted");
        self.apply(actions);
        self.wake.notify_one();
        Ok(event_id)
    }

    // =================================================================
    // Engine plumbing
    // =================================================================

    fn on_message(self: &Arc<Self>, from: ValidatorId, message: ConsensusMessage) {
        let kind = message.kind();
        let (result, offenses) = {
            let mut engine = self.engine.lock();
            let result = engine.handle(from, message, Utc::now());
            (result, engine.take_offenses())
        };
        match result {
            Ok(actions) => self.apply(actions),
            Err(err) => debug!(%from, kind, error = %err, "Message refused"),
        }
        self.punish(offenses);
    }

    fn on_deadline(self: &Arc<Self>) {
        let actions = self.engine.lock().tick(Utc::now());
        self.apply(actions);
    }

    fn apply(self: &Arc<Self>, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Broadcast(message) => {
                    let kind = message.kind();
                    let event_id = message.event_id();
                    match self.gossip.broadcast(message) {
                        Ok(sent) if sent.failed > 0 => {
                            warn!(%event_id, kind, sent = sent.sent, failed = sent.failed, "Broadcast partially failed");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(%event_id, kind, error = %err, "Broadcast failed"),
                    }
                }
                Action::Notify(outcome) => self.on_outcome(outcome),
            }
        }
    }

    fn on_outcome(self: &Arc<Self>, outcome: Outcome) {
        match &outcome {
            Outcome::Committed { event_id, .. } => {
                let event_id = *event_id;
                self.anchor_round(event_id);
                self.publish(outcome);
                self.schedule_accounting(event_id);
                self.start_settlement(event_id);
            }
            Outcome::Rejected { event_id, .. } => {
                let event_id = *event_id;
                if self.pending.lock().remove(&event_id).is_some() {
                    info!(%event_id, "Round rejected, settlement dropped");
                }
                self.publish(outcome);
                self.schedule_accounting(event_id);
            }
            _ => self.publish(outcome),
        }
    }

    fn publish(&self, outcome: Outcome) {
        debug!(event_id = %outcome.event_id(), subscribers = self.outcomes.receiver_count(), "Publishing outcome");
        // No subscribers is not an error.
        let _ = self.outcomes.send(outcome);
    }

    // =================================================================
    // Anchoring
    // =================================================================

    fn anchor_round(&self, event_id: EventId) {
        let record = {
            let engine = self.engine.lock();
            let (Some(round), Some(submission)) = (engine.status(&event_id), engine.submission(&event_id)) else {
                return;
            };
            AnchorRecord::RoundCommitted {
                event_id,
                event_type: round.event_type,
                event_digest: submission.event.digest(),
                evidence_digest: submission.validation.digest,
                view: round.view,
                commit_approval: round.commit_approval,
                threshold: round.threshold,
            }
        };
        self.anchor(record);
    }

    fn anchor(&self, record: AnchorRecord) {
        if let Err(err) = self.anchors.lock().append(record, Utc::now()) {
            error!(error = %err, "Anchor append failed");
        }
    }

    // =================================================================
    // Incentives
    // =================================================================

    /// Rewards and participation are booked one phase timeout after the
    /// round ends, so votes still in flight at the decision are counted.
    fn schedule_accounting(self: &Arc<Self>, event_id: EventId) {
        let node = Arc::clone(self);
        let grace = self.config.consensus.phase_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            node.settle_accounts(event_id);
        });
    }

    fn settle_accounts(self: &Arc<Self>, event_id: EventId) {
        let (round, power) = {
            let engine = self.engine.lock();
            match (engine.status(&event_id), engine.voting_power(&event_id)) {
                (Some(round), Some(power)) => (round, power.clone()),
                _ => return,
            }
        };
        let offenses = {
            let mut registry = self.registry.write();
            if round.is_committed() {
                match self.incentives.lock().reward(&mut registry, &round, &power) {
                    Ok(paid) if !paid.is_empty() => info!(%event_id, validators = paid.len(), "Round rewards paid"),
                    Ok(_) => {}
                    Err(err) => warn!(%event_id, error = %err, "Round rewards not paid"),
                }
            }
            self.participation.lock().record(&round, &power)
        };
        self.punish(offenses);
    }

    fn punish(self: &Arc<Self>, offenses: Vec<SlashableOffense>) {
        for offense in offenses {
            if let Err(err) = self.slash(&offense) {
                warn!(validator = %offense.validator, error = %err, "Offense not applied");
            }
        }
    }

    fn slash(self: &Arc<Self>, offense: &SlashableOffense) -> Result<Option<SlashReport>> {
        let report = {
            let mut registry = self.registry.write();
            self.incentives.lock().slash(&mut registry, offense)?
        };
        match &report {
            Some(report) => {
                warn!(
                    validator = %report.validator,
                    offense = %report.offense,
                    amount = %report.amount,
                    stake = %report.resulting_stake,
                    "Validator slashed"
                );
                if report.ejected {
                    self.eject(report.validator);
                }
            }
            None => debug!(validator = %offense.validator, offense = %offense.offense, "Offense already slashed"),
        }
        Ok(report)
    }

    fn eject(self: &Arc<Self>, id: ValidatorId) {
        warn!(validator = %id, "Validator ejected");
        let _ = self.ejections.send(id);
        let actions = self.engine.lock().on_ejected(id, Utc::now());
        self.apply(actions);
    }

    // =================================================================
    // Settlement
    // =================================================================

    fn start_settlement(self: &Arc<Self>, event_id: EventId) {
        let Some(terms) = self.pending.lock().remove(&event_id) else {
            return;
        };
        let committed = {
            let engine = self.engine.lock();
            match (engine.submission(&event_id), engine.status(&event_id)) {
                (Some(submission), Some(round)) => CommittedEvent::from_round(submission.event.clone(), round),
                _ => Err(VerinetError::UnknownEvent(event_id)),
            }
        };
        let committed = match committed {
            Ok(committed) => committed,
            Err(err) => {
                error!(%event_id, error = %err, "Committed round unavailable for settlement");
                return;
            }
        };
        let node = Arc::clone(self);
        tokio::spawn(async move { node.settle(committed, terms).await });
    }

    async fn settle(self: Arc<Self>, committed: CommittedEvent, terms: SettlementTerms) {
        let event_id = committed.event_id();
        if let Err(err) = self.settlement.initiate(&committed, &terms).await {
            warn!(%event_id, error = %err, retryable = err.is_retryable(), "Settlement did not complete");
        }
        let Some(outcome) = self.settlement.for_event(&event_id).as_ref().and_then(settlement_outcome) else {
            return;
        };
        let record = match &outcome {
            Outcome::SettlementCompleted { settlement_id, event_id } => AnchorRecord::SettlementCompleted {
                settlement_id: *settlement_id,
                event_id: *event_id,
            },
            Outcome::SettlementReversed {
                settlement_id,
                event_id,
                status,
                reason,
            } => AnchorRecord::SettlementReversed {
                settlement_id: *settlement_id,
                event_id: *event_id,
                status: *status,
                reason: reason.clone(),
            },
            _ => return,
        };
        self.anchor(record);
        self.publish(outcome);
    }
}

// =============================================================================
// Driver
// =============================================================================

async fn drive(node: Arc<NodeShared>, mut peer: GossipPeer, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let deadline = node.engine.lock().next_deadline();
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            received = peer.recv() => match received {
                Some((from, message)) => node.on_message(from, message),
                None => break,
            },
            () = node.wake.notified() => {}
            () = until(deadline) => node.on_deadline(),
        }
    }
    debug!(node = %node.id, "Node driver stopped");
}
