//! Integration test: whole rounds across ten validators.
//!
//! Every validator runs its own engine; a queue stands in for the gossip
//! layer. Layout matches the reference network: two government, three
//! enterprise, three community and two academic validators with equal stake.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use verinet_consensus::{Action, ConsensusEngine, ProposalEvaluator, select_proposer};
use verinet_registry::{SharedRegistry, ValidatorRegistry};
use verinet_types::{
    Category, ConsensusConfig, ConsensusMessage, ConsensusRound, Decision, EventId, EventType,
    EvidencePackage, Outcome, PartyId, Phase, RegistryConfig, RejectReason, RoundOutcome,
    RoundStatus, Submission, ValidationResult, Validator, ValidatorId, VerificationEvent, Vote,
    crypto,
};
use verinet_types::Decision::{Approve as A, Reject as R};

const ORIGIN: ValidatorId = ValidatorId([0xEE; 32]);

const LAYOUT: [Category; 10] = [
    Category::Government,
    Category::Government,
    Category::Enterprise,
    Category::Enterprise,
    Category::Enterprise,
    Category::Community,
    Category::Community,
    Category::Community,
    Category::Academic,
    Category::Academic,
];

struct Fixed(Decision);

impl ProposalEvaluator for Fixed {
    fn evaluate(&self, _: &Submission, _: DateTime<Utc>) -> Decision {
        self.0
    }
}

struct Sim {
    config: ConsensusConfig,
    registry: SharedRegistry,
    keys: Vec<SigningKey>,
    /// `None` is a crashed or Byzantine validator driven by the test.
    engines: Vec<Option<ConsensusEngine>>,
    inbox: Vec<(usize, ValidatorId, ConsensusMessage)>,
    outcomes: Vec<Vec<Outcome>>,
    refused: usize,
    now: DateTime<Utc>,
    rng: Option<StdRng>,
}

impl Sim {
    fn new(decisions: [Option<Decision>; 10]) -> Self {
        let config = ConsensusConfig::default();
        let registry = ValidatorRegistry::shared(RegistryConfig::default());
        let keys: Vec<SigningKey> = (0..10).map(|_| crypto::generate_key()).collect();
        for (i, key) in keys.iter().enumerate() {
            registry
                .write()
                .register(Validator::new(
                    crypto::validator_id(key),
                    PartyId::new(format!("op-{i}")),
                    LAYOUT[i],
                    Decimal::from(10_000),
                    Decimal::ONE,
                ))
                .unwrap();
        }
        let engines = keys
            .iter()
            .zip(decisions)
            .map(|(key, decision)| {
                decision.map(|d| {
                    ConsensusEngine::validator(
                        config.clone(),
                        registry.clone(),
                        key.clone(),
                        Arc::new(Fixed(d)),
                    )
                    .with_submitters([ORIGIN])
                })
            })
            .collect();
        Self {
            config,
            registry,
            keys,
            engines,
            inbox: Vec::new(),
            outcomes: vec![Vec::new(); 10],
            refused: 0,
            now: Utc::now(),
            rng: None,
        }
    }

    fn id(&self, i: usize) -> ValidatorId {
        crypto::validator_id(&self.keys[i])
    }

    fn online(&self) -> Vec<usize> {
        (0..10).filter(|i| self.engines[*i].is_some()).collect()
    }

    fn engine(&mut self, i: usize) -> &mut ConsensusEngine {
        self.engines[i].as_mut().unwrap()
    }

    /// Queue `message` from `from` for every online validator except `skip`.
    fn send_all(&mut self, from: ValidatorId, skip: Option<usize>, message: &ConsensusMessage) {
        for j in self.online() {
            if Some(j) != skip {
                self.inbox.push((j, from, message.clone()));
            }
        }
    }

    fn dispatch(&mut self, source: Option<usize>, actions: Vec<Action>) {
        let from = source.map_or(ORIGIN, |i| self.id(i));
        for action in actions {
            match action {
                Action::Broadcast(message) => self.send_all(from, source, &message),
                Action::Notify(outcome) => {
                    if let Some(i) = source {
                        self.outcomes[i].push(outcome);
                    }
                }
            }
        }
    }

    fn submit(&mut self, submission: Submission) {
        self.send_all(ORIGIN, None, &ConsensusMessage::Submit(Box::new(submission)));
    }

    fn run(&mut self) {
        while !self.inbox.is_empty() {
            let pick = match self.rng.as_mut() {
                Some(rng) => rng.gen_range(0..self.inbox.len()),
                None => 0,
            };
            let (to, from, message) = self.inbox.remove(pick);
            let result = match self.engines[to].as_mut() {
                Some(engine) => engine.handle(from, message, self.now),
                None => continue,
            };
            match result {
                Ok(actions) => self.dispatch(Some(to), actions),
                Err(_) => self.refused += 1,
            }
        }
    }

    fn advance(&mut self) {
        self.now += Duration::milliseconds(i64::try_from(self.config.phase_timeout_ms).unwrap());
        for i in self.online() {
            let now = self.now;
            let actions = self.engine(i).tick(now);
            self.dispatch(Some(i), actions);
        }
    }

    /// Deliver everything, letting phases time out, until every online
    /// validator has a final outcome.
    fn settle(&mut self, event_id: EventId) {
        for _ in 0..=self.config.max_view_changes + 1 {
            self.run();
            if self.rounds(event_id).iter().all(ConsensusRound::is_terminal) {
                return;
            }
            self.advance();
        }
        self.run();
    }

    fn rounds(&self, event_id: EventId) -> Vec<ConsensusRound> {
        self.engines
            .iter()
            .flatten()
            .map(|e| e.status(&event_id).expect("round opened"))
            .collect()
    }
}

fn submission(seed: u8) -> Submission {
    let mut event = VerificationEvent::dummy(EventType::DisputeResolution);
    event.id = EventId::from_bytes([seed; 16]);
    let package = EvidencePackage::new(event.id, Vec::new());
    let validation = ValidationResult::accepted(package.digest(), None);
    Submission {
        event,
        package,
        validation,
    }
}

/// A submission whose view-0 proposer is online, so no view change is
/// needed before the first proposal.
fn led_by_online(sim: &Sim) -> Submission {
    let power = sim.registry.read().voting_power(&[]);
    let online: Vec<ValidatorId> = sim.online().into_iter().map(|i| sim.id(i)).collect();
    (0..=u8::MAX)
        .map(submission)
        .find(|s| {
            select_proposer(sim.config.proposer_selection, &power, s.event.id, 0)
                .is_some_and(|leader| online.contains(&leader))
        })
        .expect("some event is led by an online validator")
}

fn signed_vote(key: &SigningKey, s: &Submission, view: u32, phase: Phase, decision: Decision) -> Vote {
    Vote::signed(key, s.event.id, view, phase, decision, s.proposal_digest())
}

fn assert_all(rounds: &[ConsensusRound], status: RoundStatus) {
    assert!(!rounds.is_empty());
    for round in rounds {
        assert_eq!(round.status, status, "outcome {:?}", round.outcome);
    }
}

#[test]
fn government_enterprise_and_one_community_commit() {
    let decisions = [Some(A), Some(A), Some(A), Some(A), Some(A), Some(A), Some(R), Some(R), Some(R), Some(R)];
    let mut sim = Sim::new(decisions);
    let s = submission(1);
    let event_id = s.event.id;
    sim.submit(s);
    sim.settle(event_id);

    let rounds = sim.rounds(event_id);
    assert_all(&rounds, RoundStatus::Committed);
    assert_eq!(rounds[0].view, 0);

    let power = sim.engines[0].as_ref().unwrap().voting_power(&event_id).unwrap();
    let approving: Vec<ValidatorId> = (0..6).map(|i| sim.id(i)).collect();
    let approval = power.sum(&approving);
    assert!((approval - Decimal::new(7667, 4)).abs() < Decimal::new(1, 4), "got {approval}");
    assert!(sim.outcomes[0].iter().any(|o| matches!(o, Outcome::Committed { .. })));
}

#[test]
fn community_and_academic_alone_are_rejected() {
    let decisions = [Some(R), Some(R), Some(R), Some(R), Some(R), Some(A), Some(A), Some(A), Some(A), Some(A)];
    let mut sim = Sim::new(decisions);
    let s = submission(2);
    let event_id = s.event.id;
    sim.submit(s);
    sim.settle(event_id);

    let rounds = sim.rounds(event_id);
    assert_all(&rounds, RoundStatus::Rejected);
    for round in &rounds {
        assert_eq!(round.outcome, Some(RoundOutcome::Rejected(RejectReason::QuorumUnreachable)));
        assert_eq!(round.dissenting.len(), 5);
        assert!(round.non_responding.is_empty());
        assert!(round.prepare_approval < round.threshold);
    }
}

#[test]
fn equivocating_minority_cannot_block_honest_commit() {
    // Community and academic (0.30 of the weight) are Byzantine.
    let decisions = [Some(A), Some(A), Some(A), Some(A), Some(A), None, None, None, None, None];
    let mut sim = Sim::new(decisions);
    let s = led_by_online(&sim);
    let event_id = s.event.id;
    sim.submit(s.clone());

    let honest = sim.online();
    for b in 5..10 {
        let from = sim.id(b);
        for (n, j) in honest.iter().enumerate() {
            let decision = if n % 2 == 0 { A } else { R };
            for phase in [Phase::Prepare, Phase::Commit] {
                let v = signed_vote(&sim.keys[b], &s, 0, phase, decision);
                sim.inbox.push((*j, from, ConsensusMessage::Vote(v)));
            }
        }
        // Validator 0 sees both faces.
        let v = signed_vote(&sim.keys[b], &s, 0, Phase::Prepare, R);
        sim.inbox.push((0, from, ConsensusMessage::Vote(v)));
    }
    sim.settle(event_id);

    assert_all(&sim.rounds(event_id), RoundStatus::Committed);
    let offenses = sim.engine(0).take_offenses();
    assert_eq!(offenses.len(), 5);
    assert!(offenses.iter().all(verinet_types::SlashableOffense::is_proven));
}

#[test]
fn byzantine_approvals_cannot_commit_a_rejected_event() {
    let decisions = [Some(R), Some(R), Some(R), Some(R), Some(R), None, None, None, None, None];
    let mut sim = Sim::new(decisions);
    let s = led_by_online(&sim);
    let event_id = s.event.id;
    sim.submit(s.clone());
    for b in 5..10 {
        for phase in [Phase::Prepare, Phase::Commit] {
            let v = signed_vote(&sim.keys[b], &s, 0, phase, A);
            let from = sim.id(b);
            sim.send_all(from, None, &ConsensusMessage::Vote(v));
        }
    }
    sim.settle(event_id);

    let rounds = sim.rounds(event_id);
    assert_all(&rounds, RoundStatus::Rejected);
    assert!(rounds.iter().all(|r| !r.is_committed()));
}

#[test]
fn silent_proposer_is_replaced_by_view_change() {
    let decisions = [Some(A); 10];
    let mut sim = Sim::new(decisions);
    let s = submission(5);
    let event_id = s.event.id;

    let power = sim.registry.read().voting_power(&[]);
    let leader = select_proposer(sim.config.proposer_selection, &power, event_id, 0).unwrap();
    let crashed = (0..10).find(|i| sim.id(*i) == leader).unwrap();
    sim.engines[crashed] = None;

    sim.submit(s);
    sim.settle(event_id);

    let rounds = sim.rounds(event_id);
    assert_all(&rounds, RoundStatus::Committed);
    for round in &rounds {
        assert!(round.view >= 1);
        assert!(round.views[0].timed_out);
        assert_eq!(round.views[0].proposer, leader);
        assert!(round.non_responding.contains(&leader));
    }
    let witness = sim.online()[0];
    assert!(sim.outcomes[witness].iter().any(|o| matches!(o, Outcome::TimedOut { view: 0, .. })));
}

#[test]
fn shuffled_delivery_reaches_the_same_outcome() {
    for seed in 0..8u64 {
        let mut sim = Sim::new([Some(A); 10]);
        sim.rng = Some(StdRng::seed_from_u64(seed));
        let s = submission(10 + u8::try_from(seed).unwrap());
        let event_id = s.event.id;
        sim.submit(s);
        sim.settle(event_id);
        assert_all(&sim.rounds(event_id), RoundStatus::Committed);
    }
}

#[test]
fn ejecting_silent_validators_unblocks_the_round() {
    // 0.60 approves and 0.40 is offline; short of quorum until community
    // (0.20) is ejected, after which 0.60 of 0.80 suffices.
    let decisions = [Some(A), Some(A), Some(A), Some(A), None, None, None, None, None, None];
    let mut sim = Sim::new(decisions);
    let s = led_by_online(&sim);
    let event_id = s.event.id;
    sim.submit(s);
    sim.run();
    assert_all(&sim.rounds(event_id), RoundStatus::PrePrepared);

    for c in 5..8 {
        let id = sim.id(c);
        sim.registry.write().eject(&id).unwrap();
        for i in sim.online() {
            let now = sim.now;
            let actions = sim.engine(i).on_ejected(id, now);
            sim.dispatch(Some(i), actions);
        }
    }
    sim.run();

    let rounds = sim.rounds(event_id);
    assert_all(&rounds, RoundStatus::Committed);
    assert_eq!(rounds[0].non_responding.len(), 3);
}

#[test]
fn submitter_can_abort_but_validators_cannot() {
    let mut sim = Sim::new([Some(A); 10]);
    let mut submitter = ConsensusEngine::observer(
        sim.config.clone(),
        sim.registry.clone(),
        ORIGIN,
        Arc::new(Fixed(A)),
    );
    let s = submission(6);
    let event_id = s.event.id;
    let now = sim.now;

    let actions = submitter.submit(s, now).unwrap();
    sim.dispatch(None, actions);
    let forged = ConsensusMessage::Abort {
        event_id,
        reason: "not mine to cancel".into(),
    };
    let from = sim.id(3);
    sim.send_all(from, Some(3), &forged);
    let actions = submitter.abort(event_id, "shipment withdrawn", now).unwrap();
    sim.dispatch(None, actions);
    sim.run();

    assert!(sim.refused >= 9);
    let rounds = sim.rounds(event_id);
    assert_all(&rounds, RoundStatus::Rejected);
    for round in &rounds {
        assert_eq!(
            round.outcome,
            Some(RoundOutcome::Rejected(RejectReason::Aborted("shipment withdrawn".into())))
        );
    }
    assert_eq!(submitter.status(&event_id).unwrap().status, RoundStatus::Rejected);
    assert_eq!(submitter.open_rounds(), 0);
}

#[test]
fn only_the_submitting_node_opens_rounds() {
    let mut sim = Sim::new([Some(A); 10]);
    let s = submission(7);
    let event_id = s.event.id;

    let academic = sim.id(8);
    sim.send_all(academic, Some(8), &ConsensusMessage::Submit(Box::new(s)));
    sim.run();

    assert_eq!(sim.refused, 9);
    for i in sim.online() {
        assert!(sim.engine(i).status(&event_id).is_none());
        assert_eq!(sim.engine(i).held_events(), 0);
    }
}
