//! High-value settlement authorization by a second consensus round.
//!
//! Once both legs are locked, the node submits a `SettlementAuthorization`
//! event over the exact settlement terms to the same validator population
//! that committed the original event, and waits for its verdict.

use std::sync::Weak;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use verinet_settlement::HighValueAuthorizer;
use verinet_types::{
    CommittedEvent, ConsensusRound, EventId, EventType, EvidenceClaim, EvidenceItem, EvidenceKind,
    EvidencePackage, Outcome, Result, RoundOutcome, SettlementTransaction, VerificationEvent,
    VerinetError, crypto,
};

use crate::node::NodeShared;

/// Trusted source name under which the node signs authorization evidence.
pub const AUTHORIZATION_SOURCE: &str = "verinet-settlement-authority";

pub(crate) struct ConsensusAuthorizer {
    node: Weak<NodeShared>,
}

impl ConsensusAuthorizer {
    pub(crate) fn new(node: Weak<NodeShared>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl HighValueAuthorizer for ConsensusAuthorizer {
    async fn authorize(&self, committed: &CommittedEvent, transaction: &SettlementTransaction) -> Result<()> {
        let node = self
            .node
            .upgrade()
            .ok_or_else(|| VerinetError::Internal("verification node has shut down".into()))?;

        let now = Utc::now();
        let deadline = now
            + chrono::Duration::from_std(node.config().settlement.deadline())
                .map_err(|e| VerinetError::Configuration(format!("settlement deadline out of range: {e}")))?;
        let (event, package) = authorization_request(committed, transaction, node.attestation_key(), now, deadline);

        // Subscribe before submitting so the verdict cannot slip past.
        let mut outcomes = node.subscribe();
        let event_id = node.submit(event, package).await?;
        info!(%event_id, settlement = %transaction.id, amount = %transaction.payment.amount, "Authorization round opened");

        loop {
            match outcomes.recv().await {
                Ok(outcome) if outcome.event_id() == event_id && outcome.is_round_final() => {
                    return verdict_from_outcome(outcome);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    if let Some(round) = node.status(&event_id).filter(ConsensusRound::is_terminal) {
                        return verdict_from_round(&round);
                    }
                }
                Err(RecvError::Closed) => {
                    return Err(VerinetError::Internal("outcome channel closed".into()));
                }
            }
        }
    }
}

/// The authorization event and its signed evidence.
///
/// The event id is derived from the original event and the settlement id,
/// so every attempt gets its own round.
pub(crate) fn authorization_request(
    committed: &CommittedEvent,
    transaction: &SettlementTransaction,
    key: &SigningKey,
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
) -> (VerificationEvent, EvidencePackage) {
    let original = committed.event();
    let payload_hash = terms_digest(transaction);
    let event = VerificationEvent {
        id: EventId::derived(original.id, &format!("authorize:{}", transaction.id)),
        event_type: EventType::SettlementAuthorization,
        payload_hash,
        submitter: original.submitter.clone(),
        subject: original.subject.clone(),
        required_categories: original.required_categories.clone(),
        min_threshold: original.min_threshold,
        created_at: now,
        deadline,
    };

    let mut item = EvidenceItem {
        name: "settlement-terms".to_string(),
        kind: EvidenceKind::Signature,
        source: AUTHORIZATION_SOURCE.to_string(),
        content: payload_hash.to_vec(),
        claim: EvidenceClaim::None,
        signature: Vec::new(),
    };
    item.signature = crypto::sign(key, &item.signing_payload());
    let package = EvidencePackage::new(event.id, vec![item]);
    (event, package)
}

fn terms_digest(tx: &SettlementTransaction) -> [u8; 32] {
    crypto::digest(
        b"verinet:settlement_terms:v1:",
        &[
            tx.id.0.as_bytes(),
            tx.event_id.0.as_bytes(),
            tx.payment.payer.as_str().as_bytes(),
            tx.payment.payee.as_str().as_bytes(),
            tx.payment.amount.to_string().as_bytes(),
            tx.custody.asset.as_str().as_bytes(),
            tx.custody.seller.as_str().as_bytes(),
            tx.custody.buyer.as_str().as_bytes(),
        ],
    )
}

fn verdict_from_outcome(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Rejected {
            event_id,
            reason,
            dissenting,
            non_responding,
        } => Err(VerinetError::ConsensusFailure {
            event_id,
            reason: reason.to_string(),
            dissenting,
            non_responding,
        }),
        _ => Ok(()),
    }
}

fn verdict_from_round(round: &ConsensusRound) -> Result<()> {
    match &round.outcome {
        Some(RoundOutcome::Committed) => Ok(()),
        Some(RoundOutcome::Rejected(reason)) => Err(VerinetError::ConsensusFailure {
            event_id: round.event_id,
            reason: reason.to_string(),
            dissenting: round.dissenting.clone(),
            non_responding: round.non_responding.clone(),
        }),
        None => Err(VerinetError::Internal(format!("round for {} has no outcome", round.event_id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use verinet_types::{
        AccountId, AssetId, PartyId, RoundStatus, SettlementTerms, ValidatorId,
    };

    fn committed() -> CommittedEvent {
        let event = VerificationEvent::dummy(EventType::CustodyTransfer);
        let round = ConsensusRound {
            event_id: event.id,
            event_type: event.event_type,
            view: 0,
            proposer: ValidatorId([1; 32]),
            status: RoundStatus::Committed,
            prepare_votes: Vec::new(),
            commit_votes: Vec::new(),
            prepare_approval: Decimal::ONE,
            commit_approval: Decimal::ONE,
            threshold: Decimal::new(677, 3),
            outcome: Some(RoundOutcome::Committed),
            dissenting: Vec::new(),
            non_responding: Vec::new(),
            views: Vec::new(),
            opened_at: event.created_at,
            closed_at: Some(event.created_at),
        };
        CommittedEvent::from_round(event, round).unwrap()
    }

    fn transaction(committed: &CommittedEvent) -> SettlementTransaction {
        let terms = SettlementTerms {
            payer: AccountId::new("buyer-acct"),
            payee: AccountId::new("seller-acct"),
            amount: Decimal::from(250_000),
            asset: AssetId::new("lot-7"),
            seller: PartyId::new("seller"),
            buyer: PartyId::new("buyer"),
        };
        SettlementTransaction::new(committed.event_id(), &terms)
    }

    #[test]
    fn request_is_bound_to_the_settlement() {
        let committed = committed();
        let tx = transaction(&committed);
        let key = crypto::generate_key();
        let now = Utc::now();
        let (event, package) = authorization_request(&committed, &tx, &key, now, now + chrono::Duration::seconds(10));

        assert_eq!(event.event_type, EventType::SettlementAuthorization);
        assert_ne!(event.id, committed.event_id());
        assert_eq!(event.payload_hash, terms_digest(&tx));
        assert_eq!(event.required_categories, committed.event().required_categories);
        assert_eq!(package.event_id, event.id);

        let item = &package.items[0];
        assert_eq!(item.kind, EvidenceKind::Signature);
        let pubkey = key.verifying_key().to_bytes();
        assert!(crypto::verify(&pubkey, &item.signing_payload(), &item.signature));
    }

    #[test]
    fn each_attempt_gets_its_own_round() {
        let committed = committed();
        let key = crypto::generate_key();
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(10);
        let (a, _) = authorization_request(&committed, &transaction(&committed), &key, now, later);
        let (b, _) = authorization_request(&committed, &transaction(&committed), &key, now, later);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn rejection_carries_dissent() {
        let dissenter = ValidatorId([9; 32]);
        let err = verdict_from_outcome(Outcome::Rejected {
            event_id: EventId::new(),
            reason: verinet_types::RejectReason::QuorumUnreachable,
            dissenting: vec![dissenter],
            non_responding: Vec::new(),
        })
        .unwrap_err();
        assert!(matches!(err, VerinetError::ConsensusFailure { ref dissenting, .. } if dissenting == &vec![dissenter]));
    }
}
