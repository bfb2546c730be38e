//! How a validator decides its own vote on a proposal.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use verinet_evidence::EvidenceScreen;
use verinet_types::{Category, Decision, EventType, EvidenceClaim, EvidenceKind, Submission};

/// A validator's independent judgement of a submission.
pub trait ProposalEvaluator: Send + Sync {
    fn evaluate(&self, submission: &Submission, now: DateTime<Utc>) -> Decision;
}

type Judgement = std::result::Result<(), String>;

/// Re-screens the package itself and approves when it holds up, is bound to
/// the event, and the event has not expired.
///
/// The validation result attached by the submitter is never consulted.
#[derive(Debug, Clone)]
pub struct EvidenceEvaluator {
    screen: Arc<EvidenceScreen>,
}

impl EvidenceEvaluator {
    #[must_use]
    pub fn new(screen: Arc<EvidenceScreen>) -> Self {
        Self { screen }
    }

    fn judge(&self, submission: &Submission, now: DateTime<Utc>) -> Judgement {
        let event = &submission.event;
        if submission.package.event_id != event.id {
            return Err(format!("package bound to event {}", submission.package.event_id));
        }
        if event.is_expired(now) {
            return Err("event expired".to_string());
        }
        let screened = self.screen.screen(event.event_type, &submission.package);
        if screened.valid {
            Ok(())
        } else {
            Err(screened.reason())
        }
    }
}

impl ProposalEvaluator for EvidenceEvaluator {
    fn evaluate(&self, submission: &Submission, now: DateTime<Utc>) -> Decision {
        decide(submission, self.judge(submission, now))
    }
}

/// Evidence screening plus the checks a validator of `category` insists on.
///
/// - Government: permits, payment releases and disputes carry a document;
///   permits and payment releases also attest the subject's identity.
/// - Enterprise: a custody transfer confirms the subject as custody owner.
/// - Community: every location proof places the subject, not someone else.
/// - Academic: a package of several items is corroborated by more than one
///   source.
#[derive(Debug, Clone)]
pub struct CategoryEvaluator {
    category: Category,
    evidence: EvidenceEvaluator,
}

impl CategoryEvaluator {
    #[must_use]
    pub fn new(category: Category, screen: Arc<EvidenceScreen>) -> Self {
        Self {
            category,
            evidence: EvidenceEvaluator::new(screen),
        }
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }
}

impl ProposalEvaluator for CategoryEvaluator {
    fn evaluate(&self, submission: &Submission, now: DateTime<Utc>) -> Decision {
        let verdict = self.evidence.judge(submission, now).and_then(|()| match self.category {
            Category::Government => government(submission),
            Category::Enterprise => enterprise(submission),
            Category::Community => community(submission),
            Category::Academic => academic(submission),
        });
        decide(submission, verdict)
    }
}

/// The evaluator a validator of `category` votes with.
#[must_use]
pub fn evaluator_for(category: Category, screen: Arc<EvidenceScreen>) -> Arc<dyn ProposalEvaluator> {
    Arc::new(CategoryEvaluator::new(category, screen))
}

fn decide(submission: &Submission, verdict: Judgement) -> Decision {
    match verdict {
        Ok(()) => Decision::Approve,
        Err(reason) => {
            debug!(event_id = %submission.event.id, %reason, "Rejecting proposal");
            Decision::Reject
        }
    }
}

fn government(submission: &Submission) -> Judgement {
    let event = &submission.event;
    let items = &submission.package.items;
    let needs_document = matches!(
        event.event_type,
        EventType::ExportPermit | EventType::PaymentRelease | EventType::DisputeResolution
    );
    if needs_document && !items.iter().any(|i| i.kind == EvidenceKind::Document) {
        return Err(format!("{} without a document", event.event_type));
    }
    let needs_identity = matches!(event.event_type, EventType::ExportPermit | EventType::PaymentRelease);
    let identified = items.iter().any(|i| {
        matches!(&i.claim, EvidenceClaim::Identity { entity } if *entity == event.subject)
    });
    if needs_identity && !identified {
        return Err(format!("no identity attestation for {}", event.subject));
    }
    Ok(())
}

fn enterprise(submission: &Submission) -> Judgement {
    let event = &submission.event;
    if event.event_type != EventType::CustodyTransfer {
        return Ok(());
    }
    let confirmed = submission.package.items.iter().any(|i| {
        matches!(&i.claim, EvidenceClaim::CustodyOwner { owner, .. } if *owner == event.subject)
    });
    if confirmed {
        Ok(())
    } else {
        Err(format!("custody not confirmed for {}", event.subject))
    }
}

fn community(submission: &Submission) -> Judgement {
    let subject = &submission.event.subject;
    for item in &submission.package.items {
        if let EvidenceClaim::Location { entity, .. } = &item.claim {
            if entity != subject {
                return Err(format!("{} locates {entity}, not {subject}", item.name));
            }
        }
    }
    Ok(())
}

fn academic(submission: &Submission) -> Judgement {
    let items = &submission.package.items;
    let sources: BTreeSet<&str> = items.iter().map(|i| i.source.as_str()).collect();
    if items.len() > 1 && sources.len() < 2 {
        return Err("evidence not corroborated by a second source".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rust_decimal::Decimal;
    use verinet_evidence::TrustedSources;
    use verinet_types::{
        AssetId, EvidenceConfig, EvidenceFailure, EvidenceItem, EvidencePackage, PartyId,
        ValidationResult, VerificationEvent, crypto,
    };

    struct Keys {
        customs: SigningKey,
        carrier: SigningKey,
    }

    fn keys() -> Keys {
        Keys {
            customs: crypto::generate_key(),
            carrier: crypto::generate_key(),
        }
    }

    fn screen(keys: &Keys, config: EvidenceConfig) -> Arc<EvidenceScreen> {
        let mut sources = TrustedSources::new();
        sources.insert("customs", keys.customs.verifying_key().to_bytes());
        sources.insert("carrier", keys.carrier.verifying_key().to_bytes());
        Arc::new(EvidenceScreen::new(config, sources))
    }

    /// No required kinds, so only signatures and the category rules decide.
    fn permissive() -> EvidenceConfig {
        EvidenceConfig {
            requirements: Vec::new(),
            ..EvidenceConfig::default()
        }
    }

    fn submit(event: VerificationEvent, items: Vec<EvidenceItem>) -> Submission {
        let package = EvidencePackage::new(event.id, items);
        let validation = ValidationResult::accepted(package.digest(), None);
        Submission {
            event,
            package,
            validation,
        }
    }

    fn dispute(keys: &Keys) -> Submission {
        submit(
            VerificationEvent::dummy(EventType::DisputeResolution),
            vec![
                EvidenceItem::signed("ruling", EvidenceKind::Document, "customs", EvidenceClaim::None, &keys.customs),
                EvidenceItem::signed("arbiter", EvidenceKind::Signature, "carrier", EvidenceClaim::None, &keys.carrier),
            ],
        )
    }

    fn verdicts(screen: &Arc<EvidenceScreen>, s: &Submission) -> Vec<(Category, Decision)> {
        Category::ALL
            .into_iter()
            .map(|c| (c, evaluator_for(c, screen.clone()).evaluate(s, s.event.created_at)))
            .collect()
    }

    fn refused_by(screen: &Arc<EvidenceScreen>, s: &Submission) -> Vec<Category> {
        verdicts(screen, s)
            .into_iter()
            .filter(|(_, d)| *d == Decision::Reject)
            .map(|(c, _)| c)
            .collect()
    }

    #[test]
    fn screened_evidence_is_approved() {
        let keys = keys();
        let screen = screen(&keys, EvidenceConfig::default());
        let s = dispute(&keys);
        let evaluator = EvidenceEvaluator::new(screen.clone());
        assert_eq!(evaluator.evaluate(&s, s.event.created_at), Decision::Approve);
        assert!(refused_by(&screen, &s).is_empty());
    }

    #[test]
    fn accepted_verdict_does_not_rescue_unsigned_evidence() {
        let keys = keys();
        let screen = screen(&keys, EvidenceConfig::default());
        let event = VerificationEvent::dummy(EventType::ExportPermit);
        let mut permit =
            EvidenceItem::signed("permit", EvidenceKind::Document, "nobody", EvidenceClaim::None, &keys.customs);
        permit.signature.clear();
        let s = submit(event, vec![permit]);
        assert!(s.validation.valid);

        let evaluator = EvidenceEvaluator::new(screen.clone());
        assert_eq!(evaluator.evaluate(&s, s.event.created_at), Decision::Reject);
        assert_eq!(refused_by(&screen, &s), Category::ALL.to_vec());
    }

    #[test]
    fn rejected_verdict_does_not_sink_sound_evidence() {
        let keys = keys();
        let screen = screen(&keys, EvidenceConfig::default());
        let mut s = dispute(&keys);
        s.validation = ValidationResult::rejected(s.package.digest(), EvidenceFailure::MissingItems);
        let evaluator = EvidenceEvaluator::new(screen);
        assert_eq!(evaluator.evaluate(&s, s.event.created_at), Decision::Approve);
    }

    #[test]
    fn package_for_another_event_is_rejected() {
        let keys = keys();
        let mut s = dispute(&keys);
        s.package.event_id = verinet_types::EventId::new();
        let evaluator = EvidenceEvaluator::new(screen(&keys, EvidenceConfig::default()));
        assert_eq!(evaluator.evaluate(&s, s.event.created_at), Decision::Reject);
    }

    #[test]
    fn expired_event_is_rejected() {
        let keys = keys();
        let s = dispute(&keys);
        let late = s.event.deadline + chrono::Duration::seconds(1);
        let evaluator = EvidenceEvaluator::new(screen(&keys, EvidenceConfig::default()));
        assert_eq!(evaluator.evaluate(&s, late), Decision::Reject);
    }

    #[test]
    fn government_requires_a_permit_document() {
        let keys = keys();
        let screen = screen(&keys, permissive());
        let event = VerificationEvent::dummy(EventType::ExportPermit);
        let subject = event.subject.clone();
        let s = submit(
            event,
            vec![
                EvidenceItem::signed("stamp", EvidenceKind::Signature, "customs", EvidenceClaim::None, &keys.customs),
                EvidenceItem::signed(
                    "kyc",
                    EvidenceKind::IdentityAttestation,
                    "carrier",
                    EvidenceClaim::Identity { entity: subject },
                    &keys.carrier,
                ),
            ],
        );
        assert_eq!(refused_by(&screen, &s), vec![Category::Government]);
    }

    #[test]
    fn government_requires_the_subject_identified() {
        let keys = keys();
        let screen = screen(&keys, permissive());
        let s = submit(
            VerificationEvent::dummy(EventType::PaymentRelease),
            vec![
                EvidenceItem::signed("invoice", EvidenceKind::Document, "customs", EvidenceClaim::None, &keys.customs),
                EvidenceItem::signed(
                    "kyc",
                    EvidenceKind::IdentityAttestation,
                    "carrier",
                    EvidenceClaim::Identity {
                        entity: PartyId::new("someone-else"),
                    },
                    &keys.carrier,
                ),
            ],
        );
        assert_eq!(refused_by(&screen, &s), vec![Category::Government]);
    }

    #[test]
    fn enterprise_requires_custody_confirmed_to_the_subject() {
        let keys = keys();
        let screen = screen(&keys, permissive());
        let s = submit(
            VerificationEvent::dummy(EventType::CustodyTransfer),
            vec![
                EvidenceItem::signed("carrier", EvidenceKind::Signature, "carrier", EvidenceClaim::None, &keys.carrier),
                EvidenceItem::signed(
                    "receipt",
                    EvidenceKind::CustodyConfirmation,
                    "customs",
                    EvidenceClaim::CustodyOwner {
                        asset: AssetId::new("lot-7"),
                        owner: PartyId::new("warehouse"),
                    },
                    &keys.customs,
                ),
            ],
        );
        assert_eq!(refused_by(&screen, &s), vec![Category::Enterprise]);
    }

    #[test]
    fn community_refuses_locations_of_other_parties() {
        let keys = keys();
        let screen = screen(&keys, permissive());
        let s = submit(
            VerificationEvent::dummy(EventType::DisputeResolution),
            vec![
                EvidenceItem::signed("ruling", EvidenceKind::Document, "customs", EvidenceClaim::None, &keys.customs),
                EvidenceItem::signed(
                    "gps",
                    EvidenceKind::LocationProof,
                    "carrier",
                    EvidenceClaim::Location {
                        entity: PartyId::new("someone-else"),
                        latitude: Decimal::new(-12_921, 4),
                        longitude: Decimal::new(368_219, 4),
                    },
                    &keys.carrier,
                ),
            ],
        );
        assert_eq!(refused_by(&screen, &s), vec![Category::Community]);
    }

    #[test]
    fn academic_requires_a_second_source() {
        let keys = keys();
        let screen = screen(&keys, EvidenceConfig::default());
        let s = submit(
            VerificationEvent::dummy(EventType::DisputeResolution),
            vec![
                EvidenceItem::signed("ruling", EvidenceKind::Document, "customs", EvidenceClaim::None, &keys.customs),
                EvidenceItem::signed("arbiter", EvidenceKind::Signature, "customs", EvidenceClaim::None, &keys.customs),
            ],
        );
        assert_eq!(refused_by(&screen, &s), vec![Category::Academic]);
    }
}
