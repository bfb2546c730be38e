//! End-to-end evidence validation against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use verinet_evidence::in_memory::{InMemoryCompliance, InMemoryIdentity, InMemoryLocations};
use verinet_evidence::{Collaborators, EvidenceValidator, TrustedSources};
use verinet_types::services::CustodyService;
use verinet_types::{
    AssetId, Category, EventType, EvidenceClaim, EvidenceConfig, EvidenceFailure, EvidenceItem,
    EvidenceKind, EvidencePackage, PartyId, Result, VerificationEvent, VerinetError, crypto,
};

struct FixedCustody {
    owner: RwLock<PartyId>,
}

#[async_trait]
impl CustodyService for FixedCustody {
    async fn get_custody_owner(&self, _asset: &AssetId) -> Result<PartyId> {
        Ok(self.owner.read().clone())
    }
    async fn lock_asset(&self, _: &AssetId, _: &PartyId, _: Duration) -> Result<()> {
        Ok(())
    }
    async fn unlock_asset(&self, _: &AssetId, _: &PartyId) -> Result<()> {
        Ok(())
    }
    async fn transfer_asset(&self, _: &AssetId, _: &PartyId, _: &PartyId) -> Result<()> {
        Ok(())
    }
}

struct Fixture {
    validator: EvidenceValidator,
    key: SigningKey,
    compliance: Arc<InMemoryCompliance>,
    exporter: PartyId,
}

fn fixture() -> Fixture {
    let key = crypto::generate_key();
    let mut sources = TrustedSources::new();
    sources.insert("customs", key.verifying_key().to_bytes());

    let exporter = PartyId::new("exporter-1");
    let identity = Arc::new(InMemoryIdentity::new());
    identity.enroll(exporter.clone(), Some(Category::Enterprise));
    let location = Arc::new(InMemoryLocations::new());
    location.record(exporter.clone(), Decimal::new(-12_921, 4), Decimal::new(368_219, 4));
    let compliance = Arc::new(InMemoryCompliance::new());
    compliance.set_score(exporter.clone(), Decimal::new(82, 2));
    let custody = Arc::new(FixedCustody {
        owner: RwLock::new(exporter.clone()),
    });

    let validator = EvidenceValidator::new(
        EvidenceConfig::default(),
        sources,
        Collaborators {
            identity,
            location,
            custody,
            compliance: compliance.clone(),
        },
    );
    Fixture {
        validator,
        key,
        compliance,
        exporter,
    }
}

fn export_items(f: &Fixture) -> Vec<EvidenceItem> {
    let e = f.exporter.clone();
    vec![
        EvidenceItem::signed("permit", EvidenceKind::Document, "customs", EvidenceClaim::None, &f.key),
        EvidenceItem::signed("stamp", EvidenceKind::Signature, "customs", EvidenceClaim::None, &f.key),
        EvidenceItem::signed(
            "kyc",
            EvidenceKind::IdentityAttestation,
            "customs",
            EvidenceClaim::Identity { entity: e.clone() },
            &f.key,
        ),
        EvidenceItem::signed(
            "gps",
            EvidenceKind::LocationProof,
            "customs",
            EvidenceClaim::Location {
                entity: e.clone(),
                latitude: Decimal::new(-12_925, 4),
                longitude: Decimal::new(368_215, 4),
            },
            &f.key,
        ),
        EvidenceItem::signed(
            "score",
            EvidenceKind::ComplianceScore,
            "customs",
            EvidenceClaim::ComplianceScore {
                entity: e,
                score: Decimal::new(80, 2),
            },
            &f.key,
        ),
    ]
}

#[tokio::test]
async fn complete_export_package_is_accepted() {
    let f = fixture();
    let event = VerificationEvent::dummy(EventType::ExportPermit);
    let package = EvidencePackage::new(event.id, export_items(&f));
    let result = f.validator.validate_for(&event, &package).await.unwrap();
    assert!(result.valid);
    assert_eq!(result.compliance_score, Some(Decimal::new(82, 2)));
    assert_eq!(result.digest, package.digest());
}

#[tokio::test]
async fn missing_location_proof_is_reported() {
    let f = fixture();
    let event = VerificationEvent::dummy(EventType::ExportPermit);
    let items = export_items(&f)
        .into_iter()
        .filter(|i| i.kind != EvidenceKind::LocationProof)
        .collect();
    let result = f
        .validator
        .validate(event.event_type, &EvidencePackage::new(event.id, items))
        .await;
    assert!(!result.valid);
    assert_eq!(result.failure, Some(EvidenceFailure::MissingItems));
    assert_eq!(result.missing_items, vec![EvidenceKind::LocationProof]);
}

#[tokio::test]
async fn untrusted_source_fails_signature_check() {
    let f = fixture();
    let event = VerificationEvent::dummy(EventType::DisputeResolution);
    let rogue = crypto::generate_key();
    let items = vec![
        EvidenceItem::signed("ruling", EvidenceKind::Document, "customs", EvidenceClaim::None, &f.key),
        EvidenceItem::signed("forged", EvidenceKind::Signature, "customs", EvidenceClaim::None, &rogue),
    ];
    let result = f
        .validator
        .validate(event.event_type, &EvidencePackage::new(event.id, items))
        .await;
    assert_eq!(result.failure, Some(EvidenceFailure::InvalidSignatures));
    assert_eq!(result.invalid_signatures, vec!["forged".to_string()]);
}

#[tokio::test]
async fn distant_location_is_inconsistent() {
    let f = fixture();
    let event = VerificationEvent::dummy(EventType::ExportPermit);
    let mut items = export_items(&f);
    items[3] = EvidenceItem::signed(
        "gps",
        EvidenceKind::LocationProof,
        "customs",
        EvidenceClaim::Location {
            entity: f.exporter.clone(),
            latitude: Decimal::new(-41_000, 4),
            longitude: Decimal::new(396_000, 4),
        },
        &f.key,
    );
    let err = f
        .validator
        .validate_for(&event, &EvidencePackage::new(event.id, items))
        .await
        .unwrap_err();
    assert!(matches!(err, VerinetError::EvidenceValidationFailure { .. }));
}

#[tokio::test]
async fn custody_owner_must_match_registry() {
    let f = fixture();
    let event = VerificationEvent::dummy(EventType::CustodyTransfer);
    let items = vec![
        EvidenceItem::signed("seal", EvidenceKind::Signature, "customs", EvidenceClaim::None, &f.key),
        EvidenceItem::signed(
            "gps",
            EvidenceKind::LocationProof,
            "customs",
            EvidenceClaim::Location {
                entity: f.exporter.clone(),
                latitude: Decimal::new(-12_921, 4),
                longitude: Decimal::new(368_219, 4),
            },
            &f.key,
        ),
        EvidenceItem::signed(
            "title",
            EvidenceKind::CustodyConfirmation,
            "customs",
            EvidenceClaim::CustodyOwner {
                asset: AssetId::new("lot-42"),
                owner: PartyId::new("someone-else"),
            },
            &f.key,
        ),
    ];
    let result = f
        .validator
        .validate(event.event_type, &EvidencePackage::new(event.id, items))
        .await;
    assert!(matches!(result.failure, Some(EvidenceFailure::Inconsistent { .. })));
}

#[tokio::test]
async fn claim_kind_mismatch_is_inconsistent() {
    let f = fixture();
    let event = VerificationEvent::dummy(EventType::DisputeResolution);
    let items = vec![
        EvidenceItem::signed("ruling", EvidenceKind::Document, "customs", EvidenceClaim::None, &f.key),
        EvidenceItem::signed(
            "stamp",
            EvidenceKind::Signature,
            "customs",
            EvidenceClaim::Identity {
                entity: f.exporter.clone(),
            },
            &f.key,
        ),
    ];
    let result = f
        .validator
        .validate(event.event_type, &EvidencePackage::new(event.id, items))
        .await;
    assert!(matches!(result.failure, Some(EvidenceFailure::Inconsistent { .. })));
}

#[tokio::test]
async fn repeated_validation_is_served_from_cache() {
    let f = fixture();
    let event = VerificationEvent::dummy(EventType::ExportPermit);
    let package = EvidencePackage::new(event.id, export_items(&f));
    let first = f.validator.validate(event.event_type, &package).await;
    // A changed score would fail a fresh check; the cached result stands.
    f.compliance.set_score(f.exporter.clone(), Decimal::new(10, 2));
    let second = f.validator.validate(event.event_type, &package).await;
    assert_eq!(first, second);
    assert_eq!(f.validator.cache_stats(), (1, 1));
}

#[tokio::test]
async fn unreachable_collaborator_is_not_cached() {
    let f = fixture();
    let event = VerificationEvent::dummy(EventType::ExportPermit);
    let mut items = export_items(&f);
    let stranger = PartyId::new("unscored");
    items[4] = EvidenceItem::signed(
        "score",
        EvidenceKind::ComplianceScore,
        "customs",
        EvidenceClaim::ComplianceScore {
            entity: stranger.clone(),
            score: Decimal::new(70, 2),
        },
        &f.key,
    );
    let package = EvidencePackage::new(event.id, items);
    let first = f.validator.validate(event.event_type, &package).await;
    assert!(matches!(first.failure, Some(EvidenceFailure::UnresolvedReference { .. })));

    f.compliance.set_score(stranger, Decimal::new(70, 2));
    let second = f.validator.validate(event.event_type, &package).await;
    assert!(second.valid);
}

#[tokio::test]
async fn package_for_another_event_is_refused() {
    let f = fixture();
    let event = VerificationEvent::dummy(EventType::ExportPermit);
    let other = VerificationEvent::dummy(EventType::ExportPermit);
    let package = EvidencePackage::new(other.id, export_items(&f));
    let err = f.validator.validate_for(&event, &package).await.unwrap_err();
    assert!(matches!(err, VerinetError::EvidenceEventMismatch { .. }));
}
