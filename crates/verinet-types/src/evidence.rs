//! Evidence packages attached to verification events.
//!
//! Each [`EvidenceItem`] is signed by the source that produced it and may
//! carry a structured [`EvidenceClaim`] that the evidence validator checks
//! against the external collaborators.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AssetId, EventId, EvidenceDigest, PartyId, crypto};

/// Category of evidence. Requirements per event type are expressed in kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum EvidenceKind {
    Document,
    Signature,
    IdentityAttestation,
    LocationProof,
    CustodyConfirmation,
    ComplianceScore,
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => write!(f, "DOCUMENT"),
            Self::Signature => write!(f, "SIGNATURE"),
            Self::IdentityAttestation => write!(f, "IDENTITY_ATTESTATION"),
            Self::LocationProof => write!(f, "LOCATION_PROOF"),
            Self::CustodyConfirmation => write!(f, "CUSTODY_CONFIRMATION"),
            Self::ComplianceScore => write!(f, "COMPLIANCE_SCORE"),
        }
    }
}

/// A structured assertion inside an evidence item, cross-checked against
/// the external collaborator that owns the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceClaim {
    /// Opaque document or counter-signature; only the signature is checked.
    None,
    Identity {
        entity: PartyId,
    },
    Location {
        entity: PartyId,
        latitude: Decimal,
        longitude: Decimal,
    },
    CustodyOwner {
        asset: AssetId,
        owner: PartyId,
    },
    ComplianceScore {
        entity: PartyId,
        score: Decimal,
    },
}

/// One independently verifiable piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Human-readable name, unique within its package ("bill-of-lading").
    pub name: String,
    pub kind: EvidenceKind,
    /// The claimed producer; must be in the trusted source directory.
    pub source: String,
    pub content: Vec<u8>,
    pub claim: EvidenceClaim,
    /// Ed25519 signature by `source` over [`EvidenceItem::signing_payload`].
    pub signature: Vec<u8>,
}

impl EvidenceItem {
    /// Canonical bytes signed by the source.
    ///
    /// Format: `"verinet:evidence:v1:" || name || kind || source || sha256(content) || claim_json`
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let content_hash = crypto::digest(b"verinet:evidence_content:v1:", &[&self.content]);
        // Claim enums serialize deterministically (Decimal as string).
        let claim = serde_json::to_vec(&self.claim).unwrap_or_default();
        let mut payload = Vec::with_capacity(128 + claim.len());
        payload.extend_from_slice(b"verinet:evidence:v1:");
        payload.extend_from_slice(self.name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.kind.to_string().as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.source.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&content_hash);
        payload.extend_from_slice(&claim);
        payload
    }
}

/// The full set of evidence for exactly one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePackage {
    pub event_id: EventId,
    pub items: Vec<EvidenceItem>,
}

impl EvidencePackage {
    #[must_use]
    pub fn new(event_id: EventId, items: Vec<EvidenceItem>) -> Self {
        Self { event_id, items }
    }

    /// Commitment over every item, independent of insertion order.
    #[must_use]
    pub fn digest(&self) -> EvidenceDigest {
        let mut items: Vec<&EvidenceItem> = self.items.iter().collect();
        items.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        let payloads: Vec<Vec<u8>> = items
            .iter()
            .map(|item| {
                let mut p = item.signing_payload();
                p.extend_from_slice(&item.signature);
                p
            })
            .collect();
        let mut parts: Vec<&[u8]> = vec![self.event_id.0.as_bytes()];
        parts.extend(payloads.iter().map(Vec::as_slice));
        crypto::digest(b"verinet:evidence_package:v1:", &parts)
    }

    /// Kinds present in the package.
    #[must_use]
    pub fn kinds(&self) -> Vec<EvidenceKind> {
        let mut kinds: Vec<EvidenceKind> = self.items.iter().map(|i| i.kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        kinds
    }
}

/// Why an evidence package was refused. No partial credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceFailure {
    MissingItems,
    InvalidSignatures,
    UnresolvedReference { item: String, reason: String },
    Inconsistent { item: String, reason: String },
}

impl fmt::Display for EvidenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingItems => write!(f, "required evidence missing"),
            Self::InvalidSignatures => write!(f, "evidence signatures invalid"),
            Self::UnresolvedReference { item, reason } => {
                write!(f, "{item}: reference did not resolve: {reason}")
            }
            Self::Inconsistent { item, reason } => write!(f, "{item}: inconsistent: {reason}"),
        }
    }
}

/// Outcome of validating a package for an event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub digest: EvidenceDigest,
    pub missing_items: Vec<EvidenceKind>,
    /// Names of items whose signature did not verify.
    pub invalid_signatures: Vec<String>,
    pub failure: Option<EvidenceFailure>,
    /// Compliance score observed for the subject, if one was checked.
    pub compliance_score: Option<Decimal>,
}

impl ValidationResult {
    #[must_use]
    pub fn accepted(digest: EvidenceDigest, compliance_score: Option<Decimal>) -> Self {
        Self {
            valid: true,
            digest,
            missing_items: Vec::new(),
            invalid_signatures: Vec::new(),
            failure: None,
            compliance_score,
        }
    }

    #[must_use]
    pub fn rejected(digest: EvidenceDigest, failure: EvidenceFailure) -> Self {
        Self {
            valid: false,
            digest,
            missing_items: Vec::new(),
            invalid_signatures: Vec::new(),
            failure: Some(failure),
            compliance_score: None,
        }
    }

    /// Human-readable reason for a rejected package.
    #[must_use]
    pub fn reason(&self) -> String {
        match &self.failure {
            Some(EvidenceFailure::MissingItems) => format!(
                "missing evidence: {}",
                self.missing_items
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Some(EvidenceFailure::InvalidSignatures) => {
                format!("invalid signatures: {}", self.invalid_signatures.join(", "))
            }
            Some(other) => other.to_string(),
            None => "valid".to_string(),
        }
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl EvidenceItem {
    /// Build and sign an item with `key`.
    pub fn signed(
        name: &str,
        kind: EvidenceKind,
        source: &str,
        claim: EvidenceClaim,
        key: &ed25519_dalek::SigningKey,
    ) -> Self {
        let mut item = Self {
            name: name.to_string(),
            kind,
            source: source.to_string(),
            content: name.as_bytes().to_vec(),
            claim,
            signature: Vec::new(),
        };
        item.signature = crypto::sign(key, &item.signing_payload());
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, kind: EvidenceKind) -> EvidenceItem {
        let key = crypto::generate_key();
        EvidenceItem::signed(name, kind, "customs", EvidenceClaim::None, &key)
    }

    #[test]
    fn package_digest_ignores_item_order() {
        let event = EventId::new();
        let a = item("permit", EvidenceKind::Document);
        let b = item("stamp", EvidenceKind::Signature);
        let p1 = EvidencePackage::new(event, vec![a.clone(), b.clone()]);
        let p2 = EvidencePackage::new(event, vec![b, a]);
        assert_eq!(p1.digest(), p2.digest());
    }

    #[test]
    fn package_digest_binds_event() {
        let a = item("permit", EvidenceKind::Document);
        let p1 = EvidencePackage::new(EventId::new(), vec![a.clone()]);
        let p2 = EvidencePackage::new(EventId::new(), vec![a]);
        assert_ne!(p1.digest(), p2.digest());
    }

    #[test]
    fn signing_payload_covers_claim() {
        let mut a = item("score", EvidenceKind::ComplianceScore);
        let before = a.signing_payload();
        a.claim = EvidenceClaim::ComplianceScore {
            entity: PartyId::new("exporter-1"),
            score: Decimal::new(80, 2),
        };
        assert_ne!(before, a.signing_payload());
    }

    #[test]
    fn kinds_are_deduplicated() {
        let pkg = EvidencePackage::new(
            EventId::new(),
            vec![
                item("a", EvidenceKind::Document),
                item("b", EvidenceKind::Document),
                item("c", EvidenceKind::Signature),
            ],
        );
        assert_eq!(
            pkg.kinds(),
            vec![EvidenceKind::Document, EvidenceKind::Signature]
        );
    }

    #[test]
    fn rejection_reason_lists_missing_kinds() {
        let mut r = ValidationResult::rejected([0; 32], EvidenceFailure::MissingItems);
        r.missing_items = vec![EvidenceKind::LocationProof];
        assert_eq!(r.reason(), "missing evidence: LOCATION_PROOF");
    }
}
