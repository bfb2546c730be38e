//! The offline half of evidence validation.
//!
//! Completeness, signature and internal consistency checks need nothing but
//! the package and the trusted source directory, so any validator can re-run
//! them on a proposal instead of trusting the submitter's verdict.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use verinet_types::{
    AssetId, EventType, EvidenceClaim, EvidenceConfig, EvidenceDigest, EvidenceFailure,
    EvidenceItem, EvidenceKind, EvidencePackage, PartyId, ValidationResult,
};

use crate::geo;
use crate::sources::TrustedSources;

#[derive(Debug, Clone)]
pub struct EvidenceScreen {
    config: EvidenceConfig,
    sources: TrustedSources,
}

impl EvidenceScreen {
    #[must_use]
    pub fn new(config: EvidenceConfig, sources: TrustedSources) -> Self {
        Self { config, sources }
    }

    #[must_use]
    pub fn config(&self) -> &EvidenceConfig {
        &self.config
    }

    #[must_use]
    pub fn sources(&self) -> &TrustedSources {
        &self.sources
    }

    /// Run every check that does not consult a collaborator.
    ///
    /// An accepted result carries no compliance score; that is only known
    /// once claims are resolved.
    #[must_use]
    pub fn screen(&self, event_type: EventType, package: &EvidencePackage) -> ValidationResult {
        let digest = package.digest();
        match self.check(event_type, package, digest) {
            Ok(()) => ValidationResult::accepted(digest, None),
            Err(result) => result,
        }
    }

    /// Items in the order claims are checked and resolved.
    pub(crate) fn ordered(package: &EvidencePackage) -> Vec<&EvidenceItem> {
        let mut items: Vec<&EvidenceItem> = package.items.iter().collect();
        items.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        items
    }

    fn check(
        &self,
        event_type: EventType,
        package: &EvidencePackage,
        digest: EvidenceDigest,
    ) -> std::result::Result<(), ValidationResult> {
        let present = package.kinds();
        let missing: Vec<EvidenceKind> = self
            .config
            .required_kinds(event_type)
            .iter()
            .filter(|k| !present.contains(k))
            .copied()
            .collect();
        if !missing.is_empty() {
            let mut result = ValidationResult::rejected(digest, EvidenceFailure::MissingItems);
            result.missing_items = missing;
            return Err(result);
        }

        let invalid: Vec<String> = package
            .items
            .iter()
            .filter(|item| {
                !self
                    .sources
                    .verify(&item.source, &item.signing_payload(), &item.signature)
            })
            .map(|item| item.name.clone())
            .collect();
        if !invalid.is_empty() {
            let mut result = ValidationResult::rejected(digest, EvidenceFailure::InvalidSignatures);
            result.invalid_signatures = invalid;
            return Err(result);
        }

        self.check_internal_consistency(&Self::ordered(package))
            .map_err(|failure| ValidationResult::rejected(digest, failure))
    }

    /// Claims must match their item kind, and claims about the same entity
    /// or asset must agree with each other.
    fn check_internal_consistency(&self, items: &[&EvidenceItem]) -> std::result::Result<(), EvidenceFailure> {
        let mut locations: BTreeMap<&PartyId, (Decimal, Decimal)> = BTreeMap::new();
        let mut owners: BTreeMap<&AssetId, &PartyId> = BTreeMap::new();
        let mut scores: BTreeMap<&PartyId, Decimal> = BTreeMap::new();

        for item in items {
            let matches_kind = matches!(
                (item.kind, &item.claim),
                (EvidenceKind::Document | EvidenceKind::Signature, EvidenceClaim::None)
                    | (EvidenceKind::IdentityAttestation, EvidenceClaim::Identity { .. })
                    | (EvidenceKind::LocationProof, EvidenceClaim::Location { .. })
                    | (EvidenceKind::CustodyConfirmation, EvidenceClaim::CustodyOwner { .. })
                    | (EvidenceKind::ComplianceScore, EvidenceClaim::ComplianceScore { .. })
            );
            if !matches_kind {
                return Err(inconsistent(item, format!("claim does not fit {} evidence", item.kind)));
            }

            match &item.claim {
                EvidenceClaim::Location {
                    entity,
                    latitude,
                    longitude,
                } => {
                    let here = (*latitude, *longitude);
                    if let Some(first) = locations.get(entity) {
                        self.within_distance(item, *first, here)?;
                    } else {
                        locations.insert(entity, here);
                    }
                }
                EvidenceClaim::CustodyOwner { asset, owner } => {
                    if let Some(first) = owners.get(asset) {
                        if *first != owner {
                            return Err(inconsistent(item, format!("{asset} owner disagrees with other evidence")));
                        }
                    } else {
                        owners.insert(asset, owner);
                    }
                }
                EvidenceClaim::ComplianceScore { entity, score } => {
                    if let Some(first) = scores.get(entity) {
                        if (*first - *score).abs() > self.config.compliance_tolerance {
                            return Err(inconsistent(item, format!("{entity} score disagrees with other evidence")));
                        }
                    } else {
                        scores.insert(entity, *score);
                    }
                }
                EvidenceClaim::None | EvidenceClaim::Identity { .. } => {}
            }
        }
        Ok(())
    }

    pub(crate) fn within_distance(
        &self,
        item: &EvidenceItem,
        a: (Decimal, Decimal),
        b: (Decimal, Decimal),
    ) -> std::result::Result<(), EvidenceFailure> {
        let tolerance = rust_decimal::prelude::ToPrimitive::to_f64(&self.config.location_tolerance_km)
            .unwrap_or(0.0);
        match geo::distance_km(a, b) {
            Some(d) if d <= tolerance => Ok(()),
            Some(d) => Err(inconsistent(item, format!("location off by {d:.1} km"))),
            None => Err(inconsistent(item, "coordinates out of range".to_string())),
        }
    }
}

pub(crate) fn inconsistent(item: &EvidenceItem, reason: String) -> EvidenceFailure {
    EvidenceFailure::Inconsistent {
        item: item.name.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use verinet_types::{EventId, crypto};

    use super::*;

    fn screen_with(source: &str, key: &ed25519_dalek::SigningKey) -> EvidenceScreen {
        let mut sources = TrustedSources::new();
        sources.insert(source, key.verifying_key().to_bytes());
        EvidenceScreen::new(EvidenceConfig::default(), sources)
    }

    fn dispute(key: &ed25519_dalek::SigningKey) -> EvidencePackage {
        EvidencePackage::new(
            EventId::new(),
            vec![
                EvidenceItem::signed("ruling", EvidenceKind::Document, "customs", EvidenceClaim::None, key),
                EvidenceItem::signed("arbiter", EvidenceKind::Signature, "customs", EvidenceClaim::None, key),
            ],
        )
    }

    #[test]
    fn signed_complete_package_passes() {
        let key = crypto::generate_key();
        let result = screen_with("customs", &key).screen(EventType::DisputeResolution, &dispute(&key));
        assert!(result.valid, "{}", result.reason());
        assert_eq!(result.compliance_score, None);
    }

    #[test]
    fn unknown_source_fails_signatures() {
        let key = crypto::generate_key();
        let other = crypto::generate_key();
        let result = screen_with("customs", &other).screen(EventType::DisputeResolution, &dispute(&key));
        assert!(!result.valid);
        assert_eq!(result.failure, Some(EvidenceFailure::InvalidSignatures));
        assert_eq!(result.invalid_signatures.len(), 2);
    }

    #[test]
    fn missing_kind_reported_before_signatures() {
        let key = crypto::generate_key();
        let mut package = dispute(&key);
        package.items.retain(|i| i.kind == EvidenceKind::Document);
        package.items[0].signature.clear();
        let result = screen_with("customs", &key).screen(EventType::DisputeResolution, &package);
        assert_eq!(result.failure, Some(EvidenceFailure::MissingItems));
        assert_eq!(result.missing_items, vec![EvidenceKind::Signature]);
    }

    #[test]
    fn mismatched_claim_is_inconsistent() {
        let key = crypto::generate_key();
        let mut package = dispute(&key);
        package.items.push(EvidenceItem::signed(
            "kyc",
            EvidenceKind::IdentityAttestation,
            "customs",
            EvidenceClaim::None,
            &key,
        ));
        let result = screen_with("customs", &key).screen(EventType::DisputeResolution, &package);
        assert!(matches!(result.failure, Some(EvidenceFailure::Inconsistent { ref item, .. }) if item == "kyc"));
    }
}
