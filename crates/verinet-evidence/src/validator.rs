//! Evidence validation pipeline.

use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use verinet_types::services::{ComplianceService, CustodyService, IdentityService, LocationService};
use verinet_types::{
    EventType, EvidenceClaim, EvidenceConfig, EvidenceFailure, EvidenceItem, EvidencePackage,
    Result, ValidationResult, VerificationEvent, VerinetError,
};

use crate::cache::ResultCache;
use crate::screen::{EvidenceScreen, inconsistent};
use crate::sources::TrustedSources;

/// External services that evidence claims are resolved against.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityService>,
    pub location: Arc<dyn LocationService>,
    pub custody: Arc<dyn CustodyService>,
    pub compliance: Arc<dyn ComplianceService>,
}

pub struct EvidenceValidator {
    screen: Arc<EvidenceScreen>,
    services: Collaborators,
    cache: Mutex<ResultCache>,
}

impl EvidenceValidator {
    #[must_use]
    pub fn new(config: EvidenceConfig, sources: TrustedSources, services: Collaborators) -> Self {
        let cache = Mutex::new(ResultCache::new(config.cache_size));
        Self {
            screen: Arc::new(EvidenceScreen::new(config, sources)),
            services,
            cache,
        }
    }

    /// Validate `package` for an event of `event_type`.
    ///
    /// Accepted results and deterministic rejections are cached by package
    /// digest. Rejections caused by an unreachable collaborator are not, so
    /// a later retry asks again.
    pub async fn validate(&self, event_type: EventType, package: &EvidencePackage) -> ValidationResult {
        let digest = package.digest();
        if let Some(cached) = self.cache.lock().get(&digest, event_type) {
            debug!(event_id = %package.event_id, "Evidence result served from cache");
            return cached;
        }

        let result = self.run_checks(event_type, package).await;
        if result.valid {
            info!(event_id = %package.event_id, %event_type, items = package.items.len(), "Evidence accepted");
        } else {
            warn!(event_id = %package.event_id, %event_type, reason = %result.reason(), "Evidence rejected");
        }

        let transient = matches!(
            result.failure,
            Some(EvidenceFailure::UnresolvedReference { .. })
        );
        if !transient {
            self.cache.lock().insert(event_type, result.clone());
        }
        result
    }

    /// Validate the package submitted with `event`.
    ///
    /// # Errors
    /// - [`VerinetError::EvidenceEventMismatch`] if the package is bound to
    ///   another event.
    /// - [`VerinetError::EvidenceValidationFailure`] if any check fails.
    pub async fn validate_for(
        &self,
        event: &VerificationEvent,
        package: &EvidencePackage,
    ) -> Result<ValidationResult> {
        if package.event_id != event.id {
            return Err(VerinetError::EvidenceEventMismatch {
                event_id: event.id,
                package_event: package.event_id,
            });
        }
        let result = self.validate(event.event_type, package).await;
        if !result.valid {
            return Err(VerinetError::EvidenceValidationFailure {
                event_id: event.id,
                reason: result.reason(),
            });
        }
        Ok(result)
    }

    /// The collaborator-free checks this validator runs first.
    #[must_use]
    pub fn screen(&self) -> &Arc<EvidenceScreen> {
        &self.screen
    }

    /// `(hits, misses)` of the result cache.
    #[must_use]
    pub fn cache_stats(&self) -> (u64, u64) {
        let cache = self.cache.lock();
        (cache.hits(), cache.misses())
    }

    // =================================================================
    // Checks
    // =================================================================

    async fn run_checks(&self, event_type: EventType, package: &EvidencePackage) -> ValidationResult {
        let screened = self.screen.screen(event_type, package);
        if !screened.valid {
            return screened;
        }
        match self.resolve_claims(&EvidenceScreen::ordered(package)).await {
            Ok(score) => ValidationResult::accepted(screened.digest, score),
            Err(failure) => ValidationResult::rejected(screened.digest, failure),
        }
    }

    /// Resolve every claim against its collaborator. Returns the lowest
    /// compliance score observed, if any.
    async fn resolve_claims(&self, items: &[&EvidenceItem]) -> std::result::Result<Option<Decimal>, EvidenceFailure> {
        let mut lowest_score: Option<Decimal> = None;

        for item in items {
            match &item.claim {
                EvidenceClaim::None => {}
                EvidenceClaim::Identity { entity } => {
                    let record = self
                        .services
                        .identity
                        .verify_identity(entity)
                        .await
                        .map_err(|e| unresolved(item, &e))?;
                    if !record.valid {
                        return Err(inconsistent(item, format!("identity of {entity} not valid")));
                    }
                }
                EvidenceClaim::Location {
                    entity,
                    latitude,
                    longitude,
                } => {
                    let proof = self
                        .services
                        .location
                        .get_location_proof(entity)
                        .await
                        .map_err(|e| unresolved(item, &e))?;
                    self.screen
                        .within_distance(item, (proof.latitude, proof.longitude), (*latitude, *longitude))?;
                }
                EvidenceClaim::CustodyOwner { asset, owner } => {
                    let holder = self
                        .services
                        .custody
                        .get_custody_owner(asset)
                        .await
                        .map_err(|e| unresolved(item, &e))?;
                    if holder != *owner {
                        return Err(inconsistent(item, format!("{asset} is held by {holder}, not {owner}")));
                    }
                }
                EvidenceClaim::ComplianceScore { entity, score } => {
                    let recorded = self
                        .services
                        .compliance
                        .get_score(entity)
                        .await
                        .map_err(|e| unresolved(item, &e))?;
                    if (recorded - *score).abs() > self.screen.config().compliance_tolerance {
                        return Err(inconsistent(
                            item,
                            format!("claimed score {score} but service reports {recorded}"),
                        ));
                    }
                    lowest_score = Some(lowest_score.map_or(recorded, |s| s.min(recorded)));
                }
            }
        }
        Ok(lowest_score)
    }
}

fn unresolved(item: &EvidenceItem, err: &VerinetError) -> EvidenceFailure {
    EvidenceFailure::UnresolvedReference {
        item: item.name.clone(),
        reason: err.to_string(),
    }
}
