//! In-memory identity, location and compliance services.
//!
//! Used by tests and local single-process networks. Production deployments
//! plug in clients for the real registries behind the same traits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use verinet_types::services::{
    ComplianceService, IdentityRecord, IdentityService, LocationProof, LocationService,
};
use verinet_types::{Category, PartyId, Result, VerinetError};

#[derive(Debug, Default)]
pub struct InMemoryIdentity {
    records: RwLock<HashMap<PartyId, IdentityRecord>>,
}

impl InMemoryIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enroll(&self, entity: PartyId, category: Option<Category>) {
        self.records.write().insert(
            entity,
            IdentityRecord {
                valid: true,
                category,
            },
        );
    }

    /// Mark an identity invalid without forgetting its category.
    pub fn revoke(&self, entity: &PartyId) {
        if let Some(record) = self.records.write().get_mut(entity) {
            record.valid = false;
        }
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentity {
    async fn verify_identity(&self, entity: &PartyId) -> Result<IdentityRecord> {
        Ok(self
            .records
            .read()
            .get(entity)
            .cloned()
            .unwrap_or(IdentityRecord {
                valid: false,
                category: None,
            }))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLocations {
    proofs: RwLock<HashMap<PartyId, LocationProof>>,
}

impl InMemoryLocations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entity: PartyId, latitude: Decimal, longitude: Decimal) {
        let proof = LocationProof {
            entity: entity.clone(),
            latitude,
            longitude,
            captured_at: Utc::now(),
        };
        self.proofs.write().insert(entity, proof);
    }
}

#[async_trait]
impl LocationService for InMemoryLocations {
    async fn get_location_proof(&self, entity: &PartyId) -> Result<LocationProof> {
        self.proofs
            .read()
            .get(entity)
            .cloned()
            .ok_or_else(|| VerinetError::CollaboratorFailure {
                service: "location".to_string(),
                reason: format!("no location on record for {entity}"),
            })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCompliance {
    scores: RwLock<HashMap<PartyId, Decimal>>,
}

impl InMemoryCompliance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_score(&self, entity: PartyId, score: Decimal) {
        self.scores.write().insert(entity, score);
    }
}

#[async_trait]
impl ComplianceService for InMemoryCompliance {
    async fn get_score(&self, entity: &PartyId) -> Result<Decimal> {
        self.scores
            .read()
            .get(entity)
            .copied()
            .ok_or_else(|| VerinetError::CollaboratorFailure {
                service: "compliance".to_string(),
                reason: format!("no score on record for {entity}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_identity_is_invalid() {
        let ids = InMemoryIdentity::new();
        let record = ids.verify_identity(&PartyId::new("ghost")).await.unwrap();
        assert!(!record.valid);
    }

    #[tokio::test]
    async fn revoked_identity_keeps_category() {
        let ids = InMemoryIdentity::new();
        let who = PartyId::new("ministry");
        ids.enroll(who.clone(), Some(Category::Government));
        ids.revoke(&who);
        let record = ids.verify_identity(&who).await.unwrap();
        assert!(!record.valid);
        assert_eq!(record.category, Some(Category::Government));
    }

    #[tokio::test]
    async fn missing_score_is_collaborator_failure() {
        let scores = InMemoryCompliance::new();
        let err = scores.get_score(&PartyId::new("x")).await.unwrap_err();
        assert!(matches!(err, VerinetError::CollaboratorFailure { .. }));
    }
}
