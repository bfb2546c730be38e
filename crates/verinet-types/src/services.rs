//! External collaborators consumed by the core.
//!
//! Implementations live outside this workspace (identity registries, payment
//! rails, custody systems). The settlement crate ships in-memory versions
//! for tests and local runs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, AssetId, Category, EscrowId, PartyId, Result};

/// Result of an identity lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub valid: bool,
    /// Stakeholder category the identity is enrolled under, if any.
    pub category: Option<Category>,
}

/// A captured location for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationProof {
    pub entity: PartyId,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub captured_at: DateTime<Utc>,
}

/// State of funds held by the payment rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowStatus {
    Held,
    Released { recipient: AccountId },
    Refunded,
    /// The lock TTL elapsed and the rail returned the funds on its own.
    Expired,
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn verify_identity(&self, entity: &PartyId) -> Result<IdentityRecord>;
}

#[async_trait]
pub trait LocationService: Send + Sync {
    async fn get_location_proof(&self, entity: &PartyId) -> Result<LocationProof>;
}

#[async_trait]
pub trait ComplianceService: Send + Sync {
    /// Compliance score in `[0, 1]`; lower means riskier.
    async fn get_score(&self, entity: &PartyId) -> Result<Decimal>;
}

#[async_trait]
pub trait CustodyService: Send + Sync {
    async fn get_custody_owner(&self, asset: &AssetId) -> Result<PartyId>;

    /// Lock the asset for `holder`. The lock lapses after `ttl`.
    async fn lock_asset(&self, asset: &AssetId, holder: &PartyId, ttl: Duration) -> Result<()>;

    /// Release a lock held by `holder`. No-op if the lock is already gone.
    async fn unlock_asset(&self, asset: &AssetId, holder: &PartyId) -> Result<()>;

    async fn transfer_asset(&self, asset: &AssetId, from: &PartyId, to: &PartyId) -> Result<()>;
}

#[async_trait]
pub trait PaymentService: Send + Sync {
    async fn check_funds(&self, account: &AccountId, amount: Decimal) -> Result<bool>;

    /// Move `amount` into escrow under the caller-chosen `escrow` handle.
    ///
    /// The handle is picked before the call so an interrupted lock can be
    /// looked up with [`PaymentService::escrow_status`].
    async fn lock_funds(
        &self,
        escrow: EscrowId,
        account: &AccountId,
        amount: Decimal,
        ttl: Duration,
    ) -> Result<()>;

    async fn release_funds(&self, escrow: EscrowId, recipient: &AccountId) -> Result<()>;

    /// Return escrowed funds to the payer.
    async fn refund(&self, escrow: EscrowId) -> Result<()>;

    /// `None` if the rail has never seen this escrow.
    async fn escrow_status(&self, escrow: EscrowId) -> Result<Option<EscrowStatus>>;
}
