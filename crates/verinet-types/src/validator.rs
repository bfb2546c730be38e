//! Validator records held by the registry.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Category, PartyId, ValidatorId};

/// Whether a validator currently takes part in quorum calculations.
///
/// `Active → Ejected` is one-way; an ejected operator must re-register
/// with a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidatorStatus {
    Active,
    Ejected,
}

impl std::fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Ejected => write!(f, "EJECTED"),
        }
    }
}

/// A permissioned validator.
///
/// `weight` is derived state: the registry recomputes it whenever `stake`
/// or `reputation` changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Public key, doubling as the validator's identity.
    pub id: ValidatorId,
    /// The organisation operating this validator.
    pub operator: PartyId,
    pub category: Category,
    pub stake: Decimal,
    /// Reputation score in `[0, 1]`.
    pub reputation: Decimal,
    /// Individual weight: `base(category) × rep_mult × stake_mult`.
    pub weight: Decimal,
    pub status: ValidatorStatus,
    pub registered_at: DateTime<Utc>,
}

impl Validator {
    /// New active validator with zero weight; the registry fills it in.
    #[must_use]
    pub fn new(
        id: ValidatorId,
        operator: PartyId,
        category: Category,
        stake: Decimal,
        reputation: Decimal,
    ) -> Self {
        Self {
            id,
            operator,
            category,
            stake,
            reputation,
            weight: Decimal::ZERO,
            status: ValidatorStatus::Active,
            registered_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ValidatorStatus::Active
    }

    /// Raw public key bytes for signature checks.
    #[must_use]
    pub fn public_key(&self) -> &[u8; 32] {
        self.id.as_bytes()
    }
}
