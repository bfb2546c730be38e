//! The validator registry.
//!
//! Holds every validator ever registered. Ejected validators stay in the
//! map (their keys still verify votes they already cast) but drop out of
//! [`ValidatorRegistry::list_active`] and carry no weight.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use verinet_types::{
    Category, RegistryConfig, Result, Validator, ValidatorId, ValidatorStatus, VerinetError,
};

use crate::weight::{self, VotingPower};

/// Registry shared between the node facade, the incentive ledger and the
/// gossip key directory.
pub type SharedRegistry = Arc<RwLock<ValidatorRegistry>>;

#[derive(Debug)]
pub struct ValidatorRegistry {
    config: RegistryConfig,
    validators: BTreeMap<ValidatorId, Validator>,
}

impl ValidatorRegistry {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            validators: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn shared(config: RegistryConfig) -> SharedRegistry {
        Arc::new(RwLock::new(Self::new(config)))
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // =================================================================
    // Registration
    // =================================================================

    /// Register a validator and compute its weight.
    ///
    /// # Errors
    /// - [`VerinetError::DuplicateValidator`] if the key is already known,
    ///   including keys of ejected validators.
    /// - [`VerinetError::InvalidValidator`] if reputation is outside `[0, 1]`
    ///   or stake is below the minimum.
    pub fn register(&mut self, mut validator: Validator) -> Result<ValidatorId> {
        if self.validators.contains_key(&validator.id) {
            return Err(VerinetError::DuplicateValidator(validator.id));
        }
        if validator.reputation < Decimal::ZERO || validator.reputation > Decimal::ONE {
            return Err(VerinetError::InvalidValidator {
                reason: format!("reputation {} outside [0, 1]", validator.reputation),
            });
        }
        if validator.stake < self.config.min_stake {
            return Err(VerinetError::InvalidValidator {
                reason: format!(
                    "stake {} below minimum {}",
                    validator.stake, self.config.min_stake
                ),
            });
        }

        validator.status = ValidatorStatus::Active;
        validator.weight = self.weight_for(&validator);
        let id = validator.id;
        info!(
            validator = %id,
            category = %validator.category,
            stake = %validator.stake,
            weight = %validator.weight,
            "Validator registered"
        );
        self.validators.insert(id, validator);
        Ok(id)
    }

    // =================================================================
    // Stake & reputation
    // =================================================================

    /// Apply a stake delta and recompute weight. Ejects the validator if the
    /// resulting stake falls below the minimum. Stake never goes negative.
    ///
    /// Returns the new stake.
    pub fn update_stake(&mut self, id: &ValidatorId, delta: Decimal) -> Result<Decimal> {
        let min_stake = self.config.min_stake;
        let validator = self.get_mut(id)?;
        validator.stake = (validator.stake + delta).max(Decimal::ZERO);
        let stake = validator.stake;
        let active = validator.is_active();
        debug!(validator = %id, %delta, %stake, "Stake updated");

        if active && stake < min_stake {
            warn!(validator = %id, %stake, %min_stake, "Stake below minimum, ejecting");
            self.eject(id)?;
        } else {
            self.refresh_weight(id)?;
        }
        Ok(stake)
    }

    /// Apply a reputation delta, clamped to `[0, 1]`, and recompute weight.
    ///
    /// Returns the new reputation.
    pub fn update_reputation(&mut self, id: &ValidatorId, delta: Decimal) -> Result<Decimal> {
        let validator = self.get_mut(id)?;
        validator.reputation = (validator.reputation + delta).clamp(Decimal::ZERO, Decimal::ONE);
        let reputation = validator.reputation;
        debug!(validator = %id, %delta, %reputation, "Reputation updated");
        self.refresh_weight(id)?;
        Ok(reputation)
    }

    /// Current individual weight. Zero for ejected validators.
    pub fn compute_weight(&self, id: &ValidatorId) -> Result<Decimal> {
        let validator = self.get(id)?;
        Ok(self.weight_for(validator))
    }

    fn weight_for(&self, validator: &Validator) -> Decimal {
        if !validator.is_active() {
            return Decimal::ZERO;
        }
        weight::individual_weight(
            &self.config,
            validator.category,
            validator.stake,
            validator.reputation,
        )
    }

    fn refresh_weight(&mut self, id: &ValidatorId) -> Result<()> {
        let weight = self.compute_weight(id)?;
        self.get_mut(id)?.weight = weight;
        Ok(())
    }

    // =================================================================
    // Ejection
    // =================================================================

    /// Eject a validator. One-way; ejecting twice is an error.
    ///
    /// # Errors
    /// [`VerinetError::ValidatorEjected`] if already ejected.
    pub fn eject(&mut self, id: &ValidatorId) -> Result<()> {
        let validator = self.get_mut(id)?;
        if !validator.is_active() {
            return Err(VerinetError::ValidatorEjected(*id));
        }
        validator.status = ValidatorStatus::Ejected;
        validator.weight = Decimal::ZERO;
        warn!(validator = %id, stake = %validator.stake, "Validator ejected");
        Ok(())
    }

    // =================================================================
    // Queries
    // =================================================================

    pub fn get(&self, id: &ValidatorId) -> Result<&Validator> {
        self.validators
            .get(id)
            .ok_or(VerinetError::ValidatorNotFound(*id))
    }

    fn get_mut(&mut self, id: &ValidatorId) -> Result<&mut Validator> {
        self.validators
            .get_mut(id)
            .ok_or(VerinetError::ValidatorNotFound(*id))
    }

    /// Active validators, optionally filtered by category, in id order.
    #[must_use]
    pub fn list_active(&self, category: Option<Category>) -> Vec<&Validator> {
        self.validators
            .values()
            .filter(|v| v.is_active())
            .filter(|v| category.is_none_or(|c| v.category == c))
            .collect()
    }

    /// Voting power of the active validators in `categories`
    /// (every category if empty).
    #[must_use]
    pub fn voting_power(&self, categories: &[Category]) -> VotingPower {
        VotingPower::from_validators(
            &self.config,
            self.validators
                .values()
                .filter(|v| v.is_active())
                .filter(|v| categories.is_empty() || categories.contains(&v.category)),
        )
    }

    /// Whether the key belongs to an active validator.
    #[must_use]
    pub fn is_active(&self, id: &ValidatorId) -> bool {
        self.validators.get(id).is_some_and(Validator::is_active)
    }

    /// Public key of any registered validator, active or ejected.
    #[must_use]
    pub fn public_key(&self, id: &ValidatorId) -> Option<[u8; 32]> {
        self.validators.get(id).map(|v| *v.public_key())
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.validators.values().filter(|v| v.is_active()).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}
