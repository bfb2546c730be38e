//! Weight computation.
//!
//! Everything here is a pure function of the configuration and the
//! (category, stake, reputation) tuples, so every validator derives the same
//! quorum arithmetic from the same registry state.
//!
//! Individual weight:
//!
//! ```text
//! weight = base(category) × rep_mult(reputation) × stake_mult(stake)
//! rep_mult(r)   = floor + (1 − floor) × clamp(r, 0, 1)
//! stake_mult(s) = min(s / reference_stake, cap)
//! ```
//!
//! Voting power inside a round splits each category's base weight across
//! the eligible members of that category, proportionally to their individual
//! weights. Two government validators with identical stake and reputation
//! therefore hold 0.20 each under the default table.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use verinet_types::{Category, RegistryConfig, Validator, ValidatorId};

#[must_use]
pub fn reputation_multiplier(config: &RegistryConfig, reputation: Decimal) -> Decimal {
    let r = reputation.clamp(Decimal::ZERO, Decimal::ONE);
    config.reputation_floor + (Decimal::ONE - config.reputation_floor) * r
}

#[must_use]
pub fn stake_multiplier(config: &RegistryConfig, stake: Decimal) -> Decimal {
    if stake <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (stake / config.reference_stake).min(config.stake_multiplier_cap)
}

/// Individual weight, clipped to be non-negative.
#[must_use]
pub fn individual_weight(
    config: &RegistryConfig,
    category: Category,
    stake: Decimal,
    reputation: Decimal,
) -> Decimal {
    let w = config.category_weights.base(category)
        * reputation_multiplier(config, reputation)
        * stake_multiplier(config, stake);
    w.max(Decimal::ZERO)
}

/// A round's eligible validators and their voting power, fixed when the
/// round opens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VotingPower {
    members: BTreeMap<ValidatorId, Member>,
    total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Member {
    category: Category,
    stake: Decimal,
    power: Decimal,
}

impl VotingPower {
    /// Split category base weights across `validators`.
    ///
    /// Callers pass only validators eligible for the round. A category whose
    /// members all have zero individual weight is split evenly.
    #[must_use]
    pub fn from_validators<'a>(
        config: &RegistryConfig,
        validators: impl IntoIterator<Item = &'a Validator>,
    ) -> Self {
        let mut by_category: BTreeMap<Category, Vec<&Validator>> = BTreeMap::new();
        for v in validators {
            by_category.entry(v.category).or_default().push(v);
        }

        let mut members = BTreeMap::new();
        let mut total = Decimal::ZERO;
        for (category, group) in by_category {
            let base = config.category_weights.base(category);
            let weights: Vec<Decimal> = group
                .iter()
                .map(|v| individual_weight(config, category, v.stake, v.reputation))
                .collect();
            let group_weight: Decimal = weights.iter().sum();
            let count = Decimal::from(group.len());

            for (v, w) in group.iter().zip(weights) {
                let power = if group_weight.is_zero() {
                    base / count
                } else {
                    base * w / group_weight
                };
                total += power;
                members.insert(
                    v.id,
                    Member {
                        category,
                        stake: v.stake,
                        power,
                    },
                );
            }
        }
        Self { members, total }
    }

    #[must_use]
    pub fn power(&self, id: &ValidatorId) -> Decimal {
        self.members.get(id).map_or(Decimal::ZERO, |m| m.power)
    }

    #[must_use]
    pub fn stake(&self, id: &ValidatorId) -> Decimal {
        self.members.get(id).map_or(Decimal::ZERO, |m| m.stake)
    }

    #[must_use]
    pub fn category(&self, id: &ValidatorId) -> Option<Category> {
        self.members.get(id).map(|m| m.category)
    }

    /// Sum of every member's power.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.total
    }

    #[must_use]
    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.members.contains_key(id)
    }

    /// Member ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &ValidatorId> {
        self.members.keys()
    }

    /// Combined power of `ids`; unknown ids contribute nothing.
    pub fn sum<'a>(&self, ids: impl IntoIterator<Item = &'a ValidatorId>) -> Decimal {
        ids.into_iter().map(|id| self.power(id)).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
