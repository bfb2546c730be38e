//! Stakeholder categories and their governance-tunable base weights.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Result, VerinetError};

/// The stakeholder class a validator belongs to.
///
/// Privileges differ only through the [`CategoryWeights`] table, never
/// through separate validator types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Category {
    Government,
    Enterprise,
    Community,
    Academic,
}

impl Category {
    /// All categories in canonical order.
    pub const ALL: [Category; 4] = [
        Category::Government,
        Category::Enterprise,
        Category::Community,
        Category::Academic,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Government => write!(f, "GOVERNMENT"),
            Self::Enterprise => write!(f, "ENTERPRISE"),
            Self::Community => write!(f, "COMMUNITY"),
            Self::Academic => write!(f, "ACADEMIC"),
        }
    }
}

/// Base voting weight per category. The four weights must sum to 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryWeights {
    pub government: Decimal,
    pub enterprise: Decimal,
    pub community: Decimal,
    pub academic: Decimal,
}

impl CategoryWeights {
    /// Base weight for a category.
    #[must_use]
    pub fn base(&self, category: Category) -> Decimal {
        match category {
            Category::Government => self.government,
            Category::Enterprise => self.enterprise,
            Category::Community => self.community,
            Category::Academic => self.academic,
        }
    }

    /// Reject negative weights and tables that do not sum to exactly 1.
    pub fn validate(&self) -> Result<()> {
        let weights = Category::ALL.map(|c| self.base(c));
        if weights.iter().any(|w| w.is_sign_negative()) {
            return Err(VerinetError::Configuration(
                "category weights must be non-negative".to_string(),
            ));
        }
        let sum: Decimal = weights.iter().sum();
        if sum != Decimal::ONE {
            return Err(VerinetError::Configuration(format!(
                "category weights must sum to 1, got {sum}"
            )));
        }
        Ok(())
    }
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            government: Decimal::new(40, 2),
            enterprise: Decimal::new(30, 2),
            community: Decimal::new(20, 2),
            academic: Decimal::new(10, 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let w = CategoryWeights::default();
        assert!(w.validate().is_ok());
        assert_eq!(w.base(Category::Government), Decimal::new(4, 1));
        assert_eq!(w.base(Category::Academic), Decimal::new(1, 1));
    }

    #[test]
    fn retuned_weights_must_still_sum_to_one() {
        let w = CategoryWeights {
            government: Decimal::new(50, 2),
            enterprise: Decimal::new(30, 2),
            community: Decimal::new(20, 2),
            academic: Decimal::new(10, 2),
        };
        let err = w.validate().unwrap_err();
        assert!(matches!(err, VerinetError::Configuration(_)));
    }

    #[test]
    fn negative_weight_rejected() {
        let w = CategoryWeights {
            government: Decimal::new(110, 2),
            enterprise: Decimal::new(-10, 2),
            community: Decimal::ZERO,
            academic: Decimal::ZERO,
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn category_display() {
        assert_eq!(Category::Community.to_string(), "COMMUNITY");
    }
}
