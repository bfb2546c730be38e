//! Fund conservation check.
//!
//! ```text
//! Σ(available + escrowed) == Σ(deposits) - Σ(withdrawals)
//! ```
//!
//! Settlement only moves funds between accounts and escrow, so the sum
//! must never change across any settlement, completed or reversed.

use rust_decimal::Decimal;
use verinet_types::{Result, VerinetError};

#[derive(Debug, Default, Clone)]
pub struct SupplyConservation {
    deposits: Decimal,
    withdrawals: Decimal,
}

impl SupplyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_deposit(&mut self, amount: Decimal) {
        self.deposits += amount;
    }

    pub fn record_withdrawal(&mut self, amount: Decimal) {
        self.withdrawals += amount;
    }

    #[must_use]
    pub fn expected_supply(&self) -> Decimal {
        self.deposits - self.withdrawals
    }

    /// # Errors
    /// [`VerinetError::Internal`] if `actual_supply` differs from the
    /// expected supply.
    pub fn verify(&self, actual_supply: Decimal) -> Result<()> {
        let expected = self.expected_supply();
        if actual_supply != expected {
            return Err(VerinetError::Internal(format!(
                "supply invariant violated: actual {actual_supply} != expected {expected} \
                 (deposits={}, withdrawals={})",
                self.deposits, self.withdrawals
            )));
        }
        Ok(())
    }
}
