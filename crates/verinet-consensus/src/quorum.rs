//! Weighted quorum arithmetic.

use rust_decimal::Decimal;
use verinet_types::{ConsensusConfig, VerificationEvent};

/// Quorum threshold for an event.
///
/// `max(2/3 + ε, event.min_threshold)`, plus the risk bump when the
/// subject's compliance score marks it high risk. Never above 1.
#[must_use]
pub fn threshold(
    config: &ConsensusConfig,
    event: &VerificationEvent,
    compliance_score: Option<Decimal>,
) -> Decimal {
    let mut t = config.base_quorum().max(event.min_threshold);
    let risk = &config.risk;
    if risk.enabled && compliance_score.is_some_and(|s| s < risk.high_risk_below) {
        t += risk.threshold_bump;
    }
    t.min(Decimal::ONE)
}

/// Weighted vote totals for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub approve: Decimal,
    pub reject: Decimal,
    pub abstain: Decimal,
    /// Weight of eligible validators that have not voted yet.
    pub pending: Decimal,
}

/// What a tally means for the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Reached,
    /// Even if every pending validator approved, quorum would be missed.
    Unreachable,
    Pending,
}

impl Tally {
    /// Quorum denominator: every eligible validator still counted,
    /// abstainers included.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.approve + self.reject + self.abstain + self.pending
    }

    /// Approval as a fraction of [`Tally::total`]; zero for an empty tally.
    #[must_use]
    pub fn approval(&self) -> Decimal {
        let total = self.total();
        if total.is_zero() {
            Decimal::ZERO
        } else {
            self.approve / total
        }
    }

    #[must_use]
    pub fn verdict(&self, threshold: Decimal) -> Verdict {
        let total = self.total();
        if total.is_zero() {
            return Verdict::Unreachable;
        }
        if self.approve >= threshold * total {
            Verdict::Reached
        } else if self.approve + self.pending < threshold * total {
            Verdict::Unreachable
        } else {
            Verdict::Pending
        }
    }
}
