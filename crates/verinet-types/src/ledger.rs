//! Append-only stake and reputation ledger entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EventId, OffenseType, ValidatorId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntryKind {
    Reward,
    Slash(OffenseType),
    ReputationPenalty,
    Ejection,
}

/// One immutable change to a validator's stake or reputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the ledger, starting at 0.
    pub sequence: u64,
    pub validator: ValidatorId,
    pub kind: LedgerEntryKind,
    pub event_id: Option<EventId>,
    pub view: Option<u32>,
    pub stake_delta: Decimal,
    pub reputation_delta: Decimal,
    /// Stake after this entry was applied.
    pub resulting_stake: Decimal,
    pub timestamp: DateTime<Utc>,
}
