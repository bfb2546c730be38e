//! Consensus round status as observed by one validator.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EventId, EventType, ValidatorId, Vote};

/// Lifecycle of a round.
///
/// ```text
/// Proposed → PrePrepared → Prepared → Committed
///     │            │            │
///     └────────────┴────────────┴──→ TimedOut → (next view) Proposed
///                                └──→ Rejected
/// ```
///
/// `Committed` and `Rejected` are terminal. `TimedOut` is transient while
/// view changes remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundStatus {
    Proposed,
    PrePrepared,
    Prepared,
    Committed,
    Rejected,
    TimedOut,
}

impl RoundStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Rejected)
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposed => write!(f, "PROPOSED"),
            Self::PrePrepared => write!(f, "PRE_PREPARED"),
            Self::Prepared => write!(f, "PREPARED"),
            Self::Committed => write!(f, "COMMITTED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Why a round ended in `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Approval plus weight still in flight can no longer reach quorum.
    QuorumUnreachable,
    /// Every allowed view timed out.
    ViewChangesExhausted,
    /// The submitter cancelled the event.
    Aborted(String),
    /// The event's own deadline passed.
    EventExpired,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuorumUnreachable => write!(f, "quorum unreachable"),
            Self::ViewChangesExhausted => write!(f, "view changes exhausted"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
            Self::EventExpired => write!(f, "event deadline passed"),
        }
    }
}

/// Terminal result of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    Committed,
    Rejected(RejectReason),
}

/// One view of a round: its proposer and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub view: u32,
    pub proposer: ValidatorId,
    pub started_at: DateTime<Utc>,
    pub timed_out: bool,
}

/// Read-only snapshot of a round, returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusRound {
    pub event_id: EventId,
    pub event_type: EventType,
    pub view: u32,
    pub proposer: ValidatorId,
    pub status: RoundStatus,
    /// Accepted prepare votes, all views.
    pub prepare_votes: Vec<Vote>,
    /// Accepted commit votes, all views.
    pub commit_votes: Vec<Vote>,
    /// Weighted prepare approval in the current view.
    pub prepare_approval: Decimal,
    /// Weighted commit approval across views.
    pub commit_approval: Decimal,
    pub threshold: Decimal,
    pub outcome: Option<RoundOutcome>,
    /// Validators that voted reject in the deciding phase.
    pub dissenting: Vec<ValidatorId>,
    /// Eligible validators that never voted in the deciding phase.
    pub non_responding: Vec<ValidatorId>,
    pub views: Vec<ViewRecord>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl ConsensusRound {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.status == RoundStatus::Committed
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
