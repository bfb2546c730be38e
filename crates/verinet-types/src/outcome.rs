//! Notifications pushed to outcome subscribers.

use serde::{Deserialize, Serialize};

use crate::{EventId, RejectReason, SettlementId, SettlementStatus, ValidatorId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Committed {
        event_id: EventId,
        view: u32,
    },
    Rejected {
        event_id: EventId,
        reason: RejectReason,
        dissenting: Vec<ValidatorId>,
        non_responding: Vec<ValidatorId>,
    },
    /// A view expired; a view change follows unless the limit is reached.
    TimedOut {
        event_id: EventId,
        view: u32,
    },
    SettlementCompleted {
        settlement_id: SettlementId,
        event_id: EventId,
    },
    SettlementReversed {
        settlement_id: SettlementId,
        event_id: EventId,
        status: SettlementStatus,
        reason: String,
    },
}

impl Outcome {
    #[must_use]
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Committed { event_id, .. }
            | Self::Rejected { event_id, .. }
            | Self::TimedOut { event_id, .. }
            | Self::SettlementCompleted { event_id, .. }
            | Self::SettlementReversed { event_id, .. } => *event_id,
        }
    }

    /// Whether the round for this event is finished.
    #[must_use]
    pub fn is_round_final(&self) -> bool {
        matches!(self, Self::Committed { .. } | Self::Rejected { .. })
    }
}
