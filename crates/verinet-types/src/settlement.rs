//! Settlement transactions: payment against custody, all or nothing.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AccountId, AssetId, ConsensusRound, EscrowId, EventId, PartyId, Result, SettlementId,
    VerificationEvent, VerinetError,
};

/// Lock state of one settlement leg.
///
/// ```text
/// Unlocked → Locked → Transferred
///               └───→ ReleasedBack
/// Transferred → ReleasedBack   (compensation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegState {
    Unlocked,
    Locked,
    Transferred,
    ReleasedBack,
}

impl fmt::Display for LegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => write!(f, "UNLOCKED"),
            Self::Locked => write!(f, "LOCKED"),
            Self::Transferred => write!(f, "TRANSFERRED"),
            Self::ReleasedBack => write!(f, "RELEASED_BACK"),
        }
    }
}

/// Funds moving from payer to payee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLeg {
    pub payer: AccountId,
    pub payee: AccountId,
    pub amount: Decimal,
    /// Set once the payment rail has locked the funds.
    pub escrow: Option<EscrowId>,
    pub state: LegState,
}

/// A custody token moving from seller to buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyLeg {
    pub asset: AssetId,
    pub seller: PartyId,
    pub buyer: PartyId,
    pub state: LegState,
}

/// Business terms of a settlement, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementTerms {
    pub payer: AccountId,
    pub payee: AccountId,
    pub amount: Decimal,
    pub asset: AssetId,
    pub seller: PartyId,
    pub buyer: PartyId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementStatus {
    Created,
    LocksAcquired,
    /// Both legs transferred. Terminal.
    Transferred,
    /// Failure after side effects; every leg released back. Terminal.
    Reversed,
    /// Failure before any side effect persisted. Terminal.
    Aborted,
    /// A compensating action failed. Terminal until an operator intervenes.
    RequiresIntervention,
}

impl SettlementStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created | Self::LocksAcquired)
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::LocksAcquired => write!(f, "LOCKS_ACQUIRED"),
            Self::Transferred => write!(f, "TRANSFERRED"),
            Self::Reversed => write!(f, "REVERSED"),
            Self::Aborted => write!(f, "ABORTED"),
            Self::RequiresIntervention => write!(f, "REQUIRES_INTERVENTION"),
        }
    }
}

/// A settlement bound 1:1 to a committed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementTransaction {
    pub id: SettlementId,
    pub event_id: EventId,
    pub payment: PaymentLeg,
    pub custody: CustodyLeg,
    pub status: SettlementStatus,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementTransaction {
    #[must_use]
    pub fn new(event_id: EventId, terms: &SettlementTerms) -> Self {
        let now = Utc::now();
        Self {
            id: SettlementId::new(),
            event_id,
            payment: PaymentLeg {
                payer: terms.payer.clone(),
                payee: terms.payee.clone(),
                amount: terms.amount,
                escrow: None,
                state: LegState::Unlocked,
            },
            custody: CustodyLeg {
                asset: terms.asset.clone(),
                seller: terms.seller.clone(),
                buyer: terms.buyer.clone(),
                state: LegState::Unlocked,
            },
            status: SettlementStatus::Created,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Both legs transferred, or neither left transferred.
    #[must_use]
    pub fn is_atomic(&self) -> bool {
        let paid = self.payment.state == LegState::Transferred;
        let delivered = self.custody.state == LegState::Transferred;
        paid == delivered
    }

    pub fn set_status(&mut self, status: SettlementStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Proof that an event's round committed. The settlement coordinator only
/// accepts this type, so a transfer can never run for an uncommitted event.
///
/// Serialize only: the one way to obtain a value is
/// [`CommittedEvent::from_round`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedEvent {
    event: VerificationEvent,
    round: ConsensusRound,
}

impl CommittedEvent {
    /// Bind an event to its committed round.
    ///
    /// # Errors
    ///
    /// [`VerinetError::NotCommitted`] if the round is not committed or
    /// belongs to another event.
    pub fn from_round(event: VerificationEvent, round: ConsensusRound) -> Result<Self> {
        if !round.is_committed() || round.event_id != event.id {
            return Err(VerinetError::NotCommitted(event.id));
        }
        Ok(Self { event, round })
    }

    #[must_use]
    pub fn event(&self) -> &VerificationEvent {
        &self.event
    }

    #[must_use]
    pub fn round(&self) -> &ConsensusRound {
        &self.round
    }

    #[must_use]
    pub fn event_id(&self) -> EventId {
        self.event.id
    }
}
