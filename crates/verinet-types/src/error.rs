//! Error types for Verinet.
//!
//! All errors use the `VN_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validator registry errors
//! - 2xx: Evidence errors
//! - 3xx: Consensus errors
//! - 4xx: Settlement errors
//! - 5xx: Incentive ledger errors
//! - 7xx: Network errors
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{EventId, SettlementId, ValidatorId};

/// Central error enum for all Verinet operations.
#[derive(Debug, Error)]
pub enum VerinetError {
    // =================================================================
    // Registry Errors (1xx)
    // =================================================================
    /// The validator is not registered.
    #[error("VN_ERR_100: Validator not found: {0}")]
    ValidatorNotFound(ValidatorId),

    /// A validator with this key is already registered.
    #[error("VN_ERR_101: Validator already registered: {0}")]
    DuplicateValidator(ValidatorId),

    /// Registration data is invalid (bad reputation, stake below minimum, ...).
    #[error("VN_ERR_102: Invalid validator: {reason}")]
    InvalidValidator { reason: String },

    /// The validator has been ejected and may no longer take part.
    #[error("VN_ERR_103: Validator ejected: {0}")]
    ValidatorEjected(ValidatorId),

    /// The identity service did not confirm the validator's identity or category.
    #[error("VN_ERR_104: Identity verification failed: {reason}")]
    IdentityRejected { reason: String },

    // =================================================================
    // Evidence Errors (2xx)
    // =================================================================
    /// Evidence is incomplete or invalid. Never retried automatically.
    #[error("VN_ERR_200: Evidence validation failed for {event_id}: {reason}")]
    EvidenceValidationFailure { event_id: EventId, reason: String },

    /// The package is bound to a different event than the one submitted.
    #[error("VN_ERR_201: Evidence package bound to {package_event}, not {event_id}")]
    EvidenceEventMismatch {
        event_id: EventId,
        package_event: EventId,
    },

    // =================================================================
    // Consensus Errors (3xx)
    // =================================================================
    /// Quorum was not reached or view changes were exhausted.
    #[error(
        "VN_ERR_300: Consensus failed for {event_id}: {reason} \
         ({} dissenting, {} non-responding)",
        .dissenting.len(),
        .non_responding.len()
    )]
    ConsensusFailure {
        event_id: EventId,
        reason: String,
        dissenting: Vec<ValidatorId>,
        non_responding: Vec<ValidatorId>,
    },

    /// No consensus round exists for this event.
    #[error("VN_ERR_301: Unknown event: {0}")]
    UnknownEvent(EventId),

    /// The event was already submitted.
    #[error("VN_ERR_302: Event already submitted: {0}")]
    DuplicateEvent(EventId),

    /// A vote or proposal signature did not verify.
    #[error("VN_ERR_303: Invalid signature from {0}")]
    InvalidSignature(ValidatorId),

    /// A vote conflicts with one already cast for the same (validator, event, phase).
    #[error("VN_ERR_304: Conflicting vote from {validator} on {event_id}")]
    ConflictingVote {
        validator: ValidatorId,
        event_id: EventId,
    },

    /// The voter is not eligible for this round.
    #[error("VN_ERR_305: Validator {validator} not eligible for {event_id}")]
    NotEligible {
        validator: ValidatorId,
        event_id: EventId,
    },

    /// The round already reached a terminal outcome.
    #[error("VN_ERR_306: Round for {0} is already final")]
    RoundFinalized(EventId),

    /// The proposal did not come from the proposer selected for its view.
    #[error("VN_ERR_307: Unexpected proposer {proposer} for {event_id}")]
    UnexpectedProposer {
        proposer: ValidatorId,
        event_id: EventId,
    },

    // =================================================================
    // Settlement Errors (4xx)
    // =================================================================
    /// Funds or custody were not as declared. No side effects were performed.
    #[error("VN_ERR_400: Settlement precondition failed: {reason}")]
    PreconditionFailure { reason: String },

    /// A resource lock could not be acquired in time. Retryable by the caller.
    #[error("VN_ERR_401: Lock acquisition failed on {resource}: {reason}")]
    LockAcquisitionFailure { resource: String, reason: String },

    /// A compensating action failed. Requires manual operator intervention.
    #[error("VN_ERR_402: Settlement reversal failed for {settlement_id}: {reason}")]
    SettlementReversalFailure {
        settlement_id: SettlementId,
        reason: String,
    },

    /// The event already has a settlement in flight or transferred.
    #[error("VN_ERR_403: Event already settled: {0}")]
    AlreadySettled(EventId),

    /// A leg transfer failed and the settlement was reversed.
    #[error("VN_ERR_404: Settlement {settlement_id} reversed: {reason}")]
    SettlementReversed {
        settlement_id: SettlementId,
        reason: String,
    },

    /// The settlement was attempted for an event whose round is not committed.
    #[error("VN_ERR_405: Event {0} has not been committed")]
    NotCommitted(EventId),

    /// A collaborator (payment rail, custody registry, ...) returned an error.
    #[error("VN_ERR_406: Collaborator {service} failed: {reason}")]
    CollaboratorFailure { service: String, reason: String },

    /// Not enough available funds on the payment rail.
    #[error("VN_ERR_407: Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    // =================================================================
    // Incentive Errors (5xx)
    // =================================================================
    /// The ledger rejected a reward or slash request.
    #[error("VN_ERR_500: Incentive ledger error: {reason}")]
    IncentiveError { reason: String },

    // =================================================================
    // Network Errors (7xx)
    // =================================================================
    /// The message failed authentication or decoding and was dropped.
    #[error("VN_ERR_700: Message rejected: {reason}")]
    MessageRejected { reason: String },

    /// The peer is not connected.
    #[error("VN_ERR_701: Peer not found: {0}")]
    PeerNotFound(ValidatorId),

    /// The gossip transport is closed.
    #[error("VN_ERR_702: Gossip channel closed")]
    ChannelClosed,

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("VN_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("VN_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("VN_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("VN_ERR_903: I/O error: {0}")]
    Io(String),

    /// The operation's deadline elapsed.
    #[error("VN_ERR_904: Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// An anchor log entry does not chain to its predecessor.
    #[error("VN_ERR_905: Anchor chain broken at entry {sequence}: {reason}")]
    AnchorIntegrity { sequence: u64, reason: String },
}

impl VerinetError {
    /// Whether the caller may retry the same request unchanged.
    ///
    /// Evidence gaps need corrected input, and consensus safety violations or
    /// reversal failures need operator or governance action.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockAcquisitionFailure { .. }
                | Self::DeadlineExceeded(_)
                | Self::SettlementReversed { .. }
                | Self::CollaboratorFailure { .. }
        )
    }

    /// Whether this error leaves external state possibly inconsistent.
    #[must_use]
    pub fn requires_intervention(&self) -> bool {
        matches!(self, Self::SettlementReversalFailure { .. })
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, VerinetError>;

impl From<std::io::Error> for VerinetError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VerinetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
