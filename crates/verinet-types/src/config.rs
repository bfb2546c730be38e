//! Configuration for Verinet nodes.
//!
//! Every section has a `Default` built from [`crate::constants`], and every
//! field is optional in JSON so a config file only names what it overrides.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CategoryWeights, EventType, EvidenceKind, Result, VerinetError, constants};

/// Top-level node configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub registry: RegistryConfig,
    pub consensus: ConsensusConfig,
    pub incentive: IncentiveConfig,
    pub evidence: EvidenceConfig,
    pub network: NetworkConfig,
    pub settlement: SettlementConfig,
}

impl NodeConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// [`VerinetError::Serialization`] on malformed JSON,
    /// [`VerinetError::Configuration`] if validation fails.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// As [`NodeConfig::from_json_str`], plus [`VerinetError::Io`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// [`VerinetError::Configuration`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.registry.validate()?;
        self.consensus.validate()?;
        self.incentive.validate()?;
        self.evidence.validate()?;
        self.network.validate()?;
        self.settlement.validate()
    }
}

fn invalid(msg: impl Into<String>) -> VerinetError {
    VerinetError::Configuration(msg.into())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Validator weighting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub category_weights: CategoryWeights,
    /// Reputation multiplier at reputation 0; rises linearly to 1 at reputation 1.
    pub reputation_floor: Decimal,
    /// Stake at which the stake multiplier is 1.
    pub reference_stake: Decimal,
    pub stake_multiplier_cap: Decimal,
    /// Validators below this stake are ejected.
    pub min_stake: Decimal,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            category_weights: CategoryWeights::default(),
            reputation_floor: Decimal::new(5, 1),
            reference_stake: Decimal::from(constants::DEFAULT_REFERENCE_STAKE),
            stake_multiplier_cap: Decimal::from(constants::DEFAULT_STAKE_MULTIPLIER_CAP),
            min_stake: Decimal::from(constants::DEFAULT_MIN_STAKE),
        }
    }
}

impl RegistryConfig {
    fn validate(&self) -> Result<()> {
        self.category_weights.validate()?;
        if self.reputation_floor < Decimal::ZERO || self.reputation_floor > Decimal::ONE {
            return Err(invalid("registry.reputation_floor must be in [0, 1]"));
        }
        if self.reference_stake <= Decimal::ZERO {
            return Err(invalid("registry.reference_stake must be positive"));
        }
        if self.stake_multiplier_cap <= Decimal::ZERO {
            return Err(invalid("registry.stake_multiplier_cap must be positive"));
        }
        if self.min_stake < Decimal::ZERO {
            return Err(invalid("registry.min_stake must not be negative"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

/// How the proposer for an (event, view) pair is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProposerSelection {
    /// Rotate through eligible validators in id order, offset by the event id.
    #[default]
    RoundRobin,
    /// Weighted draw seeded by `sha256(event_id, view)`.
    StakeWeighted,
}

/// Raises the quorum threshold for subjects with a low compliance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskQuorumPolicy {
    pub enabled: bool,
    /// Scores strictly below this mark the subject as high risk.
    pub high_risk_below: Decimal,
    /// Added to the threshold for high-risk subjects, capped at 1.
    pub threshold_bump: Decimal,
}

impl Default for RiskQuorumPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            high_risk_below: Decimal::new(5, 1),
            threshold_bump: Decimal::new(1, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub phase_timeout_ms: u64,
    pub max_view_changes: u32,
    /// Safety margin above 2/3.
    pub quorum_epsilon: Decimal,
    pub proposer_selection: ProposerSelection,
    pub risk: RiskQuorumPolicy,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            phase_timeout_ms: constants::DEFAULT_PHASE_TIMEOUT_MS,
            max_view_changes: constants::DEFAULT_MAX_VIEW_CHANGES,
            quorum_epsilon: Decimal::new(constants::DEFAULT_QUORUM_EPSILON_HUNDREDTHS, 2),
            proposer_selection: ProposerSelection::default(),
            risk: RiskQuorumPolicy::default(),
        }
    }
}

impl ConsensusConfig {
    #[must_use]
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }

    /// Base quorum: `2/3 + ε`.
    #[must_use]
    pub fn base_quorum(&self) -> Decimal {
        Decimal::TWO / Decimal::from(3) + self.quorum_epsilon
    }

    fn validate(&self) -> Result<()> {
        if self.phase_timeout_ms == 0 {
            return Err(invalid("consensus.phase_timeout_ms must be positive"));
        }
        if self.quorum_epsilon < Decimal::ZERO || self.base_quorum() > Decimal::ONE {
            return Err(invalid("consensus.quorum_epsilon must keep 2/3 + ε within [2/3, 1]"));
        }
        if self.risk.threshold_bump < Decimal::ZERO {
            return Err(invalid("consensus.risk.threshold_bump must not be negative"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Incentives
// ---------------------------------------------------------------------------

/// Slash amount per offense, in multiples of the base unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlashMultipliers {
    pub double_signing: Decimal,
    pub collusion: Decimal,
    pub censorship: Decimal,
    pub missed_vote: Decimal,
}

impl Default for SlashMultipliers {
    fn default() -> Self {
        Self {
            double_signing: Decimal::from(10),
            collusion: Decimal::from(6),
            censorship: Decimal::from(3),
            missed_vote: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncentiveConfig {
    pub slash_base_unit: Decimal,
    pub multipliers: SlashMultipliers,
    /// Stake distributed among matching commit voters per committed round.
    pub reward_per_round: Decimal,
    /// Consecutive silent rounds before the censorship penalty applies.
    pub missed_round_limit: u32,
    /// Reputation removed alongside a censorship slash.
    pub censorship_reputation_penalty: Decimal,
    /// Reputation removed alongside a double-signing slash.
    pub double_signing_reputation_penalty: Decimal,
}

impl Default for IncentiveConfig {
    fn default() -> Self {
        Self {
            slash_base_unit: Decimal::from(constants::DEFAULT_SLASH_BASE_UNIT),
            multipliers: SlashMultipliers::default(),
            reward_per_round: Decimal::from(constants::DEFAULT_REWARD_PER_ROUND),
            missed_round_limit: constants::DEFAULT_MISSED_ROUND_LIMIT,
            censorship_reputation_penalty: Decimal::new(1, 1),
            double_signing_reputation_penalty: Decimal::new(5, 1),
        }
    }
}

impl IncentiveConfig {
    fn validate(&self) -> Result<()> {
        if self.slash_base_unit < Decimal::ZERO || self.reward_per_round < Decimal::ZERO {
            return Err(invalid("incentive amounts must not be negative"));
        }
        let m = &self.multipliers;
        if [m.double_signing, m.collusion, m.censorship, m.missed_vote]
            .iter()
            .any(|x| *x < Decimal::ZERO)
        {
            return Err(invalid("incentive.multipliers must not be negative"));
        }
        if self.missed_round_limit == 0 {
            return Err(invalid("incentive.missed_round_limit must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

/// Evidence kinds an event type must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRequirement {
    pub event_type: EventType,
    pub kinds: Vec<EvidenceKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub requirements: Vec<EvidenceRequirement>,
    /// Maximum distance between claimed and recorded location.
    pub location_tolerance_km: Decimal,
    /// Maximum difference between claimed and recorded compliance score.
    pub compliance_tolerance: Decimal,
    pub cache_size: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        use EvidenceKind::{
            ComplianceScore, CustodyConfirmation, Document, IdentityAttestation, LocationProof,
            Signature,
        };
        let req = |event_type, kinds: &[EvidenceKind]| EvidenceRequirement {
            event_type,
            kinds: kinds.to_vec(),
        };
        Self {
            requirements: vec![
                req(
                    EventType::ExportPermit,
                    &[Document, Signature, IdentityAttestation, LocationProof, ComplianceScore],
                ),
                req(EventType::PaymentRelease, &[Document, Signature, IdentityAttestation]),
                req(
                    EventType::CustodyTransfer,
                    &[Signature, CustodyConfirmation, LocationProof],
                ),
                req(EventType::DisputeResolution, &[Document, Signature]),
                req(EventType::SettlementAuthorization, &[Signature]),
            ],
            location_tolerance_km: Decimal::from(5),
            compliance_tolerance: Decimal::new(5, 2),
            cache_size: constants::DEFAULT_EVIDENCE_CACHE_SIZE,
        }
    }
}

impl EvidenceConfig {
    /// Required kinds for `event_type`; empty if none are configured.
    #[must_use]
    pub fn required_kinds(&self, event_type: EventType) -> &[EvidenceKind] {
        self.requirements
            .iter()
            .find(|r| r.event_type == event_type)
            .map_or(&[], |r| r.kinds.as_slice())
    }

    fn validate(&self) -> Result<()> {
        if self.cache_size == 0 {
            return Err(invalid("evidence.cache_size must be positive"));
        }
        if self.location_tolerance_km < Decimal::ZERO || self.compliance_tolerance < Decimal::ZERO {
            return Err(invalid("evidence tolerances must not be negative"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Gossip configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub hop_limit: u8,
    pub seen_cache_size: usize,
    pub channel_capacity: usize,
    /// Probability in `[0, 1)` that a delivery is dropped. Test networks only.
    pub loss_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hop_limit: constants::DEFAULT_HOP_LIMIT,
            seen_cache_size: constants::DEFAULT_SEEN_CACHE_SIZE,
            channel_capacity: constants::DEFAULT_CHANNEL_CAPACITY,
            loss_rate: 0.0,
        }
    }
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.hop_limit == 0 || self.seen_cache_size == 0 || self.channel_capacity == 0 {
            return Err(invalid("network limits must be positive"));
        }
        if !(0.0..1.0).contains(&self.loss_rate) {
            return Err(invalid("network.loss_rate must be in [0, 1)"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// What a settlement does when a resource it needs is already locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContentionPolicy {
    /// Wait up to the lock timeout.
    #[default]
    Block,
    /// Fail immediately with `LockAcquisitionFailure`.
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub lock_timeout_ms: u64,
    pub collaborator_lock_ttl_ms: u64,
    /// Overall deadline for one settlement, locks through finalization.
    pub deadline_ms: u64,
    pub contention: ContentionPolicy,
    /// Amounts at or above this need an extra authorization round.
    pub high_value_threshold: Option<Decimal>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: constants::DEFAULT_LOCK_TIMEOUT_MS,
            collaborator_lock_ttl_ms: constants::DEFAULT_COLLABORATOR_LOCK_TTL_MS,
            deadline_ms: constants::DEFAULT_SETTLEMENT_DEADLINE_MS,
            contention: ContentionPolicy::default(),
            high_value_threshold: None,
        }
    }
}

impl SettlementConfig {
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[must_use]
    pub fn collaborator_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.collaborator_lock_ttl_ms)
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    #[must_use]
    pub fn is_high_value(&self, amount: Decimal) -> bool {
        self.high_value_threshold.is_some_and(|t| amount >= t)
    }

    fn validate(&self) -> Result<()> {
        if self.deadline_ms == 0 || self.lock_timeout_ms == 0 {
            return Err(invalid("settlement timeouts must be positive"));
        }
        if self.collaborator_lock_ttl_ms < self.deadline_ms {
            return Err(invalid(
                "settlement.collaborator_lock_ttl_ms must outlast settlement.deadline_ms",
            ));
        }
        Ok(())
    }
}
