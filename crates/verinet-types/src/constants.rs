//! System-wide constants for Verinet.

/// Default phase deadline (pre-prepare, prepare and commit each) in milliseconds.
pub const DEFAULT_PHASE_TIMEOUT_MS: u64 = 2_000;

/// Default number of view changes before an event is permanently rejected.
pub const DEFAULT_MAX_VIEW_CHANGES: u32 = 3;

/// Default quorum safety margin above 2/3, in hundredths (0.01).
pub const DEFAULT_QUORUM_EPSILON_HUNDREDTHS: i64 = 1;

/// Consecutive silent rounds before a non-participation penalty applies.
pub const DEFAULT_MISSED_ROUND_LIMIT: u32 = 3;

/// Minimum stake a validator must keep to stay active.
pub const DEFAULT_MIN_STAKE: i64 = 1_000;

/// Stake at which the stake multiplier equals 1.
pub const DEFAULT_REFERENCE_STAKE: i64 = 10_000;

/// Upper bound on the stake multiplier.
pub const DEFAULT_STAKE_MULTIPLIER_CAP: i64 = 2;

/// Base unit that slash multipliers are applied to.
pub const DEFAULT_SLASH_BASE_UNIT: i64 = 500;

/// Reward pool distributed per committed round.
pub const DEFAULT_REWARD_PER_ROUND: i64 = 100;

/// Maximum gossip hops before a message stops being forwarded.
pub const DEFAULT_HOP_LIMIT: u8 = 6;

/// Number of message ids the gossip layer remembers for deduplication.
pub const DEFAULT_SEEN_CACHE_SIZE: usize = 100_000;

/// Per-peer inbound queue capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Number of cached evidence validation results.
pub const DEFAULT_EVIDENCE_CACHE_SIZE: usize = 10_000;

/// Default local resource lock acquisition timeout in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 1_000;

/// Default lifetime of collaborator-side locks (escrow, asset lock) in milliseconds.
pub const DEFAULT_COLLABORATOR_LOCK_TTL_MS: u64 = 30_000;

/// Default overall settlement deadline in milliseconds.
pub const DEFAULT_SETTLEMENT_DEADLINE_MS: u64 = 10_000;

/// Capacity of the outcome notification channel.
pub const OUTCOME_CHANNEL_CAPACITY: usize = 1_024;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Network name.
pub const NETWORK_NAME: &str = "Verinet";
