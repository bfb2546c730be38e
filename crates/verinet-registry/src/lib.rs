//! # verinet-registry
//!
//! Validator registry and incentive ledger.
//!
//! - [`ValidatorRegistry`]: identity, category, stake and reputation of every
//!   validator, with derived weights kept current on every change.
//! - [`weight`]: the pure weighting functions, including per-round voting
//!   power used for quorum arithmetic.
//! - [`IncentiveLedger`]: rewards and slashes, recorded as append-only
//!   [`LedgerEntry`](verinet_types::LedgerEntry) values.
//! - [`ParticipationTracker`]: consecutive-silence bookkeeping that turns a
//!   censorship pattern into a slashable offense.

pub mod incentive;
pub mod participation;
pub mod registry;
pub mod weight;

pub use incentive::{IncentiveLedger, SlashReport};
pub use participation::ParticipationTracker;
pub use registry::{SharedRegistry, ValidatorRegistry};
pub use weight::VotingPower;
