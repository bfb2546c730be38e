//! # verinet-types
//!
//! Shared types, errors, and configuration for the **Verinet** attestation
//! network.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`ValidatorId`], [`EventId`], [`SettlementId`], [`MessageId`],
//!   [`EscrowId`], [`PartyId`], [`AccountId`], [`AssetId`]
//! - **Validator model**: [`Validator`], [`Category`], [`ValidatorStatus`]
//! - **Event model**: [`VerificationEvent`], [`EventType`]
//! - **Evidence model**: [`EvidencePackage`], [`EvidenceItem`], [`ValidationResult`]
//! - **Consensus model**: [`Vote`], [`Proposal`], [`ConsensusRound`], [`RoundStatus`]
//! - **Incentives**: [`SlashableOffense`], [`OffenseType`], [`LedgerEntry`]
//! - **Settlement model**: [`SettlementTransaction`], [`CommittedEvent`], [`SettlementTerms`]
//! - **Notifications**: [`Outcome`]
//! - **Collaborators**: async service traits in [`services`]
//! - **Configuration**: [`NodeConfig`] and its per-subsystem sections
//! - **Errors**: [`VerinetError`] with `VN_ERR_` prefix codes

pub mod category;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod event;
pub mod evidence;
pub mod ids;
pub mod ledger;
pub mod message;
pub mod offense;
pub mod outcome;
pub mod round;
pub mod services;
pub mod settlement;
pub mod validator;
pub mod vote;

pub use category::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use evidence::*;
pub use ids::*;
pub use ledger::*;
pub use message::*;
pub use offense::*;
pub use outcome::*;
pub use round::*;
pub use settlement::*;
pub use validator::*;
pub use vote::*;

// Constants, crypto helpers and service traits are accessed through their
// modules (`verinet_types::constants::FOO`, `verinet_types::services::...`).
