//! # verinet-evidence
//!
//! The gate every event passes before a consensus round opens.
//!
//! [`EvidenceValidator::validate`] runs three checks in order and stops at
//! the first failure:
//!
//! 1. every evidence kind required for the event type is present;
//! 2. every item's signature verifies against its source in the
//!    [`TrustedSources`] directory;
//! 3. structured claims resolve against the identity, location, custody and
//!    compliance collaborators and agree within the configured tolerances.
//!
//! Results are cached by package digest so a retried round does not
//! re-verify unchanged evidence.
//!
//! The first two checks, plus the internal consistency of claims, need no
//! collaborator and are available on their own as [`EvidenceScreen`].
//! Consensus validators screen every proposal themselves.

pub mod cache;
pub mod geo;
pub mod in_memory;
pub mod screen;
pub mod sources;
pub mod validator;

pub use cache::ResultCache;
pub use screen::EvidenceScreen;
pub use sources::TrustedSources;
pub use validator::{Collaborators, EvidenceValidator};
