//! # verinet-node
//!
//! The running system around the consensus core.
//!
//! - [`VerificationNode`]: the API submitters and operators use. It admits
//!   validators, validates evidence, opens rounds, follows them, settles
//!   committed events, applies rewards and slashes, anchors results and
//!   pushes every [`Outcome`](verinet_types::Outcome) to subscribers.
//! - [`ValidatorAgent`]: one tokio task per validator, sole owner of its
//!   consensus engine, talking to the others only through gossip.
//! - [`AnchorLog`]: hash-chained record of committed rounds and settlement
//!   results.
//! - [`LocalNetwork`]: node, mesh and agents wired together in one process.
//! - [`telemetry`]: `tracing` subscriber setup.

pub mod agent;
pub mod anchor;
pub mod authorizer;
pub mod local;
pub mod node;
pub mod shutdown;
pub mod telemetry;

pub use agent::ValidatorAgent;
pub use anchor::{AnchorEntry, AnchorLog, AnchorRecord};
pub use authorizer::AUTHORIZATION_SOURCE;
pub use local::{LocalNetwork, ValidatorSpec};
pub use node::{NodeServices, VerificationNode};
pub use shutdown::ShutdownController;
pub use telemetry::{LogFormat, init_tracing};
