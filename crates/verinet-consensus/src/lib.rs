//! # verinet-consensus
//!
//! Weighted Byzantine fault-tolerant agreement on one verification event at
//! a time.
//!
//! ## Protocol
//!
//! ```text
//! Submit ──→ Proposed ──proposal──→ PrePrepared ──prepare quorum──→ Prepared
//!                                                                     │
//!                                         commit quorum ──→ Committed ◀┘
//! ```
//!
//! A quorum is weighted approval of at least `max(2/3 + ε, event minimum)`
//! of the eligible voting power, raised for high-risk subjects. A phase
//! whose deadline passes times out and the round moves to the next view
//! with a new proposer; once the view limit is spent the round is
//! `Rejected`. A round is also rejected as soon as approval plus the weight
//! still in flight can no longer reach quorum.
//!
//! [`RoundMachine`] is a deterministic state-transition function: the same
//! messages and clock readings always produce the same round. Each
//! validator owns one [`ConsensusEngine`] that maps events to rounds and is
//! the sole writer of that validator's votes.

pub mod engine;
pub mod evaluator;
pub mod proposer;
pub mod quorum;
pub mod round;
pub mod votebook;

pub use engine::{Action, ConsensusEngine};
pub use evaluator::{CategoryEvaluator, EvidenceEvaluator, ProposalEvaluator, evaluator_for};
pub use proposer::select_proposer;
pub use quorum::{Tally, Verdict};
pub use round::RoundMachine;
pub use votebook::{VoteBook, VoteRecord};
