//! # verinet-network
//!
//! Flood gossip between validators.
//!
//! Every message travels in a signed [`MessageEnvelope`]. A receiving peer
//! checks the signature against the [`KeyDirectory`], drops anything it
//! has seen before (bounded [`SeenCache`]), and forwards fresh messages to
//! the other peers until the hop limit is spent. Unauthenticated or
//! malformed envelopes are logged and dropped; they are never forwarded.
//!
//! The transport is a set of `tokio::sync::mpsc` channels, one inbox per
//! peer, managed by [`GossipNetwork`]. Duplicates and reordering are
//! expected; the consensus layer tolerates both.

pub mod envelope;
pub mod gossip;
pub mod keys;
pub mod seen;

pub use envelope::MessageEnvelope;
pub use gossip::{BroadcastResult, GossipNetwork, GossipPeer, GossipSender};
pub use keys::{KeyDirectory, TrustedKeys};
pub use seen::SeenCache;
