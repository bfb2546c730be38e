//! Identifiers used throughout Verinet.
//!
//! Entity IDs use UUIDv7 for time-ordered sorting, except `ValidatorId`
//! which is the validator's ed25519 public key. Parties, accounts and assets
//! are owned by external systems, so they are opaque string handles.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ValidatorId
// ---------------------------------------------------------------------------

/// Identity of a validator: the raw ed25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ValidatorId(pub [u8; 32]);

impl ValidatorId {
    #[must_use]
    pub fn from_pubkey(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "val:{}", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// Globally unique verification event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Deterministic child id derived from a parent event and a tag.
    ///
    /// Used for follow-up events (e.g. a settlement authorization round for a
    /// committed export permit). Every node derives the same id.
    #[must_use]
    pub fn derived(parent: EventId, tag: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"verinet:event_id:v1:");
        hasher.update(parent.0.as_bytes());
        hasher.update(tag.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SettlementId
// ---------------------------------------------------------------------------

/// Unique identifier for a settlement transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SettlementId(pub Uuid);

impl SettlementId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SettlementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stl:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Gossip message identifier, used for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EscrowId
// ---------------------------------------------------------------------------

/// Handle returned by the payment rail when funds are locked in escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EscrowId(pub Uuid);

impl EscrowId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EscrowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "esc:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// External handles
// ---------------------------------------------------------------------------

macro_rules! string_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_handle!(
    /// An external party: exporter, buyer, inspector, cooperative.
    PartyId
);
string_handle!(
    /// An account on the external payment rail.
    AccountId
);
string_handle!(
    /// A custody token for a physical lot, held in the external custody system.
    AssetId
);

/// SHA-256 commitment over an evidence package.
pub type EvidenceDigest = [u8; 32];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_uniqueness_and_ordering() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn derived_event_id_is_deterministic() {
        let parent = EventId::from_bytes([7; 16]);
        assert_eq!(
            EventId::derived(parent, "settlement"),
            EventId::derived(parent, "settlement")
        );
        assert_ne!(
            EventId::derived(parent, "settlement"),
            EventId::derived(parent, "dispute")
        );
    }

    #[test]
    fn validator_id_display_is_short_hex() {
        let id = ValidatorId([0xAB; 32]);
        assert_eq!(format!("{id}"), "val:abababababababab");
        assert_eq!(id.short(), "abababab");
    }

    #[test]
    fn string_handles_display_raw_value() {
        assert_eq!(PartyId::new("coop-7").to_string(), "coop-7");
        assert_eq!(AccountId::new("acct-1").as_str(), "acct-1");
        assert_eq!(AssetId::new("lot-42").to_string(), "lot-42");
    }

    #[test]
    fn serde_roundtrips() {
        let id = EventId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);

        let party = PartyId::new("exporter-1");
        let json = serde_json::to_string(&party).unwrap();
        assert_eq!(json, "\"exporter-1\"");
    }
}
