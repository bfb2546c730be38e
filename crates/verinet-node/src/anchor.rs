//! Append-only anchor log.
//!
//! Each entry commits to its record, its position and the previous entry's
//! hash:
//!
//! ```text
//! hash_n = sha256("verinet:anchor:v1:" || n || hash_{n-1} || recorded_at_ms || json(record_n))
//! ```
//!
//! The first entry chains to [`GENESIS_HASH`]. Rewriting any entry breaks
//! every hash after it, which [`AnchorLog::verify`] reports.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use verinet_types::{
    EventId, EventType, EvidenceDigest, Result, SettlementId, SettlementStatus, VerinetError, crypto,
};

pub const GENESIS_HASH: [u8; 32] = [0; 32];

/// What an entry attests to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorRecord {
    RoundCommitted {
        event_id: EventId,
        event_type: EventType,
        /// Digest of the event the round agreed on.
        event_digest: [u8; 32],
        evidence_digest: EvidenceDigest,
        view: u32,
        commit_approval: Decimal,
        threshold: Decimal,
    },
    SettlementCompleted {
        settlement_id: SettlementId,
        event_id: EventId,
    },
    SettlementReversed {
        settlement_id: SettlementId,
        event_id: EventId,
        status: SettlementStatus,
        reason: String,
    },
}

impl AnchorRecord {
    #[must_use]
    pub fn event_id(&self) -> EventId {
        match self {
            Self::RoundCommitted { event_id, .. }
            | Self::SettlementCompleted { event_id, .. }
            | Self::SettlementReversed { event_id, .. } => *event_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorEntry {
    pub sequence: u64,
    pub record: AnchorRecord,
    pub recorded_at: DateTime<Utc>,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

impl AnchorEntry {
    fn compute_hash(&self) -> Result<[u8; 32]> {
        let record = serde_json::to_vec(&self.record)?;
        Ok(crypto::digest(
            b"verinet:anchor:v1:",
            &[
                &self.sequence.to_le_bytes(),
                &self.prev_hash,
                &self.recorded_at.timestamp_millis().to_le_bytes(),
                &record,
            ],
        ))
    }
}

#[derive(Debug, Default, Clone)]
pub struct AnchorLog {
    entries: Vec<AnchorEntry>,
}

impl AnchorLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt entries read back from storage.
    ///
    /// # Errors
    /// [`VerinetError::AnchorIntegrity`] if they do not form a valid chain.
    pub fn from_entries(entries: Vec<AnchorEntry>) -> Result<Self> {
        let log = Self { entries };
        log.verify()?;
        Ok(log)
    }

    /// Chain `record` onto the head.
    ///
    /// # Errors
    /// [`VerinetError::Serialization`] if the record cannot be encoded.
    pub fn append(&mut self, record: AnchorRecord, now: DateTime<Utc>) -> Result<&AnchorEntry> {
        let mut entry = AnchorEntry {
            sequence: self.entries.len() as u64,
            record,
            recorded_at: now,
            prev_hash: self.head(),
            hash: GENESIS_HASH,
        };
        entry.hash = entry.compute_hash()?;
        debug!(
            sequence = entry.sequence,
            event_id = %entry.record.event_id(),
            "Anchored"
        );
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Re-derive every hash and link.
    ///
    /// # Errors
    /// [`VerinetError::AnchorIntegrity`] naming the first bad entry.
    pub fn verify(&self) -> Result<()> {
        let mut prev = GENESIS_HASH;
        for (position, entry) in self.entries.iter().enumerate() {
            let broken = |reason: &str| VerinetError::AnchorIntegrity {
                sequence: entry.sequence,
                reason: reason.to_string(),
            };
            if entry.sequence != position as u64 {
                return Err(broken("sequence out of order"));
            }
            if entry.prev_hash != prev {
                return Err(broken("does not link to the previous entry"));
            }
            if entry.compute_hash()? != entry.hash {
                return Err(broken("hash does not match contents"));
            }
            prev = entry.hash;
        }
        Ok(())
    }

    /// Hash of the latest entry, or [`GENESIS_HASH`] when empty.
    #[must_use]
    pub fn head(&self) -> [u8; 32] {
        self.entries.last().map_or(GENESIS_HASH, |e| e.hash)
    }

    #[must_use]
    pub fn entries(&self) -> &[AnchorEntry] {
        &self.entries
    }

    #[must_use]
    pub fn entries_for(&self, event_id: &EventId) -> Vec<&AnchorEntry> {
        self.entries
            .iter()
            .filter(|e| e.record.event_id() == *event_id)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
