//! Verification events: the commodity-related facts validators attest to.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Category, EventId, PartyId, crypto};

/// The kind of fact being attested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum EventType {
    ExportPermit,
    PaymentRelease,
    CustodyTransfer,
    DisputeResolution,
    /// Extra consensus gate authorising a high-value settlement.
    SettlementAuthorization,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExportPermit => write!(f, "EXPORT_PERMIT"),
            Self::PaymentRelease => write!(f, "PAYMENT_RELEASE"),
            Self::CustodyTransfer => write!(f, "CUSTODY_TRANSFER"),
            Self::DisputeResolution => write!(f, "DISPUTE_RESOLUTION"),
            Self::SettlementAuthorization => write!(f, "SETTLEMENT_AUTHORIZATION"),
        }
    }
}

/// An immutable request for the network to attest to a fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationEvent {
    pub id: EventId,
    pub event_type: EventType,
    /// SHA-256 of the business payload (permit, invoice, bill of lading).
    pub payload_hash: [u8; 32],
    pub submitter: PartyId,
    /// The entity the event is about; evidence cross-references resolve against it.
    pub subject: PartyId,
    /// Categories whose validators vote. Empty means every category.
    pub required_categories: Vec<Category>,
    /// Minimum weighted approval fraction the submitter demands.
    pub min_threshold: Decimal,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl VerificationEvent {
    /// Whether validators of `category` take part in this event's rounds.
    #[must_use]
    pub fn requires(&self, category: Category) -> bool {
        self.required_categories.is_empty() || self.required_categories.contains(&category)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    /// Canonical commitment to every field of the event.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        let mut categories: Vec<u8> = self
            .required_categories
            .iter()
            .map(|c| *c as u8)
            .collect();
        categories.sort_unstable();
        crypto::digest(
            b"verinet:event:v1:",
            &[
                self.id.0.as_bytes(),
                self.event_type.to_string().as_bytes(),
                &self.payload_hash,
                self.submitter.as_str().as_bytes(),
                self.subject.as_str().as_bytes(),
                &categories,
                self.min_threshold.to_string().as_bytes(),
                &self.created_at.timestamp_millis().to_le_bytes(),
                &self.deadline.timestamp_millis().to_le_bytes(),
            ],
        )
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl VerificationEvent {
    /// An event open to every category with a one hour deadline.
    pub fn dummy(event_type: EventType) -> Self {
        let now = Utc::now();
        Self {
            id: EventId::new(),
            event_type,
            payload_hash: [0x42; 32],
            submitter: PartyId::new("exporter-1"),
            subject: PartyId::new("exporter-1"),
            required_categories: Vec::new(),
            min_threshold: Decimal::ZERO,
            created_at: now,
            deadline: now + chrono::Duration::hours(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_required_categories_means_all() {
        let ev = VerificationEvent::dummy(EventType::ExportPermit);
        for c in Category::ALL {
            assert!(ev.requires(c));
        }
    }

    #[test]
    fn explicit_categories_are_respected() {
        let mut ev = VerificationEvent::dummy(EventType::CustodyTransfer);
        ev.required_categories = vec![Category::Government, Category::Enterprise];
        assert!(ev.requires(Category::Government));
        assert!(!ev.requires(Category::Academic));
    }

    #[test]
    fn digest_is_order_insensitive_for_categories() {
        let mut a = VerificationEvent::dummy(EventType::ExportPermit);
        a.required_categories = vec![Category::Community, Category::Government];
        let mut b = a.clone();
        b.required_categories = vec![Category::Government, Category::Community];
        assert_eq!(a.digest(), b.digest());

        b.payload_hash = [0x43; 32];
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn expiry() {
        let ev = VerificationEvent::dummy(EventType::PaymentRelease);
        assert!(!ev.is_expired(ev.created_at));
        assert!(ev.is_expired(ev.deadline + chrono::Duration::seconds(1)));
    }
}
