//! Every settlement attempt, indexed by event.
//!
//! A committed event is settled at most once. A new attempt is admitted
//! only while the event has none, or its latest attempt ended with nothing
//! moved (`Aborted` or `Reversed`). An attempt still running, a completed
//! transfer and one awaiting intervention all refuse another.
//!
//! Attempts are kept for the life of the coordinator. Forgetting one would
//! let its event settle twice.

use std::collections::HashMap;

use verinet_types::{EventId, Result, SettlementId, SettlementStatus, SettlementTransaction, VerinetError};

#[derive(Debug, Default)]
pub struct SettlementBook {
    attempts: HashMap<SettlementId, SettlementTransaction>,
    latest: HashMap<EventId, SettlementId>,
}

impl SettlementBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `tx` as its event's current attempt.
    ///
    /// # Errors
    /// [`VerinetError::AlreadySettled`] if an earlier attempt for the event
    /// is in flight, transferred, or awaiting intervention.
    pub fn claim(&mut self, tx: &SettlementTransaction) -> Result<()> {
        if let Some(previous) = self.latest_for(&tx.event_id) {
            if !allows_retry(previous.status) {
                return Err(VerinetError::AlreadySettled(tx.event_id));
            }
        }
        self.latest.insert(tx.event_id, tx.id);
        self.attempts.insert(tx.id, tx.clone());
        Ok(())
    }

    /// Store the current state of a claimed attempt.
    pub fn record(&mut self, tx: &SettlementTransaction) {
        self.attempts.insert(tx.id, tx.clone());
    }

    #[must_use]
    pub fn get(&self, id: &SettlementId) -> Option<&SettlementTransaction> {
        self.attempts.get(id)
    }

    /// The most recent attempt for `event_id`.
    #[must_use]
    pub fn latest_for(&self, event_id: &EventId) -> Option<&SettlementTransaction> {
        self.latest.get(event_id).and_then(|id| self.attempts.get(id))
    }

    /// Whether a new attempt for `event_id` would be admitted.
    #[must_use]
    pub fn is_open(&self, event_id: &EventId) -> bool {
        self.latest_for(event_id).is_none_or(|tx| allows_retry(tx.status))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

fn allows_retry(status: SettlementStatus) -> bool {
    matches!(status, SettlementStatus::Aborted | SettlementStatus::Reversed)
}
