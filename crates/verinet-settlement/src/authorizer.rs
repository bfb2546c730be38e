//! Extra authorization gate for high-value settlements.

use async_trait::async_trait;
use verinet_types::{CommittedEvent, Result, SettlementTransaction};

/// Confirms a high-value transfer once both legs are locked.
///
/// The node implements this with a second weighted consensus round over
/// the settlement itself.
#[async_trait]
pub trait HighValueAuthorizer: Send + Sync {
    /// `Ok(())` authorizes the transfer. Any error stops the settlement and
    /// releases its locks.
    async fn authorize(&self, committed: &CommittedEvent, transaction: &SettlementTransaction) -> Result<()>;
}
