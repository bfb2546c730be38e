//! Settlement saga.
//!
//! 1. Re-check preconditions (funds cover the amount, seller holds the asset)
//! 2. Lock payment, then custody: local exclusive lock, then collaborator lock
//! 3. Authorize high-value transfers
//! 4. Transfer custody to the buyer, then release payment to the payee
//! 5. Finalize, or compensate in reverse order
//!
//! A failure before any collaborator call leaves the settlement `Aborted`
//! with nothing to undo. A failure once locks are held is compensated by
//! first reading back each leg's real state, so a step cut off by the
//! deadline is handled by what it actually did.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};
use verinet_types::services::{CustodyService, EscrowStatus, PaymentService};
use verinet_types::{
    CommittedEvent, EscrowId, EventId, LegState, Outcome, Result, SettlementConfig, SettlementId,
    SettlementStatus, SettlementTerms, SettlementTransaction, VerinetError,
};

use crate::authorizer::HighValueAuthorizer;
use crate::book::SettlementBook;
use crate::locks::{Resource, ResourceGuard, ResourceLocks};

/// Side effects requested so far by one settlement attempt.
#[derive(Default)]
struct Progress {
    /// Local locks, released when the attempt (including compensation) ends.
    held: Vec<ResourceGuard>,
    custody_lock_requested: bool,
}

enum Compensation {
    /// Nothing remains transferred.
    Undone,
    /// Both legs had in fact landed.
    Completed,
}

pub struct SettlementCoordinator {
    config: SettlementConfig,
    payments: Arc<dyn PaymentService>,
    custody: Arc<dyn CustodyService>,
    authorizer: Option<Arc<dyn HighValueAuthorizer>>,
    locks: ResourceLocks,
    book: RwLock<SettlementBook>,
}

impl SettlementCoordinator {
    #[must_use]
    pub fn new(config: SettlementConfig, payments: Arc<dyn PaymentService>, custody: Arc<dyn CustodyService>) -> Self {
        Self {
            locks: ResourceLocks::new(config.contention, config.lock_timeout()),
            config,
            payments,
            custody,
            authorizer: None,
            book: RwLock::new(SettlementBook::new()),
        }
    }

    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn HighValueAuthorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    #[must_use]
    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    #[must_use]
    pub fn locks(&self) -> &ResourceLocks {
        &self.locks
    }

    #[must_use]
    pub fn transaction(&self, id: &SettlementId) -> Option<SettlementTransaction> {
        self.book.read().get(id).cloned()
    }

    /// Latest settlement attempt for an event.
    #[must_use]
    pub fn for_event(&self, event_id: &EventId) -> Option<SettlementTransaction> {
        self.book.read().latest_for(event_id).cloned()
    }

    /// Settle a committed event: both legs transfer or neither does.
    ///
    /// Returns the transaction in `Transferred` state on success.
    ///
    /// # Errors
    /// - [`VerinetError::AlreadySettled`]: an earlier attempt for the event
    ///   is in flight, transferred, or awaiting intervention.
    /// - [`VerinetError::PreconditionFailure`]: funds or custody not as
    ///   declared. Nothing was locked.
    /// - [`VerinetError::LockAcquisitionFailure`]: a lock was contended or
    ///   refused. Acquired locks were released.
    /// - [`VerinetError::SettlementReversed`]: a later step failed and every
    ///   leg was released back.
    /// - [`VerinetError::SettlementReversalFailure`]: compensation failed;
    ///   the transaction is `RequiresIntervention`.
    /// - [`VerinetError::DeadlineExceeded`]: the deadline fired while locking.
    pub async fn initiate(&self, committed: &CommittedEvent, terms: &SettlementTerms) -> Result<SettlementTransaction> {
        let event_id = committed.event_id();
        let mut tx = SettlementTransaction::new(event_id, terms);
        self.book.write().claim(&tx)?;
        info!(
            settlement = %tx.id,
            %event_id,
            amount = %terms.amount,
            asset = %terms.asset,
            "Settlement started"
        );

        let mut progress = Progress::default();
        let deadline = self.config.deadline();
        let timed = tokio::time::timeout(deadline, self.execute(committed, &mut tx, &mut progress)).await;
        let attempt = match timed {
            Ok(result) => result,
            Err(_) => {
                warn!(settlement = %tx.id, deadline_ms = self.config.deadline_ms, "Settlement deadline exceeded");
                Err(VerinetError::DeadlineExceeded(format!(
                    "settlement {} exceeded {}ms",
                    tx.id, self.config.deadline_ms
                )))
            }
        };

        let result = match attempt {
            Ok(()) => {
                self.finish(&mut tx).await;
                Ok(())
            }
            Err(cause) => self.unwind(&mut tx, &progress, cause).await,
        };
        drop(progress);
        self.record(&tx);
        result.map(|()| tx)
    }

    // =================================================================
    // Forward path
    // =================================================================

    async fn execute(
        &self,
        committed: &CommittedEvent,
        tx: &mut SettlementTransaction,
        progress: &mut Progress,
    ) -> Result<()> {
        let payer = tx.payment.payer.clone();
        let payee = tx.payment.payee.clone();
        let amount = tx.payment.amount;
        let asset = tx.custody.asset.clone();
        let seller = tx.custody.seller.clone();
        let buyer = tx.custody.buyer.clone();
        let ttl = self.config.collaborator_lock_ttl();

        // 1. Preconditions
        if !self.payments.check_funds(&payer, amount).await? {
            return Err(VerinetError::PreconditionFailure {
                reason: format!("{payer} cannot cover {amount}"),
            });
        }
        let owner = self.custody.get_custody_owner(&asset).await?;
        if owner != seller {
            return Err(VerinetError::PreconditionFailure {
                reason: format!("{asset} is held by {owner}, not {seller}"),
            });
        }

        // 2. Locks: payment before custody
        let payment_resource = Resource::Account(payer.clone());
        progress.held.push(self.locks.acquire(payment_resource.clone()).await?);
        let escrow = EscrowId::new();
        tx.payment.escrow = Some(escrow);
        self.bounded("payment", self.payments.lock_funds(escrow, &payer, amount, ttl))
            .await
            .map_err(|err| lock_failure(&payment_resource, err))?;
        tx.payment.state = LegState::Locked;

        let custody_resource = Resource::Asset(asset.clone());
        progress.held.push(self.locks.acquire(custody_resource.clone()).await?);
        progress.custody_lock_requested = true;
        self.bounded("custody", self.custody.lock_asset(&asset, &seller, ttl))
            .await
            .map_err(|err| lock_failure(&custody_resource, err))?;
        tx.custody.state = LegState::Locked;
        tx.set_status(SettlementStatus::LocksAcquired);
        info!(settlement = %tx.id, %escrow, "Settlement locks acquired");

        // 3. High-value gate
        if self.config.is_high_value(amount) {
            let authorizer = self.authorizer.as_ref().ok_or_else(|| VerinetError::PreconditionFailure {
                reason: format!("amount {amount} needs high-value authorization and none is configured"),
            })?;
            authorizer.authorize(committed, tx).await?;
            info!(settlement = %tx.id, "High-value settlement authorized");
        }

        // 4. Saga transfer: custody, then payment
        self.custody.transfer_asset(&asset, &seller, &buyer).await?;
        tx.custody.state = LegState::Transferred;
        self.payments.release_funds(escrow, &payee).await?;
        tx.payment.state = LegState::Transferred;
        Ok(())
    }

    async fn finish(&self, tx: &mut SettlementTransaction) {
        // The transfer consumed the seller's lock; this only clears leftovers.
        if let Err(err) = self
            .bounded("custody", self.custody.unlock_asset(&tx.custody.asset, &tx.custody.seller))
            .await
        {
            warn!(settlement = %tx.id, error = %err, "Post-transfer custody unlock failed");
        }
        tx.set_status(SettlementStatus::Transferred);
        info!(settlement = %tx.id, event_id = %tx.event_id, "Settlement completed");
    }

    // =================================================================
    // Failure path
    // =================================================================

    async fn unwind(&self, tx: &mut SettlementTransaction, progress: &Progress, cause: VerinetError) -> Result<()> {
        if tx.payment.escrow.is_none() && !progress.custody_lock_requested {
            tx.failure = Some(cause.to_string());
            tx.set_status(SettlementStatus::Aborted);
            info!(settlement = %tx.id, reason = %cause, "Settlement aborted before any side effect");
            return Err(cause);
        }

        let reached_transfer = tx.status == SettlementStatus::LocksAcquired;
        match self.compensate(tx, progress).await {
            Ok(Compensation::Completed) => {
                info!(settlement = %tx.id, reason = %cause, "Both legs landed despite failure report");
                self.finish(tx).await;
                Ok(())
            }
            Ok(Compensation::Undone) => {
                tx.failure = Some(cause.to_string());
                if reached_transfer {
                    tx.set_status(SettlementStatus::Reversed);
                    warn!(settlement = %tx.id, reason = %cause, "Settlement reversed");
                    Err(VerinetError::SettlementReversed {
                        settlement_id: tx.id,
                        reason: cause.to_string(),
                    })
                } else {
                    tx.set_status(SettlementStatus::Aborted);
                    info!(settlement = %tx.id, reason = %cause, "Settlement aborted, locks released");
                    Err(cause)
                }
            }
            Err(reason) => {
                tx.failure = Some(format!("{cause}; compensation failed: {reason}"));
                tx.set_status(SettlementStatus::RequiresIntervention);
                error!(
                    settlement = %tx.id,
                    event_id = %tx.event_id,
                    payment = %tx.payment.state,
                    custody = %tx.custody.state,
                    cause = %cause,
                    %reason,
                    "Settlement compensation failed, operator intervention required"
                );
                Err(VerinetError::SettlementReversalFailure {
                    settlement_id: tx.id,
                    reason,
                })
            }
        }
    }

    /// Read back each leg, then undo in reverse order: payment, custody.
    async fn compensate(
        &self,
        tx: &mut SettlementTransaction,
        progress: &Progress,
    ) -> std::result::Result<Compensation, String> {
        let asset = tx.custody.asset.clone();
        let seller = tx.custody.seller.clone();
        let buyer = tx.custody.buyer.clone();

        if let Some(escrow) = tx.payment.escrow {
            let status = self
                .bounded("payment", self.payments.escrow_status(escrow))
                .await
                .map_err(|e| format!("escrow {escrow} status unknown: {e}"))?;
            tx.payment.state = match status {
                None => LegState::Unlocked,
                Some(EscrowStatus::Held) => LegState::Locked,
                Some(EscrowStatus::Released { .. }) => LegState::Transferred,
                Some(EscrowStatus::Refunded | EscrowStatus::Expired) => LegState::ReleasedBack,
            };
        }
        if progress.custody_lock_requested {
            let owner = self
                .bounded("custody", self.custody.get_custody_owner(&asset))
                .await
                .map_err(|e| format!("custody owner of {asset} unknown: {e}"))?;
            if owner == buyer {
                tx.custody.state = LegState::Transferred;
            }
        }
        if tx.payment.state == LegState::Transferred && tx.custody.state == LegState::Transferred {
            return Ok(Compensation::Completed);
        }

        match (tx.payment.state, tx.payment.escrow) {
            (LegState::Locked, Some(escrow)) => {
                self.bounded("payment", self.payments.refund(escrow))
                    .await
                    .map_err(|e| format!("refund of escrow {escrow} failed: {e}"))?;
                tx.payment.state = LegState::ReleasedBack;
            }
            (LegState::Transferred, _) => {
                return Err(format!("payment released to {} but custody did not move", tx.payment.payee));
            }
            _ => {}
        }

        if tx.custody.state == LegState::Transferred {
            self.bounded("custody", self.custody.transfer_asset(&asset, &buyer, &seller))
                .await
                .map_err(|e| format!("return of {asset} to {seller} failed: {e}"))?;
            tx.custody.state = LegState::ReleasedBack;
        }
        if progress.custody_lock_requested {
            self.bounded("custody", self.custody.unlock_asset(&asset, &seller))
                .await
                .map_err(|e| format!("unlock of {asset} failed: {e}"))?;
            if tx.custody.state == LegState::Locked {
                tx.custody.state = LegState::ReleasedBack;
            }
        }
        Ok(Compensation::Undone)
    }

    // =================================================================
    // Helpers
    // =================================================================

    /// Run a collaborator call with the lock timeout as its bound.
    async fn bounded<T>(&self, service: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.lock_timeout(), call)
            .await
            .map_err(|_| VerinetError::CollaboratorFailure {
                service: service.to_string(),
                reason: format!("no answer within {}ms", self.config.lock_timeout_ms),
            })?
    }

    fn record(&self, tx: &SettlementTransaction) {
        self.book.write().record(tx);
    }
}

fn lock_failure(resource: &Resource, err: VerinetError) -> VerinetError {
    match err {
        VerinetError::LockAcquisitionFailure { .. } | VerinetError::PreconditionFailure { .. } => err,
        VerinetError::InsufficientFunds { .. } => VerinetError::PreconditionFailure { reason: err.to_string() },
        other => VerinetError::LockAcquisitionFailure {
            resource: resource.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Notification for a finished settlement; `None` while it is in flight.
#[must_use]
pub fn settlement_outcome(tx: &SettlementTransaction) -> Option<Outcome> {
    match tx.status {
        SettlementStatus::Transferred => Some(Outcome::SettlementCompleted {
            settlement_id: tx.id,
            event_id: tx.event_id,
        }),
        SettlementStatus::Reversed | SettlementStatus::Aborted | SettlementStatus::RequiresIntervention => {
            Some(Outcome::SettlementReversed {
                settlement_id: tx.id,
                event_id: tx.event_id,
                status: tx.status,
                reason: tx.failure.clone().unwrap_or_default(),
            })
        }
        SettlementStatus::Created | SettlementStatus::LocksAcquired => None,
    }
}
