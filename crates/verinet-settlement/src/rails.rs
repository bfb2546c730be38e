//! In-memory payment rail and custody registry.
//!
//! Both honour the collaborator contracts in [`verinet_types::services`]
//! including lock TTLs, and both accept injected failures and latency per
//! operation so the coordinator's compensation paths can be exercised.
//! Failures persist until healed; latency applies to the next call only and
//! is served after the effect, so a slow call has already happened when its
//! caller gives up on it.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::debug;
use verinet_types::services::{CustodyService, EscrowStatus, PaymentService};
use verinet_types::{AccountId, AssetId, EscrowId, PartyId, Result, VerinetError};

use crate::supply::SupplyConservation;

fn collaborator(service: &str, reason: impl Into<String>) -> VerinetError {
    VerinetError::CollaboratorFailure {
        service: service.to_string(),
        reason: reason.into(),
    }
}

/// Per-operation failure and latency injection.
struct Faults<Op> {
    failing: HashSet<Op>,
    latency: HashMap<Op, Duration>,
}

impl<Op: std::hash::Hash + Eq + Copy + std::fmt::Debug> Faults<Op> {
    fn new() -> Self {
        Self {
            failing: HashSet::new(),
            latency: HashMap::new(),
        }
    }

    fn check(&self, service: &str, op: Op) -> Result<()> {
        if self.failing.contains(&op) {
            return Err(collaborator(service, format!("injected {op:?} failure")));
        }
        Ok(())
    }

    /// Injected latency is consumed by the next call.
    fn take_latency(&mut self, op: Op) -> Option<Duration> {
        self.latency.remove(&op)
    }
}

async fn settle_latency(latency: Option<Duration>) {
    if let Some(delay) = latency {
        tokio::time::sleep(delay).await;
    }
}

// =============================================================================
// Payment rail
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentOp {
    Check,
    Lock,
    Release,
    Refund,
    Status,
}

/// Balance of one account on the rail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    pub available: Decimal,
    /// Held in escrow.
    pub frozen: Decimal,
}

#[derive(Debug, Clone)]
struct Escrow {
    account: AccountId,
    amount: Decimal,
    status: EscrowStatus,
    expires_at: Instant,
}

#[derive(Default)]
struct Ledger {
    accounts: HashMap<AccountId, Balance>,
    escrows: HashMap<EscrowId, Escrow>,
    supply: SupplyConservation,
}

impl Ledger {
    /// Return lapsed escrows to their payers.
    fn expire(&mut self, now: Instant) {
        for (id, escrow) in &mut self.escrows {
            if escrow.status == EscrowStatus::Held && escrow.expires_at <= now {
                let balance = self.accounts.entry(escrow.account.clone()).or_default();
                balance.frozen -= escrow.amount;
                balance.available += escrow.amount;
                escrow.status = EscrowStatus::Expired;
                debug!(escrow = %id, "Escrow expired, funds returned");
            }
        }
    }
}

/// Payment rail with available/frozen accounting per account.
pub struct InMemoryPaymentRail {
    ledger: Mutex<Ledger>,
    faults: Mutex<Faults<PaymentOp>>,
}

impl Default for InMemoryPaymentRail {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPaymentRail {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            faults: Mutex::new(Faults::new()),
        }
    }

    pub fn deposit(&self, account: &AccountId, amount: Decimal) {
        let mut ledger = self.ledger.lock();
        ledger.accounts.entry(account.clone()).or_default().available += amount;
        ledger.supply.record_deposit(amount);
    }

    #[must_use]
    pub fn balance(&self, account: &AccountId) -> Balance {
        let mut ledger = self.ledger.lock();
        ledger.expire(Instant::now());
        ledger.accounts.get(account).copied().unwrap_or_default()
    }

    /// Check that no settlement created or destroyed funds.
    ///
    /// # Errors
    /// [`VerinetError::Internal`] on a conservation violation.
    pub fn verify_supply(&self) -> Result<()> {
        let ledger = self.ledger.lock();
        let actual: Decimal = ledger.accounts.values().map(|b| b.available + b.frozen).sum();
        ledger.supply.verify(actual)
    }

    pub fn fail(&self, op: PaymentOp) {
        self.faults.lock().failing.insert(op);
    }

    pub fn heal(&self, op: PaymentOp) {
        self.faults.lock().failing.remove(&op);
    }

    /// Slow down the next `op` call by `latency`.
    pub fn delay(&self, op: PaymentOp, latency: Duration) {
        self.faults.lock().latency.insert(op, latency);
    }

    fn begin(&self, op: PaymentOp) -> Result<Option<Duration>> {
        let mut faults = self.faults.lock();
        faults.check("payment", op)?;
        Ok(faults.take_latency(op))
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentRail {
    async fn check_funds(&self, account: &AccountId, amount: Decimal) -> Result<bool> {
        let latency = self.begin(PaymentOp::Check)?;
        let enough = self.balance(account).available >= amount;
        settle_latency(latency).await;
        Ok(enough)
    }

    async fn lock_funds(&self, escrow: EscrowId, account: &AccountId, amount: Decimal, ttl: Duration) -> Result<()> {
        let latency = self.begin(PaymentOp::Lock)?;
        {
            let mut ledger = self.ledger.lock();
            let now = Instant::now();
            ledger.expire(now);
            if ledger.escrows.contains_key(&escrow) {
                return Err(collaborator("payment", format!("escrow {escrow} already exists")));
            }
            let balance = ledger.accounts.entry(account.clone()).or_default();
            if balance.available < amount {
                return Err(VerinetError::InsufficientFunds {
                    needed: amount,
                    available: balance.available,
                });
            }
            balance.available -= amount;
            balance.frozen += amount;
            ledger.escrows.insert(
                escrow,
                Escrow {
                    account: account.clone(),
                    amount,
                    status: EscrowStatus::Held,
                    expires_at: now + ttl,
                },
            );
        }
        settle_latency(latency).await;
        Ok(())
    }

    async fn release_funds(&self, escrow: EscrowId, recipient: &AccountId) -> Result<()> {
        let latency = self.begin(PaymentOp::Release)?;
        {
            let mut ledger = self.ledger.lock();
            ledger.expire(Instant::now());
            let Some(entry) = ledger.escrows.get_mut(&escrow) else {
                return Err(collaborator("payment", format!("unknown escrow {escrow}")));
            };
            if entry.status != EscrowStatus::Held {
                return Err(collaborator("payment", format!("escrow {escrow} is {:?}", entry.status)));
            }
            entry.status = EscrowStatus::Released {
                recipient: recipient.clone(),
            };
            let (payer, amount) = (entry.account.clone(), entry.amount);
            ledger.accounts.entry(payer).or_default().frozen -= amount;
            ledger.accounts.entry(recipient.clone()).or_default().available += amount;
        }
        settle_latency(latency).await;
        Ok(())
    }

    async fn refund(&self, escrow: EscrowId) -> Result<()> {
        let latency = self.begin(PaymentOp::Refund)?;
        {
            let mut ledger = self.ledger.lock();
            ledger.expire(Instant::now());
            let Some(entry) = ledger.escrows.get_mut(&escrow) else {
                return Err(collaborator("payment", format!("unknown escrow {escrow}")));
            };
            match entry.status {
                EscrowStatus::Held => {
                    entry.status = EscrowStatus::Refunded;
                    let (payer, amount) = (entry.account.clone(), entry.amount);
                    let balance = ledger.accounts.entry(payer).or_default();
                    balance.frozen -= amount;
                    balance.available += amount;
                }
                EscrowStatus::Refunded | EscrowStatus::Expired => {}
                EscrowStatus::Released { .. } => {
                    return Err(collaborator("payment", format!("escrow {escrow} already released")));
                }
            }
        }
        settle_latency(latency).await;
        Ok(())
    }

    async fn escrow_status(&self, escrow: EscrowId) -> Result<Option<EscrowStatus>> {
        let latency = self.begin(PaymentOp::Status)?;
        let status = {
            let mut ledger = self.ledger.lock();
            ledger.expire(Instant::now());
            ledger.escrows.get(&escrow).map(|e| e.status.clone())
        };
        settle_latency(latency).await;
        Ok(status)
    }
}

// =============================================================================
// Custody registry
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustodyOp {
    Owner,
    Lock,
    Unlock,
    Transfer,
}

#[derive(Debug, Clone)]
struct AssetLock {
    holder: PartyId,
    expires_at: Instant,
}

#[derive(Default)]
struct Registry {
    owners: HashMap<AssetId, PartyId>,
    locks: HashMap<AssetId, AssetLock>,
}

impl Registry {
    fn live_lock(&mut self, asset: &AssetId, now: Instant) -> Option<&AssetLock> {
        if self.locks.get(asset).is_some_and(|l| l.expires_at <= now) {
            self.locks.remove(asset);
        }
        self.locks.get(asset)
    }
}

/// Custody registry: one owner per asset, optional time-bounded lock.
pub struct InMemoryCustodyRegistry {
    registry: Mutex<Registry>,
    faults: Mutex<Faults<CustodyOp>>,
}

impl Default for InMemoryCustodyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCustodyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            faults: Mutex::new(Faults::new()),
        }
    }

    pub fn register(&self, asset: &AssetId, owner: &PartyId) {
        self.registry.lock().owners.insert(asset.clone(), owner.clone());
    }

    #[must_use]
    pub fn owner(&self, asset: &AssetId) -> Option<PartyId> {
        self.registry.lock().owners.get(asset).cloned()
    }

    /// Current lock holder, if the lock has not lapsed.
    #[must_use]
    pub fn lock_holder(&self, asset: &AssetId) -> Option<PartyId> {
        self.registry
            .lock()
            .live_lock(asset, Instant::now())
            .map(|l| l.holder.clone())
    }

    pub fn fail(&self, op: CustodyOp) {
        self.faults.lock().failing.insert(op);
    }

    pub fn heal(&self, op: CustodyOp) {
        self.faults.lock().failing.remove(&op);
    }

    /// Slow down the next `op` call by `latency`.
    pub fn delay(&self, op: CustodyOp, latency: Duration) {
        self.faults.lock().latency.insert(op, latency);
    }

    fn begin(&self, op: CustodyOp) -> Result<Option<Duration>> {
        let mut faults = self.faults.lock();
        faults.check("custody", op)?;
        Ok(faults.take_latency(op))
    }
}

#[async_trait]
impl CustodyService for InMemoryCustodyRegistry {
    async fn get_custody_owner(&self, asset: &AssetId) -> Result<PartyId> {
        let latency = self.begin(CustodyOp::Owner)?;
        let owner = self
            .owner(asset)
            .ok_or_else(|| collaborator("custody", format!("unknown asset {asset}")))?;
        settle_latency(latency).await;
        Ok(owner)
    }

    async fn lock_asset(&self, asset: &AssetId, holder: &PartyId, ttl: Duration) -> Result<()> {
        let latency = self.begin(CustodyOp::Lock)?;
        {
            let mut registry = self.registry.lock();
            let now = Instant::now();
            if registry.owners.get(asset) != Some(holder) {
                return Err(collaborator("custody", format!("{holder} does not hold {asset}")));
            }
            if let Some(lock) = registry.live_lock(asset, now) {
                if &lock.holder != holder {
                    return Err(collaborator("custody", format!("{asset} is locked by {}", lock.holder)));
                }
            }
            registry.locks.insert(
                asset.clone(),
                AssetLock {
                    holder: holder.clone(),
                    expires_at: now + ttl,
                },
            );
        }
        settle_latency(latency).await;
        Ok(())
    }

    async fn unlock_asset(&self, asset: &AssetId, holder: &PartyId) -> Result<()> {
        let latency = self.begin(CustodyOp::Unlock)?;
        {
            let mut registry = self.registry.lock();
            if registry.locks.get(asset).is_some_and(|l| &l.holder == holder) {
                registry.locks.remove(asset);
            }
        }
        settle_latency(latency).await;
        Ok(())
    }

    async fn transfer_asset(&self, asset: &AssetId, from: &PartyId, to: &PartyId) -> Result<()> {
        let latency = self.begin(CustodyOp::Transfer)?;
        {
            let mut registry = self.registry.lock();
            if registry.owners.get(asset) != Some(from) {
                return Err(collaborator("custody", format!("{from} does not hold {asset}")));
            }
            if let Some(lock) = registry.live_lock(asset, Instant::now()) {
                if &lock.holder != from {
                    return Err(collaborator("custody", format!("{asset} is locked by {}", lock.holder)));
                }
            }
            // A transfer consumes the sender's lock.
            registry.locks.remove(asset);
            registry.owners.insert(asset.clone(), to.clone());
        }
        settle_latency(latency).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(name: &str) -> AccountId {
        AccountId::new(name)
    }

    #[tokio::test]
    async fn lock_release_moves_frozen_to_payee() {
        let rail = InMemoryPaymentRail::new();
        rail.deposit(&acct("buyer"), Decimal::new(100, 0));
        let escrow = EscrowId::new();
        rail.lock_funds(escrow, &acct("buyer"), Decimal::new(60, 0), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(rail.balance(&acct("buyer")).frozen, Decimal::new(60, 0));
        assert!(!rail.check_funds(&acct("buyer"), Decimal::new(50, 0)).await.unwrap());

        rail.release_funds(escrow, &acct("seller")).await.unwrap();
        assert_eq!(rail.balance(&acct("seller")).available, Decimal::new(60, 0));
        assert_eq!(rail.balance(&acct("buyer")).available, Decimal::new(40, 0));
        assert!(rail.refund(escrow).await.is_err());
        rail.verify_supply().unwrap();
    }

    #[tokio::test]
    async fn refund_is_idempotent() {
        let rail = InMemoryPaymentRail::new();
        rail.deposit(&acct("buyer"), Decimal::new(100, 0));
        let escrow = EscrowId::new();
        rail.lock_funds(escrow, &acct("buyer"), Decimal::new(100, 0), Duration::from_secs(30))
            .await
            .unwrap();
        rail.refund(escrow).await.unwrap();
        rail.refund(escrow).await.unwrap();
        assert_eq!(rail.balance(&acct("buyer")).available, Decimal::new(100, 0));
        assert_eq!(rail.escrow_status(escrow).await.unwrap(), Some(EscrowStatus::Refunded));
        assert_eq!(rail.escrow_status(EscrowId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn insufficient_funds_leave_no_escrow() {
        let rail = InMemoryPaymentRail::new();
        rail.deposit(&acct("buyer"), Decimal::new(10, 0));
        let escrow = EscrowId::new();
        let err = rail
            .lock_funds(escrow, &acct("buyer"), Decimal::new(11, 0), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VerinetError::InsufficientFunds { .. }));
        assert_eq!(rail.escrow_status(escrow).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn lapsed_escrow_returns_funds() {
        let rail = InMemoryPaymentRail::new();
        rail.deposit(&acct("buyer"), Decimal::new(10, 0));
        let escrow = EscrowId::new();
        rail.lock_funds(escrow, &acct("buyer"), Decimal::new(10, 0), Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(rail.escrow_status(escrow).await.unwrap(), Some(EscrowStatus::Expired));
        assert_eq!(rail.balance(&acct("buyer")).available, Decimal::new(10, 0));
        assert!(rail.release_funds(escrow, &acct("seller")).await.is_err());
    }

    #[tokio::test]
    async fn custody_lock_blocks_other_holders() {
        let custody = InMemoryCustodyRegistry::new();
        let lot = AssetId::new("lot-1");
        let seller = PartyId::new("seller");
        let buyer = PartyId::new("buyer");
        custody.register(&lot, &seller);

        assert!(custody.lock_asset(&lot, &buyer, Duration::from_secs(1)).await.is_err());
        custody.lock_asset(&lot, &seller, Duration::from_secs(1)).await.unwrap();
        assert_eq!(custody.lock_holder(&lot), Some(seller.clone()));

        custody.transfer_asset(&lot, &seller, &buyer).await.unwrap();
        assert_eq!(custody.owner(&lot), Some(buyer.clone()));
        assert_eq!(custody.lock_holder(&lot), None);
        // Unlocking a lock that is gone is a no-op.
        custody.unlock_asset(&lot, &seller).await.unwrap();
    }

    #[tokio::test]
    async fn injected_failure_reports_collaborator_error() {
        let custody = InMemoryCustodyRegistry::new();
        let lot = AssetId::new("lot-1");
        custody.register(&lot, &PartyId::new("seller"));
        custody.fail(CustodyOp::Transfer);
        let err = custody
            .transfer_asset(&lot, &PartyId::new("seller"), &PartyId::new("buyer"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerinetError::CollaboratorFailure { .. }));
        custody.heal(CustodyOp::Transfer);
        assert!(custody
            .transfer_asset(&lot, &PartyId::new("seller"), &PartyId::new("buyer"))
            .await
            .is_ok());
    }
}
