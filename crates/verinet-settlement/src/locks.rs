//! Exclusive settlement-resource locks.
//!
//! One async mutex per payment account or custody asset. Acquisition is
//! always bounded: it either waits up to the lock timeout
//! ([`ContentionPolicy::Block`]) or fails at once
//! ([`ContentionPolicy::FailFast`]). Settlements take the payment lock
//! before the custody lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use verinet_types::{AccountId, AssetId, ContentionPolicy, Result, VerinetError};

/// Entries beyond this are pruned of idle locks on the next acquisition.
const PRUNE_THRESHOLD: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Account(AccountId),
    Asset(AssetId),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(account) => write!(f, "payment:{account}"),
            Self::Asset(asset) => write!(f, "custody:{asset}"),
        }
    }
}

/// Held lock. Dropping it releases the resource.
#[derive(Debug)]
pub struct ResourceGuard {
    resource: Resource,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    #[must_use]
    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

pub struct ResourceLocks {
    table: Mutex<HashMap<Resource, Arc<AsyncMutex<()>>>>,
    policy: ContentionPolicy,
    timeout: Duration,
}

impl ResourceLocks {
    #[must_use]
    pub fn new(policy: ContentionPolicy, timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            policy,
            timeout,
        }
    }

    /// Take the exclusive lock on `resource`.
    ///
    /// # Errors
    /// [`VerinetError::LockAcquisitionFailure`] if the resource is held and
    /// the policy fails fast, or the timeout elapses.
    pub async fn acquire(&self, resource: Resource) -> Result<ResourceGuard> {
        let mutex = {
            let mut table = self.table.lock();
            if table.len() > PRUNE_THRESHOLD {
                table.retain(|_, m| Arc::strong_count(m) > 1);
            }
            Arc::clone(table.entry(resource.clone()).or_default())
        };

        let guard = match self.policy {
            ContentionPolicy::FailFast => mutex.try_lock_owned().map_err(|_| VerinetError::LockAcquisitionFailure {
                resource: resource.to_string(),
                reason: "resource is held by another settlement".into(),
            })?,
            ContentionPolicy::Block => tokio::time::timeout(self.timeout, mutex.lock_owned())
                .await
                .map_err(|_| VerinetError::LockAcquisitionFailure {
                    resource: resource.to_string(),
                    reason: format!("not acquired within {}ms", self.timeout.as_millis()),
                })?,
        };
        debug!(%resource, "Resource locked");
        Ok(ResourceGuard {
            resource,
            _guard: guard,
        })
    }

    /// Whether some settlement currently holds `resource`.
    #[must_use]
    pub fn is_locked(&self, resource: &Resource) -> bool {
        self.table
            .lock()
            .get(resource)
            .is_some_and(|m| m.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str) -> Resource {
        Resource::Account(AccountId::new(name))
    }

    #[tokio::test]
    async fn fail_fast_rejects_held_resource() {
        let locks = ResourceLocks::new(ContentionPolicy::FailFast, Duration::from_secs(1));
        let held = locks.acquire(account("a")).await.unwrap();
        assert!(locks.is_locked(held.resource()));

        let err = locks.acquire(account("a")).await.unwrap_err();
        assert!(matches!(err, VerinetError::LockAcquisitionFailure { ref resource, .. } if resource == "payment:a"));
        assert!(locks.acquire(account("b")).await.is_ok());

        drop(held);
        assert!(!locks.is_locked(&account("a")));
        assert!(locks.acquire(account("a")).await.is_ok());
    }

    #[tokio::test]
    async fn block_times_out() {
        let locks = ResourceLocks::new(ContentionPolicy::Block, Duration::from_millis(20));
        let _held = locks.acquire(Resource::Asset(AssetId::new("lot-1"))).await.unwrap();
        let err = locks
            .acquire(Resource::Asset(AssetId::new("lot-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, VerinetError::LockAcquisitionFailure { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn block_waits_for_release() {
        let locks = Arc::new(ResourceLocks::new(ContentionPolicy::Block, Duration::from_secs(2)));
        let held = locks.acquire(account("a")).await.unwrap();
        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire(account("a")).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        waiter.await.unwrap().unwrap();
    }
}
