//! Per-chain-key exclusive locks with bounded wait.
//!
//! Every mutating ledger operation holds the lock of each chain key it touches
//! for its whole read-compute-write cycle. Locks are taken before the database
//! transaction is opened and released after it commits or rolls back.

use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::ServiceError;

/// Holds one or more chain-key locks until dropped.
#[derive(Debug)]
pub struct ChainLockGuard {
    ids: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ChainLockGuard {
    /// Lock identities held, in acquisition order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

#[derive(Debug)]
pub struct ChainLockManager {
    locks: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl ChainLockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    pub async fn acquire(&self, lock_id: &str) -> Result<ChainLockGuard, ServiceError> {
        self.acquire_many([lock_id.to_string()]).await
    }

    /// Acquires every lock in sorted order within a single deadline.
    ///
    /// Duplicates are collapsed, so a transfer between a key and itself takes
    /// one lock. On timeout any locks already taken are released.
    pub async fn acquire_many<I>(&self, lock_ids: I) -> Result<ChainLockGuard, ServiceError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut ids: Vec<String> = lock_ids.into_iter().collect();
        ids.sort();
        ids.dedup();

        let deadline = Instant::now() + self.timeout;
        let mut guards = Vec::with_capacity(ids.len());

        for id in &ids {
            let mutex = self.mutex_for(id);
            match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    warn!(lock_id = %id, timeout_ms = self.timeout.as_millis() as u64, "chain lock wait timed out");
                    counter!("inventory_ledger.lock.timeouts", 1);
                    return Err(ServiceError::LockTimeout(id.clone()));
                }
            }
        }

        debug!(locks = ?ids, "chain locks acquired");
        Ok(ChainLockGuard {
            ids,
            _guards: guards,
        })
    }

    fn mutex_for(&self, lock_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(lock_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
