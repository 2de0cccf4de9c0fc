//! Per-key mutual exclusion for stock mutations.
//!
//! Every path that mutates a product's quantities serializes through the lock
//! for that product's (`item_code`, `warehouse_code`) pair, so unrelated items
//! never contend. The implementation is in-process: one `tokio` mutex per key,
//! handed out as an owned guard that releases on drop on every exit path.
//! Horizontal scaling requires swapping this for a lease-based distributed
//! lock behind the same contract.

use crate::errors::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use tracing::warn;

/// Idle lock entries are swept once the registry grows past this size.
const SWEEP_THRESHOLD: usize = 64;

/// Composite key scoping a lock to one item in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    /// Item code as known to the ERP
    pub item_code: String,
    /// Warehouse the stock position belongs to
    pub warehouse_code: String,
}

impl LockKey {
    /// Builds a key from an item/warehouse pair.
    pub fn new(item_code: impl Into<String>, warehouse_code: impl Into<String>) -> Self {
        Self {
            item_code: item_code.into(),
            warehouse_code: warehouse_code.into(),
        }
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.item_code, self.warehouse_code)
    }
}

/// Scoped lock handle; the underlying key is released when this drops.
#[derive(Debug)]
pub struct KeyedLockGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Registry of per-key mutexes.
///
/// Keys are created lazily on first acquisition and garbage-collected once
/// nobody holds or waits on them and the registry has grown past a threshold.
#[derive(Debug, Default)]
pub struct KeyedLock {
    locks: StdMutex<HashMap<LockKey, Arc<TokioMutex<()>>>>,
}

impl KeyedLock {
    /// Creates an empty lock registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `key`, waiting at most `timeout`.
    ///
    /// Blocks only callers of the same key; other keys proceed untouched.
    /// On timeout no state has changed and the caller may safely retry.
    pub async fn acquire(&self, key: &LockKey, timeout: Duration) -> Result<KeyedLockGuard> {
        let mutex = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if locks.len() > SWEEP_THRESHOLD {
                // An entry with no external references has no holder and no waiter.
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            Arc::clone(
                locks
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(TokioMutex::new(()))),
            )
        };

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(KeyedLockGuard { _guard: guard }),
            Err(_) => {
                warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "inventory lock acquisition timed out");
                Err(Error::LockTimeout {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Acquires several keys at once, in sorted order.
    ///
    /// Multi-line operations (reservation create/commit) touch more than one
    /// item; acquiring in a canonical order prevents lock-order deadlock
    /// between two such operations. Duplicate keys are collapsed.
    pub async fn acquire_many(
        &self,
        keys: &[LockKey],
        timeout: Duration,
    ) -> Result<Vec<KeyedLockGuard>> {
        let mut sorted: Vec<&LockKey> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.acquire(key, timeout).await?);
        }
        Ok(guards)
    }

    #[cfg(test)]
    fn registered_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
