use std::sync::{Arc, LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

/// Per-key miss locks shared by concurrent cached calls.
pub(crate) type InflightLocks = DashMap<String, Arc<AsyncMutex<()>>>;

/// Unwraps a lock result, keeping the guard of a poisoned lock.
///
/// Registry and store state is only ever appended to or replaced wholesale,
/// so a panic in another holder cannot leave it half-written.
fn recover<G>(
    result: LockResult<G>,
    source: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            source_module = source,
            lock_kind,
            result = "poisoned_recovered",
            "Recovered from poisoned typecache lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), source, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), source, op, "rwlock.write")
}

/// Holds one key's miss lock and retires the map entry when the last holder
/// goes away, whether the call returned, failed or was cancelled.
pub(crate) struct InflightPermit<'a> {
    locks: &'a InflightLocks,
    key: &'a str,
    lock: Option<Arc<AsyncMutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> InflightPermit<'a> {
    pub(crate) fn new(locks: &'a InflightLocks, key: &'a str) -> Self {
        let lock = Arc::clone(locks.entry(key.to_string()).or_default().value());
        Self {
            locks,
            key,
            lock: Some(lock),
            guard: None,
        }
    }

    pub(crate) async fn acquire(&mut self) {
        if let Some(lock) = self.lock.as_ref() {
            self.guard = Some(Arc::clone(lock).lock_owned().await);
        }
    }
}

impl Drop for InflightPermit<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.lock.take();
        self.locks
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
