//! Per-instance exclusivity
//!
//! At most one workflow may act on an instance at a time. A lease is held
//! for the duration of one driver invocation or one facade call that starts
//! a workflow, and released on drop. Binds and unbinds do not take the
//! instance lease; they queue on [`KeyLocks`] by binding key instead.

use broker_types::{BrokerError, InstanceId, Result};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Set of instances currently leased
#[derive(Debug, Clone, Default)]
pub struct InstanceLocks {
    held: Arc<DashSet<InstanceId>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `instance_id`, or fail with `InstanceBusy`.
    pub fn try_acquire(&self, instance_id: InstanceId) -> Result<InstanceLease> {
        if !self.held.insert(instance_id) {
            return Err(BrokerError::InstanceBusy(instance_id));
        }
        Ok(InstanceLease {
            instance_id,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, instance_id: &InstanceId) -> bool {
        self.held.contains(instance_id)
    }
}

/// Exclusive access to one instance; released when dropped
#[derive(Debug)]
pub struct InstanceLease {
    instance_id: InstanceId,
    held: Arc<DashSet<InstanceId>>,
}

impl InstanceLease {
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        self.held.remove(&self.instance_id);
    }
}

/// Async mutexes created on demand per key
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder of `key` remains.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = Arc::clone(&self.locks.entry(key.to_string()).or_default());
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held lock on one key; the entry is dropped once nobody waits on it
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
