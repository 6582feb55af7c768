use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use vmmc_host::HostAddr;

/// What an intercepted fast-mutex call does for a given mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Forward to the host primitive.
    #[default]
    Passthrough,
    /// Report success without touching the mutex.
    NoOp,
}

/// Mutex address to [`LockPolicy`]. Unknown mutexes pass through.
#[derive(Debug, Default)]
pub struct LockPolicyTable {
    policies: RwLock<HashMap<HostAddr, LockPolicy>>,
}

impl LockPolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<HostAddr, LockPolicy>> {
        self.policies
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<HostAddr, LockPolicy>> {
        self.policies
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn register(&self, mutex: HostAddr, policy: LockPolicy) {
        if self.write().insert(mutex, policy) != Some(policy) {
            tracing::debug!(%mutex, ?policy, "lock policy registered");
        }
    }

    pub fn unregister(&self, mutex: HostAddr) {
        self.write().remove(&mutex);
    }

    pub fn policy(&self, mutex: HostAddr) -> LockPolicy {
        self.read().get(&mutex).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
