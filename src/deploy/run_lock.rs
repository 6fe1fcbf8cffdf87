// ============================================================================
// File: src/deploy/run_lock.rs
// ----------------------------------------------------------------------------
// At most one deploy or rollback per VM at a time.
// ============================================================================

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::error::{DeployError, DeployResult};

/// Per-VM exclusion shared by everything that changes VM state
#[derive(Debug, Clone, Default)]
pub struct RunLock {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set holds plain names; a panic elsewhere cannot leave it torn.
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the VM, failing fast if a run already holds it
    pub fn try_acquire(&self, vm: &str) -> DeployResult<RunGuard> {
        if !self.active().insert(vm.to_string()) {
            warn!("Refusing to start a second run on VM {}", vm);
            return Err(DeployError::RunInProgress { vm: vm.to_string() });
        }
        debug!("Run lock taken for {}", vm);
        Ok(RunGuard {
            lock: self.clone(),
            vm: vm.to_string(),
        })
    }

    pub fn is_active(&self, vm: &str) -> bool {
        self.active().contains(vm)
    }
}

/// Releases the VM when dropped
#[derive(Debug)]
pub struct RunGuard {
    lock: RunLock,
    vm: String,
}

impl RunGuard {
    pub fn vm(&self) -> &str {
        &self.vm
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.lock.active().remove(&self.vm);
        debug!("Run lock released for {}", self.vm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let lock = RunLock::new();
        let guard = lock.try_acquire("ubuntu").unwrap();
        assert!(lock.is_active("ubuntu"));

        let err = lock.try_acquire("ubuntu").unwrap_err();
        assert!(matches!(err, DeployError::RunInProgress { ref vm } if vm == "ubuntu"));

        drop(guard);
        assert!(!lock.is_active("ubuntu"));
        assert!(lock.try_acquire("ubuntu").is_ok());
    }

    #[test]
    fn different_vms_do_not_block_each_other() {
        let lock = RunLock::new();
        let _a = lock.try_acquire("a").unwrap();
        let b = lock.clone().try_acquire("b").unwrap();
        assert_eq!(b.vm(), "b");
    }
}
