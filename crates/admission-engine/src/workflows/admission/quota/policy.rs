use std::sync::{Arc, RwLock, RwLockReadGuard};

use tracing::info;

use super::super::domain::{CycleId, QuotaMode, QuotaPolicy};

/// Holder for the process-wide policy. Every mutation swaps in a complete new record.
#[derive(Debug)]
pub struct ActivePolicy {
    current: RwLock<Arc<QuotaPolicy>>,
}

impl ActivePolicy {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
        }
    }

    /// Snapshot of the policy at this instant.
    pub fn current(&self) -> Arc<QuotaPolicy> {
        self.current.read().expect("policy lock poisoned").clone()
    }

    /// Read guard held by in-flight decisions so that a swap waits for them to finish.
    pub(crate) fn hold(&self) -> RwLockReadGuard<'_, Arc<QuotaPolicy>> {
        self.current.read().expect("policy lock poisoned")
    }

    /// Replace the whole policy, returning the previous record.
    pub fn replace(&self, policy: QuotaPolicy) -> Arc<QuotaPolicy> {
        self.update(|_| policy)
    }

    pub fn set_mode(&self, mode: QuotaMode) -> Arc<QuotaPolicy> {
        self.update(|current| QuotaPolicy {
            mode,
            ..current.clone()
        })
    }

    pub fn set_global_cap(&self, global_capacity_max: Option<u32>) -> Arc<QuotaPolicy> {
        self.update(|current| QuotaPolicy {
            global_capacity_max,
            ..current.clone()
        })
    }

    pub fn set_cycle(&self, cycle_id: CycleId) -> Arc<QuotaPolicy> {
        self.update(|current| QuotaPolicy {
            cycle_id,
            ..current.clone()
        })
    }

    fn update<F>(&self, build: F) -> Arc<QuotaPolicy>
    where
        F: FnOnce(&QuotaPolicy) -> QuotaPolicy,
    {
        let mut guard = self.current.write().expect("policy lock poisoned");
        let next = Arc::new(build(&guard));
        info!(
            cycle = %next.cycle_id,
            mode = next.mode.label(),
            global_cap = ?next.global_capacity_max,
            "quota policy replaced"
        );
        std::mem::replace(&mut *guard, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> QuotaPolicy {
        QuotaPolicy {
            cycle_id: CycleId::from("2025-I"),
            mode: QuotaMode::Open,
            global_capacity_max: None,
        }
    }

    #[test]
    fn mutators_swap_complete_records() {
        let active = ActivePolicy::new(policy());
        let before = active.current();

        let previous = active.set_mode(QuotaMode::Blocking);
        assert_eq!(*previous, *before);

        active.set_global_cap(Some(40));
        active.set_cycle(CycleId::from("2025-II"));

        let after = active.current();
        assert_eq!(after.mode, QuotaMode::Blocking);
        assert_eq!(after.global_capacity_max, Some(40));
        assert_eq!(after.cycle_id, CycleId::from("2025-II"));
        assert_eq!(before.mode, QuotaMode::Open, "old snapshot stays intact");
    }
}
