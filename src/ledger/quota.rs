use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::core::errors::FleetResult;

/// Per-user usage counters. Invariant: never negative; releases clamp at
/// zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaCounters {
    pub used_instances: u32,
    pub used_cpu: u32,
    pub used_memory: u32,
}

/// Usage-based accounting: quota is recorded, not enforced. `check` is the
/// seam where a hard-cap policy would slot in without touching callers.
#[derive(Default)]
pub struct QuotaLedger {
    users: DashMap<String, QuotaCounters>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_user(&self, user_id: &str) {
        self.users.entry(user_id.to_string()).or_default();
    }

    /// Admission check for a prospective allocation. Always allowed under
    /// the current accounting policy; a future cap returns
    /// `FleetError::QuotaExceeded` here.
    pub fn check(&self, _user_id: &str, _cpu: u32, _memory: u32) -> FleetResult<()> {
        Ok(())
    }

    /// Records an allocation. Returns false (recording nothing) when the
    /// user is unknown.
    pub fn allocate(&self, user_id: &str, cpu: u32, memory: u32) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut counters) => {
                counters.used_instances += 1;
                counters.used_cpu += cpu;
                counters.used_memory += memory;
                true
            }
            None => {
                debug!(user_id, "quota allocate for unregistered user, nothing recorded");
                false
            }
        }
    }

    /// Reverses one allocation, clamping every counter at zero. A no-op for
    /// unknown users, so double release is always safe.
    pub fn release(&self, user_id: &str, cpu: u32, memory: u32) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut counters) => {
                counters.used_instances = counters.used_instances.saturating_sub(1);
                counters.used_cpu = counters.used_cpu.saturating_sub(cpu);
                counters.used_memory = counters.used_memory.saturating_sub(memory);
                true
            }
            None => false,
        }
    }

    pub fn usage(&self, user_id: &str) -> Option<QuotaCounters> {
        self.users.get(user_id).map(|c| *c)
    }
}
