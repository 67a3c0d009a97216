//! Per-process deny counter

use super::bounded::{Access, BoundedMap};
use super::{ProcessId, StoreError};

/// Default number of processes tracked
pub const DEFAULT_VIOLATION_CAPACITY: usize = 10_240;

/// Counts denials per process. Saturates at `u64::MAX`, only reset by an
/// explicit `reset`.
pub struct ViolationCounter {
    counts: BoundedMap<ProcessId, u64>,
}

impl ViolationCounter {
    pub fn new(capacity: usize) -> Self {
        Self {
            counts: BoundedMap::with_capacity(capacity),
        }
    }

    /// Add one denial for `pid`, returning the new count
    pub fn increment(&self, pid: ProcessId, access: Access) -> Result<u64, StoreError> {
        self.counts
            .upsert(pid, 0, access, |count| *count = count.saturating_add(1))
    }

    pub fn get(&self, pid: ProcessId) -> u64 {
        self.counts
            .get(&pid, Access::Blocking)
            .unwrap_or(0)
    }

    /// Control-plane reset. Returns the count it had.
    pub fn reset(&self, pid: ProcessId) -> u64 {
        self.counts.remove(&pid).unwrap_or(0)
    }

    /// All non-zero counts, sorted by pid
    pub fn snapshot(&self) -> Vec<(ProcessId, u64)> {
        let mut counts = self.counts.entries();
        counts.sort_unstable_by_key(|(pid, _)| *pid);
        counts
    }

    pub fn total(&self) -> u64 {
        self.counts
            .entries()
            .iter()
            .fold(0u64, |acc, (_, n)| acc.saturating_add(*n))
    }
}

impl Default for ViolationCounter {
    fn default() -> Self {
        Self::new(DEFAULT_VIOLATION_CAPACITY)
    }
}
