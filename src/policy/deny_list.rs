//! Static deny-list: listed processes may not open anything

use super::bounded::{Access, BoundedMap};
use super::{ProcessId, StoreError};

/// Default number of blocked processes
pub const DEFAULT_DENY_LIST_CAPACITY: usize = 10_240;

pub struct DenyList {
    blocked: BoundedMap<ProcessId, ()>,
}

impl DenyList {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocked: BoundedMap::with_capacity(capacity),
        }
    }

    pub fn is_blocked(&self, pid: ProcessId) -> bool {
        self.is_blocked_with(pid, Access::Blocking)
    }

    /// Lookup for the decision path
    pub fn is_blocked_with(&self, pid: ProcessId, access: Access) -> bool {
        self.blocked.contains(&pid, access)
    }

    /// Add `pid`. Blocking an already blocked pid is a no-op.
    pub fn block(&self, pid: ProcessId) -> Result<(), StoreError> {
        self.blocked.insert(pid, (), Access::Blocking).map(|_| ())
    }

    /// Remove `pid`. Returns whether it was listed.
    pub fn unblock(&self, pid: ProcessId) -> bool {
        self.blocked.remove(&pid).is_some()
    }

    pub fn blocked_pids(&self) -> Vec<ProcessId> {
        let mut pids: Vec<_> = self.blocked.entries().into_iter().map(|(pid, _)| pid).collect();
        pids.sort_unstable();
        pids
    }

    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}

impl Default for DenyList {
    fn default() -> Self {
        Self::new(DEFAULT_DENY_LIST_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_unblock() {
        let list = DenyList::default();
        assert!(!list.is_blocked(5));

        list.block(5).unwrap();
        list.block(5).unwrap();
        assert!(list.is_blocked(5));
        assert_eq!(list.len(), 1);

        assert!(list.unblock(5));
        assert!(!list.unblock(5));
        assert!(!list.is_blocked(5));
    }

    #[test]
    fn test_blocked_pids_sorted() {
        let list = DenyList::default();
        for pid in [30, 10, 20] {
            list.block(pid).unwrap();
        }
        assert_eq!(list.blocked_pids(), vec![10, 20, 30]);
    }

    #[test]
    fn test_capacity() {
        let list = DenyList::new(2);
        list.block(1).unwrap();
        list.block(2).unwrap();
        assert!(list.block(3).is_err());
        assert!(!list.is_blocked(3));
    }
}
