//! Learned (process, file) pairs for the learn/enforce policy

use crate::identity::FileIdentity;

use super::bounded::{Access, BoundedMap, Inserted};
use super::{ProcessId, StoreError};

/// Default number of learned pairs across all processes
pub const DEFAULT_ALLOW_SET_CAPACITY: usize = 262_144;

/// Key of the allow-set: this process has learned this file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllowKey {
    pub pid: ProcessId,
    pub identity: FileIdentity,
}

impl AllowKey {
    pub fn new(pid: ProcessId, identity: FileIdentity) -> Self {
        Self { pid, identity }
    }
}

pub struct AllowSet {
    learned: BoundedMap<AllowKey, ()>,
}

impl AllowSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            learned: BoundedMap::with_capacity(capacity),
        }
    }

    /// Record `key`. Re-learning a present key changes nothing; the only
    /// failure is a full set.
    pub fn learn(&self, key: AllowKey, access: Access) -> Result<Inserted, StoreError> {
        self.learned.insert(key, (), access)
    }

    /// Membership for enforcement
    pub fn contains(&self, key: &AllowKey, access: Access) -> bool {
        self.learned.contains(key, access)
    }

    /// Forget everything `pid` learned. Returns the number of pairs removed.
    pub fn clear_process(&self, pid: ProcessId) -> usize {
        self.learned.retain(|key, _| key.pid != pid)
    }

    /// Number of identities learned by `pid`
    pub fn count_for(&self, pid: ProcessId) -> usize {
        self.learned
            .entries()
            .iter()
            .filter(|(key, _)| key.pid == pid)
            .count()
    }

    pub fn len(&self) -> usize {
        self.learned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.learned.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.learned.capacity()
    }
}

impl Default for AllowSet {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOW_SET_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(pid: ProcessId, ino: u64) -> AllowKey {
        AllowKey::new(pid, FileIdentity::new(8, 1, ino))
    }

    #[test]
    fn test_learn_is_idempotent() {
        let set = AllowSet::new(16);
        assert_eq!(set.learn(key(1, 50), Access::Blocking), Ok(Inserted::New));
        assert_eq!(
            set.learn(key(1, 50), Access::Blocking),
            Ok(Inserted::Replaced)
        );
        assert_eq!(set.len(), 1);
        assert!(set.contains(&key(1, 50), Access::NonBlocking));
    }

    #[test]
    fn test_membership_is_per_process() {
        let set = AllowSet::new(16);
        set.learn(key(1, 50), Access::Blocking).unwrap();
        assert!(!set.contains(&key(2, 50), Access::Blocking));
        assert!(!set.contains(&key(1, 51), Access::Blocking));
    }

    #[test]
    fn test_clear_process() {
        let set = AllowSet::new(16);
        set.learn(key(1, 50), Access::Blocking).unwrap();
        set.learn(key(1, 51), Access::Blocking).unwrap();
        set.learn(key(2, 50), Access::Blocking).unwrap();

        assert_eq!(set.count_for(1), 2);
        assert_eq!(set.clear_process(1), 2);
        assert_eq!(set.count_for(1), 0);
        assert!(set.contains(&key(2, 50), Access::Blocking));
    }

    #[test]
    fn test_full_set_drops_new_pairs() {
        let set = AllowSet::new(1);
        set.learn(key(1, 50), Access::Blocking).unwrap();
        assert!(set.learn(key(1, 51), Access::Blocking).is_err());
        assert!(!set.contains(&key(1, 51), Access::Blocking));
    }
}
