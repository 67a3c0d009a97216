//! Fixed-capacity concurrent map backing every policy store
//!
//! Keys are spread over a fixed number of shards, each behind its own
//! `parking_lot::RwLock`, so a control-plane write only ever stalls readers
//! of one shard. Capacity is a hard global bound: once `capacity` keys are
//! present, inserts of *new* keys are rejected and existing entries are kept.
//!
//! ```text
//!            hash(key) % SHARDS
//!                   │
//!   ┌────────┬──────┴─┬────────┬─────┬────────┐
//!   │shard 0 │shard 1 │shard 2 │ ... │shard 15│   RwLock<HashMap<K, V>>
//!   └────────┴────────┴────────┴─────┴────────┘
//!                   │
//!          len: AtomicUsize  (global, ≤ capacity)
//! ```
//!
//! Every shard is preallocated for `capacity / SHARDS` entries, so inserts
//! do not allocate as long as keys spread evenly.
//!
//! Contention only ever delays an access. A non-blocking access spins on
//! `try_*` (never parks the thread) until it gets the shard, so a read
//! always sees a value some writer stored and an insert only fails when
//! the map is full.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::StoreError;

/// Number of lock shards per map
const SHARDS: usize = 16;

/// Busy-wait rounds before a non-blocking access starts yielding its slice
const SPIN_LIMIT: u32 = 6;

/// How a store operation may wait for a lock.
///
/// Derived from the `can_block` flag of the hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Normal lock acquisition, may park the thread briefly
    Blocking,
    /// Spin on `try_*` with backoff; the thread is never parked
    NonBlocking,
}

impl Access {
    pub fn from_can_block(can_block: bool) -> Self {
        if can_block {
            Access::Blocking
        } else {
            Access::NonBlocking
        }
    }
}

/// Result of a successful insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// The key was new
    New,
    /// The key was present, its value was overwritten
    Replaced,
}

/// Retry `attempt` until it yields a guard: exponential busy-wait first,
/// then `yield_now` so a preempted lock holder gets to run.
fn spin_acquire<G>(mut attempt: impl FnMut() -> Option<G>) -> G {
    let mut round = 0;
    loop {
        if let Some(guard) = attempt() {
            return guard;
        }
        if round < SPIN_LIMIT {
            for _ in 0..(1u32 << round) {
                std::hint::spin_loop();
            }
            round += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

pub(crate) struct BoundedMap<K, V> {
    shards: Box<[RwLock<HashMap<K, V>>]>,
    hasher: RandomState,
    len: AtomicUsize,
    capacity: usize,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Copy,
    V: Copy,
{
    pub fn with_capacity(capacity: usize) -> Self {
        let per_shard = capacity.div_ceil(SHARDS);
        let shards = (0..SHARDS)
            .map(|_| RwLock::new(HashMap::with_capacity(per_shard)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher: RandomState::new(),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let idx = (self.hasher.hash_one(key) as usize) % SHARDS;
        &self.shards[idx]
    }

    fn read(lock: &RwLock<HashMap<K, V>>, access: Access) -> RwLockReadGuard<'_, HashMap<K, V>> {
        match access {
            Access::Blocking => lock.read(),
            Access::NonBlocking => spin_acquire(|| lock.try_read()),
        }
    }

    fn write(lock: &RwLock<HashMap<K, V>>, access: Access) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        match access {
            Access::Blocking => lock.write(),
            Access::NonBlocking => spin_acquire(|| lock.try_write()),
        }
    }

    /// Claim one slot of the global budget. Caller holds the shard write lock
    /// and has checked that the key is absent.
    fn reserve_slot(&self) -> Result<(), StoreError> {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < self.capacity).then_some(len + 1)
            })
            .map(|_| ())
            .map_err(|_| StoreError::Full {
                capacity: self.capacity,
            })
    }

    pub fn get(&self, key: &K, access: Access) -> Option<V> {
        Self::read(self.shard(key), access).get(key).copied()
    }

    pub fn contains(&self, key: &K, access: Access) -> bool {
        Self::read(self.shard(key), access).contains_key(key)
    }

    pub fn insert(&self, key: K, value: V, access: Access) -> Result<Inserted, StoreError> {
        let mut shard = Self::write(self.shard(&key), access);
        if let Some(slot) = shard.get_mut(&key) {
            *slot = value;
            return Ok(Inserted::Replaced);
        }
        self.reserve_slot()?;
        shard.insert(key, value);
        Ok(Inserted::New)
    }

    /// Mutate the value under `key` in place, inserting `init` first if the
    /// key is absent. Returns the value after `f` ran.
    pub fn upsert<F>(&self, key: K, init: V, access: Access, f: F) -> Result<V, StoreError>
    where
        F: FnOnce(&mut V),
    {
        let mut shard = Self::write(self.shard(&key), access);
        if let Some(slot) = shard.get_mut(&key) {
            f(slot);
            return Ok(*slot);
        }
        self.reserve_slot()?;
        let mut value = init;
        f(&mut value);
        shard.insert(key, value);
        Ok(value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.shard(key).write().remove(key);
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Drop every entry for which `keep` returns false. Returns how many went.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut removed = 0;
        for lock in self.shards.iter() {
            let mut shard = lock.write();
            let before = shard.len();
            shard.retain(|k, v| keep(k, v));
            removed += before - shard.len();
        }
        self.len.fetch_sub(removed, Ordering::AcqRel);
        removed
    }

    /// Copy out every entry. Shards are visited one at a time, so the result
    /// is not an atomic snapshot of the whole map.
    pub fn entries(&self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.len());
        for lock in self.shards.iter() {
            out.extend(lock.read().iter().map(|(k, v)| (*k, *v)));
        }
        out
    }
}
