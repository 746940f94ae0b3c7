//Adapted from https://github.com/rerun-io/rerun MIT licensed.
use std::hash::{Hash, Hasher};

use bytemuck::Pod;
use parking_lot::{RwLock, RwLockReadGuard};
use rustc_hash::FxHashMap;
use slotmap::{Key, SlotMap};

use super::PoolError;

slotmap::new_key_type! { pub struct StateHandle; }

/// Wraps a plain-old-data key so that equality and hashing run over its raw bytes.
///
/// `Pod` rules out padding, so two keys built independently from the same field values
/// always land in the same slot.
#[derive(Clone, Copy)]
pub struct BitKey<K: Pod>(pub K);

impl<K: Pod> PartialEq for BitKey<K> {
    fn eq(&self, other: &Self) -> bool {
        bytemuck::bytes_of(&self.0) == bytemuck::bytes_of(&other.0)
    }
}

impl<K: Pod> Eq for BitKey<K> {}

impl<K: Pod> Hash for BitKey<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        bytemuck::bytes_of(&self.0).hash(state);
    }
}

impl<K: Pod + std::fmt::Debug> std::fmt::Debug for BitKey<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Memoizes expensive-to-create GPU state objects by a small description of that state.
///
/// A value is created at most once per distinct key and lives as long as the cache:
/// the set of states a renderer actually uses is small and closed, so nothing is evicted.
pub struct StateCache<K: Pod, V, C> {
    resources: RwLock<SlotMap<StateHandle, V>>,
    lookup: RwLock<FxHashMap<BitKey<K>, StateHandle>>,
    creator: C,
}

impl<K, V, C> StateCache<K, V, C>
where
    K: Pod,
    C: Fn(&K) -> V,
{
    pub fn new(creator: C) -> Self {
        Self {
            resources: Default::default(),
            lookup: Default::default(),
            creator,
        }
    }

    pub fn get_or_create(&self, key: &K) -> StateHandle {
        // Ensure the lock isn't held in the creation case.
        if let Some(handle) = self.lookup.read().get(&BitKey(*key)) {
            return *handle;
        }

        let resource = (self.creator)(key);
        let mut lookup = self.lookup.write();
        // Another thread may have raced us here, the first insertion wins.
        if let Some(handle) = lookup.get(&BitKey(*key)) {
            return *handle;
        }
        let handle = self.resources.write().insert(resource);
        lookup.insert(BitKey(*key), handle);
        handle
    }

    /// Locks the cache for resolving handles.
    ///
    /// While it is locked, no new states can be added. [`StateCache::get_or_create`]
    /// still returns handles for keys already cached, but calling it with an uncached
    /// key on the thread holding the accessor deadlocks.
    pub fn resources(&self) -> StateCacheReadLockAccessor<'_, V> {
        StateCacheReadLockAccessor {
            resources: self.resources.read(),
        }
    }

    pub fn num_resources(&self) -> usize {
        self.resources.read().len()
    }
}

/// Accessor to the cache by taking a read lock.
pub struct StateCacheReadLockAccessor<'a, V> {
    resources: RwLockReadGuard<'a, SlotMap<StateHandle, V>>,
}

impl<'a, V> StateCacheReadLockAccessor<'a, V> {
    pub fn get(&self, handle: StateHandle) -> Result<&V, PoolError> {
        self.resources.get(handle).ok_or_else(|| {
            if handle.is_null() {
                PoolError::NullHandle
            } else {
                PoolError::ResourceNotAvailable
            }
        })
    }
}
