// All resource management taken from [Rerun](https://github.com/rerun-io/rerun) MIT.
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde::Serialize;
use slotmap::{Key, SlotMap};

use crate::{rvec, BufferBackend, PoolConfig, RVec};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("Requested resource isn't available because the handle is no longer valid")]
    ResourceNotAvailable,

    #[error("The passed resource handle was null")]
    NullHandle,

    #[error("Pool entry {0:?} has no outstanding references")]
    NotInUse(PoolEntryHandle),
}

//All slotmap keys are COPY
slotmap::new_key_type! { pub struct PoolEntryHandle; }

fn to_pool_error<T>(get_result: Option<T>, handle: impl Key) -> Result<T, PoolError> {
    get_result.ok_or_else(|| {
        if handle.is_null() {
            PoolError::NullHandle
        } else {
            PoolError::ResourceNotAvailable
        }
    })
}

struct PoolEntry<Buf> {
    buffer: Arc<Buf>,
    capacity: u64,
    last_accessed: u64,
    reference_count: u32,
}

/// A live allocation handed out by [`ResourcePool::acquire`].
///
/// Dropping this does *not* release the allocation, the holder must call
/// [`ResourcePool::release`] with `handle` once per reference it owns.
#[derive(Debug)]
pub struct PoolAllocation<Buf> {
    pub handle: PoolEntryHandle,
    pub capacity: u64,
    pub buffer: Arc<Buf>,
}

impl<Buf> Clone for PoolAllocation<Buf> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            capacity: self.capacity,
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl<Buf> std::ops::Deref for PoolAllocation<Buf> {
    type Target = Buf;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

/// Bookkeeping of a single entry, as seen from outside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub capacity: u64,
    pub last_accessed: u64,
    pub reference_count: u32,
    pub in_use: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub current_frame: u64,
    pub num_free: usize,
    pub num_used: usize,
    pub total_gpu_size_in_bytes: u64,
}

struct ResourcePoolProtectedState<Buf> {
    /// Every live entry, free or used.
    entries: SlotMap<PoolEntryHandle, PoolEntry<Buf>>,

    /// Entries without references, keyed by capacity for best-fit lookup.
    free: BTreeMap<u64, RVec<PoolEntryHandle>>,

    /// Entries with at least one reference.
    used: FxHashSet<PoolEntryHandle>,

    current_frame: u64,
}

impl<Buf> ResourcePoolProtectedState<Buf> {
    /// Smallest free entry with `capacity >= min_bytes`.
    fn take_best_fit(&mut self, min_bytes: u64) -> Option<PoolEntryHandle> {
        let (&capacity, handles) = self.free.range_mut(min_bytes..).next()?;
        let handle = handles.pop();
        if handles.is_empty() {
            self.free.remove(&capacity);
        }
        handle
    }

    fn num_free(&self) -> usize {
        self.free.values().map(|handles| handles.len()).sum()
    }
}

/// # ResourcePool
///
/// Reference counted, frame-aged pool of GPU buffers.
///
/// An entry lives in exactly one of two sets: `used` while anyone holds a reference,
/// `free` otherwise. Free entries are reused best-fit by capacity, and destroyed by
/// [`ResourcePool::gc`] once they have gone unused for more than
/// [`PoolConfig::eviction_threshold`] frames.
///
/// All state sits behind a single lock, so releases may come from a driver completion
/// thread while the render thread acquires. The backend is never called with the lock
/// held, so completion callbacks may freely re-enter the pool.
pub struct ResourcePool<B: BufferBackend> {
    backend: B,
    config: PoolConfig,
    state: Mutex<ResourcePoolProtectedState<B::Buffer>>,
    total_resource_size_in_bytes: AtomicU64,
}

impl<B: BufferBackend> ResourcePool<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, PoolConfig::default())
    }

    pub fn with_config(backend: B, config: PoolConfig) -> Self {
        Self {
            backend,
            config,
            state: Mutex::new(ResourcePoolProtectedState {
                entries: SlotMap::with_key(),
                free: BTreeMap::new(),
                used: FxHashSet::default(),
                current_frame: 0,
            }),
            total_resource_size_in_bytes: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns an allocation of at least `min_bytes`, holding one reference.
    ///
    /// Reuses the smallest free entry that fits, otherwise creates a new entry of exactly
    /// `min_bytes`.
    pub fn acquire(&self, min_bytes: u64) -> PoolAllocation<B::Buffer> {
        {
            let mut state = self.state.lock();
            if let Some(handle) = state.take_best_fit(min_bytes) {
                let frame = state.current_frame;
                let entry = &mut state.entries[handle];
                debug_assert_eq!(entry.reference_count, 0);
                entry.reference_count = 1;
                entry.last_accessed = frame;
                let allocation = PoolAllocation {
                    handle,
                    capacity: entry.capacity,
                    buffer: Arc::clone(&entry.buffer),
                };
                state.used.insert(handle);
                log::trace!(
                    "Reusing {:?} ({} bytes) for a request of {} bytes",
                    handle,
                    allocation.capacity,
                    min_bytes
                );
                return allocation;
            }
        }

        // Ensure the lock isn't held in the creation case.
        let buffer = Arc::new(self.backend.allocate(min_bytes));
        self.total_resource_size_in_bytes
            .fetch_add(min_bytes, Ordering::Relaxed);

        let mut state = self.state.lock();
        let frame = state.current_frame;
        let handle = state.entries.insert(PoolEntry {
            buffer: Arc::clone(&buffer),
            capacity: min_bytes,
            last_accessed: frame,
            reference_count: 1,
        });
        state.used.insert(handle);
        log::debug!("Created pool entry {:?} of {} bytes", handle, min_bytes);
        PoolAllocation {
            handle,
            capacity: min_bytes,
            buffer,
        }
    }

    /// Adds a reference to an entry that is currently in use.
    pub fn retain(&self, handle: PoolEntryHandle) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        if !state.used.contains(&handle) {
            let err = to_pool_error(state.entries.get(handle), handle)
                .err()
                .unwrap_or(PoolError::NotInUse(handle));
            log::error!("Cannot retain {:?}: {}", handle, err);
            return Err(err);
        }
        let entry = to_pool_error(state.entries.get_mut(handle), handle)?;
        entry.reference_count += 1;
        Ok(())
    }

    /// Drops a reference. When the last one goes, the entry becomes free
    /// (or is destroyed outright if reuse is disabled).
    pub fn release(&self, handle: PoolEntryHandle) -> Result<(), PoolError> {
        let destroyed = {
            let mut state = self.state.lock();
            if !state.used.contains(&handle) {
                let err = to_pool_error(state.entries.get(handle), handle)
                    .err()
                    .unwrap_or(PoolError::NotInUse(handle));
                log::error!("Cannot release {:?}: {}", handle, err);
                return Err(err);
            }

            let frame = state.current_frame;
            let entry = to_pool_error(state.entries.get_mut(handle), handle)?;
            debug_assert!(entry.reference_count > 0);
            entry.reference_count -= 1;
            if entry.reference_count > 0 {
                return Ok(());
            }
            entry.last_accessed = frame;
            let capacity = entry.capacity;
            state.used.remove(&handle);

            if self.config.allow_reuse {
                state.free.entry(capacity).or_default().push(handle);
                None
            } else {
                state.entries.remove(handle)
            }
        };

        if let Some(entry) = destroyed {
            self.destroy_entries(rvec![entry]);
        }
        Ok(())
    }

    /// Advances the frame counter and destroys free entries that have gone unused
    /// for more than the eviction threshold.
    pub fn gc(&self) {
        let evicted = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.current_frame += 1;
            let frame = state.current_frame;
            let threshold = self.config.eviction_threshold;

            let mut stale = RVec::new();
            for handles in state.free.values_mut() {
                handles.retain(|handle| {
                    let entry = &state.entries[*handle];
                    if frame - entry.last_accessed > threshold {
                        stale.push(*handle);
                        false
                    } else {
                        true
                    }
                });
            }
            state.free.retain(|_, handles| !handles.is_empty());

            stale
                .into_iter()
                .filter_map(|handle| state.entries.remove(handle))
                .collect::<RVec<_>>()
        };

        if !evicted.is_empty() {
            log::debug!("Evicting {} stale pool entries", evicted.len());
            self.destroy_entries(evicted);
        }
    }

    /// Destroys every free entry immediately. Intended for teardown, not per frame.
    pub fn reset(&self) {
        let destroyed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.used.is_empty() {
                log::warn!(
                    "Resetting pool with {} entries still in use",
                    state.used.len()
                );
            }
            let handles = std::mem::take(&mut state.free);
            handles
                .into_values()
                .flatten()
                .filter_map(|handle| state.entries.remove(handle))
                .collect::<RVec<_>>()
        };
        self.destroy_entries(destroyed);
    }

    fn destroy_entries(&self, entries: RVec<PoolEntry<B::Buffer>>) {
        for entry in entries {
            self.total_resource_size_in_bytes
                .fetch_sub(entry.capacity, Ordering::Relaxed);
            self.backend.destroy(&entry.buffer);
        }
    }

    pub fn buffer(&self, handle: PoolEntryHandle) -> Result<Arc<B::Buffer>, PoolError> {
        let state = self.state.lock();
        to_pool_error(state.entries.get(handle), handle).map(|entry| Arc::clone(&entry.buffer))
    }

    pub fn capacity(&self, handle: PoolEntryHandle) -> Result<u64, PoolError> {
        let state = self.state.lock();
        to_pool_error(state.entries.get(handle), handle).map(|entry| entry.capacity)
    }

    pub fn entry_info(&self, handle: PoolEntryHandle) -> Result<EntryInfo, PoolError> {
        let state = self.state.lock();
        let entry = to_pool_error(state.entries.get(handle), handle)?;
        Ok(EntryInfo {
            capacity: entry.capacity,
            last_accessed: entry.last_accessed,
            reference_count: entry.reference_count,
            in_use: state.used.contains(&handle),
        })
    }

    pub fn contains(&self, handle: PoolEntryHandle) -> bool {
        self.state.lock().entries.contains_key(handle)
    }

    pub fn current_frame(&self) -> u64 {
        self.state.lock().current_frame
    }

    pub fn num_resources(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn num_free(&self) -> usize {
        self.state.lock().num_free()
    }

    pub fn num_used(&self) -> usize {
        self.state.lock().used.len()
    }

    pub fn total_gpu_size_in_bytes(&self) -> u64 {
        self.total_resource_size_in_bytes.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            current_frame: state.current_frame,
            num_free: state.num_free(),
            num_used: state.used.len(),
            total_gpu_size_in_bytes: self.total_gpu_size_in_bytes(),
        }
    }
}

impl<B: BufferBackend> Drop for ResourcePool<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for handle in state.used.iter() {
            if let Some(entry) = state.entries.get(*handle) {
                log::warn!(
                    "Leaked pool entry {:?} ({} bytes, {} references)",
                    handle,
                    entry.capacity,
                    entry.reference_count
                );
            }
        }
        state.free.clear();
        state.used.clear();
        for (_, entry) in state.entries.drain() {
            self.backend.destroy(&entry.buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use test_strategy::proptest;

    use super::{PoolError, PoolEntryHandle, ResourcePool};
    use crate::{HostBackend, PoolConfig};

    type Pool = ResourcePool<HostBackend>;

    fn pool() -> Pool {
        let _ = env_logger::builder().is_test(true).try_init();
        ResourcePool::with_config(HostBackend::new(), PoolConfig::default())
    }

    #[test]
    fn new_entries_are_exact_and_used() {
        let pool = pool();
        let alloc = pool.acquire(100);
        assert_eq!(alloc.capacity, 100);
        let info = pool.entry_info(alloc.handle).unwrap();
        assert_eq!(info.reference_count, 1);
        assert!(info.in_use);
        assert_eq!(info.last_accessed, 0);
        assert_eq!(pool.num_used(), 1);
        assert_eq!(pool.num_free(), 0);
        assert_eq!(pool.total_gpu_size_in_bytes(), 100);
    }

    #[test]
    fn reuse_is_best_fit() {
        let pool = pool();
        let small = pool.acquire(64);
        let medium = pool.acquire(128);
        let large = pool.acquire(512);
        for a in [&small, &medium, &large] {
            pool.release(a.handle).unwrap();
        }
        assert_eq!(pool.num_free(), 3);

        let got = pool.acquire(100);
        assert_eq!(got.handle, medium.handle);
        assert_eq!(got.capacity, 128);
        assert_eq!(pool.backend().allocations(), 3);

        let got = pool.acquire(64);
        assert_eq!(got.handle, small.handle);

        // Nothing free is large enough.
        let fresh = pool.acquire(1024);
        assert_eq!(fresh.capacity, 1024);
        assert_eq!(pool.backend().allocations(), 4);
    }

    #[test]
    fn equal_capacities_share_a_bucket() {
        let pool = pool();
        let a = pool.acquire(32);
        let b = pool.acquire(32);
        pool.release(a.handle).unwrap();
        pool.release(b.handle).unwrap();
        assert_eq!(pool.num_free(), 2);

        let x = pool.acquire(32);
        let y = pool.acquire(32);
        assert_ne!(x.handle, y.handle);
        assert_eq!(pool.backend().allocations(), 2);
        assert_eq!(pool.num_free(), 0);
    }

    #[test]
    fn retain_requires_release_per_reference() {
        let pool = pool();
        let alloc = pool.acquire(16);
        pool.retain(alloc.handle).unwrap();
        pool.retain(alloc.handle).unwrap();
        assert_eq!(pool.entry_info(alloc.handle).unwrap().reference_count, 3);

        pool.release(alloc.handle).unwrap();
        pool.release(alloc.handle).unwrap();
        assert!(pool.entry_info(alloc.handle).unwrap().in_use);
        pool.release(alloc.handle).unwrap();

        let info = pool.entry_info(alloc.handle).unwrap();
        assert_eq!(info.reference_count, 0);
        assert!(!info.in_use);
        assert_eq!(pool.num_free(), 1);
    }

    #[test]
    fn double_release_is_rejected() {
        let pool = pool();
        let alloc = pool.acquire(16);
        pool.release(alloc.handle).unwrap();
        assert_eq!(
            pool.release(alloc.handle),
            Err(PoolError::NotInUse(alloc.handle))
        );
        assert_eq!(
            pool.retain(alloc.handle),
            Err(PoolError::NotInUse(alloc.handle))
        );
        assert_eq!(pool.num_free(), 1);
    }

    #[test]
    fn bad_handles() {
        let pool = pool();
        assert_eq!(
            pool.release(PoolEntryHandle::default()),
            Err(PoolError::NullHandle)
        );

        let config = PoolConfig::default().with_eviction_threshold(0);
        let pool = ResourcePool::with_config(HostBackend::new(), config);
        let alloc = pool.acquire(8);
        pool.release(alloc.handle).unwrap();
        pool.gc();
        assert!(!pool.contains(alloc.handle));
        assert_eq!(
            pool.retain(alloc.handle),
            Err(PoolError::ResourceNotAvailable)
        );
        assert!(pool.buffer(alloc.handle).is_err());
    }

    #[test]
    fn eviction_is_boundary_exact() {
        let pool = pool();
        let alloc = pool.acquire(100);
        pool.release(alloc.handle).unwrap();
        for _ in 0..10 {
            pool.gc();
            assert!(pool.contains(alloc.handle));
        }
        pool.gc();
        assert!(!pool.contains(alloc.handle));
        assert_eq!(pool.backend().destructions(), 1);
        assert_eq!(pool.total_gpu_size_in_bytes(), 0);
    }

    #[test]
    fn used_entries_survive_gc() {
        let pool = pool();
        let alloc = pool.acquire(100);
        for _ in 0..50 {
            pool.gc();
        }
        assert!(pool.contains(alloc.handle));
        assert_eq!(pool.current_frame(), 50);

        // Released late, it ages from the release frame.
        pool.release(alloc.handle).unwrap();
        assert_eq!(pool.entry_info(alloc.handle).unwrap().last_accessed, 50);
        for _ in 0..10 {
            pool.gc();
        }
        assert!(pool.contains(alloc.handle));
        pool.gc();
        assert!(!pool.contains(alloc.handle));
    }

    #[test]
    fn reset_only_destroys_free_entries() {
        let pool = pool();
        let kept = pool.acquire(10);
        let dropped = pool.acquire(20);
        pool.release(dropped.handle).unwrap();
        pool.reset();
        assert!(pool.contains(kept.handle));
        assert!(!pool.contains(dropped.handle));
        assert_eq!(pool.num_resources(), 1);
        assert_eq!(pool.backend().destructions(), 1);
    }

    #[test]
    fn no_reuse_in_debug_mode() {
        let config = PoolConfig::default().with_reuse(false);
        let pool = ResourcePool::with_config(HostBackend::new(), config);
        let a = pool.acquire(64);
        pool.release(a.handle).unwrap();
        assert!(!pool.contains(a.handle));
        assert_eq!(pool.backend().destructions(), 1);

        let b = pool.acquire(64);
        assert_ne!(a.handle, b.handle);
        assert_eq!(pool.backend().allocations(), 2);
    }

    #[test]
    fn drop_destroys_everything() {
        let backend = HostBackend::new();
        let pool = ResourcePool::new(backend);
        let a = pool.acquire(4);
        let b = pool.acquire(4);
        pool.release(b.handle).unwrap();
        let buffer = Arc::clone(&a.buffer);
        drop(pool);
        assert!(buffer.is_empty());
    }

    #[test]
    fn stats_snapshot() {
        let pool = pool();
        let a = pool.acquire(10);
        let _b = pool.acquire(30);
        pool.release(a.handle).unwrap();
        pool.gc();
        let stats = pool.stats();
        assert_eq!(stats.current_frame, 1);
        assert_eq!(stats.num_free, 1);
        assert_eq!(stats.num_used, 1);
        assert_eq!(stats.total_gpu_size_in_bytes, 40);
    }

    #[proptest(cases = 64)]
    fn acquire_satisfies_request(
        #[strategy(1u64..1 << 20)] first: u64,
        #[strategy(1u64..1 << 20)] second: u64,
    ) {
        let pool = ResourcePool::new(HostBackend::new());
        let a = pool.acquire(first);
        assert!(a.capacity >= first);
        pool.release(a.handle).unwrap();
        let b = pool.acquire(second);
        assert!(b.capacity >= second);
        if second <= first {
            assert_eq!(a.handle, b.handle);
        } else {
            assert_ne!(a.handle, b.handle);
        }
    }

    #[proptest(cases = 32)]
    fn retains_balance_releases(#[strategy(0u32..16)] retains: u32) {
        let pool = ResourcePool::new(HostBackend::new());
        let alloc = pool.acquire(256);
        for _ in 0..retains {
            pool.retain(alloc.handle).unwrap();
        }
        for _ in 0..retains {
            pool.release(alloc.handle).unwrap();
            assert!(pool.entry_info(alloc.handle).unwrap().in_use);
        }
        pool.release(alloc.handle).unwrap();
        let info = pool.entry_info(alloc.handle).unwrap();
        assert_eq!(info.reference_count, 0);
        assert!(!info.in_use);
        assert!(pool.release(alloc.handle).is_err());
    }
}
