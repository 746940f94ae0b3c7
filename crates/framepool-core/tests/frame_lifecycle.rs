#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Arc,
        },
        thread,
    };

    use bytemuck::{Pod, Zeroable};
    use framepool::{
        BufferUsage, HostBackend, PoolConfig, PoolEntryHandle, ResourcePool, StateCache,
        StateTracker, StreamingBuffer,
    };
    use test_strategy::proptest;

    fn pool() -> Arc<ResourcePool<HostBackend>> {
        let _ = env_logger::builder().is_test(true).try_init();
        Arc::new(ResourcePool::with_config(
            HostBackend::new(),
            PoolConfig::default(),
        ))
    }

    #[test]
    fn reuse_then_evict() {
        let pool = pool();
        let e1 = pool.acquire(100);
        assert_eq!(e1.capacity, 100);
        pool.release(e1.handle).unwrap();

        for _ in 0..9 {
            pool.gc();
        }
        let again = pool.acquire(80);
        assert_eq!(again.handle, e1.handle);
        assert_eq!(again.capacity, 100);
        pool.release(again.handle).unwrap();

        for _ in 0..10 {
            pool.gc();
        }
        assert!(pool.contains(e1.handle));
        pool.gc();
        assert!(!pool.contains(e1.handle));
        assert_eq!(pool.num_resources(), 0);
        assert_eq!(pool.backend().allocations(), 1);
        assert_eq!(pool.backend().destructions(), 1);
    }

    #[test]
    fn custom_threshold() {
        let pool = ResourcePool::with_config(
            HostBackend::new(),
            PoolConfig::default().with_eviction_threshold(2),
        );
        let e = pool.acquire(8);
        pool.release(e.handle).unwrap();
        pool.gc();
        pool.gc();
        assert!(pool.contains(e.handle));
        pool.gc();
        assert!(!pool.contains(e.handle));
    }

    #[test]
    fn completion_thread_releases() -> anyhow::Result<()> {
        let pool = pool();
        let mut buffer = StreamingBuffer::new(pool.clone(), 64, BufferUsage::Dynamic);
        let (tx, rx) = mpsc::channel::<PoolEntryHandle>();

        let completion = {
            let pool = pool.clone();
            thread::spawn(move || {
                let mut released = 0;
                for handle in rx {
                    pool.release(handle).unwrap();
                    released += 1;
                }
                released
            })
        };

        for frame in 0..32u8 {
            buffer.write(&[frame; 64], 0)?;
            if let Some(handle) = buffer.retain_for_submission()? {
                tx.send(handle)?;
            }
            pool.gc();
        }
        drop(tx);
        let released = completion.join().expect("completion thread panicked");
        assert_eq!(released, 32);

        drop(buffer);
        assert_eq!(pool.num_used(), 0);
        pool.reset();
        assert_eq!(pool.num_resources(), 0);
        assert_eq!(pool.total_gpu_size_in_bytes(), 0);
        assert_eq!(pool.backend().live_buffers(), 0);
        Ok(())
    }

    #[test]
    fn concurrent_acquire_release() {
        let pool = pool();
        let workers = (0..4)
            .map(|worker| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for i in 0..200u64 {
                        let alloc = pool.acquire(16 + (worker * 200 + i) % 64);
                        pool.retain(alloc.handle).unwrap();
                        pool.release(alloc.handle).unwrap();
                        pool.release(alloc.handle).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for w in workers {
            w.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.num_used, 0);
        assert_eq!(stats.num_free, pool.num_resources());
    }

    #[proptest(cases = 32)]
    fn packed_writes_never_overlap(
        #[strategy(1u64..64)] a: u64,
        #[strategy(1u64..64)] b: u64,
        #[strategy(1u64..64)] c: u64,
    ) {
        // 64 * 4 bytes of room fits any three writes below 64 bytes.
        let pool = pool();
        let mut buffer = StreamingBuffer::new(pool.clone(), 64, BufferUsage::Streaming);
        let mut ranges = Vec::new();
        for len in [a, b, c] {
            buffer.write(&vec![1u8; len as usize], 0).unwrap();
            ranges.push(buffer.range());
        }
        assert_eq!(pool.backend().allocations(), 1);
        for pair in ranges.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        let capacity = buffer.allocation().unwrap().capacity;
        assert!(ranges.last().unwrap().end <= capacity);

        let remaining = capacity - ranges.last().unwrap().end;
        if remaining < 64 {
            buffer.write(&[2u8; 64], 0).unwrap();
            assert_eq!(pool.backend().allocations(), 2);
        }
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    struct PipelineKey {
        program: u32,
        color_format: u32,
        blend: u32,
        cull: u32,
    }

    #[test]
    fn cached_state_is_bound_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let cache = {
            let created = created.clone();
            StateCache::new(move |key: &PipelineKey| {
                created.fetch_add(1, Ordering::Relaxed);
                Arc::new(*key)
            })
        };

        let draws = [
            PipelineKey {
                program: 1,
                color_format: 0,
                blend: 0,
                cull: 1,
            },
            PipelineKey {
                program: 1,
                color_format: 0,
                blend: 0,
                cull: 1,
            },
            PipelineKey {
                program: 2,
                color_format: 0,
                blend: 0,
                cull: 1,
            },
            PipelineKey {
                program: 1,
                color_format: 0,
                blend: 0,
                cull: 1,
            },
        ];

        let mut binds = 0;
        let mut tracker = StateTracker::<PipelineKey>::new();
        for frame in 0..3 {
            tracker.invalidate();
            for key in &draws {
                let handle = cache.get_or_create(key);
                let resources = cache.resources();
                let pipeline = resources.get(handle).unwrap();
                assert_eq!(pipeline.program, key.program);
                tracker.update(*key);
                if tracker.consume_dirty() {
                    binds += 1;
                }
            }
            assert_eq!(binds, 3 * (frame + 1));
        }
        assert_eq!(created.load(Ordering::Relaxed), 2);
        assert_eq!(cache.num_resources(), 2);

        let first = cache.get_or_create(&draws[0]);
        let again = cache.get_or_create(&draws[3]);
        let resources = cache.resources();
        assert!(Arc::ptr_eq(
            resources.get(first).unwrap(),
            resources.get(again).unwrap()
        ));
    }
}
