use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::BufferBackend;

/// A buffer living in ordinary host memory.
#[derive(Debug)]
pub struct HostBuffer {
    id: u64,
    contents: Mutex<Vec<u8>>,
}

impl HostBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.contents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the buffer's current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.contents.lock().clone()
    }
}

/// Backend that allocates plain host memory.
///
/// Used for headless runs and for exercising the pool without a GPU. Keeps counters of
/// every allocation, destruction and upload so callers can observe pool behaviour.
#[derive(Debug)]
pub struct HostBackend {
    alignment: u64,
    next_id: AtomicU64,
    allocations: AtomicU64,
    destructions: AtomicU64,
    writes: AtomicU64,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    pub fn new() -> Self {
        Self::with_alignment(1)
    }

    pub fn with_alignment(alignment: u64) -> Self {
        Self {
            alignment: alignment.max(1),
            next_id: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            destructions: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn destructions(&self) -> u64 {
        self.destructions.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Buffers allocated and not yet destroyed.
    pub fn live_buffers(&self) -> u64 {
        self.allocations() - self.destructions()
    }
}

impl BufferBackend for HostBackend {
    type Buffer = HostBuffer;

    fn allocate(&self, capacity: u64) -> HostBuffer {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        HostBuffer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            contents: Mutex::new(vec![0u8; capacity as usize]),
        }
    }

    fn destroy(&self, buffer: &HostBuffer) {
        self.destructions.fetch_add(1, Ordering::Relaxed);
        let mut contents = buffer.contents.lock();
        contents.clear();
        contents.shrink_to_fit();
    }

    fn write(&self, buffer: &HostBuffer, offset: u64, data: &[u8]) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut contents = buffer.contents.lock();
        let start = offset as usize;
        let end = start + data.len();
        assert!(
            end <= contents.len(),
            "write of {} bytes at offset {} overruns host buffer of {} bytes",
            data.len(),
            offset,
            contents.len()
        );
        contents[start..end].copy_from_slice(data);
    }

    fn offset_alignment(&self) -> u64 {
        self.alignment
    }
}
