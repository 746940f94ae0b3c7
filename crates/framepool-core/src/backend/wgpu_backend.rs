use std::sync::Arc;

use crate::{Align, Padding, PoolEntryHandle, ResourcePool, RVec};

use super::BufferBackend;

pub const MIN_BUFFER_SIZE: u64 = 16;

/// Usages we use everywhere
pub trait BufferUsagesExt {
    fn streaming() -> Self;
}

impl BufferUsagesExt for wgpu::BufferUsages {
    fn streaming() -> Self {
        Self::VERTEX | Self::INDEX | Self::UNIFORM | Self::COPY_DST
    }
}

/// # WgpuBackend
///
/// Allocates pooled buffers from a wgpu device and uploads through its queue.
/// Every buffer a pool creates shares the same usage flags.
#[derive(Clone)]
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    usage: wgpu::BufferUsages,
    label: Option<&'static str>,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("usage", &self.usage)
            .field("label", &self.label)
            .finish()
    }
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            usage: wgpu::BufferUsages::streaming(),
            label: None,
        }
    }

    pub fn with_usage(mut self, usage: wgpu::BufferUsages) -> Self {
        self.usage = usage | wgpu::BufferUsages::COPY_DST;
        self
    }

    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl BufferBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;

    fn allocate(&self, capacity: u64) -> wgpu::Buffer {
        // Sizes are padded so that tail uploads can always be rounded to COPY_BUFFER_ALIGNMENT.
        let size = capacity.max(MIN_BUFFER_SIZE).align_for_copy();
        log::debug!("Creating buffer of {} bytes (requested {})", size, capacity);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: self.label,
            size,
            usage: self.usage,
            mapped_at_creation: false,
        })
    }

    fn destroy(&self, buffer: &wgpu::Buffer) {
        buffer.destroy();
    }

    fn write(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        debug_assert_eq!(offset % u64::COPY_BUFFER_ALIGNMENT, 0);
        if (data.len() as u64) % u64::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.pad_to_copy();
            self.queue.write_buffer(buffer, offset, &padded);
        }
    }

    fn offset_alignment(&self) -> u64 {
        (self.device.limits().min_uniform_buffer_offset_alignment as u64)
            .max(u64::COPY_BUFFER_ALIGNMENT)
    }
}

impl ResourcePool<WgpuBackend> {
    /// Hands `handles` over to the driver: they are released from the thread that runs
    /// wgpu's completion callback, once all work submitted to the queue so far is done.
    ///
    /// Each handle must carry a reference taken for this purpose,
    /// e.g via [`crate::StreamingBuffer::retain_for_submission`].
    pub fn release_on_submitted_work_done(self: &Arc<Self>, handles: RVec<PoolEntryHandle>) {
        if handles.is_empty() {
            return;
        }
        let pool = Arc::clone(self);
        self.backend().queue().on_submitted_work_done(move || {
            for handle in handles {
                if let Err(e) = pool.release(handle) {
                    log::error!("Failed to release {:?} after submission: {}", handle, e);
                }
            }
        });
    }
}
