use std::{ops::Range, sync::Arc};

use crate::{
    Align, BufferBackend, BufferBinder, DrawBinding, PoolAllocation, PoolEntryHandle, PoolError,
    ResourcePool, RVec,
};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StreamingError {
    #[error("Buffer wraps an external resource, writes must go through its owner")]
    ExternallyWrapped,
    #[error("Write of {len} bytes at offset {offset} exceeds logical size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
    #[error("Buffer {0} has no GPU allocation to bind")]
    Unallocated(usize),
    #[error("Got {buffers} buffers but {offsets} offsets")]
    OffsetCountMismatch { buffers: usize, offsets: usize },
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Written once, or rarely, in full.
    Static,
    /// Rewritten in full every now and then.
    Dynamic,
    /// Many small writes per frame, e.g per-draw uniforms.
    Streaming,
}

/// # StreamingBuffer
///
/// A logical buffer of fixed size whose GPU storage comes from a [`ResourcePool`],
/// or from an externally owned buffer.
///
/// Streaming buffers pack successive writes into one larger allocation, so each write
/// lands at a fresh offset and never overwrites bytes an earlier draw may still read.
/// Static and dynamic buffers swap in a fresh allocation on every write.
///
/// Owned by the render thread; it is not synchronized.
pub struct StreamingBuffer<B: BufferBackend> {
    pool: Arc<ResourcePool<B>>,
    size: u64,
    usage: BufferUsage,
    external: Option<Arc<B::Buffer>>,
    current: Option<PoolAllocation<B::Buffer>>,
    /// Host copy of everything written into `current`.
    shadow: Vec<u8>,
    start: u64,
    end: u64,
}

impl<B: BufferBackend> std::fmt::Debug for StreamingBuffer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingBuffer")
            .field("size", &self.size)
            .field("usage", &self.usage)
            .field("external", &self.external.is_some())
            .field("entry", &self.current.as_ref().map(|a| a.handle))
            .field("range", &self.range())
            .finish()
    }
}

impl<B: BufferBackend> StreamingBuffer<B> {
    pub fn new(pool: Arc<ResourcePool<B>>, size: u64, usage: BufferUsage) -> Self {
        Self {
            pool,
            size,
            usage,
            external: None,
            current: None,
            shadow: Vec::new(),
            start: 0,
            end: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }

    pub fn allocation(&self) -> Option<&PoolAllocation<B::Buffer>> {
        self.current.as_ref()
    }

    /// Byte range of the most recent write within the held allocation.
    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    /// Binds an externally owned buffer, giving back any pool allocation held.
    pub fn wrap_external(&mut self, buffer: Arc<B::Buffer>) -> Result<(), StreamingError> {
        self.release_current()?;
        self.external = Some(buffer);
        Ok(())
    }

    /// Drops the external buffer, returning whether one was held.
    pub fn unwrap_external(&mut self) -> bool {
        self.external.take().is_some()
    }

    pub fn write(&mut self, data: &[u8], byte_offset: u64) -> Result<(), StreamingError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.external.is_some() {
            return Err(StreamingError::ExternallyWrapped);
        }
        let len = data.len() as u64;
        if byte_offset
            .checked_add(len)
            .map_or(true, |end| end > self.size)
        {
            return Err(StreamingError::OutOfBounds {
                offset: byte_offset,
                len,
                size: self.size,
            });
        }

        match self.usage {
            BufferUsage::Streaming => self.write_streaming(data, byte_offset),
            BufferUsage::Static | BufferUsage::Dynamic => self.write_whole(data, byte_offset),
        }
    }

    fn write_streaming(&mut self, data: &[u8], byte_offset: u64) -> Result<(), StreamingError> {
        let len = data.len() as u64;
        if let Some(current) = self.current.as_ref().filter(|_| byte_offset == 0) {
            let base = self.end.align_to(self.pool.backend().offset_alignment());
            if base + len <= current.capacity {
                self.shadow[base as usize..(base + len) as usize].copy_from_slice(data);
                self.pool.backend().write(&current.buffer, base, data);
                self.start = base;
                self.end = base + len;
                return Ok(());
            }
        }

        let end = byte_offset + len;
        let wanted = self
            .size
            .saturating_mul(self.pool.config().stream_growth_factor)
            .max(end);
        let allocation = self.pool.acquire(wanted);
        let mut shadow = vec![0u8; allocation.capacity as usize];
        shadow[byte_offset as usize..end as usize].copy_from_slice(data);
        self.pool.backend().write(&allocation.buffer, 0, &shadow[..end as usize]);
        self.replace_current(allocation, shadow, end)
    }

    fn write_whole(&mut self, data: &[u8], byte_offset: u64) -> Result<(), StreamingError> {
        let size = self.size as usize;
        let allocation = self.pool.acquire(self.size);
        let mut shadow = vec![0u8; allocation.capacity as usize];
        if self.current.is_some() {
            let carried = self.shadow.len().min(size);
            shadow[..carried].copy_from_slice(&self.shadow[..carried]);
        }
        let offset = byte_offset as usize;
        shadow[offset..offset + data.len()].copy_from_slice(data);
        self.pool.backend().write(&allocation.buffer, 0, &shadow[..size]);
        self.replace_current(allocation, shadow, self.size)
    }

    /// The replacement is acquired before the old allocation is released,
    /// so the two never alias.
    fn replace_current(
        &mut self,
        allocation: PoolAllocation<B::Buffer>,
        shadow: Vec<u8>,
        end: u64,
    ) -> Result<(), StreamingError> {
        let previous = self.current.replace(allocation);
        self.shadow = shadow;
        self.start = 0;
        self.end = end;
        if let Some(previous) = previous {
            self.pool.release(previous.handle)?;
        }
        Ok(())
    }

    fn release_current(&mut self) -> Result<(), PoolError> {
        self.start = 0;
        self.end = 0;
        self.shadow = Vec::new();
        match self.current.take() {
            Some(allocation) => self.pool.release(allocation.handle),
            None => Ok(()),
        }
    }

    /// The buffer and offset a draw should bind, or `None` if nothing was written yet,
    /// in which case the caller must skip binding.
    pub fn get_for_draw(&self) -> Option<DrawBinding<B::Buffer>> {
        if let Some(external) = &self.external {
            return Some(DrawBinding {
                buffer: Arc::clone(external),
                offset: 0,
            });
        }
        self.current.as_ref().map(|allocation| DrawBinding {
            buffer: Arc::clone(&allocation.buffer),
            offset: self.start,
        })
    }

    /// Host view of the held allocation.
    pub fn get_cpu_shadow(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|_| self.shadow.as_slice())
    }

    /// Takes an extra reference on the held allocation for GPU work about to be submitted.
    ///
    /// The returned handle must be released once that work completes, typically from the
    /// driver's completion callback.
    pub fn retain_for_submission(&self) -> Result<Option<PoolEntryHandle>, StreamingError> {
        match &self.current {
            Some(allocation) => {
                self.pool.retain(allocation.handle)?;
                Ok(Some(allocation.handle))
            }
            None => Ok(None),
        }
    }

    /// Binds `buffers` to consecutive slots starting at `first_slot` in a single encoder call.
    /// `offsets[i]` is added to the base offset of `buffers[i]`.
    pub fn bind_many<E>(
        encoder: &mut E,
        first_slot: u32,
        buffers: &[&StreamingBuffer<B>],
        offsets: &[u64],
        stages: wgpu::ShaderStages,
    ) -> Result<(), StreamingError>
    where
        E: BufferBinder<B::Buffer> + ?Sized,
    {
        if buffers.len() != offsets.len() {
            return Err(StreamingError::OffsetCountMismatch {
                buffers: buffers.len(),
                offsets: offsets.len(),
            });
        }
        let bindings = buffers
            .iter()
            .zip(offsets)
            .enumerate()
            .map(|(index, (buffer, offset))| {
                let mut binding = buffer
                    .get_for_draw()
                    .ok_or(StreamingError::Unallocated(index))?;
                binding.offset += offset;
                Ok(binding)
            })
            .collect::<Result<RVec<_>, StreamingError>>()?;
        encoder.bind_buffers(stages, first_slot, &bindings);
        Ok(())
    }
}

impl<B: BufferBackend> Drop for StreamingBuffer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.release_current() {
            log::error!("Failed to release streaming buffer allocation: {}", e);
        }
    }
}
