mod host;
mod wgpu_backend;

pub use host::*;
pub use wgpu_backend::*;

/// The narrow slice of a graphics API the pool needs.
///
/// Allocation is assumed to be synchronous, and failure is fatal: there is no fallback
/// policy above this layer.
pub trait BufferBackend: Send + Sync {
    type Buffer: Send + Sync + 'static;

    /// Create a buffer of at least `capacity` bytes.
    fn allocate(&self, capacity: u64) -> Self::Buffer;

    /// Release the GPU memory behind `buffer`.
    /// The pool guarantees this is called at most once per buffer, and never while in use.
    fn destroy(&self, buffer: &Self::Buffer);

    /// Upload `data` into `buffer` starting at `offset`.
    fn write(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Base offsets of packed streaming writes are rounded up to this.
    fn offset_alignment(&self) -> u64 {
        1
    }
}
