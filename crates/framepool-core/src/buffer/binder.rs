use std::sync::Arc;

/// A GPU buffer and the byte offset a draw should read it from.
#[derive(Debug)]
pub struct DrawBinding<Buf> {
    pub buffer: Arc<Buf>,
    pub offset: u64,
}

impl<Buf> Clone for DrawBinding<Buf> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
        }
    }
}

/// An open command encoder that can bind a run of buffers to consecutive slots.
pub trait BufferBinder<Buf> {
    fn bind_buffers(
        &mut self,
        stages: wgpu::ShaderStages,
        first_slot: u32,
        bindings: &[DrawBinding<Buf>],
    );
}

impl BufferBinder<wgpu::Buffer> for wgpu::RenderPass<'_> {
    fn bind_buffers(
        &mut self,
        stages: wgpu::ShaderStages,
        first_slot: u32,
        bindings: &[DrawBinding<wgpu::Buffer>],
    ) {
        // Other stages consume buffers through bind groups with dynamic offsets.
        if !stages.contains(wgpu::ShaderStages::VERTEX) {
            log::warn!(
                "Render passes bind raw buffers to the vertex stage only, got {:?}",
                stages
            );
            return;
        }
        for (slot, binding) in (first_slot..).zip(bindings) {
            self.set_vertex_buffer(slot, binding.buffer.slice(binding.offset..));
        }
    }
}
