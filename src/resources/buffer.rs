//! Vertex buffers

use crate::backend::*;
use crate::context::{ReleaseQueue, Released, RenderContext};

/// A GPU vertex buffer written in blocks
pub struct VertexBuffer {
    handle: Option<BufferHandle>,
    size: u64,
    release: ReleaseQueue,
}

impl VertexBuffer {
    /// Allocate `size` zeroed bytes. A zero size allocates nothing.
    pub fn new<B: GraphicsBackend>(ctx: &mut RenderContext<B>, label: &str, size: u64) -> Self {
        let handle = if size == 0 {
            None
        } else {
            ctx.backend_mut()
                .create_buffer(&BufferDescriptor {
                    label: Some(label.to_string()),
                    size,
                    usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
                })
                .map_err(|e| log::warn!("vertex buffer {}: {}", label, e))
                .ok()
        };

        Self {
            handle,
            size,
            release: ctx.release_queue(),
        }
    }

    /// Write `data` at `offset`
    pub fn write<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>, offset: u64, data: &[u8]) {
        let Some(handle) = self.handle else {
            return;
        };
        if offset + data.len() as u64 > self.size {
            log::warn!("vertex buffer write of {} bytes at {} exceeds {} bytes", data.len(), offset, self.size);
            return;
        }
        ctx.backend_mut().write_buffer(handle, offset, data);
    }

    pub fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.release.push(Released::Buffer(handle));
        }
    }
}
