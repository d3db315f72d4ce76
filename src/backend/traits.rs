//! The backend interface and the opaque handles it hands out

use crate::backend::types::*;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend initialization failed: {0}")]
    Init(String),
    #[error("surface error: {0}")]
    Surface(String),
    #[error("surface lost")]
    SurfaceLost,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },
    #[error("texture format {0:?} is not supported")]
    UnsupportedFormat(TextureFormat),
    #[error("readback failed: {0}")]
    Readback(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! handles {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub(crate) u64);
        )*
    };
}

handles!(
    BufferHandle,
    TextureHandle,
    /// A view over a whole texture, the unit attachments and bindings refer to
    TextureViewHandle,
    SamplerHandle,
    RenderPipelineHandle,
    BindGroupHandle,
    BindGroupLayoutHandle,
);

/// A resource bound at one binding slot
#[derive(Debug, Clone, PartialEq)]
pub enum BindGroupEntry {
    /// `size: None` binds to the end of the buffer
    Buffer { buffer: BufferHandle, offset: u64, size: Option<u64> },
    Texture(TextureViewHandle),
    Sampler(SamplerHandle),
}

/// Every binding is visible to both stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub ty: BindingType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    UniformBuffer,
    /// A 2D float texture
    Texture { filterable: bool },
    Sampler { filtering: bool },
}

/// A triangle-list pipeline without culling. Vertex and fragment stages come
/// from separate WGSL sources.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub vertex_shader: String,
    pub vertex_entry: String,
    pub fragment_shader: String,
    pub fragment_entry: String,
    /// One buffer per slot
    pub vertex_layouts: Vec<VertexBufferLayout>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<ColorTargetState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

/// Attachments are always stored at the end of a pass
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub load_op: LoadOp,
}

#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: TextureViewHandle,
    pub depth_load_op: LoadOp,
    pub depth_clear_value: f32,
}

#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

/// The swapchain image acquired by [`GraphicsBackend::begin_frame`]
pub struct FrameContext {
    pub swapchain_view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

/// A GPU the renderer can draw with.
///
/// Construction is backend specific (`WgpuBackend::new` needs a window,
/// `HeadlessBackend::new` does not), so it is not part of the trait.
/// Commands between `begin_render_pass` and `end_render_pass` may be buffered;
/// `flush` and `end_frame` submit them.
pub trait GraphicsBackend {
    // Surface and frames

    fn resize(&mut self, width: u32, height: u32);
    /// Current surface size, possibly clamped by device limits
    fn surface_size(&self) -> (u32, u32);
    fn begin_frame(&mut self) -> BackendResult<FrameContext>;
    /// Submit and present
    fn end_frame(&mut self) -> BackendResult<()>;
    fn swapchain_format(&self) -> TextureFormat;
    fn supports_format(&self, format: TextureFormat) -> bool;

    // Resources

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;
    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle>;
    /// Upload tightly packed texels covering the whole texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32);
    /// Full contents of a texture, tightly packed row by row
    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>>;
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;
    fn create_bind_group_layout(&mut self, entries: &[BindGroupLayoutEntry]) -> BackendResult<BindGroupLayoutHandle>;
    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;
    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> BackendResult<RenderPipelineHandle>;

    // Commands

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);
    fn end_render_pass(&mut self);
    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);
    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);
    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);
    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32);
    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);
    /// Submit work recorded outside of a frame
    fn flush(&mut self);
    /// Drain errors reported since the last call
    fn take_errors(&mut self) -> Vec<GpuError>;

    // Destruction. Unknown handles are ignored.

    fn destroy_buffer(&mut self, buffer: BufferHandle);
    fn destroy_texture(&mut self, texture: TextureHandle);
    fn destroy_texture_view(&mut self, view: TextureViewHandle);
    fn destroy_sampler(&mut self, sampler: SamplerHandle);
    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle);
    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle);
    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle);
}
