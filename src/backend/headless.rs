//! Headless backend for tests and offline runs.
//!
//! This backend doesn't touch a GPU. It records every command it is given,
//! keeps texture contents in memory so uploads and readbacks work, and emulates
//! render pass clears. Shaders never execute, so draws only show up in the
//! command log.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

/// A command as it was handed to the backend
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginPass {
        label: Option<String>,
        color_attachments: Vec<TextureViewHandle>,
        depth_attachment: Option<TextureViewHandle>,
    },
    EndPass,
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetViewport { x: f32, y: f32, width: f32, height: f32 },
    Draw { vertices: Range<u32>, instances: Range<u32> },
}

struct StoredTexture {
    width: u32,
    height: u32,
    format: TextureFormat,
    data: Vec<u8>,
}

/// In-memory implementation of [`GraphicsBackend`]
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    unsupported: HashSet<TextureFormat>,

    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, StoredTexture>,
    texture_views: HashMap<u64, u64>,
    samplers: HashSet<u64>,
    bind_group_layouts: HashSet<u64>,
    bind_groups: HashSet<u64>,
    render_pipelines: HashMap<u64, RenderPipelineDescriptor>,
    next_id: u64,

    swapchain_texture: u64,
    swapchain_view: u64,

    in_pass: bool,
    pipeline_bound: bool,
    commands: Vec<RecordedCommand>,
    frames: u64,
    errors: Vec<GpuError>,
}

impl HeadlessBackend {
    /// Create a headless backend with a synthetic `width × height` swapchain
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut backend = Self {
            width,
            height,
            unsupported: HashSet::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            samplers: HashSet::new(),
            bind_group_layouts: HashSet::new(),
            bind_groups: HashSet::new(),
            render_pipelines: HashMap::new(),
            next_id: 1,
            swapchain_texture: 0,
            swapchain_view: 0,
            in_pass: false,
            pipeline_bound: false,
            commands: Vec::new(),
            frames: 0,
            errors: Vec::new(),
        };
        backend.allocate_swapchain();
        backend
    }

    /// Mark `format` as unsupported, mimicking a device that lacks it
    pub fn without_format(mut self, format: TextureFormat) -> Self {
        self.unsupported.insert(format);
        self
    }

    /// The same format restrictions the wgpu backend has
    pub fn with_wgpu_formats(self) -> Self {
        self.without_format(TextureFormat::Rgb8Unorm)
            .without_format(TextureFormat::Rgb32Float)
            .without_format(TextureFormat::Depth8Unorm)
    }

    /// Every command recorded so far
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Forget recorded commands, keeping resources
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Number of draw calls recorded so far
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Draw { .. }))
            .count()
    }

    /// Number of render passes begun so far
    pub fn pass_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::BeginPass { .. }))
            .count()
    }

    /// Frames presented through `end_frame`
    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    /// Descriptor a pipeline was created with
    pub fn pipeline_descriptor(&self, pipeline: RenderPipelineHandle) -> Option<&RenderPipelineDescriptor> {
        self.render_pipelines.get(&pipeline.0)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Live textures, not counting the synthetic swapchain image
    pub fn live_textures(&self) -> usize {
        self.textures.len() - 1
    }

    pub fn live_pipelines(&self) -> usize {
        self.render_pipelines.len()
    }

    /// Contents of a buffer
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    fn allocate_swapchain(&mut self) {
        let id = self.alloc_id();
        self.textures.insert(
            id,
            StoredTexture {
                width: self.width,
                height: self.height,
                format: TextureFormat::Rgba8Unorm,
                data: vec![0; (self.width * self.height * 4) as usize],
            },
        );
        let view = self.alloc_id();
        self.texture_views.insert(view, id);
        self.swapchain_texture = id;
        self.swapchain_view = view;
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn report(&mut self, kind: GpuErrorKind, message: impl Into<String>) {
        let error = GpuError::new(kind, message);
        log::trace!("HeadlessBackend: {}: {}", error.kind, error.message);
        self.errors.push(error);
    }

    fn clear_view(&mut self, view: TextureViewHandle, color: [f32; 4]) {
        let Some(texture_id) = self.texture_views.get(&view.0).copied() else {
            self.report(GpuErrorKind::InvalidValue, format!("unknown attachment view {}", view.0));
            return;
        };
        if let Some(texture) = self.textures.get_mut(&texture_id) {
            fill_texture(texture, color);
        }
    }
}

fn fill_texture(texture: &mut StoredTexture, color: [f32; 4]) {
    let texel: Vec<u8> = match texture.format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => {
            color.iter().map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8).collect()
        }
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => [color[2], color[1], color[0], color[3]]
            .iter()
            .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect(),
        TextureFormat::Rgba32Float => bytemuck::cast_slice(color.as_slice()).to_vec(),
        TextureFormat::Depth32Float => bytemuck::bytes_of(&color[0]).to_vec(),
        // Half floats and three-channel formats are only cleared to zero
        _ => vec![0; texture.format.bytes_per_pixel() as usize],
    };
    for chunk in texture.data.chunks_mut(texel.len()) {
        chunk.copy_from_slice(&texel[..chunk.len()]);
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            log::trace!("HeadlessBackend: resize to {}x{}", width, height);
            self.width = width;
            self.height = height;
            self.textures.remove(&self.swapchain_texture);
            self.texture_views.remove(&self.swapchain_view);
            self.allocate_swapchain();
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        Ok(FrameContext {
            swapchain_view: TextureViewHandle(self.swapchain_view),
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.flush();
        self.frames += 1;
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::Rgba8Unorm
    }

    fn supports_format(&self, format: TextureFormat) -> bool {
        !self.unsupported.contains(&format)
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("HeadlessBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        let id = self.alloc_id();
        self.buffers.insert(id, vec![0; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(contents) = self.buffers.get_mut(&buffer.0) else {
            self.report(GpuErrorKind::InvalidValue, format!("write to unknown buffer {}", buffer.0));
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            self.report(
                GpuErrorKind::InvalidValue,
                format!("write of {} bytes at {} overflows buffer {}", data.len(), offset, buffer.0),
            );
            return;
        }
        contents[start..end].copy_from_slice(data);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if self.unsupported.contains(&desc.format) {
            self.report(GpuErrorKind::InvalidEnum, format!("texture format {:?} is not supported", desc.format));
            return Err(BackendError::UnsupportedFormat(desc.format));
        }
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        let id = self.alloc_id();
        let size = (desc.width * desc.height * desc.format.bytes_per_pixel()) as usize;
        self.textures.insert(
            id,
            StoredTexture {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                data: vec![0; size],
            },
        );
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::UnknownHandle {
                kind: "texture",
                id: texture.0,
            });
        }
        let id = self.alloc_id();
        self.texture_views.insert(id, texture.0);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        let Some(stored) = self.textures.get_mut(&texture.0) else {
            self.report(GpuErrorKind::InvalidValue, format!("write to unknown texture {}", texture.0));
            return;
        };
        let expected = (width * height * stored.format.bytes_per_pixel()) as usize;
        if width != stored.width || height != stored.height || data.len() < expected {
            self.report(
                GpuErrorKind::InvalidValue,
                format!("texture upload of {}x{} does not match texture {}", width, height, texture.0),
            );
            return;
        }
        stored.data.copy_from_slice(&data[..expected]);
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        self.textures
            .get(&texture.0)
            .map(|t| t.data.clone())
            .ok_or(BackendError::UnknownHandle {
                kind: "texture",
                id: texture.0,
            })
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("HeadlessBackend: creating sampler {:?}", desc.label);
        let id = self.alloc_id();
        self.samplers.insert(id);
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(&mut self, entries: &[BindGroupLayoutEntry]) -> BackendResult<BindGroupLayoutHandle> {
        log::trace!("HeadlessBackend: creating bind group layout with {} entries", entries.len());
        let id = self.alloc_id();
        self.bind_group_layouts.insert(id);
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        if !self.bind_group_layouts.contains(&layout.0) {
            return Err(BackendError::UnknownHandle {
                kind: "bind group layout",
                id: layout.0,
            });
        }
        for (binding, entry) in entries {
            let known = match entry {
                BindGroupEntry::Buffer { buffer, .. } => self.buffers.contains_key(&buffer.0),
                BindGroupEntry::Texture(view) => self.texture_views.contains_key(&view.0),
                BindGroupEntry::Sampler(sampler) => self.samplers.contains(&sampler.0),
            };
            if !known {
                self.report(GpuErrorKind::InvalidValue, format!("binding {} refers to an unknown resource", binding));
            }
        }
        let id = self.alloc_id();
        self.bind_groups.insert(id);
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> BackendResult<RenderPipelineHandle> {
        for target in &desc.color_targets {
            if self.unsupported.contains(&target.format) {
                return Err(BackendError::UnsupportedFormat(target.format));
            }
        }
        log::trace!("HeadlessBackend: creating render pipeline {:?}", desc.label);
        let id = self.alloc_id();
        self.render_pipelines.insert(id, desc.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if self.in_pass {
            self.report(GpuErrorKind::InvalidOperation, "render pass begun while another is open");
        }
        for attachment in &desc.color_attachments {
            if let LoadOp::Clear(color) = attachment.load_op {
                self.clear_view(attachment.view, color);
            }
        }
        if let Some(depth) = &desc.depth_stencil_attachment {
            if let LoadOp::Clear(_) = depth.depth_load_op {
                self.clear_view(depth.view, [depth.depth_clear_value; 4]);
            }
        }
        self.in_pass = true;
        self.pipeline_bound = false;
        self.commands.push(RecordedCommand::BeginPass {
            label: desc.label.clone(),
            color_attachments: desc.color_attachments.iter().map(|a| a.view).collect(),
            depth_attachment: desc.depth_stencil_attachment.as_ref().map(|d| d.view),
        });
    }

    fn end_render_pass(&mut self) {
        if !self.in_pass {
            self.report(GpuErrorKind::InvalidOperation, "end_render_pass without an open pass");
            return;
        }
        self.in_pass = false;
        self.commands.push(RecordedCommand::EndPass);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if !self.render_pipelines.contains_key(&pipeline.0) {
            self.report(GpuErrorKind::InvalidValue, format!("unknown pipeline {}", pipeline.0));
            return;
        }
        self.pipeline_bound = true;
        self.commands.push(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if !self.in_pass {
            self.report(GpuErrorKind::InvalidOperation, "set_bind_group outside of a render pass");
            return;
        }
        if !self.bind_groups.contains(&bind_group.0) {
            self.report(GpuErrorKind::InvalidValue, format!("unknown bind group {}", bind_group.0));
            return;
        }
        self.commands.push(RecordedCommand::SetBindGroup { index, bind_group });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        if !self.buffers.contains_key(&buffer.0) {
            self.report(GpuErrorKind::InvalidValue, format!("unknown vertex buffer {}", buffer.0));
            return;
        }
        self.commands.push(RecordedCommand::SetVertexBuffer { slot, buffer, offset });
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        self.commands.push(RecordedCommand::SetViewport { x, y, width, height });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        if !self.in_pass {
            self.report(GpuErrorKind::InvalidFramebufferOperation, "draw issued outside of a render pass");
            return;
        }
        if !self.pipeline_bound {
            self.report(GpuErrorKind::InvalidOperation, "draw issued without a pipeline");
            return;
        }
        log::trace!("HeadlessBackend: draw {:?} x {:?}", vertices, instances);
        self.commands.push(RecordedCommand::Draw { vertices, instances });
    }

    fn flush(&mut self) {
        if self.in_pass {
            self.report(GpuErrorKind::InvalidOperation, "flush while a render pass is open");
        }
    }

    fn take_errors(&mut self) -> Vec<GpuError> {
        std::mem::take(&mut self.errors)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.bind_group_layouts.remove(&layout.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(&pipeline.0);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_target(backend: &mut HeadlessBackend, format: TextureFormat) -> (TextureHandle, TextureViewHandle) {
        let texture = backend
            .create_texture(&TextureDescriptor {
                width: 2,
                height: 2,
                format,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
                ..Default::default()
            })
            .unwrap();
        let view = backend.create_texture_view(texture).unwrap();
        (texture, view)
    }

    #[test]
    fn test_clear_writes_texels() {
        let mut backend = HeadlessBackend::new(4, 4);
        let (texture, view) = color_target(&mut backend, TextureFormat::Rgba8Unorm);

        backend.begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachments: vec![ColorAttachment {
                view,
                load_op: LoadOp::Clear([1.0, 0.0, 0.0, 1.0]),
            }],
            depth_stencil_attachment: None,
        });
        backend.end_render_pass();

        let pixels = backend.read_texture(texture).unwrap();
        assert_eq!(pixels.len(), 16);
        assert_eq!(&pixels[..4], &[255, 0, 0, 255]);
        assert!(backend.take_errors().is_empty());
    }

    #[test]
    fn test_draw_outside_pass_is_reported() {
        let mut backend = HeadlessBackend::new(4, 4);
        backend.draw(0..3, 0..1);

        let errors = backend.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, GpuErrorKind::InvalidFramebufferOperation);
        assert_eq!(backend.draw_count(), 0);
    }

    #[test]
    fn test_unsupported_format_is_rejected() {
        let mut backend = HeadlessBackend::new(4, 4).with_wgpu_formats();
        assert!(!backend.supports_format(TextureFormat::Rgb8Unorm));

        let result = backend.create_texture(&TextureDescriptor {
            format: TextureFormat::Rgb8Unorm,
            ..Default::default()
        });
        assert!(matches!(result, Err(BackendError::UnsupportedFormat(TextureFormat::Rgb8Unorm))));
        assert_eq!(backend.take_errors()[0].kind, GpuErrorKind::InvalidEnum);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_write_buffer_bounds() {
        let mut backend = HeadlessBackend::new(1, 1);
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 8,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            })
            .unwrap();

        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(backend.buffer_contents(buffer).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);

        backend.write_buffer(buffer, 6, &[1, 2, 3, 4]);
        assert_eq!(backend.take_errors()[0].kind, GpuErrorKind::InvalidValue);
    }
}
