//! wgpu backend
//!
//! Resources live in per-kind maps keyed by the handle id. Pass commands are
//! buffered until `end_render_pass` and then encoded in one go, since a wgpu
//! render pass borrows everything it touches.

mod convert;

use crate::backend::traits::*;
use crate::backend::types::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

#[derive(Clone)]
enum PassCommand {
    Pipeline(RenderPipelineHandle),
    BindGroup(u32, BindGroupHandle),
    VertexBuffer(u32, BufferHandle, u64),
    Viewport([f32; 6]),
    Draw(Range<u32>, Range<u32>),
}

struct OpenPass {
    descriptor: RenderPassDescriptor,
    commands: Vec<PassCommand>,
}

/// A [`GraphicsBackend`] presenting to a winit window
pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    frame: Option<wgpu::SurfaceTexture>,
    /// View id standing in for the current swapchain image
    frame_view: u64,

    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, (wgpu::Texture, TextureFormat)>,
    views: HashMap<u64, wgpu::TextureView>,
    samplers: HashMap<u64, wgpu::Sampler>,
    layouts: HashMap<u64, wgpu::BindGroupLayout>,
    bind_groups: HashMap<u64, wgpu::BindGroup>,
    pipelines: HashMap<u64, wgpu::RenderPipeline>,
    next_id: u64,

    encoder: Option<wgpu::CommandEncoder>,
    pass: Option<OpenPass>,
    errors: Arc<Mutex<Vec<GpuError>>>,
}

impl WgpuBackend {
    /// Create a backend rendering into `window`
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|e| BackendError::Surface(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::Init("no suitable adapter".into()))?;
        let info = adapter.get_info();
        log::info!("using {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("scene renderer"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::Init(e.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .filter(|f| convert::texture_format_from_wgpu(*f).is_some())
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| BackendError::Surface("surface reports no formats".into()))?;

        let (width, height) = clamp_to_limit(size.width, size.height, device.limits().max_texture_dimension_2d);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        device.on_uncaptured_error(Box::new(move |error: wgpu::Error| {
            sink.lock().push(convert::gpu_error(&error));
        }));

        Ok(Self {
            surface,
            device,
            queue,
            config,
            frame: None,
            frame_view: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            pipelines: HashMap::new(),
            next_id: 1,
            encoder: None,
            pass: None,
            errors,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            })
        })
    }

    fn record(&mut self, command: PassCommand) {
        match self.pass.as_mut() {
            Some(pass) => pass.commands.push(command),
            None => self.errors.lock().push(GpuError::new(
                GpuErrorKind::InvalidFramebufferOperation,
                "command recorded outside of a render pass",
            )),
        }
    }

    fn create_module(&self, label: Option<&str>, source: &str) -> wgpu::ShaderModule {
        self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label,
            source: wgpu::ShaderSource::Wgsl(source.into()),
        })
    }

    /// Encode a finished pass into the frame encoder
    fn encode_pass(&mut self, pass: OpenPass) {
        let swapchain = self
            .frame
            .as_ref()
            .map(|frame| frame.texture.create_view(&wgpu::TextureViewDescriptor::default()));
        let frame_view = self.frame_view;
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            })
        });

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pass
            .descriptor
            .color_attachments
            .iter()
            .filter_map(|attachment| {
                let view = if attachment.view.0 == frame_view {
                    swapchain.as_ref()?
                } else {
                    self.views.get(&attachment.view.0)?
                };
                Some(Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: convert::color_ops(&attachment.load_op),
                }))
            })
            .collect();
        let depth_stencil_attachment = pass.descriptor.depth_stencil_attachment.as_ref().and_then(|depth| {
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: self.views.get(&depth.view.0)?,
                depth_ops: Some(convert::depth_ops(&depth.depth_load_op, depth.depth_clear_value)),
                stencil_ops: None,
            })
        });

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: pass.descriptor.label.as_deref(),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        for command in &pass.commands {
            match command {
                PassCommand::Pipeline(h) => {
                    if let Some(pipeline) = self.pipelines.get(&h.0) {
                        rpass.set_pipeline(pipeline);
                    }
                }
                PassCommand::BindGroup(index, h) => {
                    if let Some(group) = self.bind_groups.get(&h.0) {
                        rpass.set_bind_group(*index, group, &[]);
                    }
                }
                PassCommand::VertexBuffer(slot, h, offset) => {
                    if let Some(buffer) = self.buffers.get(&h.0) {
                        rpass.set_vertex_buffer(*slot, buffer.slice(*offset..));
                    }
                }
                PassCommand::Viewport([x, y, w, h, near, far]) => rpass.set_viewport(*x, *y, *w, *h, *near, *far),
                PassCommand::Draw(vertices, instances) => rpass.draw(vertices.clone(), instances.clone()),
            }
        }
    }
}

/// Scale `width × height` down uniformly until both fit in `max`
fn clamp_to_limit(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width.max(1), height.max(1));
    }
    let scale = (max as f32 / width as f32).min(max as f32 / height as f32);
    (
        ((width as f32 * scale) as u32).max(1),
        ((height as f32 * scale) as u32).max(1),
    )
}

impl GraphicsBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let (width, height) = clamp_to_limit(width, height, self.device.limits().max_texture_dimension_2d);
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let frame = self.surface.get_current_texture().map_err(convert::surface_error)?;
        // The swapchain view is created when a pass targets this id
        self.frame_view = self.alloc_id();
        self.frame = Some(frame);
        self.encoder();
        Ok(FrameContext {
            swapchain_view: TextureViewHandle(self.frame_view),
            width: self.config.width,
            height: self.config.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.flush();
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        convert::texture_format_from_wgpu(self.config.format).unwrap_or(TextureFormat::Rgba8Unorm)
    }

    fn supports_format(&self, format: TextureFormat) -> bool {
        convert::texture_format(format).is_some()
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: convert::buffer_usages(desc.usage),
            mapped_at_creation: false,
        });
        let id = self.alloc_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(target) = self.buffers.get(&buffer.0) {
            self.queue.write_buffer(target, offset, data);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let format = convert::texture_format(desc.format).ok_or(BackendError::UnsupportedFormat(desc.format))?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: extent(desc.width, desc.height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: convert::texture_usages(desc.usage),
            view_formats: &[],
        });
        let id = self.alloc_id();
        self.textures.insert(id, (texture, desc.format));
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        let (source, _) = self.textures.get(&texture.0).ok_or(BackendError::UnknownHandle {
            kind: "texture",
            id: texture.0,
        })?;
        let view = source.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.alloc_id();
        self.views.insert(id, view);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        let Some((target, format)) = self.textures.get(&texture.0) else {
            return;
        };
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * format.bytes_per_pixel()),
                rows_per_image: Some(height),
            },
            extent(width, height),
        );
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        let unknown = BackendError::UnknownHandle {
            kind: "texture",
            id: texture.0,
        };
        let (width, height, format) = match self.textures.get(&texture.0) {
            Some((source, format)) => (source.width(), source.height(), *format),
            None => return Err(unknown),
        };

        // Rows in the staging buffer are padded to the copy alignment
        let row_bytes = width * format.bytes_per_pixel();
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = row_bytes.div_ceil(align) * align;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            }),
        };
        let Some((source, _)) = self.textures.get(&texture.0) else {
            return Err(unknown);
        };
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: if format.is_depth() {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                },
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            extent(width, height),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let status = Arc::new(Mutex::new(None));
        let status_cb = Arc::clone(&status);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            *status_cb.lock() = Some(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        let status = status.lock().take();
        match status {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(BackendError::Readback(e.to_string())),
            None => return Err(BackendError::Readback("mapping did not complete".into())),
        }

        let pixels = {
            let mapped = slice.get_mapped_range();
            mapped
                .chunks(padded_row as usize)
                .flat_map(|row| &row[..row_bytes as usize])
                .copied()
                .collect()
        };
        staging.unmap();
        Ok(pixels)
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let mode = convert::address_mode(desc.address_mode);
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: mode,
            address_mode_v: mode,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let id = self.alloc_id();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(&mut self, entries: &[BindGroupLayoutEntry]) -> BackendResult<BindGroupLayoutHandle> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|entry| wgpu::BindGroupLayoutEntry {
                binding: entry.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: convert::binding_type(entry.ty),
                count: None,
            })
            .collect();
        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: None,
            entries: &entries,
        });
        let id = self.alloc_id();
        self.layouts.insert(id, layout);
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout = self.layouts.get(&layout.0).ok_or(BackendError::UnknownHandle {
            kind: "bind group layout",
            id: layout.0,
        })?;

        let mut resolved = Vec::with_capacity(entries.len());
        for (binding, entry) in entries {
            let resource = match entry {
                BindGroupEntry::Buffer { buffer, offset, size } => {
                    let Some(buffer) = self.buffers.get(&buffer.0) else { continue };
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset: *offset,
                        size: size.and_then(std::num::NonZeroU64::new),
                    })
                }
                BindGroupEntry::Texture(view) => match self.views.get(&view.0) {
                    Some(view) => wgpu::BindingResource::TextureView(view),
                    None => continue,
                },
                BindGroupEntry::Sampler(sampler) => match self.samplers.get(&sampler.0) {
                    Some(sampler) => wgpu::BindingResource::Sampler(sampler),
                    None => continue,
                },
            };
            resolved.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource,
            });
        }

        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout,
            entries: &resolved,
        });
        let id = self.alloc_id();
        self.bind_groups.insert(id, group);
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> BackendResult<RenderPipelineHandle> {
        let label = desc.label.as_deref();
        let vertex_module = self.create_module(label, &desc.vertex_shader);
        let fragment_module = self.create_module(label, &desc.fragment_shader);

        let group_layouts: Vec<&wgpu::BindGroupLayout> = desc
            .bind_group_layouts
            .iter()
            .filter_map(|h| self.layouts.get(&h.0))
            .collect();
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label,
            bind_group_layouts: &group_layouts,
            push_constant_ranges: &[],
        });

        let attributes: Vec<[wgpu::VertexAttribute; 1]> = desc
            .vertex_layouts
            .iter()
            .map(|stream| {
                [wgpu::VertexAttribute {
                    format: convert::vertex_format(stream.components),
                    offset: 0,
                    shader_location: stream.location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layouts
            .iter()
            .zip(&attributes)
            .map(|(stream, attribute)| wgpu::VertexBufferLayout {
                array_stride: stream.stride(),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attribute,
            })
            .collect();

        let targets = desc
            .color_targets
            .iter()
            .map(|target| {
                let format = convert::texture_format(target.format)
                    .ok_or(BackendError::UnsupportedFormat(target.format))?;
                Ok(Some(wgpu::ColorTargetState {
                    format,
                    blend: target.blend.as_ref().map(convert::blend_state),
                    write_mask: wgpu::ColorWrites::ALL,
                }))
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let depth_stencil = desc
            .depth_stencil
            .map(|ds| {
                let format = convert::texture_format(ds.format).ok_or(BackendError::UnsupportedFormat(ds.format))?;
                Ok(wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: ds.depth_write_enabled,
                    depth_compare: convert::compare_function(ds.depth_compare),
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                })
            })
            .transpose()?;

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label,
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: &desc.vertex_entry,
                buffers: &buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: &desc.fragment_entry,
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        let id = self.alloc_id();
        self.pipelines.insert(id, pipeline);
        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if self.pass.is_some() {
            self.errors.lock().push(GpuError::new(
                GpuErrorKind::InvalidOperation,
                "render pass begun while another is open",
            ));
        }
        self.pass = Some(OpenPass {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        if let Some(pass) = self.pass.take() {
            self.encode_pass(pass);
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(PassCommand::Pipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(PassCommand::BindGroup(index, bind_group));
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(PassCommand::VertexBuffer(slot, buffer, offset));
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        self.record(PassCommand::Viewport([x, y, width, height, min_depth, max_depth]));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record(PassCommand::Draw(vertices, instances));
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn take_errors(&mut self) -> Vec<GpuError> {
        std::mem::take(&mut *self.errors.lock())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(&view.0);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.layouts.remove(&layout.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.pipelines.remove(&pipeline.0);
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_keeps_aspect() {
        assert_eq!(clamp_to_limit(800, 600, 8192), (800, 600));
        assert_eq!(clamp_to_limit(16384, 8192, 8192), (8192, 4096));
        assert_eq!(clamp_to_limit(0, 0, 8192), (1, 1));
    }
}
