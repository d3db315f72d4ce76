//! Render context
//!
//! Owns the backend and every piece of state a draw depends on: the active
//! render target, the model matrix stack, view and projection, the current
//! draw color, blend and depth-test state, texture units, per-draw uniforms
//! and the shared default resources.

use crate::backend::*;
use crate::resources::shader::{PipelineKey, Program, DRAW_GROUP, FRAGMENT_ENTRY, GBUFFER_FRAGMENT_ENTRY, PARAMS_GROUP, TEXTURE_GROUP};
use crate::resources::{shaders, Texture, TextureData};
use crate::scene::Color;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use parking_lot::Mutex;
use std::sync::Arc;

/// Number of texture units a material can bind
pub const TEXTURE_UNITS: usize = 4;

/// Deepest the model matrix stack may grow
pub const MATRIX_STACK_DEPTH: usize = 32;

/// A backend resource whose owner was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    TextureView(TextureViewHandle),
    Sampler(SamplerHandle),
    BindGroup(BindGroupHandle),
    BindGroupLayout(BindGroupLayoutHandle),
    RenderPipeline(RenderPipelineHandle),
}

/// Shared queue that resource owners push into on drop
#[derive(Clone, Default)]
pub struct ReleaseQueue(Arc<Mutex<Vec<Released>>>);

impl ReleaseQueue {
    pub fn push(&self, released: Released) {
        self.0.lock().push(released);
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    fn drain(&self) -> Vec<Released> {
        std::mem::take(&mut *self.0.lock())
    }
}

/// Model matrix stack with push/pop scoping
pub struct MatrixStack {
    stack: Vec<Mat4>,
}

impl MatrixStack {
    pub fn new() -> Self {
        Self {
            stack: vec![Mat4::IDENTITY],
        }
    }

    pub fn top(&self) -> Mat4 {
        self.stack.last().copied().unwrap_or(Mat4::IDENTITY)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Duplicate the top matrix. Fails with `StackOverflow` when full.
    pub fn push(&mut self) -> Result<(), GpuErrorKind> {
        if self.stack.len() >= MATRIX_STACK_DEPTH {
            return Err(GpuErrorKind::StackOverflow);
        }
        self.stack.push(self.top());
        Ok(())
    }

    /// Restore the previous matrix. The bottom entry is never popped.
    pub fn pop(&mut self) -> Result<(), GpuErrorKind> {
        if self.stack.len() <= 1 {
            return Err(GpuErrorKind::StackUnderflow);
        }
        self.stack.pop();
        Ok(())
    }

    /// Right-multiply the top matrix
    pub fn multiply(&mut self, m: Mat4) {
        if let Some(top) = self.stack.last_mut() {
            *top *= m;
        }
    }

    pub fn load_identity(&mut self) {
        if let Some(top) = self.stack.last_mut() {
            *top = Mat4::IDENTITY;
        }
    }

    pub fn reset(&mut self) {
        self.stack.clear();
        self.stack.push(Mat4::IDENTITY);
    }
}

impl Default for MatrixStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Uniform block every program reads from `@group(0) @binding(0) var<uniform> draw`
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DrawUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub color: [f32; 4],
    /// Program-specific: material hardness in `x`, or a quad rectangle
    pub params: [f32; 4],
}

const UNIFORM_SLOT_SIZE: u64 = 256;
const UNIFORM_SLOTS_PER_CHUNK: u32 = 64;

struct UniformChunk {
    buffer: BufferHandle,
    bind_groups: Vec<BindGroupHandle>,
}

/// Ring of uniform slots, one bind group per slot
///
/// Buffer writes land before the next submission, so a slot can't be reused
/// until the recorded work has been flushed.
#[derive(Default)]
struct UniformArena {
    layout: Option<BindGroupLayoutHandle>,
    chunks: Vec<UniformChunk>,
    next: u32,
}

impl UniformArena {
    fn layout<B: GraphicsBackend>(&mut self, backend: &mut B) -> Option<BindGroupLayoutHandle> {
        if self.layout.is_none() {
            let layout = backend
                .create_bind_group_layout(&[BindGroupLayoutEntry {
                    binding: 0,
                    ty: BindingType::UniformBuffer,
                }])
                .map_err(|e| log::error!("uniform layout: {}", e))
                .ok()?;
            self.layout = Some(layout);
        }
        self.layout
    }

    fn allocate<B: GraphicsBackend>(&mut self, backend: &mut B, data: &[u8]) -> Option<BindGroupHandle> {
        let layout = self.layout(backend)?;
        let chunk_index = (self.next / UNIFORM_SLOTS_PER_CHUNK) as usize;
        let slot = self.next % UNIFORM_SLOTS_PER_CHUNK;

        if chunk_index == self.chunks.len() {
            let buffer = backend
                .create_buffer(&BufferDescriptor {
                    label: Some(format!("uniform arena {}", chunk_index)),
                    size: UNIFORM_SLOT_SIZE * UNIFORM_SLOTS_PER_CHUNK as u64,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                })
                .map_err(|e| log::error!("uniform arena: {}", e))
                .ok()?;
            let mut bind_groups = Vec::with_capacity(UNIFORM_SLOTS_PER_CHUNK as usize);
            for i in 0..UNIFORM_SLOTS_PER_CHUNK {
                let group = backend
                    .create_bind_group(
                        layout,
                        &[(
                            0,
                            BindGroupEntry::Buffer {
                                buffer,
                                offset: i as u64 * UNIFORM_SLOT_SIZE,
                                size: Some(UNIFORM_SLOT_SIZE),
                            },
                        )],
                    )
                    .map_err(|e| log::error!("uniform arena: {}", e))
                    .ok()?;
                bind_groups.push(group);
            }
            log::debug!("uniform arena grew to {} chunks", chunk_index + 1);
            self.chunks.push(UniformChunk { buffer, bind_groups });
        }

        let chunk = &self.chunks[chunk_index];
        let mut padded = [0u8; UNIFORM_SLOT_SIZE as usize];
        let len = data.len().min(padded.len());
        padded[..len].copy_from_slice(&data[..len]);
        backend.write_buffer(chunk.buffer, slot as u64 * UNIFORM_SLOT_SIZE, &padded);
        self.next += 1;
        Some(chunk.bind_groups[slot as usize])
    }

    fn reset(&mut self) {
        self.next = 0;
    }

    fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for chunk in self.chunks.drain(..) {
            for group in chunk.bind_groups {
                backend.destroy_bind_group(group);
            }
            backend.destroy_buffer(chunk.buffer);
        }
        if let Some(layout) = self.layout.take() {
            backend.destroy_bind_group_layout(layout);
        }
        self.next = 0;
    }
}

/// Attachments a draw renders into
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTarget {
    pub color: Vec<(TextureViewHandle, TextureFormat)>,
    pub depth: Option<(TextureViewHandle, TextureFormat)>,
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    /// The swapchain image of a frame
    pub fn surface(frame: &FrameContext, format: TextureFormat) -> Self {
        Self {
            color: vec![(frame.swapchain_view, format)],
            depth: None,
            width: frame.width,
            height: frame.height,
        }
    }

    pub fn with_depth(mut self, view: TextureViewHandle, format: TextureFormat) -> Self {
        self.depth = Some((view, format));
        self
    }
}

#[derive(Default)]
struct Defaults {
    draw_program: Option<Program>,
    white: Option<Texture>,
    flat_normal: Option<Texture>,
    material_sampler: Option<SamplerHandle>,
}

/// Explicit render context passed to every draw
pub struct RenderContext<B: GraphicsBackend> {
    backend: B,
    model: MatrixStack,
    view: Mat4,
    projection: Mat4,
    draw_color: Color,
    draw_params: Vec4,
    depth_test: bool,
    blend: Option<BlendState>,
    texture_units: [Option<TextureViewHandle>; TEXTURE_UNITS],
    material_active: bool,
    target: Option<RenderTarget>,
    uniforms: UniformArena,
    release: ReleaseQueue,
    transient: Vec<Released>,
    defaults: Defaults,
    errors: Vec<GpuError>,
}

impl<B: GraphicsBackend> RenderContext<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            model: MatrixStack::new(),
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            draw_color: Color::WHITE,
            draw_params: Vec4::ZERO,
            depth_test: true,
            blend: None,
            texture_units: [None; TEXTURE_UNITS],
            material_active: false,
            target: None,
            uniforms: UniformArena::default(),
            release: ReleaseQueue::default(),
            transient: Vec::new(),
            defaults: Defaults::default(),
            errors: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// A handle to the queue resources release themselves into
    pub fn release_queue(&self) -> ReleaseQueue {
        self.release.clone()
    }

    // Frame and target management

    /// Begin a swapchain frame and return it as a render target
    pub fn begin_frame(&mut self) -> BackendResult<RenderTarget> {
        let frame = self.backend.begin_frame()?;
        let format = self.backend.swapchain_format();
        Ok(RenderTarget::surface(&frame, format))
    }

    /// Present the frame and recycle per-frame state
    pub fn end_frame(&mut self) -> BackendResult<()> {
        self.unbind_target();
        let result = self.backend.end_frame();
        self.after_submit();
        result
    }

    /// Submit offscreen work recorded outside of a frame
    pub fn flush(&mut self) {
        self.unbind_target();
        self.backend.flush();
        self.after_submit();
    }

    fn after_submit(&mut self) {
        self.uniforms.reset();
        self.collect_garbage();
    }

    /// Start rendering into `target`, optionally clearing color (and depth to 1).
    /// Any previously bound target is unbound first.
    pub fn bind_target(&mut self, target: RenderTarget, clear: Option<Color>) {
        self.unbind_target();
        if target.color.is_empty() {
            log::warn!("bind_target: target has no allocated color attachment, skipping");
            return;
        }

        let load_op = match clear {
            Some(color) => LoadOp::Clear(color.to_array()),
            None => LoadOp::Load,
        };
        self.backend.begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachments: target
                .color
                .iter()
                .map(|(view, _)| ColorAttachment {
                    view: *view,
                    load_op: load_op.clone(),
                })
                .collect(),
            depth_stencil_attachment: target.depth.map(|(view, _)| DepthStencilAttachment {
                view,
                depth_load_op: if clear.is_some() { LoadOp::Clear([1.0; 4]) } else { LoadOp::Load },
                depth_clear_value: 1.0,
            }),
        });
        self.backend
            .set_viewport(0.0, 0.0, target.width as f32, target.height as f32, 0.0, 1.0);
        self.target = Some(target);
    }

    /// Finish rendering into the active target
    pub fn unbind_target(&mut self) {
        if self.target.take().is_some() {
            self.backend.end_render_pass();
        }
    }

    // Transform state

    pub fn set_projection(&mut self, projection: Mat4) {
        self.projection = projection;
    }

    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.model.top()
    }

    pub fn push_matrix(&mut self) {
        if let Err(kind) = self.model.push() {
            self.errors.push(GpuError::new(kind, "model matrix stack is full"));
        }
    }

    pub fn pop_matrix(&mut self) {
        if let Err(kind) = self.model.pop() {
            self.errors.push(GpuError::new(kind, "pop on an empty model matrix stack"));
        }
    }

    pub fn multiply_matrix(&mut self, m: Mat4) {
        self.model.multiply(m);
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.model.multiply(Mat4::from_translation(offset));
    }

    /// Rotate the model matrix by `degrees` about `axis`
    pub fn rotate(&mut self, degrees: f32, axis: Vec3) {
        self.model
            .multiply(Mat4::from_axis_angle(axis.normalize_or_zero(), degrees.to_radians()));
    }

    pub fn load_identity(&mut self) {
        self.model.load_identity();
    }

    // Fixed-function style state

    pub fn set_draw_color(&mut self, color: Color) {
        self.draw_color = color;
    }

    pub fn draw_color(&self) -> Color {
        self.draw_color
    }

    pub fn set_draw_params(&mut self, params: Vec4) {
        self.draw_params = params;
    }

    pub fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    pub fn depth_test(&self) -> bool {
        self.depth_test
    }

    pub fn set_blend(&mut self, blend: Option<BlendState>) {
        self.blend = blend;
    }

    pub fn bind_texture_unit(&mut self, unit: usize, view: Option<TextureViewHandle>) {
        match self.texture_units.get_mut(unit) {
            Some(slot) => *slot = view,
            None => log::warn!("texture unit {} out of range", unit),
        }
    }

    pub fn texture_unit(&self, unit: usize) -> Option<TextureViewHandle> {
        self.texture_units.get(unit).copied().flatten()
    }

    /// Mark a material active. Returns false if one already was.
    pub(crate) fn begin_material(&mut self) -> bool {
        let was_active = self.material_active;
        self.material_active = true;
        !was_active
    }

    pub(crate) fn end_material(&mut self) {
        self.material_active = false;
    }

    // Drawing

    fn pipeline_key(&self, target: &RenderTarget) -> PipelineKey {
        PipelineKey {
            color_formats: target.color.iter().map(|(_, f)| *f).collect(),
            depth_format: target.depth.map(|(_, f)| f),
            depth_test: self.depth_test,
            blend: self.blend,
            fragment_entry: if target.color.len() > 1 {
                GBUFFER_FRAGMENT_ENTRY
            } else {
                FRAGMENT_ENTRY
            },
        }
    }

    fn draw_uniforms(&self, params: Vec4) -> DrawUniforms {
        let model = self.model.top();
        DrawUniforms {
            view_proj: (self.projection * self.view).to_cols_array_2d(),
            model: model.to_cols_array_2d(),
            normal_matrix: model.inverse().transpose().to_cols_array_2d(),
            color: self.draw_color.to_array(),
            params: params.to_array(),
        }
    }

    /// Bind `program`, its uniforms and textures. Returns false when the draw
    /// has to be skipped.
    fn prepare_draw(
        &mut self,
        program: &mut Program,
        textures: Option<BindGroupHandle>,
        quad_params: Option<Vec4>,
        pass_params: Option<&[u8]>,
    ) -> bool {
        if !program.is_usable() {
            log::warn!("drawing with unusable program {} is a no-op", program.name());
            return false;
        }
        let Some(target) = self.target.as_ref() else {
            log::warn!("draw without a bound render target, skipping");
            return false;
        };
        let key = self.pipeline_key(target);
        let Some(pipeline) = program.pipeline(&mut self.backend, &key) else {
            return false;
        };
        self.backend.set_render_pipeline(pipeline);

        if program.uses_group(DRAW_GROUP) {
            let uniforms = self.draw_uniforms(quad_params.unwrap_or(self.draw_params));
            let Some(group) = self.uniforms.allocate(&mut self.backend, bytemuck::bytes_of(&uniforms)) else {
                return false;
            };
            self.backend.set_bind_group(DRAW_GROUP, group);
        }
        if program.uses_group(TEXTURE_GROUP) {
            let Some(group) = textures else {
                log::warn!("program {} needs textures but none were bound", program.name());
                return false;
            };
            self.backend.set_bind_group(TEXTURE_GROUP, group);
        }
        if program.uses_group(PARAMS_GROUP) {
            let data = pass_params.unwrap_or(&[]);
            let Some(group) = self.uniforms.allocate(&mut self.backend, data) else {
                return false;
            };
            self.backend.set_bind_group(PARAMS_GROUP, group);
        }
        true
    }

    /// Draw `vertex_count` vertices from per-stream vertex buffers, one
    /// `(buffer, offset)` per slot
    pub fn draw_streams(
        &mut self,
        program: &mut Program,
        streams: &[(BufferHandle, u64)],
        textures: Option<BindGroupHandle>,
        vertex_count: u32,
    ) {
        if vertex_count == 0 {
            return;
        }
        if !self.prepare_draw(program, textures, None, None) {
            return;
        }
        for (slot, (buffer, offset)) in streams.iter().enumerate() {
            self.backend.set_vertex_buffer(slot as u32, *buffer, *offset);
        }
        self.backend.draw(0..vertex_count, 0..1);
    }

    /// Draw a textured quad covering `rect` (`x, y, w, h` in the unit square,
    /// origin bottom-left) with `program`. `inputs` bind textures by the
    /// names the program declares; `params` feeds `@group(2)`.
    pub fn draw_quad(
        &mut self,
        program: &mut Program,
        rect: [f32; 4],
        inputs: &[(&str, &Texture)],
        params: Option<&[u8]>,
    ) {
        let mut textures = None;
        if program.uses_group(TEXTURE_GROUP) {
            let views: Vec<(&str, TextureViewHandle)> = inputs
                .iter()
                .filter_map(|(name, texture)| match texture.view() {
                    Some(view) => Some((*name, view)),
                    None => {
                        log::warn!("texture {} has no storage, binding default for {}", texture.name(), name);
                        None
                    }
                })
                .collect();
            textures = program.texture_bind_group(self, &views, None);
            if let Some(group) = textures {
                self.transient.push(Released::BindGroup(group));
            }
        }

        let depth_test = std::mem::replace(&mut self.depth_test, false);
        let x0 = rect[0] * 2.0 - 1.0;
        let y0 = rect[1] * 2.0 - 1.0;
        let quad = Vec4::new(x0, y0, x0 + rect[2] * 2.0, y0 + rect[3] * 2.0);
        if self.prepare_draw(program, textures, Some(quad), params) {
            self.backend.draw(0..6, 0..1);
        }
        self.depth_test = depth_test;
    }

    /// Full-target quad with `program`
    pub fn draw_fullscreen(&mut self, program: &mut Program, inputs: &[(&str, &Texture)], params: Option<&[u8]>) {
        self.draw_quad(program, [0.0, 0.0, 1.0, 1.0], inputs, params);
    }

    /// Draw `texture` into `rect` with the default texture-draw program
    pub fn draw_texture(&mut self, texture: &Texture, rect: [f32; 4]) {
        if !texture.is_allocated() {
            log::debug!("texture {} has no storage, nothing to draw", texture.name());
            return;
        }
        let Some(mut program) = self.take_draw_program() else {
            return;
        };
        self.draw_quad(&mut program, rect, &[("texture", texture)], None);
        self.defaults.draw_program = Some(program);
    }

    // Shared defaults

    fn take_draw_program(&mut self) -> Option<Program> {
        if self.defaults.draw_program.is_none() {
            let program = Program::from_sources(
                self,
                ("quad_vertex", shaders::quad_vertex().as_str()),
                ("texture_passthrough", shaders::texture_passthrough().as_str()),
            );
            self.defaults.draw_program = Some(program);
        }
        self.defaults.draw_program.take()
    }

    /// View of the 1×1 white texture substituted for missing color maps
    pub fn default_white_view(&mut self) -> Option<TextureViewHandle> {
        if self.defaults.white.is_none() {
            self.defaults.white = Texture::from_data(self, &TextureData::white());
        }
        self.defaults.white.as_ref()?.view()
    }

    /// View of the flat tangent-space normal substituted for missing normal maps
    pub fn default_normal_view(&mut self) -> Option<TextureViewHandle> {
        if self.defaults.flat_normal.is_none() {
            self.defaults.flat_normal = Texture::from_data(self, &TextureData::flat_normal());
        }
        self.defaults.flat_normal.as_ref()?.view()
    }

    /// Linear, repeating sampler for material textures
    pub fn material_sampler(&mut self) -> Option<SamplerHandle> {
        if self.defaults.material_sampler.is_none() {
            let sampler = self
                .backend
                .create_sampler(&SamplerDescriptor {
                    label: Some("material sampler".into()),
                    address_mode: AddressMode::Repeat,
                })
                .map_err(|e| log::error!("material sampler: {}", e))
                .ok()?;
            self.defaults.material_sampler = Some(sampler);
        }
        self.defaults.material_sampler
    }

    /// The layout of every uniform-only bind group
    pub(crate) fn uniform_layout(&mut self) -> Option<BindGroupLayoutHandle> {
        self.uniforms.layout(&mut self.backend)
    }

    // Lifetime and diagnostics

    /// Destroy everything released since the last call
    pub fn collect_garbage(&mut self) {
        let mut released = self.release.drain();
        released.append(&mut self.transient);
        if !released.is_empty() {
            log::trace!("releasing {} backend resources", released.len());
        }
        for resource in released {
            match resource {
                Released::Buffer(h) => self.backend.destroy_buffer(h),
                Released::Texture(h) => self.backend.destroy_texture(h),
                Released::TextureView(h) => self.backend.destroy_texture_view(h),
                Released::Sampler(h) => self.backend.destroy_sampler(h),
                Released::BindGroup(h) => self.backend.destroy_bind_group(h),
                Released::BindGroupLayout(h) => self.backend.destroy_bind_group_layout(h),
                Released::RenderPipeline(h) => self.backend.destroy_render_pipeline(h),
            }
        }
    }

    /// Drain queued errors, log each as `origin: kind: message` and return
    /// how many there were
    pub fn check_errors(&mut self, origin: &str) -> usize {
        let mut errors = std::mem::take(&mut self.errors);
        errors.extend(self.backend.take_errors());
        for error in &errors {
            log::error!("{}: {}: {}", origin, error.kind, error.message);
        }
        errors.len()
    }

    /// Release the shared defaults and per-draw uniform storage. They are
    /// recreated on next use.
    pub fn shutdown(&mut self) {
        self.unbind_target();
        self.backend.flush();
        let defaults = std::mem::take(&mut self.defaults);
        if let Some(sampler) = defaults.material_sampler {
            self.release.push(Released::Sampler(sampler));
        }
        drop(defaults);
        self.collect_garbage();
        self.uniforms.destroy(&mut self.backend);
        self.model.reset();
        self.texture_units = [None; TEXTURE_UNITS];
        self.material_active = false;
        log::info!("render context shut down");
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_matrix_stack_scoping() {
        let mut stack = MatrixStack::new();
        stack.push().unwrap();
        stack.multiply(Mat4::from_translation(Vec3::X));
        assert_eq!(stack.top().w_axis.x, 1.0);
        stack.pop().unwrap();
        assert_eq!(stack.top(), Mat4::IDENTITY);
    }

    #[test]
    fn test_matrix_stack_limits() {
        let mut stack = MatrixStack::new();
        assert_eq!(stack.pop(), Err(GpuErrorKind::StackUnderflow));
        for _ in 1..MATRIX_STACK_DEPTH {
            stack.push().unwrap();
        }
        assert_eq!(stack.push(), Err(GpuErrorKind::StackOverflow));
    }

    #[test]
    fn test_underflow_reported_through_check_errors() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        ctx.pop_matrix();
        assert_eq!(ctx.check_errors("test"), 1);
        assert_eq!(ctx.check_errors("test"), 0);
    }

    #[test]
    fn test_draw_uniforms_fit_a_slot() {
        assert!(std::mem::size_of::<DrawUniforms>() as u64 <= UNIFORM_SLOT_SIZE);
    }

    #[test]
    fn test_uniform_arena_grows_and_resets() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut arena = UniformArena::default();
        let first = arena.allocate(&mut backend, &[1, 2, 3]).unwrap();
        for _ in 1..UNIFORM_SLOTS_PER_CHUNK {
            arena.allocate(&mut backend, &[0]).unwrap();
        }
        arena.allocate(&mut backend, &[0]).unwrap();
        assert_eq!(arena.chunks.len(), 2);

        arena.reset();
        assert_eq!(arena.allocate(&mut backend, &[4]).unwrap(), first);
        assert_eq!(arena.chunks.len(), 2);

        arena.destroy(&mut backend);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_release_queue_drained_by_collect_garbage() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let texture = Texture::new(&mut ctx, "scratch", 4, 4, TextureFormat::Rgba8Unorm);
        assert_eq!(ctx.backend().live_textures(), 1);

        drop(texture);
        assert_eq!(ctx.release_queue().len(), 2);
        ctx.collect_garbage();
        assert_eq!(ctx.backend().live_textures(), 0);
        assert!(ctx.release_queue().is_empty());
    }

    #[test]
    fn test_draw_without_target_is_skipped() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let texture = Texture::new(&mut ctx, "scratch", 4, 4, TextureFormat::Rgba8Unorm);
        ctx.draw_texture(&texture, [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(ctx.backend().draw_count(), 0);
        assert_eq!(ctx.check_errors("draw"), 0);
    }

    #[test]
    fn test_shutdown_releases_defaults() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let frame = ctx.begin_frame().unwrap();
        let texture = Texture::new(&mut ctx, "scratch", 4, 4, TextureFormat::Rgba8Unorm);
        ctx.bind_target(frame, Some(Color::BLACK));
        ctx.draw_texture(&texture, [0.0, 0.0, 1.0, 1.0]);
        ctx.end_frame().unwrap();
        assert_eq!(ctx.backend().draw_count(), 1);
        assert!(ctx.backend().live_pipelines() > 0);

        drop(texture);
        ctx.shutdown();
        assert_eq!(ctx.backend().live_pipelines(), 0);
        assert_eq!(ctx.backend().live_textures(), 0);
        assert_eq!(ctx.backend().live_buffers(), 0);
        assert_eq!(ctx.check_errors("shutdown"), 0);
    }
}
