//! Deferred rendering pipeline
//!
//! 1. Geometry pass: the scene into color, normal and position attachments
//! 2. Lighting pass: one additive quad per light
//! 3. Post-processing: bloom, then the result is drawn into the output

pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod postprocess;

pub use gbuffer_pass::GeometryBuffer;
pub use lighting_pass::LightAccumulator;
pub use postprocess::{bloom_reference, BloomEffect, BloomSettings, BLOOM_FORMAT};

use crate::backend::GraphicsBackend;
use crate::context::{RenderContext, RenderTarget};
use crate::scene::{Color, ObjectArena, Scene};
use glam::Vec3;

/// Offscreen targets and programs of the deferred path, all at one resolution
pub struct DeferredPipeline {
    width: u32,
    height: u32,
    gbuffer: GeometryBuffer,
    accumulator: LightAccumulator,
    bloom: BloomEffect,
}

impl DeferredPipeline {
    pub fn new<B: GraphicsBackend>(ctx: &mut RenderContext<B>, width: u32, height: u32, bloom: BloomSettings) -> Self {
        log::info!("deferred pipeline {}x{}", width, height);
        Self {
            width,
            height,
            gbuffer: GeometryBuffer::new(ctx, width, height),
            accumulator: LightAccumulator::new(ctx, width, height),
            bloom: BloomEffect::new(ctx, width, height, bloom),
        }
    }

    /// Rebuild every target at the new size
    pub fn set_resolution<B: GraphicsBackend>(&mut self, ctx: &mut RenderContext<B>, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        let settings = self.bloom.settings();
        *self = Self::new(ctx, width, height, settings);
    }

    /// Geometry, lighting and bloom, then draw the result into `output`
    /// cleared to `clear_color`. View and projection must already be set.
    pub fn render<B: GraphicsBackend>(
        &mut self,
        ctx: &mut RenderContext<B>,
        objects: &mut ObjectArena,
        scene: &Scene,
        eye: Vec3,
        output: RenderTarget,
        clear_color: Color,
    ) {
        self.gbuffer.render(ctx, objects, scene);
        self.accumulator.render(ctx, &self.gbuffer, scene.lights(), eye);

        let Some(lit) = self.accumulator.texture() else {
            return;
        };
        let composited = match self.bloom.apply(ctx, lit) {
            Ok(()) => self.bloom.result().unwrap_or(lit),
            Err(e) => {
                log::warn!("deferred: presenting without bloom: {}", e);
                lit
            }
        };

        ctx.bind_target(output, Some(clear_color));
        ctx.draw_texture(composited, [0.0, 0.0, 1.0, 1.0]);
        ctx.unbind_target();
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn gbuffer(&self) -> &GeometryBuffer {
        &self.gbuffer
    }

    pub fn accumulator(&self) -> &LightAccumulator {
        &self.accumulator
    }

    pub fn bloom(&self) -> &BloomEffect {
        &self.bloom
    }

    pub fn bloom_mut(&mut self) -> &mut BloomEffect {
        &mut self.bloom
    }
}
