//! Deferred lighting pass
//!
//! Each light is one viewport quad reading the geometry buffer through
//! `t1` (color), `t2` (normal) and `t3` (position). Results are summed with
//! additive blending into a half-float accumulator.

use crate::backend::*;
use crate::context::RenderContext;
use crate::pipeline::GeometryBuffer;
use crate::resources::shaders::{quad_fragment, quad_vertex};
use crate::resources::{FramebufferObject, Program, Texture};
use crate::scene::{Color, Light};
use glam::Vec3;

/// Accumulator format; 32-bit float targets can't be blended
pub const ACCUMULATOR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

const LIGHTING_FRAGMENT: &str = r#"
struct LightUniforms {
    position_size: vec4<f32>,
    color: vec4<f32>,
    eye: vec4<f32>,
}

@group(1) @binding(0) var t1: texture_2d<f32>;
@group(1) @binding(1) var t2: texture_2d<f32>;
@group(1) @binding(2) var t3: texture_2d<f32>;
@group(2) @binding(0) var<uniform> light: LightUniforms;

fn direction(v: vec3<f32>) -> vec3<f32> {
    let len = length(v);
    return select(vec3<f32>(0.0), v / max(len, 1e-6), len > 1e-6);
}

@fragment
fn fs_main(input: QuadInput) -> @location(0) vec4<f32> {
    let size = vec2<i32>(textureDimensions(t1));
    let coord = clamp(vec2<i32>(input.uv * vec2<f32>(size)), vec2<i32>(0), size - vec2<i32>(1));
    let albedo = textureLoad(t1, coord, 0);
    let normal_hardness = textureLoad(t2, coord, 0);
    let position = textureLoad(t3, coord, 0);

    let to_light = light.position_size.xyz - position.xyz;
    let dist = length(to_light);
    let l = direction(to_light);
    let n = direction(normal_hardness.xyz);
    let v = direction(light.eye.xyz - position.xyz);
    let h = direction(l + v);

    let attenuation = clamp(1.0 - dist / max(light.position_size.w, 1e-6), 0.0, 1.0);
    let diffuse = max(dot(n, l), 0.0);
    let hardness = normal_hardness.w;
    let specular = select(0.0, pow(max(dot(n, h), 0.0), hardness), hardness > 0.0);

    let rgb = (albedo.rgb * diffuse + vec3<f32>(specular)) * light.color.rgb * attenuation * position.w;
    return vec4<f32>(rgb, 1.0);
}
"#;

pub struct LightAccumulator {
    fbo: FramebufferObject,
    program: Program,
}

impl LightAccumulator {
    pub fn new<B: GraphicsBackend>(ctx: &mut RenderContext<B>, width: u32, height: u32) -> Self {
        let fbo = FramebufferObject::new(ctx, width, height, ACCUMULATOR_FORMAT);
        let program = Program::from_sources(
            ctx,
            ("quad_vertex", quad_vertex().as_str()),
            ("deferred_lighting", quad_fragment(LIGHTING_FRAGMENT).as_str()),
        );
        Self { fbo, program }
    }

    /// Clear the accumulator and add one quad per light
    pub fn render<B: GraphicsBackend>(
        &mut self,
        ctx: &mut RenderContext<B>,
        gbuffer: &GeometryBuffer,
        lights: &[Light],
        eye: Vec3,
    ) {
        self.fbo.bind(ctx, Some(Color::BLACK));
        let (Some(color), Some(normal), Some(position)) = (gbuffer.color(), gbuffer.normal(), gbuffer.position())
        else {
            log::warn!("lighting pass: geometry buffer is incomplete");
            self.fbo.unbind(ctx);
            return;
        };

        ctx.set_blend(Some(BlendState::additive()));
        for light in lights {
            let uniforms = light.to_gpu_data(eye);
            ctx.draw_fullscreen(
                &mut self.program,
                &[("t1", color), ("t2", normal), ("t3", position)],
                Some(bytemuck::bytes_of(&uniforms)),
            );
        }
        ctx.set_blend(None);
        self.fbo.unbind(ctx);
    }

    /// The accumulated lighting
    pub fn texture(&self) -> Option<&Texture> {
        self.fbo.color(0)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_one_quad_per_light() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let gbuffer = GeometryBuffer::new(&mut ctx, 4, 4);
        let mut accumulator = LightAccumulator::new(&mut ctx, 4, 4);
        assert!(accumulator.program().is_usable());

        let lights = [Light::new(Vec3::Y), Light::new(Vec3::X).with_size(3.0)];
        accumulator.render(&mut ctx, &gbuffer, &lights, Vec3::Z);
        assert_eq!(ctx.backend().draw_count(), 2);
        assert_eq!(ctx.check_errors("lighting"), 0);
    }

    #[test]
    fn test_additive_blend_pipeline() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let gbuffer = GeometryBuffer::new(&mut ctx, 4, 4);
        let mut accumulator = LightAccumulator::new(&mut ctx, 4, 4);
        accumulator.render(&mut ctx, &gbuffer, &[Light::default()], Vec3::ZERO);

        let pipeline = ctx.backend().commands().iter().find_map(|c| match c {
            crate::backend::headless::RecordedCommand::SetPipeline(p) => Some(*p),
            _ => None,
        });
        let descriptor = pipeline.and_then(|p| ctx.backend().pipeline_descriptor(p)).unwrap();
        assert_eq!(descriptor.color_targets[0].format, ACCUMULATOR_FORMAT);
        assert_eq!(descriptor.color_targets[0].blend, Some(BlendState::additive()));
    }
}
