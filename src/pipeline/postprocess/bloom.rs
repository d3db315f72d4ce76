//! Bloom post-processing effect
//!
//! Stage one blurs the bright part of the input into `intermediate`, stage
//! two adds it back onto the input into `result`. Both targets keep the
//! resolution the effect was built with.

use crate::backend::*;
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::shaders::{quad_fragment, quad_vertex};
use crate::resources::{FramebufferObject, Program, Texture};
use crate::scene::Color;
use image::{Rgba, Rgba32FImage};

pub const BLOOM_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomSettings {
    /// Per-channel level subtracted before blurring
    pub threshold: f32,
    /// Weight of the blurred highlights in the composite
    pub intensity: f32,
    /// Box blur radius in texels
    pub radius: u32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            intensity: 0.5,
            radius: 2,
        }
    }
}

impl BloomSettings {
    fn to_uniform(self) -> [f32; 4] {
        [self.threshold, self.intensity, self.radius as f32, 0.0]
    }
}

const BLOOM_PARAMS: &str = r#"
@group(2) @binding(0) var<uniform> bloom: vec4<f32>;

fn texel(uv: vec2<f32>, size: vec2<i32>) -> vec2<i32> {
    return clamp(vec2<i32>(uv * vec2<f32>(size)), vec2<i32>(0), size - vec2<i32>(1));
}
"#;

const BLOOM_EXTRACT: &str = r#"
@group(1) @binding(0) var texture: texture_2d<f32>;

@fragment
fn fs_main(input: QuadInput) -> @location(0) vec4<f32> {
    let size = vec2<i32>(textureDimensions(texture));
    let center = texel(input.uv, size);
    let radius = i32(bloom.z);

    var sum = vec3<f32>(0.0);
    for (var dy = -radius; dy <= radius; dy = dy + 1) {
        for (var dx = -radius; dx <= radius; dx = dx + 1) {
            let coord = clamp(center + vec2<i32>(dx, dy), vec2<i32>(0), size - vec2<i32>(1));
            sum = sum + max(textureLoad(texture, coord, 0).rgb - vec3<f32>(bloom.x), vec3<f32>(0.0));
        }
    }
    let taps = f32((2 * radius + 1) * (2 * radius + 1));
    return vec4<f32>(sum / taps, 1.0);
}
"#;

const BLOOM_COMPOSITE: &str = r#"
@group(1) @binding(0) var t1: texture_2d<f32>;
@group(1) @binding(1) var t2: texture_2d<f32>;

@fragment
fn fs_main(input: QuadInput) -> @location(0) vec4<f32> {
    let base = textureLoad(t1, texel(input.uv, vec2<i32>(textureDimensions(t1))), 0);
    let glow = textureLoad(t2, texel(input.uv, vec2<i32>(textureDimensions(t2))), 0);
    return vec4<f32>(base.rgb + bloom.y * glow.rgb, base.a);
}
"#;

pub struct BloomEffect {
    width: u32,
    height: u32,
    settings: BloomSettings,
    intermediate: FramebufferObject,
    result: FramebufferObject,
    extract: Program,
    composite: Program,
}

impl BloomEffect {
    pub fn new<B: GraphicsBackend>(ctx: &mut RenderContext<B>, width: u32, height: u32, settings: BloomSettings) -> Self {
        let intermediate = FramebufferObject::new(ctx, width, height, BLOOM_FORMAT);
        let result = FramebufferObject::new(ctx, width, height, BLOOM_FORMAT);
        let extract = Program::from_sources(
            ctx,
            ("quad_vertex", quad_vertex().as_str()),
            ("bloom_extract", quad_fragment(&format!("{}{}", BLOOM_PARAMS, BLOOM_EXTRACT)).as_str()),
        );
        let composite = Program::from_sources(
            ctx,
            ("quad_vertex", quad_vertex().as_str()),
            ("bloom_composite", quad_fragment(&format!("{}{}", BLOOM_PARAMS, BLOOM_COMPOSITE)).as_str()),
        );

        Self {
            width,
            height,
            settings,
            intermediate,
            result,
            extract,
            composite,
        }
    }

    /// Run both stages on `input`. An input of another size than the effect
    /// was built for is rejected and `result` keeps its previous contents.
    pub fn apply<B: GraphicsBackend>(&mut self, ctx: &mut RenderContext<B>, input: &Texture) -> RenderResult<()> {
        let actual = (input.width(), input.height());
        if actual != (self.width, self.height) {
            log::warn!(
                "bloom: input {} is {}x{}, expected {}x{}",
                input.name(),
                actual.0,
                actual.1,
                self.width,
                self.height
            );
            return Err(RenderError::ResolutionMismatch {
                expected: (self.width, self.height),
                actual,
            });
        }
        if !input.is_allocated() {
            log::warn!("bloom: input {} has no storage", input.name());
            return Err(RenderError::UnsupportedFormat(input.format()));
        }

        let params = self.settings.to_uniform();
        ctx.set_blend(None);

        self.intermediate.bind(ctx, Some(Color::BLACK));
        ctx.draw_fullscreen(&mut self.extract, &[("texture", input)], Some(bytemuck::bytes_of(&params)));
        self.intermediate.unbind(ctx);

        let Some(glow) = self.intermediate.color(0) else {
            return Ok(());
        };
        self.result.bind(ctx, Some(Color::BLACK));
        ctx.draw_fullscreen(
            &mut self.composite,
            &[("t1", input), ("t2", glow)],
            Some(bytemuck::bytes_of(&params)),
        );
        self.result.unbind(ctx);
        Ok(())
    }

    /// The composited image
    pub fn result(&self) -> Option<&Texture> {
        self.result.color(0)
    }

    /// The blurred highlights
    pub fn intermediate(&self) -> Option<&Texture> {
        self.intermediate.color(0)
    }

    pub fn settings(&self) -> BloomSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: BloomSettings) {
        self.settings = settings;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_usable(&self) -> bool {
        self.extract.is_usable() && self.composite.is_usable()
    }
}

/// CPU version of both bloom stages, texel for texel. Tests compare the
/// GPU passes against it.
pub fn bloom_reference(input: &Rgba32FImage, settings: BloomSettings) -> Rgba32FImage {
    let (width, height) = input.dimensions();
    if width == 0 || height == 0 {
        return input.clone();
    }
    let r = settings.radius as i64;
    let taps = ((2 * r + 1) * (2 * r + 1)) as f32;

    let glow = Rgba32FImage::from_fn(width, height, |x, y| {
        let mut sum = [0.0f32; 3];
        for dy in -r..=r {
            for dx in -r..=r {
                let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                let p = input.get_pixel(sx, sy);
                for c in 0..3 {
                    sum[c] += (p[c] - settings.threshold).max(0.0);
                }
            }
        }
        Rgba([sum[0] / taps, sum[1] / taps, sum[2] / taps, 1.0])
    });

    Rgba32FImage::from_fn(width, height, |x, y| {
        let base = input.get_pixel(x, y);
        let g = glow.get_pixel(x, y);
        Rgba([
            base[0] + settings.intensity * g[0],
            base[1] + settings.intensity * g[1],
            base[2] + settings.intensity * g[2],
            base[3],
        ])
    })
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_reference_black_stays_black() {
        let black = Rgba32FImage::from_pixel(5, 4, Rgba([0.0, 0.0, 0.0, 1.0]));
        let out = bloom_reference(&black, BloomSettings::default());
        assert_eq!(out, black);
    }

    #[test]
    fn test_reference_spreads_highlights() {
        let mut input = Rgba32FImage::from_pixel(5, 5, Rgba([0.2, 0.2, 0.2, 1.0]));
        input.put_pixel(2, 2, Rgba([10.0, 1.0, 0.0, 1.0]));
        let settings = BloomSettings {
            threshold: 1.0,
            intensity: 1.0,
            radius: 1,
        };
        let out = bloom_reference(&input, settings);

        // neighbours get (10 - 1) / 9 of red
        let n = out.get_pixel(1, 1);
        assert!((n[0] - (0.2 + 1.0)).abs() < 1e-5);
        assert!((n[1] - 0.2).abs() < 1e-5);
        // outside the radius nothing changes
        assert_eq!(out.get_pixel(4, 4), input.get_pixel(4, 4));
        assert!((out.get_pixel(2, 2)[0] - 11.0).abs() < 1e-5);
    }

    #[test]
    fn test_resolution_mismatch_is_rejected() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let mut bloom = BloomEffect::new(&mut ctx, 8, 8, BloomSettings::default());
        assert!(bloom.is_usable());
        let input = Texture::new(&mut ctx, "input", 4, 4, BLOOM_FORMAT);

        let result = bloom.apply(&mut ctx, &input);
        assert!(matches!(
            result,
            Err(RenderError::ResolutionMismatch { expected: (8, 8), actual: (4, 4) })
        ));
        assert_eq!(ctx.backend().pass_count(), 0);
    }

    #[test]
    fn test_apply_runs_two_passes() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let mut bloom = BloomEffect::new(&mut ctx, 4, 4, BloomSettings::default());
        let input = Texture::new(&mut ctx, "input", 4, 4, BLOOM_FORMAT);

        bloom.apply(&mut ctx, &input).unwrap();
        assert_eq!(ctx.backend().pass_count(), 2);
        assert_eq!(ctx.backend().draw_count(), 2);
        assert_eq!(ctx.check_errors("bloom"), 0);
    }
}
