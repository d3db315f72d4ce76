//! Surface materials
//!
//! A material is either textured or a solid color, optionally with a normal
//! map. It owns the program it draws with, chosen when it is built.

use crate::backend::*;
use crate::context::{ReleaseQueue, Released, RenderContext};
use crate::resources::shader::Program;
use crate::resources::shaders::with_draw_uniforms;
use crate::resources::Texture;
use crate::scene::Color;
use glam::Vec4;
use std::path::PathBuf;

/// Material parameters as produced by a scene importer
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialRecord {
    pub name: String,
    pub diffuse: [f32; 3],
    pub emissive: [f32; 3],
    pub shininess: f32,
    pub diffuse_texture: Option<PathBuf>,
    pub normal_texture: Option<PathBuf>,
}

impl Default for MaterialRecord {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            diffuse: [1.0, 1.0, 1.0],
            emissive: [0.0, 0.0, 0.0],
            shininess: 0.0,
            diffuse_texture: None,
            normal_texture: None,
        }
    }
}

impl MaterialRecord {
    /// Solid color of an untextured material: `diffuse + emissive ⊙ diffuse`
    pub fn solid_color(&self) -> Color {
        let c = |i: usize| self.diffuse[i] + self.emissive[i] * self.diffuse[i];
        Color::rgb(c(0), c(1), c(2))
    }

    /// Whether the textured fragment shader is needed
    pub fn needs_textured_program(&self) -> bool {
        self.diffuse_texture.is_some() || self.normal_texture.is_some()
    }
}

/// The active surface variant
pub enum Surface {
    /// `None` when the color map failed to load
    Textured { colormap: Option<Texture> },
    SolidColor { color: Color },
}

pub struct Material {
    name: String,
    surface: Surface,
    normalmap: Option<Texture>,
    hardness: f32,
    program: Program,
    textures: Option<BindGroupHandle>,
    release: ReleaseQueue,
}

impl Material {
    /// Build a material and its program from an importer record
    pub fn new<B: GraphicsBackend>(ctx: &mut RenderContext<B>, record: &MaterialRecord) -> Self {
        let fragment = if record.needs_textured_program() {
            ("material_texture", material_fragment(TEXTURED_FRAGMENT))
        } else {
            ("material", material_fragment(SOLID_FRAGMENT))
        };
        let program = Program::from_sources(
            ctx,
            ("vertex_shader", with_draw_uniforms(GENERIC_VERTEX).as_str()),
            (fragment.0, fragment.1.as_str()),
        );
        Self::with_program(ctx, record, program)
    }

    /// Build a material that draws with a caller-provided program
    pub fn with_program<B: GraphicsBackend>(
        ctx: &mut RenderContext<B>,
        record: &MaterialRecord,
        program: Program,
    ) -> Self {
        let surface = match &record.diffuse_texture {
            Some(path) => Surface::Textured {
                colormap: Texture::from_file(ctx, path),
            },
            None => Surface::SolidColor {
                color: record.solid_color(),
            },
        };
        let normalmap = record
            .normal_texture
            .as_ref()
            .and_then(|path| Texture::from_file(ctx, path));

        let mut material = Self {
            name: record.name.clone(),
            surface,
            normalmap,
            hardness: record.shininess,
            program,
            textures: None,
            release: ctx.release_queue(),
        };
        material.textures = material.build_texture_group(ctx);
        log::debug!(
            "material {}: {}{}",
            material.name,
            if material.is_textured() { "textured" } else { "solid" },
            if material.normalmap.is_some() { " + normal map" } else { "" }
        );
        material
    }

    fn build_texture_group<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>) -> Option<BindGroupHandle> {
        if self.program.binding("colormap").is_none() && self.program.binding("normalmap").is_none() {
            return None;
        }
        let colormap = match &self.surface {
            Surface::Textured { colormap } => colormap.as_ref().and_then(Texture::view),
            Surface::SolidColor { .. } => None,
        };
        let normalmap = self
            .normalmap
            .as_ref()
            .and_then(Texture::view)
            .or_else(|| ctx.default_normal_view());

        let mut views = Vec::new();
        if let Some(view) = colormap {
            views.push(("colormap", view));
        }
        if let Some(view) = normalmap {
            views.push(("normalmap", view));
        }
        self.program.texture_bind_group(ctx, &views, None)
    }

    /// Make this the active material. Returns false when its program is unusable.
    pub fn activate<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>) -> bool {
        if !self.program.is_usable() {
            log::warn!("material {}: program {} is not usable", self.name, self.program.name());
            return false;
        }
        if !ctx.begin_material() {
            log::warn!("material {} activated while another material is active", self.name);
        }

        match &self.surface {
            Surface::Textured { colormap } => {
                ctx.bind_texture_unit(0, colormap.as_ref().and_then(Texture::view));
                Color::WHITE.apply(ctx);
            }
            Surface::SolidColor { color } => color.apply(ctx),
        }
        if let Some(normalmap) = &self.normalmap {
            ctx.bind_texture_unit(1, normalmap.view());
        }
        ctx.set_draw_params(Vec4::new(self.hardness, 0.0, 0.0, 0.0));
        true
    }

    /// Unbind textures and reset the draw color
    pub fn deactivate<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>) {
        ctx.bind_texture_unit(0, None);
        ctx.bind_texture_unit(1, None);
        ctx.set_draw_color(Color::WHITE);
        ctx.set_draw_params(Vec4::ZERO);
        ctx.end_material();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn is_textured(&self) -> bool {
        matches!(self.surface, Surface::Textured { .. })
    }

    pub fn normalmap(&self) -> Option<&Texture> {
        self.normalmap.as_ref()
    }

    pub fn hardness(&self) -> f32 {
        self.hardness
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    /// Bind group of the material textures, if the program samples any
    pub fn texture_group(&self) -> Option<BindGroupHandle> {
        self.textures
    }
}

impl Drop for Material {
    fn drop(&mut self) {
        if let Some(group) = self.textures.take() {
            self.release.push(Released::BindGroup(group));
        }
    }
}

/// Vertex shader shared by every material
pub const GENERIC_VERTEX: &str = r#"
struct SurfaceOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) texcoord: vec2<f32>,
    @location(3) tangent: vec3<f32>,
}

@vertex
fn vs_main(
    @location(0) in_position: vec3<f32>,
    @location(1) in_normal: vec3<f32>,
    @location(2) in_texcoord: vec3<f32>,
    @location(3) in_tangent: vec3<f32>,
) -> SurfaceOutput {
    let world = draw.model * vec4<f32>(in_position, 1.0);

    var out: SurfaceOutput;
    out.clip_position = draw.view_proj * world;
    out.world_position = world.xyz;
    out.normal = (draw.normal_matrix * vec4<f32>(in_normal, 0.0)).xyz;
    out.texcoord = in_texcoord.xy;
    out.tangent = (draw.model * vec4<f32>(in_tangent, 0.0)).xyz;
    return out;
}
"#;

/// Declarations shared by both material fragment shaders
const SURFACE_COMMON: &str = r#"
struct SurfaceInput {
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) texcoord: vec2<f32>,
    @location(3) tangent: vec3<f32>,
}

struct GBufferOutput {
    @location(0) color: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) position: vec4<f32>,
}

const LIGHT_DIRECTION: vec3<f32> = vec3<f32>(0.3, 0.8, 0.5);

fn safe_normalize(v: vec3<f32>, fallback: vec3<f32>) -> vec3<f32> {
    let len = length(v);
    return select(fallback, v / max(len, 1e-8), len > 1e-8);
}

fn shade_forward(albedo: vec4<f32>, normal: vec3<f32>) -> vec4<f32> {
    let diffuse = max(dot(normal, normalize(LIGHT_DIRECTION)), 0.0);
    return vec4<f32>(albedo.rgb * (0.3 + 0.7 * diffuse), albedo.a);
}

fn gbuffer(albedo: vec4<f32>, normal: vec3<f32>, world_position: vec3<f32>) -> GBufferOutput {
    var out: GBufferOutput;
    out.color = albedo;
    out.normal = vec4<f32>(normal, draw.params.x);
    out.position = vec4<f32>(world_position, 1.0);
    return out;
}
"#;

/// Full fragment source: the draw uniform, shared surface helpers and `body`
pub fn material_fragment(body: &str) -> String {
    with_draw_uniforms(&format!("{}{}", SURFACE_COMMON, body))
}

/// Fragment shader for untextured materials, colored by `draw.color`
pub const SOLID_FRAGMENT: &str = r#"
@fragment
fn fs_main(input: SurfaceInput) -> @location(0) vec4<f32> {
    let n = safe_normalize(input.normal, vec3<f32>(0.0, 0.0, 1.0));
    return shade_forward(draw.color, n);
}

@fragment
fn fs_gbuffer(input: SurfaceInput) -> GBufferOutput {
    let n = safe_normalize(input.normal, vec3<f32>(0.0, 0.0, 1.0));
    return gbuffer(draw.color, n, input.world_position);
}
"#;

/// Fragment shader for materials with a color and/or normal map
pub const TEXTURED_FRAGMENT: &str = r#"
@group(1) @binding(0) var colormap: texture_2d<f32>;
@group(1) @binding(1) var normalmap: texture_2d<f32>;
@group(1) @binding(2) var material_sampler: sampler;

fn material_uv(texcoord: vec2<f32>) -> vec2<f32> {
    return vec2<f32>(texcoord.x, 1.0 - texcoord.y);
}

fn surface_normal(input: SurfaceInput) -> vec3<f32> {
    let mapped = textureSample(normalmap, material_sampler, material_uv(input.texcoord)).xyz * 2.0 - vec3<f32>(1.0);
    let n = safe_normalize(input.normal, vec3<f32>(0.0, 0.0, 1.0));
    let t_raw = input.tangent - n * dot(n, input.tangent);
    let t = safe_normalize(t_raw, vec3<f32>(0.0));
    let b = cross(n, t);
    let perturbed = safe_normalize(t * mapped.x + b * mapped.y + n * mapped.z, n);
    return select(perturbed, n, length(t_raw) <= 1e-8);
}

fn albedo(input: SurfaceInput) -> vec4<f32> {
    return textureSample(colormap, material_sampler, material_uv(input.texcoord)) * draw.color;
}

@fragment
fn fs_main(input: SurfaceInput) -> @location(0) vec4<f32> {
    let color = albedo(input);
    return shade_forward(color, surface_normal(input));
}

@fragment
fn fs_gbuffer(input: SurfaceInput) -> GBufferOutput {
    let color = albedo(input);
    return gbuffer(color, surface_normal(input), input.world_position);
}
"#;

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_solid_color_formula() {
        let record = MaterialRecord {
            diffuse: [0.5, 0.2, 1.0],
            emissive: [1.0, 0.0, 0.5],
            ..Default::default()
        };
        assert_eq!(record.solid_color(), Color::rgb(1.0, 0.2, 1.5));
    }

    #[test]
    fn test_program_selection() {
        let mut record = MaterialRecord::default();
        assert!(!record.needs_textured_program());
        record.normal_texture = Some("normal.png".into());
        assert!(record.needs_textured_program());
        record.normal_texture = None;
        record.diffuse_texture = Some("diffuse.png".into());
        assert!(record.needs_textured_program());
    }

    #[test]
    fn test_solid_material() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let record = MaterialRecord {
            diffuse: [0.5, 0.5, 0.5],
            emissive: [1.0, 1.0, 1.0],
            shininess: 32.0,
            ..Default::default()
        };
        let material = Material::new(&mut ctx, &record);

        assert!(material.program().is_usable());
        assert!(material.texture_group().is_none());
        match material.surface() {
            Surface::SolidColor { color } => assert_eq!(*color, Color::rgb(1.0, 1.0, 1.0)),
            Surface::Textured { .. } => panic!("expected a solid material"),
        }

        assert!(material.activate(&mut ctx));
        assert_eq!(ctx.draw_color(), Color::rgb(1.0, 1.0, 1.0));
        material.deactivate(&mut ctx);
        assert_eq!(ctx.draw_color(), Color::WHITE);
    }

    #[test]
    fn test_missing_colormap_stays_textured() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let record = MaterialRecord {
            diffuse_texture: Some("/nonexistent/diffuse.png".into()),
            ..Default::default()
        };
        let material = Material::new(&mut ctx, &record);

        assert!(matches!(material.surface(), Surface::Textured { colormap: None }));
        assert!(material.program().binding("colormap").is_some());
        assert!(material.texture_group().is_some());
        assert!(material.activate(&mut ctx));
        assert_eq!(ctx.texture_unit(0), None);
        material.deactivate(&mut ctx);
    }

    #[test]
    fn test_material_sources_compile() {
        use crate::resources::shader::{Shader, ShaderStage};

        let vertex = Shader::from_source("vertex", ShaderStage::Vertex, &with_draw_uniforms(GENERIC_VERTEX));
        assert!(vertex.has_entry_point("vs_main"));
        for body in [SOLID_FRAGMENT, TEXTURED_FRAGMENT] {
            let fragment = Shader::from_source("fragment", ShaderStage::Fragment, &material_fragment(body));
            assert!(fragment.has_entry_point("fs_main"));
            assert!(fragment.has_entry_point("fs_gbuffer"));
        }
    }
}
