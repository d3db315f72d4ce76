//! Shared WGSL snippets
//!
//! Every program reads its per-draw state from the `draw` uniform at
//! `@group(0) @binding(0)`; see [`DrawUniforms`](crate::context::DrawUniforms).

/// Declaration of the per-draw uniform block
pub const DRAW_UNIFORMS: &str = r#"
struct DrawUniforms {
    view_proj: mat4x4<f32>,
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    color: vec4<f32>,
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> draw: DrawUniforms;
"#;

/// Prefix `body` with the per-draw uniform declaration
pub fn with_draw_uniforms(body: &str) -> String {
    format!("{}{}", DRAW_UNIFORMS, body)
}

/// Quad covering `draw.params` (NDC `x0, y0, x1, y1`), six vertices, no buffers.
/// `uv` starts at the top-left like texel rows do.
const QUAD_VERTEX: &str = r#"
struct QuadOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> QuadOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 1.0),
    );
    let corner = corners[vertex_index];

    var out: QuadOutput;
    out.clip_position = vec4<f32>(mix(draw.params.xy, draw.params.zw, corner), 0.0, 1.0);
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    return out;
}
"#;

/// Input every quad fragment shader declares
pub const QUAD_FRAGMENT_INPUT: &str = r#"
struct QuadInput {
    @builtin(position) frag_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}
"#;

const TEXTURE_PASSTHROUGH: &str = r#"
@group(1) @binding(0) var texture: texture_2d<f32>;

@fragment
fn fs_main(input: QuadInput) -> @location(0) vec4<f32> {
    let size = vec2<i32>(textureDimensions(texture));
    let coord = clamp(vec2<i32>(input.uv * vec2<f32>(size)), vec2<i32>(0), size - vec2<i32>(1));
    return textureLoad(texture, coord, 0) * draw.color;
}
"#;

pub fn quad_vertex() -> String {
    with_draw_uniforms(QUAD_VERTEX)
}

/// Fragment half of a quad program: the draw uniform, the quad input and `body`
pub fn quad_fragment(body: &str) -> String {
    format!("{}{}{}", DRAW_UNIFORMS, QUAD_FRAGMENT_INPUT, body)
}

pub fn texture_passthrough() -> String {
    quad_fragment(TEXTURE_PASSTHROUGH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::shader::{Shader, ShaderStage};

    #[test]
    fn test_quad_program_sources_compile() {
        let vertex = Shader::from_source("quad_vertex", ShaderStage::Vertex, &quad_vertex());
        let fragment = Shader::from_source("texture_passthrough", ShaderStage::Fragment, &texture_passthrough());
        assert!(vertex.is_compiled());
        assert!(fragment.is_compiled());
        assert!(fragment.has_entry_point("fs_main"));
    }
}
