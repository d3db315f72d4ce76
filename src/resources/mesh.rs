//! Mesh data and drawable meshes

use crate::backend::*;
use crate::context::RenderContext;
use crate::resources::{Material, VertexBuffer};
use glam::{Vec2, Vec3};

/// Bytes of one `vec3` vertex attribute
const ATTRIBUTE_SIZE: u64 = 12;
/// Attribute blocks per vertex buffer: positions, normals, texcoords, tangents
const ATTRIBUTE_BLOCKS: u64 = 4;

/// A de-indexed triangle stream as produced by a scene importer
#[derive(Debug, Clone, Default)]
pub struct RawMesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// UVs in `xy`, `z` unused
    pub texcoords: Vec<Vec3>,
    pub tangents: Vec<Vec3>,
    pub vertex_count: usize,
    /// Faces that had to be split into triangles
    pub non_triangle_faces: usize,
    pub material_index: Option<usize>,
}

impl RawMesh {
    /// Expand an indexed triangle list into a raw stream and compute tangents.
    /// Empty `normals` or `uvs` leave those blocks empty.
    pub fn from_indexed(name: &str, positions: &[Vec3], normals: &[Vec3], uvs: &[Vec2], indices: &[u32]) -> Self {
        let pick3 = |data: &[Vec3]| -> Vec<Vec3> {
            if data.is_empty() {
                return Vec::new();
            }
            indices
                .iter()
                .map(|&i| data.get(i as usize).copied().unwrap_or(Vec3::ZERO))
                .collect()
        };

        let texcoords: Vec<Vec3> = if uvs.is_empty() {
            Vec::new()
        } else {
            indices
                .iter()
                .map(|&i| uvs.get(i as usize).copied().unwrap_or(Vec2::ZERO).extend(0.0))
                .collect()
        };

        let positions = pick3(positions);
        let tangents = if texcoords.is_empty() {
            Vec::new()
        } else {
            triangle_tangents(&positions, &texcoords)
        };

        Self {
            name: name.to_string(),
            vertex_count: indices.len(),
            positions,
            normals: pick3(normals),
            texcoords,
            tangents,
            non_triangle_faces: 0,
            material_index: None,
        }
    }

    /// Unit cube centered at the origin, 36 vertices
    pub fn cube() -> Self {
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];

        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut uvs = Vec::new();
        let mut indices = Vec::new();
        for (normal, right, up) in faces {
            let base = positions.len() as u32;
            for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let p = normal * 0.5 + right * (u - 0.5) + up * (v - 0.5);
                positions.push(p);
                normals.push(normal);
                uvs.push(Vec2::new(u, v));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::from_indexed("cube", &positions, &normals, &uvs, &indices)
    }

    /// Flat square in the XZ plane facing +Y
    pub fn plane(size: f32) -> Self {
        let h = size * 0.5;
        let positions = [
            Vec3::new(-h, 0.0, h),
            Vec3::new(h, 0.0, h),
            Vec3::new(h, 0.0, -h),
            Vec3::new(-h, 0.0, -h),
        ];
        let uvs = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ];
        Self::from_indexed("plane", &positions, &[Vec3::Y; 4], &uvs, &[0, 1, 2, 0, 2, 3])
    }

    pub fn triangle_count(&self) -> usize {
        self.vertex_count / 3
    }
}

/// Per-triangle tangents from UV deltas. Triangles with degenerate UVs get
/// a zero tangent, which shaders treat as "no tangent frame".
pub fn triangle_tangents(positions: &[Vec3], texcoords: &[Vec3]) -> Vec<Vec3> {
    let mut tangents = vec![Vec3::ZERO; positions.len()];
    let triangles = positions.len().min(texcoords.len()) / 3;

    for t in 0..triangles {
        let i = t * 3;
        let e1 = positions[i + 1] - positions[i];
        let e2 = positions[i + 2] - positions[i];
        let d1 = texcoords[i + 1] - texcoords[i];
        let d2 = texcoords[i + 2] - texcoords[i];

        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() <= f32::EPSILON {
            continue;
        }
        let tangent = ((e1 * d2.y - e2 * d1.y) / det).normalize_or_zero();
        tangents[i..i + 3].fill(tangent);
    }
    tangents
}

/// One drawable batch: a vertex buffer with four attribute blocks and a material
pub struct Mesh {
    name: String,
    vertex_count: u32,
    buffer: VertexBuffer,
    material: Material,
}

impl Mesh {
    pub fn new<B: GraphicsBackend>(ctx: &mut RenderContext<B>, raw: &RawMesh, material: Material) -> Self {
        log::info!("mesh {}: {} vertices", raw.name, raw.vertex_count);
        if raw.non_triangle_faces > 0 {
            log::warn!(
                "mesh {}: {} faces were not triangles and have been split",
                raw.name,
                raw.non_triangle_faces
            );
        }

        let count = raw.vertex_count;
        let block = count as u64 * ATTRIBUTE_SIZE;
        let buffer = VertexBuffer::new(ctx, &raw.name, block * ATTRIBUTE_BLOCKS);

        let blocks = [&raw.positions, &raw.normals, &raw.texcoords, &raw.tangents];
        for (index, data) in blocks.into_iter().enumerate() {
            let mut values = data.clone();
            values.resize(count, Vec3::ZERO);
            let floats: Vec<[f32; 3]> = values.iter().map(|v| v.to_array()).collect();
            buffer.write(ctx, index as u64 * block, bytemuck::cast_slice(&floats));
        }

        Self {
            name: raw.name.clone(),
            vertex_count: count as u32,
            buffer,
            material,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn buffer(&self) -> &VertexBuffer {
        &self.buffer
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn material_mut(&mut self) -> &mut Material {
        &mut self.material
    }

    /// Draw with the mesh material. Streams the program does not declare,
    /// such as `in_tangent`, are not bound.
    pub fn draw<B: GraphicsBackend>(&mut self, ctx: &mut RenderContext<B>) {
        if self.vertex_count == 0 {
            return;
        }
        let Some(buffer) = self.buffer.handle() else {
            return;
        };
        if !self.material.activate(ctx) {
            return;
        }

        let block = self.vertex_count as u64 * ATTRIBUTE_SIZE;
        let streams: Vec<(BufferHandle, u64)> = self
            .material
            .program()
            .vertex_streams()
            .into_iter()
            .map(|(stream, _location)| (buffer, stream as u64 * block))
            .collect();

        let textures = self.material.texture_group();
        ctx.draw_streams(self.material.program_mut(), &streams, textures, self.vertex_count);
        self.material.deactivate(ctx);
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, RecordedCommand};
    use crate::context::RenderTarget;
    use crate::resources::{MaterialRecord, Texture};

    #[test]
    fn test_cube_stream() {
        let cube = RawMesh::cube();
        assert_eq!(cube.vertex_count, 36);
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.positions.len(), 36);
        assert_eq!(cube.tangents.len(), 36);
        for (normal, tangent) in cube.normals.iter().zip(&cube.tangents) {
            assert!((tangent.length() - 1.0).abs() < 1e-5);
            assert!(normal.dot(*tangent).abs() < 1e-5);
        }
    }

    #[test]
    fn test_degenerate_uvs_give_zero_tangent() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let texcoords = [Vec3::ZERO; 3];
        assert_eq!(triangle_tangents(&positions, &texcoords), vec![Vec3::ZERO; 3]);
    }

    #[test]
    fn test_buffer_layout() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let mut raw = RawMesh::plane(2.0);
        raw.normals.clear();
        let material = Material::new(&mut ctx, &MaterialRecord::default());
        let mesh = Mesh::new(&mut ctx, &raw, material);

        assert_eq!(mesh.buffer().size(), 6 * 4 * 12);
        let handle = mesh.buffer().handle().unwrap();
        let contents = ctx.backend().buffer_contents(handle).unwrap();
        let floats: Vec<f32> = contents
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(&floats[0..3], &[-1.0, 0.0, 1.0]);
        // missing normals are zero filled
        assert!(floats[18..36].iter().all(|f| *f == 0.0));
    }

    #[test]
    fn test_missing_tangent_input_skips_stream() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let frame_target = Texture::new(&mut ctx, "target", 8, 8, TextureFormat::Rgba8Unorm);
        let material = Material::new(&mut ctx, &MaterialRecord::default());
        assert!(material.program().vertex_input("in_tangent").is_some());

        // A vertex shader without in_tangent binds three streams
        let vertex = crate::resources::shaders::with_draw_uniforms(
            r#"
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
) -> SurfaceOutput {
    var out: SurfaceOutput;
    out.clip_position = draw.view_proj * draw.model * vec4<f32>(in_position, 1.0);
    out.world_position = in_position;
    out.normal = in_normal;
    out.texcoord = in_texcoord.xy;
    out.tangent = vec3<f32>(0.0);
    return out;
}
"#,
        );
        let fragment = crate::resources::material::material_fragment(crate::resources::material::SOLID_FRAGMENT);
        let program = crate::resources::Program::from_sources(
            &mut ctx,
            ("no_tangent", vertex.as_str()),
            ("solid", fragment.as_str()),
        );
        let plain = Material::with_program(&mut ctx, &MaterialRecord::default(), program);
        assert!(plain.program().vertex_input("in_tangent").is_none());

        let raw = RawMesh::cube();
        let mut with_tangents = Mesh::new(&mut ctx, &raw, material);
        let mut without_tangents = Mesh::new(&mut ctx, &raw, plain);

        ctx.bind_target(
            RenderTarget {
                color: vec![(frame_target.view().unwrap(), frame_target.format())],
                depth: None,
                width: 8,
                height: 8,
            },
            None,
        );
        ctx.backend_mut().clear_commands();
        with_tangents.draw(&mut ctx);
        let bound = |commands: &[RecordedCommand]| {
            commands
                .iter()
                .filter(|c| matches!(c, RecordedCommand::SetVertexBuffer { .. }))
                .count()
        };
        assert_eq!(bound(ctx.backend().commands()), 4);

        ctx.backend_mut().clear_commands();
        without_tangents.draw(&mut ctx);
        assert_eq!(bound(ctx.backend().commands()), 3);
        assert_eq!(ctx.backend().draw_count(), 1);
        ctx.unbind_target();
    }

    #[test]
    fn test_zero_vertex_mesh_issues_no_draw() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let material = Material::new(&mut ctx, &MaterialRecord::default());
        let mut mesh = Mesh::new(&mut ctx, &RawMesh::default(), material);
        mesh.draw(&mut ctx);
        assert_eq!(ctx.backend().draw_count(), 0);
        assert!(mesh.buffer().handle().is_none());
    }
}
