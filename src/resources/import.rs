//! Scene importers
//!
//! An importer turns a model file into raw triangle streams and material
//! records. [`ObjImporter`] reads Wavefront OBJ/MTL through `tobj`.

use crate::error::ImportError;
use crate::resources::{MaterialRecord, RawMesh};
use glam::{Vec2, Vec3};
use std::path::{Path, PathBuf};

/// Meshes and materials read from one model file
#[derive(Debug, Clone, Default)]
pub struct ImportedScene {
    pub meshes: Vec<RawMesh>,
    pub materials: Vec<MaterialRecord>,
}

/// Reads a model file into an [`ImportedScene`]
pub trait SceneImporter {
    fn import(&self, path: &Path) -> Result<ImportedScene, ImportError>;
}

/// Wavefront OBJ importer
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjImporter;

impl SceneImporter for ObjImporter {
    fn import(&self, path: &Path) -> Result<ImportedScene, ImportError> {
        let (models, materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                single_index: true,
                triangulate: false,
                ignore_points: true,
                ignore_lines: true,
                ..Default::default()
            },
        )
        .map_err(|e| ImportError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let materials = materials.unwrap_or_else(|e| {
            log::warn!("{}: no materials loaded: {}", path.display(), e);
            Vec::new()
        });
        if models.is_empty() {
            return Err(ImportError::EmptyScene(path.to_path_buf()));
        }

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let materials = materials
            .iter()
            .map(|m| material_record(m, base))
            .collect();
        let meshes = models.iter().map(raw_mesh).collect();

        Ok(ImportedScene { meshes, materials })
    }
}

fn material_record(mtl: &tobj::Material, base: &Path) -> MaterialRecord {
    let texture_path = |name: &Option<String>| -> Option<PathBuf> {
        name.as_ref()
            .filter(|n| !n.is_empty())
            .map(|n| base.join(n))
    };

    MaterialRecord {
        name: mtl.name.clone(),
        diffuse: mtl.diffuse.unwrap_or([1.0, 1.0, 1.0]),
        emissive: mtl.emissive.unwrap_or([0.0, 0.0, 0.0]),
        shininess: mtl.shininess.unwrap_or(0.0),
        diffuse_texture: texture_path(&mtl.diffuse_texture),
        normal_texture: texture_path(&mtl.normal_texture),
    }
}

/// Fan-triangulate polygons and de-index into a raw triangle stream
fn raw_mesh(model: &tobj::Model) -> RawMesh {
    let mesh = &model.mesh;

    let mut triangles = Vec::with_capacity(mesh.indices.len());
    let mut non_triangle_faces = 0;
    if mesh.face_arities.is_empty() {
        triangles.extend_from_slice(&mesh.indices);
    } else {
        let mut start = 0usize;
        for &arity in &mesh.face_arities {
            let arity = arity as usize;
            let Some(face) = mesh.indices.get(start..start + arity) else {
                break;
            };
            if arity != 3 {
                non_triangle_faces += 1;
            }
            for i in 1..arity.saturating_sub(1) {
                triangles.extend_from_slice(&[face[0], face[i], face[i + 1]]);
            }
            start += arity;
        }
    }

    let positions: Vec<Vec3> = mesh
        .positions
        .chunks_exact(3)
        .map(Vec3::from_slice)
        .collect();
    let normals: Vec<Vec3> = mesh.normals.chunks_exact(3).map(Vec3::from_slice).collect();
    let uvs: Vec<Vec2> = mesh.texcoords.chunks_exact(2).map(Vec2::from_slice).collect();

    let mut raw = RawMesh::from_indexed(&model.name, &positions, &normals, &uvs, &triangles);
    raw.non_triangle_faces = non_triangle_faces;
    raw.material_index = mesh.material_id;
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Color;
    use std::fs;

    #[test]
    fn test_emission_is_read_from_ke() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("glow.mtl"), "newmtl glow\nKd 0.5 0.5 0.5\nKe 1 1 1\n").unwrap();
        let path = dir.path().join("glow.obj");
        fs::write(&path, "mtllib glow.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl glow\nf 1 2 3\n").unwrap();

        let scene = ObjImporter.import(&path).unwrap();
        let record = &scene.materials[0];
        assert_eq!(record.emissive, [1.0, 1.0, 1.0]);
        assert_eq!(record.solid_color(), Color::rgb(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_quad_is_split_into_triangles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.obj");
        fs::write(
            &path,
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\nf 1/1 2/2 3/3 4/4\n",
        )
        .unwrap();

        let scene = ObjImporter.import(&path).unwrap();
        assert_eq!(scene.meshes.len(), 1);
        let mesh = &scene.meshes[0];
        assert_eq!(mesh.vertex_count, 6);
        assert_eq!(mesh.non_triangle_faces, 1);
        assert_eq!(mesh.positions[3], Vec3::ZERO);
        assert_eq!(mesh.positions[5], Vec3::new(0.0, 1.0, 0.0));
        assert!(mesh.normals.is_empty());
        assert!(mesh.tangents.iter().all(|t| (*t - Vec3::X).length() < 1e-5));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ObjImporter.import(Path::new("/nonexistent/model.obj"));
        assert!(matches!(result, Err(ImportError::Load { .. })));
    }
}
