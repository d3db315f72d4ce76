//! Imported models and the arena that owns them

use crate::backend::GraphicsBackend;
use crate::context::RenderContext;
use crate::error::SceneError;
use crate::resources::{Material, MaterialRecord, Mesh, RawMesh, SceneImporter};
use crate::scene::Scene;
use std::path::Path;

/// An imported model: meshes drawn in order
pub struct Object {
    name: String,
    meshes: Vec<Mesh>,
}

impl Object {
    pub fn new(name: &str, meshes: Vec<Mesh>) -> Self {
        Self {
            name: name.to_string(),
            meshes,
        }
    }

    /// Import `path` and build one mesh per imported mesh, each with its own
    /// material. Import failures are logged and give an empty object.
    pub fn load<B: GraphicsBackend, I: SceneImporter + ?Sized>(
        ctx: &mut RenderContext<B>,
        importer: &I,
        path: impl AsRef<Path>,
    ) -> Self {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let imported = match importer.import(path) {
            Ok(imported) => imported,
            Err(e) => {
                log::error!("{}", e);
                return Self::new(&name, Vec::new());
            }
        };

        let default_record = MaterialRecord::default();
        let meshes = imported
            .meshes
            .iter()
            .map(|raw| {
                let record = raw
                    .material_index
                    .and_then(|i| imported.materials.get(i))
                    .unwrap_or(&default_record);
                let material = Material::new(ctx, record);
                Mesh::new(ctx, raw, material)
            })
            .collect::<Vec<_>>();

        log::info!(
            "loaded {} ({} meshes, {} materials)",
            path.display(),
            meshes.len(),
            imported.materials.len()
        );
        Self::new(&name, meshes)
    }

    /// Single-mesh object from an in-memory mesh
    pub fn from_raw<B: GraphicsBackend>(ctx: &mut RenderContext<B>, raw: &RawMesh, record: &MaterialRecord) -> Self {
        let material = Material::new(ctx, record);
        let mesh = Mesh::new(ctx, raw, material);
        Self::new(&raw.name, vec![mesh])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn draw<B: GraphicsBackend>(&mut self, ctx: &mut RenderContext<B>) {
        for mesh in &mut self.meshes {
            mesh.draw(ctx);
        }
    }
}

/// Index of an [`Object`] in an [`ObjectArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub(crate) usize);

impl ObjectId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Owns every loaded object. Released slots are not reused.
#[derive(Default)]
pub struct ObjectArena {
    slots: Vec<Option<Object>>,
}

impl ObjectArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object: Object) -> ObjectId {
        self.slots.push(Some(object));
        ObjectId(self.slots.len() - 1)
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.slots.get_mut(id.0)?.as_mut()
    }

    /// Remove an object no instance in `scenes` refers to anymore
    pub fn release(&mut self, id: ObjectId, scenes: &[&Scene]) -> Result<Object, SceneError> {
        let references: usize = scenes.iter().map(|s| s.references(id)).sum();
        if references > 0 {
            return Err(SceneError::ObjectInUse(id.0, references));
        }
        self.slots
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(SceneError::UnknownObject(id.0))
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::resources::ObjImporter;
    use crate::scene::Instance;
    use glam::Vec3;

    #[test]
    fn test_failed_import_gives_empty_object() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let mut object = Object::load(&mut ctx, &ObjImporter, "/nonexistent/model.obj");
        assert!(object.is_empty());
        assert_eq!(object.name(), "model");
        object.draw(&mut ctx);
        assert_eq!(ctx.backend().draw_count(), 0);
    }

    #[test]
    fn test_release_refuses_while_referenced() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let mut arena = ObjectArena::new();
        let id = arena.insert(Object::from_raw(&mut ctx, &RawMesh::cube(), &MaterialRecord::default()));

        let mut scene = Scene::new();
        scene.add_instance(Instance::new(id, Vec3::ZERO, Vec3::ZERO));
        scene.add_instance(Instance::new(id, Vec3::X, Vec3::ZERO));

        assert_eq!(arena.release(id, &[&scene]).err(), Some(SceneError::ObjectInUse(0, 2)));
        assert!(arena.get(id).is_some());

        let empty = Scene::new();
        assert!(arena.release(id, &[&empty]).is_ok());
        assert!(arena.get(id).is_none());
        assert_eq!(arena.release(id, &[]).err(), Some(SceneError::UnknownObject(0)));
    }
}
