//! Scene management
//!
//! Objects live in an [`ObjectArena`]; a [`Scene`] places them as instances
//! and holds the lights. Cameras draw a scene per call and never keep it.

mod camera;
mod color;
mod instance;
mod light;
mod object;

pub use camera::*;
pub use color::*;
pub use instance::*;
pub use light::*;
pub use object::*;

use crate::backend::GraphicsBackend;
use crate::context::RenderContext;

/// Index of an [`Instance`] in its [`Scene`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(usize);

/// Instances in insertion order plus the point lights
#[derive(Debug, Default)]
pub struct Scene {
    instances: Vec<Instance>,
    lights: Vec<Light>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&mut self, instance: Instance) -> InstanceId {
        self.instances.push(instance);
        InstanceId(self.instances.len() - 1)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.0)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.instances.get_mut(id.0)
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn lights_mut(&mut self) -> &mut [Light] {
        &mut self.lights
    }

    /// How many instances place `object`
    pub fn references(&self, object: ObjectId) -> usize {
        self.instances.iter().filter(|i| i.object == object).count()
    }

    /// Draw every instance in insertion order
    pub fn draw<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>, objects: &mut ObjectArena) {
        for instance in &self.instances {
            instance.draw(ctx, objects);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_instances_keep_insertion_order() {
        let mut scene = Scene::new();
        let a = scene.add_instance(Instance::new(ObjectId(3), Vec3::ZERO, Vec3::ZERO));
        let b = scene.add_instance(Instance::new(ObjectId(1), Vec3::X, Vec3::ZERO));

        assert_eq!(scene.instances()[0].object, ObjectId(3));
        assert_eq!(scene.instances()[1].object, ObjectId(1));
        scene.instance_mut(b).unwrap().position = Vec3::Y;
        assert_eq!(scene.instance(b).unwrap().position, Vec3::Y);
        assert_eq!(scene.instance(a).unwrap().position, Vec3::ZERO);
        assert_eq!(scene.references(ObjectId(1)), 1);
        assert_eq!(scene.references(ObjectId(2)), 0);
    }
}
