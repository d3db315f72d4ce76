//! Placed copies of objects

use crate::backend::GraphicsBackend;
use crate::context::RenderContext;
use crate::scene::{ObjectArena, ObjectId};
use glam::{Mat4, Vec3};

/// An object placed in a scene
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub object: ObjectId,
    pub position: Vec3,
    /// Euler angles in degrees
    pub rotation: Vec3,
}

impl Instance {
    pub fn new(object: ObjectId, position: Vec3, rotation: Vec3) -> Self {
        Self {
            object,
            position,
            rotation,
        }
    }

    /// `T(position) · Rz · Ry · Rx`
    pub fn transform(&self) -> Mat4 {
        Mat4::from_translation(self.position)
            * Mat4::from_rotation_z(self.rotation.z.to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_x(self.rotation.x.to_radians())
    }

    pub fn draw<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>, objects: &mut ObjectArena) {
        let Some(object) = objects.get_mut(self.object) else {
            log::warn!("instance refers to released object {}", self.object.index());
            return;
        };
        ctx.push_matrix();
        ctx.multiply_matrix(self.transform());
        object.draw(ctx);
        ctx.pop_matrix();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(rotation: Vec3) -> Instance {
        Instance::new(ObjectId(0), Vec3::new(1.0, 2.0, 3.0), rotation)
    }

    #[test]
    fn test_translation_applies_last() {
        let t = instance(Vec3::new(0.0, 90.0, 0.0)).transform();
        let p = t.transform_point3(Vec3::X);
        assert!((p - Vec3::new(1.0, 2.0, 2.0)).length() < 1e-5);
    }

    #[test]
    fn test_rotation_order_is_not_commutative() {
        let xy = instance(Vec3::new(90.0, 90.0, 0.0)).transform();
        // Rx applied first: Y goes to Z, then Ry takes Z to X
        let p = xy.transform_vector3(Vec3::Y);
        assert!((p - Vec3::X).length() < 1e-5);

        let swapped = Mat4::from_rotation_x(90f32.to_radians()) * Mat4::from_rotation_y(90f32.to_radians());
        assert!((swapped.transform_vector3(Vec3::Y) - p).length() > 0.5);
    }

    #[test]
    fn test_x_and_z_rotations_do_not_commute() {
        let (x, z) = (30f32.to_radians(), 60f32.to_radians());
        let rotation = instance(Vec3::new(30.0, 0.0, 60.0)).transform();
        let z_then_x = Mat4::from_rotation_z(z) * Mat4::from_rotation_x(x);
        let x_then_z = Mat4::from_rotation_x(x) * Mat4::from_rotation_z(z);

        let v = Vec3::new(1.0, 1.0, 1.0);
        assert!((rotation.transform_vector3(v) - z_then_x.transform_vector3(v)).length() < 1e-5);
        assert!((rotation.transform_vector3(v) - x_then_z.transform_vector3(v)).length() > 1e-2);
    }
}
