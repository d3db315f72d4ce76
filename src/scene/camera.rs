//! Camera system
//!
//! A camera renders a scene from `eye`, optionally turning towards a tracked
//! instance. Forward cameras draw straight into the output; deferred cameras
//! go through a [`DeferredPipeline`].

use crate::backend::*;
use crate::context::{RenderContext, RenderTarget};
use crate::pipeline::{BloomSettings, DeferredPipeline};
use crate::resources::Texture;
use crate::scene::{Color, InstanceId, ObjectArena, Scene};
use glam::{Mat4, Vec3, Vec4};
use std::f32::consts::{FRAC_PI_2, PI};

/// Vertical half-extent of the frustum at the near plane
pub const FRUSTUM_HALF_HEIGHT: f32 = 0.4;
pub const NEAR_PLANE: f32 = 1.0;
pub const FAR_PLANE: f32 = 1000.0;

/// Direction angle of `(x, y)` in radians, measured from +y towards +x.
///
/// Zero `y` gives 0, π/2 or 3π/2 by the sign of `x`; NaN inputs give 0.
pub fn angle(x: f32, y: f32) -> f32 {
    if y == 0.0 {
        if x == 0.0 {
            0.0
        } else if x > 0.0 {
            FRAC_PI_2
        } else if x < 0.0 {
            3.0 * FRAC_PI_2
        } else {
            0.0
        }
    } else if y > 0.0 {
        let a = (x / y).atan();
        if a.is_nan() {
            0.0
        } else {
            a
        }
    } else if y < 0.0 {
        let a = (x / y).atan();
        if a.is_nan() {
            0.0
        } else {
            a + PI
        }
    } else {
        0.0
    }
}

/// Perspective frustum mapping depth to wgpu's [0, 1] range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub near: f32,
    pub far: f32,
}

impl Frustum {
    /// The camera frustum for a `width`×`height` viewport
    pub fn for_viewport(width: u32, height: u32) -> Self {
        let aspect = if height == 0 { 1.0 } else { width as f32 / height as f32 };
        let half_width = FRUSTUM_HALF_HEIGHT * aspect;
        Self {
            left: -half_width,
            right: half_width,
            bottom: -FRUSTUM_HALF_HEIGHT,
            top: FRUSTUM_HALF_HEIGHT,
            near: NEAR_PLANE,
            far: FAR_PLANE,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        let Self {
            left: l,
            right: r,
            bottom: b,
            top: t,
            near: n,
            far: f,
        } = *self;
        Mat4::from_cols(
            Vec4::new(2.0 * n / (r - l), 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0 * n / (t - b), 0.0, 0.0),
            Vec4::new((r + l) / (r - l), (t + b) / (t - b), f / (n - f), -1.0),
            Vec4::new(0.0, 0.0, n * f / (n - f), 0.0),
        )
    }
}

/// `(tilt, yaw)` turning a camera that looks down -z towards `direction`
pub fn look_angles(direction: Vec3) -> (f32, f32) {
    let horizontal = (direction.x * direction.x + direction.z * direction.z).sqrt();
    let tilt = angle(-direction.y, horizontal);
    let yaw = angle(direction.x, -direction.z);
    (tilt, yaw)
}

/// Move `eye` towards `target` until it is at most `max_distance` away.
/// A zero `max_distance` disables the clamp.
pub fn clamp_distance(eye: Vec3, target: Vec3, max_distance: f32) -> Vec3 {
    let direction = target - eye;
    let distance = direction.length();
    if max_distance > 0.0 && distance > max_distance {
        eye + direction * ((distance - max_distance) / distance)
    } else {
        eye
    }
}

/// How a camera turns a scene into pixels
pub enum CameraMode {
    Forward,
    Deferred(Box<DeferredPipeline>),
}

pub struct Camera {
    width: u32,
    height: u32,
    pub eye: Vec3,
    pub track: Option<InstanceId>,
    /// Furthest the eye may be from the tracked instance, 0 for no limit
    pub max_distance: f32,
    /// Stored for configuration compatibility, has no effect on rendering
    pub lock_y_axis: bool,
    pub clear_color: Color,
    mode: CameraMode,
    depth: Option<Texture>,
}

impl Camera {
    /// A forward camera at the origin looking down -z
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            eye: Vec3::ZERO,
            track: None,
            max_distance: 0.0,
            lock_y_axis: false,
            clear_color: Color::BLACK,
            mode: CameraMode::Forward,
            depth: None,
        }
    }

    /// A camera rendering through the deferred path
    pub fn deferred<B: GraphicsBackend>(ctx: &mut RenderContext<B>, width: u32, height: u32, bloom: BloomSettings) -> Self {
        let mut camera = Self::new(width, height);
        camera.mode = CameraMode::Deferred(Box::new(DeferredPipeline::new(ctx, width, height, bloom)));
        camera
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mode(&self) -> &CameraMode {
        &self.mode
    }

    pub fn mode_mut(&mut self) -> &mut CameraMode {
        &mut self.mode
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.mode, CameraMode::Deferred(_))
    }

    /// Change the viewport size and rebuild size-dependent targets
    /// Resize the viewport and any deferred targets. A zero size, as sent
    /// for a minimized window, is ignored.
    pub fn set_resolution<B: GraphicsBackend>(&mut self, ctx: &mut RenderContext<B>, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::debug!("camera: ignoring {}x{} viewport", width, height);
            return;
        }
        self.width = width;
        self.height = height;
        self.depth = None;
        if let CameraMode::Deferred(pipeline) = &mut self.mode {
            pipeline.set_resolution(ctx, width, height);
        }
    }

    pub fn projection(&self) -> Mat4 {
        Frustum::for_viewport(self.width, self.height).matrix()
    }

    /// Apply the distance clamp towards the tracked instance and return the
    /// view matrix
    pub fn update_view(&mut self, scene: &Scene) -> Mat4 {
        let target = self
            .track
            .and_then(|id| scene.instance(id))
            .map(|instance| instance.position);

        let Some(target) = target else {
            return Mat4::from_translation(-self.eye);
        };

        self.eye = clamp_distance(self.eye, target, self.max_distance);
        let (tilt, yaw) = look_angles(target - self.eye);
        Mat4::from_rotation_x(tilt) * Mat4::from_rotation_y(yaw) * Mat4::from_translation(-self.eye)
    }

    /// Render `scene` into `output`
    pub fn render<B: GraphicsBackend>(
        &mut self,
        ctx: &mut RenderContext<B>,
        objects: &mut ObjectArena,
        scene: &Scene,
        output: RenderTarget,
    ) {
        let view = self.update_view(scene);
        ctx.set_projection(self.projection());
        ctx.set_view(view);
        ctx.load_identity();

        match &mut self.mode {
            CameraMode::Forward => {
                let target = if output.depth.is_some() {
                    output
                } else {
                    let depth = forward_depth(&mut self.depth, ctx, output.width, output.height);
                    match depth {
                        Some(view) => output.with_depth(view, TextureFormat::Depth32Float),
                        None => output,
                    }
                };
                ctx.bind_target(target, Some(self.clear_color));
                ctx.set_depth_test(true);
                ctx.set_blend(None);
                scene.draw(ctx, objects);
                ctx.unbind_target();
            }
            CameraMode::Deferred(pipeline) => {
                pipeline.render(ctx, objects, scene, self.eye, output, self.clear_color);
            }
        }
    }
}

/// Depth attachment for forward rendering into a target that has none
fn forward_depth<B: GraphicsBackend>(
    slot: &mut Option<Texture>,
    ctx: &mut RenderContext<B>,
    width: u32,
    height: u32,
) -> Option<TextureViewHandle> {
    let stale = slot
        .as_ref()
        .map_or(true, |t| (t.width(), t.height()) != (width, height));
    if stale {
        *slot = Some(Texture::new(ctx, "camera depth", width, height, TextureFormat::Depth32Float));
    }
    slot.as_ref()?.view()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Instance, ObjectId};

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_angle_exact_values() {
        assert_eq!(angle(0.0, 0.0), 0.0);
        assert_eq!(angle(1.0, 0.0), FRAC_PI_2);
        assert_eq!(angle(-1.0, 0.0), 3.0 * FRAC_PI_2);
        assert_eq!(angle(0.0, 1.0), 0.0);
        assert!(close(angle(1.0, 1.0), PI / 4.0));
        assert!(close(angle(0.0, -1.0), PI));
        assert!(close(angle(1.0, -1.0), 3.0 * PI / 4.0));
        assert_eq!(angle(f32::NAN, 1.0), 0.0);
        assert_eq!(angle(1.0, f32::NAN), 0.0);
    }

    #[test]
    fn test_yaw_towards_axes() {
        let (tilt, yaw) = look_angles(Vec3::new(0.0, 0.0, -5.0));
        assert_eq!((tilt, yaw), (0.0, 0.0));
        let (_, yaw) = look_angles(Vec3::new(0.0, 0.0, 5.0));
        assert!(close(yaw, PI));
    }

    #[test]
    fn test_view_looks_at_target() {
        let mut scene = Scene::new();
        let id = scene.add_instance(Instance::new(ObjectId(0), Vec3::new(3.0, 2.0, -4.0), Vec3::ZERO));
        let mut camera = Camera::new(640, 480);
        camera.eye = Vec3::new(1.0, 0.0, 2.0);
        camera.track = Some(id);

        let view = camera.update_view(&scene);
        let p = view.transform_point3(Vec3::new(3.0, 2.0, -4.0));
        assert!(close(p.x, 0.0) && close(p.y, 0.0));
        assert!(p.z < 0.0);
    }

    #[test]
    fn test_distance_clamp() {
        let eye = clamp_distance(Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO, 5.0);
        assert!(close(eye.length(), 5.0));
        assert_eq!(clamp_distance(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, 5.0), Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(clamp_distance(Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO, 0.0), Vec3::new(0.0, 0.0, 20.0));
    }

    #[test]
    fn test_untracked_view_is_translation() {
        let mut camera = Camera::new(4, 4);
        camera.eye = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(camera.update_view(&Scene::new()), Mat4::from_translation(-camera.eye));
    }

    #[test]
    fn test_frustum_depth_range() {
        let projection = Frustum::for_viewport(800, 400).matrix();
        let near = projection * Vec4::new(0.0, 0.0, -NEAR_PLANE, 1.0);
        let far = projection * Vec4::new(0.0, 0.0, -FAR_PLANE, 1.0);
        assert!(close(near.z / near.w, 0.0));
        assert!(close(far.z / far.w, 1.0));

        let corner = projection * Vec4::new(0.8, 0.4, -1.0, 1.0);
        assert!(close(corner.x / corner.w, 1.0));
        assert!(close(corner.y / corner.w, 1.0));
    }

    #[cfg(feature = "headless")]
    #[test]
    fn test_zero_resolution_is_ignored() {
        use crate::backend::headless::HeadlessBackend;

        let mut ctx = RenderContext::new(HeadlessBackend::new(16, 8));
        let mut camera = Camera::deferred(&mut ctx, 16, 8, BloomSettings::default());
        camera.set_resolution(&mut ctx, 0, 0);

        assert_eq!((camera.width(), camera.height()), (16, 8));
        let CameraMode::Deferred(pipeline) = camera.mode() else {
            panic!("camera lost its deferred pipeline");
        };
        assert_eq!((pipeline.width(), pipeline.height()), (16, 8));
        assert_eq!(ctx.check_errors("resize"), 0);
    }
}
