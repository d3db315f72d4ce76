//! Scene Renderer - a small real-time 3D scene renderer
//!
//! Meshes with materials are imported into an [`ObjectArena`], placed in a
//! [`Scene`] as instances and drawn by a [`Camera`], either straight into the
//! output (forward) or through a geometry buffer, per-light accumulation and
//! bloom (deferred).
//!
//! All GPU work goes through an explicit [`RenderContext`] over a
//! [`GraphicsBackend`]:
//! - **wgpu**: the real GPU backend
//! - **headless**: records commands in memory, for tests and offline runs
//!
//! [`ObjectArena`]: scene::ObjectArena
//! [`Scene`]: scene::Scene
//! [`Camera`]: scene::Camera
//! [`GraphicsBackend`]: backend::GraphicsBackend

pub mod backend;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod window;

pub use context::{RenderContext, RenderTarget};
pub use error::{ImportError, RenderError, RenderResult, SceneError, ShaderError};
pub use pipeline::BloomSettings;
pub use scene::Color;
pub use window::Window;

// Re-export wgpu backend for direct access
pub use backend::wgpu_backend::WgpuBackend;

#[cfg(feature = "headless")]
pub use backend::headless::HeadlessBackend;

/// Which camera path renders the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Draw straight into the output target
    Forward,
    /// Geometry buffer, per-light accumulation and bloom
    #[default]
    Deferred,
}

/// Configuration for a renderer window and its camera
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    pub mode: RenderMode,
    pub clear_color: Color,
    pub bloom: BloomSettings,
    /// Furthest the camera may trail its target, 0 for no limit
    pub max_distance: f32,
    /// Kept for configuration compatibility, has no effect
    pub lock_y_axis: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Scene Renderer".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            mode: RenderMode::default(),
            clear_color: Color::BLACK,
            bloom: BloomSettings::default(),
            max_distance: 0.0,
            lock_y_axis: false,
        }
    }
}

impl RendererConfig {
    /// A camera for this configuration
    pub fn camera<B: backend::GraphicsBackend>(&self, ctx: &mut RenderContext<B>) -> scene::Camera {
        let mut camera = match self.mode {
            RenderMode::Forward => scene::Camera::new(self.width, self.height),
            RenderMode::Deferred => scene::Camera::deferred(ctx, self.width, self.height, self.bloom),
        };
        camera.clear_color = self.clear_color;
        camera.max_distance = self.max_distance;
        camera.lock_y_axis = self.lock_y_axis;
        camera
    }
}

/// Initialize `env_logger` with an `info` default filter
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;

    #[test]
    fn test_config_builds_matching_camera() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let config = RendererConfig {
            width: 16,
            height: 8,
            mode: RenderMode::Forward,
            max_distance: 12.0,
            ..Default::default()
        };
        let camera = config.camera(&mut ctx);
        assert!(!camera.is_deferred());
        assert_eq!(camera.max_distance, 12.0);

        let deferred = RendererConfig {
            width: 32,
            height: 16,
            ..Default::default()
        }
        .camera(&mut ctx);
        assert!(deferred.is_deferred());
        assert_eq!((deferred.width(), deferred.height()), (32, 16));
    }
}
