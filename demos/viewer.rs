//! # Viewer
//!
//! Loads an OBJ model (or a cube when none is given), places one instance and
//! two lights, and orbits the camera around it.
//!
//! ```text
//! cargo run --example viewer -- path/to/model.obj --mode forward
//! ```

use clap::Parser;
use glam::Vec3;
use scene_renderer::backend::GraphicsBackend;
use scene_renderer::resources::{MaterialRecord, ObjImporter, RawMesh};
use scene_renderer::scene::{Camera, Instance, InstanceId, Light, Object, ObjectArena, Scene};
use scene_renderer::window::{self, Frame, Window};
use scene_renderer::{BloomSettings, Color, RenderContext, RenderMode, RendererConfig, WgpuBackend};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliMode {
    Forward,
    /// Geometry buffer, per-light accumulation and bloom
    #[default]
    Deferred,
}

/// Scene renderer viewer
#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Render an OBJ model with a forward or deferred camera")]
struct Args {
    /// OBJ file to load; a cube is shown when omitted
    model: Option<PathBuf>,

    /// Camera path
    #[arg(long, default_value = "deferred", value_enum)]
    mode: CliMode,

    /// Initial window width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Disable vertical sync (may cause tearing).
    #[arg(long)]
    no_vsync: bool,

    /// Distance the camera orbits at
    #[arg(long, default_value = "8.0")]
    orbit: f32,

    /// Furthest the camera may be from the model, 0 for no limit
    #[arg(long, default_value = "0.0")]
    max_distance: f32,

    #[arg(long, default_value = "1.0")]
    bloom_threshold: f32,

    #[arg(long, default_value = "0.5")]
    bloom_intensity: f32,

    #[arg(long, default_value = "2")]
    bloom_radius: u32,

    /// Exit after rendering N frames (useful for testing).
    #[arg(long)]
    max_frames: Option<u64>,
}

impl Args {
    fn config(&self) -> RendererConfig {
        RendererConfig {
            title: "Scene Renderer Viewer".to_string(),
            width: self.width,
            height: self.height,
            vsync: !self.no_vsync,
            mode: match self.mode {
                CliMode::Forward => RenderMode::Forward,
                CliMode::Deferred => RenderMode::Deferred,
            },
            clear_color: Color::rgb(0.05, 0.05, 0.08),
            bloom: BloomSettings {
                threshold: self.bloom_threshold,
                intensity: self.bloom_intensity,
                radius: self.bloom_radius,
            },
            max_distance: self.max_distance,
            lock_y_axis: false,
        }
    }
}

struct Viewer {
    ctx: RenderContext<WgpuBackend>,
    objects: ObjectArena,
    scene: Scene,
    camera: Camera,
    model: InstanceId,
    orbit: f32,
    frame: u64,
    max_frames: Option<u64>,
}

impl Viewer {
    fn new(window: &Window, args: &Args, config: &RendererConfig) -> Option<Self> {
        let backend = match WgpuBackend::new(window.window_arc(), config.vsync) {
            Ok(backend) => backend,
            Err(e) => {
                log::error!("failed to initialize wgpu: {}", e);
                return None;
            }
        };
        let mut ctx = RenderContext::new(backend);

        let object = match &args.model {
            Some(path) => Object::load(&mut ctx, &ObjImporter, path),
            None => Object::from_raw(
                &mut ctx,
                &RawMesh::cube(),
                &MaterialRecord {
                    diffuse: [0.8, 0.3, 0.2],
                    shininess: 16.0,
                    ..Default::default()
                },
            ),
        };
        let mut objects = ObjectArena::new();
        let object = objects.insert(object);

        let mut scene = Scene::new();
        let model = scene.add_instance(Instance::new(object, Vec3::ZERO, Vec3::ZERO));
        scene.add_light(Light::new(Vec3::new(4.0, 4.0, 4.0)).with_size(20.0));
        scene.add_light(
            Light::new(Vec3::new(-4.0, 2.0, -3.0))
                .with_size(15.0)
                .with_color(Color::rgb(0.4, 0.5, 1.0)),
        );

        let mut camera = config.camera(&mut ctx);
        camera.track = Some(model);
        camera.eye = Vec3::new(0.0, 3.0, args.orbit);

        Some(Self {
            ctx,
            objects,
            scene,
            camera,
            model,
            orbit: args.orbit,
            frame: 0,
            max_frames: args.max_frames,
        })
    }

    fn render_frame(&mut self, window: &mut Window) -> Frame {
        if let Some((width, height)) = window.take_resize().filter(|(w, h)| *w > 0 && *h > 0) {
            self.ctx.backend_mut().resize(width, height);
            let (width, height) = self.ctx.backend().surface_size();
            self.camera.set_resolution(&mut self.ctx, width, height);
        }

        let t = self.frame as f32 * 0.01;
        self.camera.eye = Vec3::new(t.sin() * self.orbit, 3.0, t.cos() * self.orbit);
        if let Some(instance) = self.scene.instance_mut(self.model) {
            instance.rotation.y = (self.frame as f32 * 0.5) % 360.0;
        }

        let output = match self.ctx.begin_frame() {
            Ok(output) => output,
            Err(e) => {
                log::warn!("skipping frame: {}", e);
                return Frame::Continue;
            }
        };
        self.camera.render(&mut self.ctx, &mut self.objects, &self.scene, output);
        if let Err(e) = self.ctx.end_frame() {
            log::warn!("present failed: {}", e);
        }
        self.ctx.check_errors("frame");
        self.frame += 1;

        if self.max_frames.is_some_and(|max| self.frame >= max) {
            log::info!("rendered {} frames, exiting", self.frame);
            self.ctx.shutdown();
            return Frame::Exit;
        }
        Frame::Continue
    }
}

fn main() {
    scene_renderer::init_logging();
    let args = Args::parse();
    let config = args.config();
    log::info!("starting viewer in {:?} mode", config.mode);

    let result = window::run(
        &config,
        |window| Viewer::new(window, &args, &config),
        |window, viewer| match viewer {
            Some(viewer) => viewer.render_frame(window),
            None => Frame::Exit,
        },
    );
    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
