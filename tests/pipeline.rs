//! End-to-end rendering through the headless backend

mod common;

use common::{headless_context, write_quad_fixture};
use glam::Vec3;
use image::{Rgba, Rgba32FImage};
use rstest::rstest;
use scene_renderer::backend::{GraphicsBackend, TextureFormat};
use scene_renderer::pipeline::{bloom_reference, BloomEffect, BLOOM_FORMAT};
use scene_renderer::resources::{
    FramebufferObject, MaterialRecord, ObjImporter, Program, RawMesh, SceneImporter, Surface, Texture,
};
use scene_renderer::scene::{CameraMode, Instance, InstanceId, Light, Object, ObjectArena, Scene};
use scene_renderer::{BloomSettings, HeadlessBackend, RenderContext, RenderMode, RendererConfig};

/// One instance of `object` in front of the origin, lit by two lights
fn quad_scene(object: Object) -> (ObjectArena, Scene, InstanceId) {
    let mut objects = ObjectArena::new();
    let id = objects.insert(object);
    let mut scene = Scene::new();
    let instance = scene.add_instance(Instance::new(id, Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO));
    scene.add_light(Light::new(Vec3::new(2.0, 2.0, 0.0)).with_size(10.0));
    scene.add_light(Light::new(Vec3::new(-2.0, 1.0, -2.0)).with_size(10.0));
    (objects, scene, instance)
}

fn render_once(
    ctx: &mut RenderContext<HeadlessBackend>,
    mode: RenderMode,
    objects: &mut ObjectArena,
    scene: &Scene,
    track: InstanceId,
) {
    let config = RendererConfig {
        width: 32,
        height: 16,
        mode,
        ..Default::default()
    };
    let mut camera = config.camera(ctx);
    camera.eye = Vec3::new(0.0, 1.0, 3.0);
    camera.track = Some(track);
    let output = ctx.begin_frame().expect("headless frame");
    ctx.backend_mut().clear_commands();
    camera.render(ctx, objects, scene, output);
    ctx.end_frame().expect("headless present");
}

#[rstest]
#[case::forward(RenderMode::Forward, 1, 1)]
// geometry, two lights, bloom extract and composite, present
#[case::deferred(RenderMode::Deferred, 5, 6)]
fn test_imported_quad_renders(#[case] mode: RenderMode, #[case] passes: usize, #[case] draws: usize) {
    let dir = tempfile::tempdir().unwrap();
    let obj = write_quad_fixture(dir.path(), "Kd 0.8 0.2 0.2");
    let mut ctx = headless_context(32, 16);
    let object = Object::load(&mut ctx, &ObjImporter, &obj);
    assert_eq!(object.meshes().len(), 1);
    assert_eq!(object.meshes()[0].vertex_count(), 6);

    let (mut objects, scene, instance) = quad_scene(object);
    render_once(&mut ctx, mode, &mut objects, &scene, instance);

    assert_eq!(ctx.backend().pass_count(), passes);
    assert_eq!(ctx.backend().draw_count(), draws);
    assert_eq!(ctx.check_errors("test"), 0);
    assert_eq!(ctx.backend().frames_presented(), 1);
}

#[rstest]
#[case::forward(RenderMode::Forward)]
#[case::deferred(RenderMode::Deferred)]
fn test_empty_object_issues_no_mesh_draws(#[case] mode: RenderMode) {
    let mut ctx = headless_context(32, 16);
    let empty = Object::load(&mut ctx, &ObjImporter, "does/not/exist.obj");
    assert!(empty.is_empty());

    let (mut objects, scene, instance) = quad_scene(empty);
    render_once(&mut ctx, mode, &mut objects, &scene, instance);

    let expected = match mode {
        RenderMode::Forward => 0,
        // light quads, bloom stages and the present
        RenderMode::Deferred => 2 + 2 + 1,
    };
    assert_eq!(ctx.backend().draw_count(), expected);
}

#[rstest]
#[case::solid("Kd 0.5 0.5 0.5\nKe 1 0 0", false, false)]
#[case::colormap("Kd 1 1 1\nmap_Kd checker.png", true, true)]
#[case::missing_colormap("map_Kd missing.png", true, false)]
#[case::normalmap_only("Kd 0.2 0.4 0.6\nmap_Bump checker.png", false, false)]
fn test_material_variants(#[case] mtl: &str, #[case] textured: bool, #[case] has_colormap: bool) {
    let dir = tempfile::tempdir().unwrap();
    let obj = write_quad_fixture(dir.path(), mtl);
    let mut ctx = headless_context(8, 8);
    let object = Object::load(&mut ctx, &ObjImporter, &obj);
    let material = object.meshes()[0].material();

    assert_eq!(material.is_textured(), textured);
    match material.surface() {
        Surface::Textured { colormap } => assert_eq!(colormap.is_some(), has_colormap),
        Surface::SolidColor { .. } => assert!(!has_colormap),
    }
    assert!(material.program().is_usable());
}

#[test]
fn test_solid_color_includes_emission() {
    let dir = tempfile::tempdir().unwrap();
    let obj = write_quad_fixture(dir.path(), "Kd 0.5 0.25 1\nKe 1 2 0");
    let imported = ObjImporter.import(&obj).unwrap();
    let record = &imported.materials[0];
    assert_eq!(record.emissive, [1.0, 2.0, 0.0]);

    let mut ctx = headless_context(8, 8);
    let object = Object::from_raw(&mut ctx, &imported.meshes[0], record);
    match object.meshes()[0].material().surface() {
        Surface::SolidColor { color } => {
            assert_eq!((color.r, color.g, color.b), (1.0, 0.75, 1.0));
        }
        Surface::Textured { .. } => panic!("expected a solid material"),
    }
}

#[test]
fn test_importer_triangulates_and_computes_tangents() {
    let dir = tempfile::tempdir().unwrap();
    let obj = write_quad_fixture(dir.path(), "Kd 1 1 1");
    let imported = ObjImporter.import(&obj).unwrap();
    let raw = &imported.meshes[0];

    assert_eq!(raw.vertex_count, 6);
    assert_eq!(raw.triangle_count(), 2);
    assert_eq!(raw.non_triangle_faces, 1);
    for tangent in &raw.tangents {
        assert!((*tangent - Vec3::X).length() < 1e-5, "tangent {:?}", tangent);
    }
}

#[test]
fn test_cleared_gbuffer_reads_zero() {
    let mut ctx = headless_context(8, 4);
    let mut objects = ObjectArena::new();
    let scene = Scene::new();
    let mut camera = RendererConfig {
        width: 8,
        height: 4,
        ..Default::default()
    }
    .camera(&mut ctx);
    let output = ctx.begin_frame().unwrap();
    camera.render(&mut ctx, &mut objects, &scene, output);
    ctx.end_frame().unwrap();

    let CameraMode::Deferred(pipeline) = camera.mode() else {
        panic!("expected a deferred camera");
    };
    let position = pipeline.gbuffer().position().unwrap();
    let texels = position.read_rgba_f32(&mut ctx).unwrap();
    assert_eq!(texels.len(), 8 * 4 * 4);
    assert!(texels.iter().all(|v| *v == 0.0));
}

#[test]
fn test_bloom_of_black_is_black() {
    let black = Rgba32FImage::from_pixel(6, 6, Rgba([0.0, 0.0, 0.0, 1.0]));
    let expected = bloom_reference(&black, BloomSettings::default());
    assert!(expected.pixels().all(|p| p.0[0] == 0.0 && p.0[1] == 0.0 && p.0[2] == 0.0));

    let mut ctx = headless_context(6, 6);
    let mut bloom = BloomEffect::new(&mut ctx, 6, 6, BloomSettings::default());
    let input = Texture::new(&mut ctx, "black", 6, 6, BLOOM_FORMAT);
    let result = bloom.result().and_then(Texture::handle).unwrap();
    // stale contents the effect has to overwrite
    ctx.backend_mut().write_texture(result, &vec![0xAB; 6 * 6 * 8], 6, 6);

    bloom.apply(&mut ctx, &input).unwrap();
    let texels = bloom.result().unwrap().read_data(&mut ctx).unwrap();
    assert_eq!(texels.len(), 6 * 6 * 8);
    // rgb halves of every texel are zero, as in the reference
    assert!(texels.chunks_exact(8).all(|texel| texel[..6].iter().all(|b| *b == 0)));
    assert_eq!(ctx.check_errors("bloom"), 0);
}

#[test]
fn test_unsupported_format_allocates_nothing() {
    let mut ctx = headless_context(8, 8);
    let before = ctx.backend().live_textures();
    let texture = Texture::new(&mut ctx, "rgb", 8, 8, TextureFormat::Rgb8Unorm);
    assert!(!texture.is_allocated());
    assert!(texture.view().is_none());
    assert_eq!(ctx.backend().live_textures(), before);
    // logged and skipped, nothing reaches the GPU error queue
    assert_eq!(ctx.check_errors("test"), 0);

    // drawing it is a no-op
    ctx.backend_mut().clear_commands();
    let fbo = FramebufferObject::new(&mut ctx, 8, 8, TextureFormat::Rgba8Unorm);
    fbo.bind(&mut ctx, None);
    ctx.draw_texture(&texture, [0.0, 0.0, 1.0, 1.0]);
    fbo.unbind(&mut ctx);
    assert_eq!(ctx.backend().draw_count(), 0);
}

#[test]
fn test_broken_shader_gives_unusable_program() {
    let mut ctx = headless_context(8, 8);
    let mut program = Program::from_sources(
        &mut ctx,
        ("broken_vertex", "@vertex fn vs_main( -> {"),
        ("empty_fragment", ""),
    );
    assert!(!program.is_usable());

    let fbo = FramebufferObject::new(&mut ctx, 8, 8, TextureFormat::Rgba8Unorm);
    fbo.bind(&mut ctx, None);
    ctx.draw_fullscreen(&mut program, &[], None);
    fbo.unbind(&mut ctx);
    assert_eq!(ctx.backend().draw_count(), 0);

    let mut arena = ObjectArena::new();
    let record = MaterialRecord::default();
    let id = arena.insert(Object::from_raw(&mut ctx, &RawMesh::cube(), &record));
    assert_eq!(arena.len(), 1);
    assert!(arena.release(id, &[]).is_ok());
}
