//! Shared helpers for integration tests

#![allow(dead_code)]

use scene_renderer::{HeadlessBackend, RenderContext};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A context over a headless backend with the wgpu format restrictions
pub fn headless_context(width: u32, height: u32) -> RenderContext<HeadlessBackend> {
    init_logging();
    RenderContext::new(HeadlessBackend::new(width, height).with_wgpu_formats())
}

/// A unit quad in the xy plane with texture coordinates, as one polygon
pub const QUAD_OBJ: &str = "\
mtllib quad.mtl
v -1 -1 0
v 1 -1 0
v 1 1 0
v -1 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
usemtl surface
f 1/1/1 2/2/1 3/3/1 4/4/1
";

/// Write `quad.obj`, `quad.mtl` with the given material body, and a 2×2
/// `checker.png` into `dir`. Returns the OBJ path.
pub fn write_quad_fixture(dir: &Path, material: &str) -> PathBuf {
    let mtl = format!("newmtl surface\n{}\n", material);
    fs::write(dir.join("quad.mtl"), mtl).expect("write mtl");
    let obj = dir.join("quad.obj");
    fs::write(&obj, QUAD_OBJ).expect("write obj");

    let checker = image::RgbaImage::from_fn(2, 2, |x, y| {
        if (x + y) % 2 == 0 {
            image::Rgba([255, 255, 255, 255])
        } else {
            image::Rgba([0, 0, 0, 255])
        }
    });
    checker.save(dir.join("checker.png")).expect("write png");
    obj
}
