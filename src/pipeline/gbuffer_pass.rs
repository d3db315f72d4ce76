//! Geometry buffer pass
//!
//! Renders the scene once into three float attachments:
//! - color: albedo (rgb) and alpha
//! - normal: world normal (xyz) and material hardness (w)
//! - position: world position (xyz), w = 1 where geometry was drawn

use crate::backend::*;
use crate::context::RenderContext;
use crate::resources::{FramebufferObject, Texture};
use crate::scene::{Color, ObjectArena, Scene};

/// Attachment order of the geometry buffer
pub const GBUFFER_COLOR: usize = 0;
pub const GBUFFER_NORMAL: usize = 1;
pub const GBUFFER_POSITION: usize = 2;

pub const GBUFFER_FORMAT: TextureFormat = TextureFormat::Rgba32Float;

/// Clear value; zero alpha in the position attachment marks background
const GBUFFER_CLEAR: Color = Color::new(0.0, 0.0, 0.0, 0.0);

pub struct GeometryBuffer {
    fbo: FramebufferObject,
}

impl GeometryBuffer {
    pub fn new<B: GraphicsBackend>(ctx: &mut RenderContext<B>, width: u32, height: u32) -> Self {
        let mut fbo = FramebufferObject::new(ctx, width, height, GBUFFER_FORMAT);
        for _ in 0..2 {
            if let Err(e) = fbo.attach_texture(ctx, GBUFFER_FORMAT) {
                log::warn!("geometry buffer: {}", e);
            }
        }
        log::debug!("geometry buffer {}x{}", width, height);
        Self { fbo }
    }

    /// Draw `scene` into the attachments, clearing them first
    pub fn render<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>, objects: &mut ObjectArena, scene: &Scene) {
        self.fbo.bind(ctx, Some(GBUFFER_CLEAR));
        ctx.set_depth_test(true);
        ctx.set_blend(None);
        scene.draw(ctx, objects);
        self.fbo.unbind(ctx);
    }

    pub fn color(&self) -> Option<&Texture> {
        self.fbo.color(GBUFFER_COLOR)
    }

    pub fn normal(&self) -> Option<&Texture> {
        self.fbo.color(GBUFFER_NORMAL)
    }

    pub fn position(&self) -> Option<&Texture> {
        self.fbo.color(GBUFFER_POSITION)
    }

    pub fn width(&self) -> u32 {
        self.fbo.width()
    }

    pub fn height(&self) -> u32 {
        self.fbo.height()
    }

    pub fn framebuffer(&self) -> &FramebufferObject {
        &self.fbo
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, RecordedCommand};

    #[test]
    fn test_three_attachments_and_depth() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let gbuffer = GeometryBuffer::new(&mut ctx, 16, 8);
        let target = gbuffer.framebuffer().target();
        assert_eq!(target.color.len(), 3);
        assert!(target.color.iter().all(|(_, f)| *f == GBUFFER_FORMAT));
        assert_eq!(target.depth.map(|(_, f)| f), Some(TextureFormat::Depth32Float));
        assert_eq!((gbuffer.width(), gbuffer.height()), (16, 8));
    }

    #[test]
    fn test_empty_scene_only_clears() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let gbuffer = GeometryBuffer::new(&mut ctx, 4, 4);
        gbuffer.render(&mut ctx, &mut ObjectArena::new(), &Scene::new());

        assert_eq!(ctx.backend().pass_count(), 1);
        assert_eq!(ctx.backend().draw_count(), 0);
        let begin = ctx
            .backend()
            .commands()
            .iter()
            .find(|c| matches!(c, RecordedCommand::BeginPass { .. }));
        match begin {
            Some(RecordedCommand::BeginPass {
                color_attachments,
                depth_attachment,
                ..
            }) => {
                assert_eq!(color_attachments.len(), 3);
                assert!(depth_attachment.is_some());
            }
            other => panic!("expected a render pass, got {:?}", other),
        }
    }
}
