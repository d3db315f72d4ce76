//! Offscreen render targets

use crate::backend::*;
use crate::context::{RenderContext, RenderTarget};
use crate::error::{RenderError, RenderResult};
use crate::resources::Texture;
use crate::scene::Color;

/// Most color attachments a framebuffer can carry
pub const MAX_COLOR_ATTACHMENTS: usize = 4;

/// Color format used when none is given
pub const DEFAULT_COLOR_FORMAT: TextureFormat = TextureFormat::Rgba32Float;

/// Color attachments plus a depth attachment of one size
pub struct FramebufferObject {
    width: u32,
    height: u32,
    colors: Vec<Texture>,
    depth: Texture,
}

impl FramebufferObject {
    /// One color attachment of `format` and a `Depth32Float` depth attachment
    pub fn new<B: GraphicsBackend>(ctx: &mut RenderContext<B>, width: u32, height: u32, format: TextureFormat) -> Self {
        let color = Texture::new(ctx, "fbo color 0", width, height, format);
        let depth = Texture::new(ctx, "fbo depth", width, height, TextureFormat::Depth32Float);
        Self {
            width,
            height,
            colors: vec![color],
            depth,
        }
    }

    /// Add a color attachment and return its index
    pub fn attach_texture<B: GraphicsBackend>(&mut self, ctx: &mut RenderContext<B>, format: TextureFormat) -> RenderResult<usize> {
        if self.colors.len() >= MAX_COLOR_ATTACHMENTS {
            log::warn!(
                "framebuffer already has {} color attachments, not attaching another",
                MAX_COLOR_ATTACHMENTS
            );
            return Err(RenderError::TooManyAttachments {
                max: MAX_COLOR_ATTACHMENTS,
            });
        }
        let index = self.colors.len();
        let name = format!("fbo color {}", index);
        self.colors
            .push(Texture::new(ctx, &name, self.width, self.height, format));
        Ok(index)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_count(&self) -> usize {
        self.colors.len()
    }

    pub fn color(&self, index: usize) -> Option<&Texture> {
        self.colors.get(index)
    }

    pub fn depth(&self) -> &Texture {
        &self.depth
    }

    /// The allocated attachments as a render target
    pub fn target(&self) -> RenderTarget {
        RenderTarget {
            color: self
                .colors
                .iter()
                .filter_map(|t| t.view().map(|v| (v, t.format())))
                .collect(),
            depth: self.depth.view().map(|v| (v, self.depth.format())),
            width: self.width,
            height: self.height,
        }
    }

    /// Render into this framebuffer, clearing it when `clear` is set
    pub fn bind<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>, clear: Option<Color>) {
        ctx.bind_target(self.target(), clear);
    }

    pub fn unbind<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>) {
        ctx.unbind_target();
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_fifth_attachment_is_rejected() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let mut fbo = FramebufferObject::new(&mut ctx, 4, 4, DEFAULT_COLOR_FORMAT);
        for expected in 1..MAX_COLOR_ATTACHMENTS {
            assert_eq!(fbo.attach_texture(&mut ctx, TextureFormat::Rgba8Unorm).unwrap(), expected);
        }

        let result = fbo.attach_texture(&mut ctx, TextureFormat::Rgba8Unorm);
        assert!(matches!(result, Err(RenderError::TooManyAttachments { max: 4 })));
        assert_eq!(fbo.color_count(), MAX_COLOR_ATTACHMENTS);
        assert_eq!(fbo.target().color.len(), MAX_COLOR_ATTACHMENTS);
    }

    #[test]
    fn test_unsupported_attachment_is_left_out_of_target() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8).with_wgpu_formats());
        let mut fbo = FramebufferObject::new(&mut ctx, 4, 4, TextureFormat::Rgba8Unorm);
        fbo.attach_texture(&mut ctx, TextureFormat::Rgb32Float).unwrap();

        assert_eq!(fbo.color_count(), 2);
        assert_eq!(fbo.target().color.len(), 1);
        assert!(fbo.target().depth.is_some());
    }
}
