//! GPU textures and the decoded images that feed them

use crate::backend::*;
use crate::context::{ReleaseQueue, Released, RenderContext};
use std::path::Path;

/// Tightly packed texels ready for upload
pub struct TextureData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
}

impl TextureData {
    /// Decode an image file into sRGB RGBA8
    pub fn open(path: &Path) -> Result<Self, image::ImageError> {
        let rgba = image::open(path)?.into_rgba8();
        Ok(Self {
            name: path.file_name().map_or_else(
                || path.display().to_string(),
                |n| n.to_string_lossy().into_owned(),
            ),
            width: rgba.width(),
            height: rgba.height(),
            format: TextureFormat::Rgba8UnormSrgb,
            data: rgba.into_raw(),
        })
    }

    /// A single texel
    pub fn uniform(name: &str, format: TextureFormat, texel: [u8; 4]) -> Self {
        Self {
            name: name.into(),
            width: 1,
            height: 1,
            format,
            data: texel.into(),
        }
    }

    pub fn white() -> Self {
        Self::uniform("white", TextureFormat::Rgba8UnormSrgb, [u8::MAX; 4])
    }

    /// Tangent-space +Z, stored linear
    pub fn flat_normal() -> Self {
        Self::uniform("flat normal", TextureFormat::Rgba8Unorm, [128, 128, 255, 255])
    }
}

/// A GPU texture with its view
///
/// A texture whose format the backend can't allocate keeps its size and
/// format but has no storage; drawing or binding it is a logged no-op.
pub struct Texture {
    handle: Option<TextureHandle>,
    view: Option<TextureViewHandle>,
    width: u32,
    height: u32,
    format: TextureFormat,
    name: String,
    release: ReleaseQueue,
}

impl Texture {
    /// Allocate an empty texture usable as a render attachment and shader input
    pub fn new<B: GraphicsBackend>(
        ctx: &mut RenderContext<B>,
        name: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Self {
        let mut texture = Self {
            handle: None,
            view: None,
            width,
            height,
            format,
            name: name.to_string(),
            release: ctx.release_queue(),
        };

        if !ctx.backend().supports_format(format) {
            log::warn!("texture {}: format {:?} is not yet supported, no storage allocated", name, format);
            return texture;
        }

        let usage = TextureUsage::TEXTURE_BINDING
            | TextureUsage::RENDER_ATTACHMENT
            | TextureUsage::COPY_SRC
            | TextureUsage::COPY_DST;
        if let Err(e) = texture.allocate(ctx, usage) {
            log::warn!("texture {}: {}", name, e);
        }
        texture
    }

    /// Upload decoded image data
    pub fn from_data<B: GraphicsBackend>(ctx: &mut RenderContext<B>, data: &TextureData) -> Option<Self> {
        let mut texture = Self {
            handle: None,
            view: None,
            width: data.width,
            height: data.height,
            format: data.format,
            name: data.name.clone(),
            release: ctx.release_queue(),
        };

        let usage = TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST | TextureUsage::COPY_SRC;
        if let Err(e) = texture.allocate(ctx, usage) {
            log::warn!("texture {}: {}", data.name, e);
            return None;
        }
        if let Some(handle) = texture.handle {
            ctx.backend_mut().write_texture(handle, &data.data, data.width, data.height);
        }
        log::debug!("uploaded texture {} ({}x{})", data.name, data.width, data.height);
        Some(texture)
    }

    /// Load an image file. Failures are logged and yield `None`.
    pub fn from_file<B: GraphicsBackend, P: AsRef<Path>>(ctx: &mut RenderContext<B>, path: P) -> Option<Self> {
        let path = path.as_ref();
        match TextureData::open(path) {
            Ok(data) => Self::from_data(ctx, &data),
            Err(e) => {
                log::warn!("failed to load {}: {}", path.display(), e);
                None
            }
        }
    }

    fn allocate<B: GraphicsBackend>(&mut self, ctx: &mut RenderContext<B>, usage: TextureUsage) -> BackendResult<()> {
        let backend = ctx.backend_mut();
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(self.name.clone()),
            width: self.width,
            height: self.height,
            format: self.format,
            usage,
        })?;
        self.handle = Some(handle);
        self.view = Some(backend.create_texture_view(handle)?);
        Ok(())
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }

    pub fn view(&self) -> Option<TextureViewHandle> {
        self.view
    }

    pub fn is_allocated(&self) -> bool {
        self.view.is_some()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Draw over the whole active target
    pub fn draw<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>) {
        self.draw_rect(ctx, 0.0, 0.0, 1.0, 1.0);
    }

    /// Draw into a rectangle of the unit square (origin bottom-left).
    /// A zero height makes the rectangle square.
    pub fn draw_rect<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>, x: f32, y: f32, w: f32, h: f32) {
        let h = if h == 0.0 { w } else { h };
        ctx.draw_texture(self, [x, y, w, h]);
    }

    /// Read the texture back as tightly packed texels in its own format
    pub fn read_data<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>) -> Option<Vec<u8>> {
        let handle = self.handle?;
        ctx.flush();
        match ctx.backend_mut().read_texture(handle) {
            Ok(data) => Some(data),
            Err(e) => {
                log::warn!("texture {}: {}", self.name, e);
                None
            }
        }
    }

    /// Read an `Rgba32Float` texture back as floats
    pub fn read_rgba_f32<B: GraphicsBackend>(&self, ctx: &mut RenderContext<B>) -> Option<Vec<f32>> {
        if self.format != TextureFormat::Rgba32Float {
            log::warn!("texture {}: float readback needs Rgba32Float, not {:?}", self.name, self.format);
            return None;
        }
        let bytes = self.read_data(ctx)?;
        Some(floats_from_bytes(&bytes))
    }
}

fn floats_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl Drop for Texture {
    fn drop(&mut self) {
        if let Some(view) = self.view.take() {
            self.release.push(Released::TextureView(view));
        }
        if let Some(handle) = self.handle.take() {
            self.release.push(Released::Texture(handle));
        }
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::context::RenderTarget;

    #[test]
    fn test_unsupported_format_allocates_nothing() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8).with_wgpu_formats());
        let texture = Texture::new(&mut ctx, "rgb", 4, 4, TextureFormat::Rgb8Unorm);

        assert!(!texture.is_allocated());
        assert_eq!(texture.width(), 4);
        assert_eq!(ctx.backend().live_textures(), 0);
        assert_eq!(ctx.check_errors("texture"), 0);
    }

    #[test]
    fn test_upload_and_read_back() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let data = TextureData::uniform("tint", TextureFormat::Rgba8Unorm, [10, 20, 30, 40]);
        let texture = Texture::from_data(&mut ctx, &data).unwrap();

        assert_eq!(texture.read_data(&mut ctx).unwrap(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_missing_file_yields_none() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        assert!(Texture::from_file(&mut ctx, "/nonexistent/colormap.png").is_none());
    }

    #[test]
    fn test_float_readback() {
        let mut ctx = RenderContext::new(HeadlessBackend::new(8, 8));
        let texture = Texture::new(&mut ctx, "hdr", 2, 2, TextureFormat::Rgba32Float);
        let frame = RenderTarget {
            color: vec![(texture.view().unwrap(), TextureFormat::Rgba32Float)],
            depth: None,
            width: 2,
            height: 2,
        };
        ctx.bind_target(frame, Some(crate::scene::Color::new(0.5, 0.25, 0.0, 1.0)));
        ctx.unbind_target();

        let texels = texture.read_rgba_f32(&mut ctx).unwrap();
        assert_eq!(texels.len(), 16);
        assert_eq!(&texels[..4], &[0.5, 0.25, 0.0, 1.0]);
    }
}
