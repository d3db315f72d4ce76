//! Conversions from backend descriptors to wgpu types

use crate::backend::traits::*;
use crate::backend::types::*;

/// Every format the wgpu backend can allocate
const SUPPORTED_FORMATS: [TextureFormat; 7] = [
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba8UnormSrgb,
    TextureFormat::Bgra8Unorm,
    TextureFormat::Bgra8UnormSrgb,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba32Float,
    TextureFormat::Depth32Float,
];

/// wgpu has no three-channel or 8-bit depth formats; those give `None`.
pub fn texture_format(format: TextureFormat) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as W;
    Some(match format {
        TextureFormat::Rgba8Unorm => W::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => W::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => W::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => W::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => W::Rgba16Float,
        TextureFormat::Rgba32Float => W::Rgba32Float,
        TextureFormat::Depth32Float => W::Depth32Float,
        TextureFormat::Rgb8Unorm | TextureFormat::Rgb32Float | TextureFormat::Depth8Unorm => return None,
    })
}

pub fn texture_format_from_wgpu(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    SUPPORTED_FORMATS
        .into_iter()
        .find(|candidate| texture_format(*candidate) == Some(format))
}

pub fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    [
        (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
        (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
    ]
    .into_iter()
    .filter(|(flag, _)| usage.contains(*flag))
    .fold(wgpu::BufferUsages::empty(), |acc, (_, bits)| acc | bits)
}

pub fn texture_usages(usage: TextureUsage) -> wgpu::TextureUsages {
    [
        (TextureUsage::COPY_SRC, wgpu::TextureUsages::COPY_SRC),
        (TextureUsage::COPY_DST, wgpu::TextureUsages::COPY_DST),
        (TextureUsage::TEXTURE_BINDING, wgpu::TextureUsages::TEXTURE_BINDING),
        (TextureUsage::RENDER_ATTACHMENT, wgpu::TextureUsages::RENDER_ATTACHMENT),
    ]
    .into_iter()
    .filter(|(flag, _)| usage.contains(*flag))
    .fold(wgpu::TextureUsages::empty(), |acc, (_, bits)| acc | bits)
}

pub fn vertex_format(components: u32) -> wgpu::VertexFormat {
    match components {
        2 => wgpu::VertexFormat::Float32x2,
        4 => wgpu::VertexFormat::Float32x4,
        _ => wgpu::VertexFormat::Float32x3,
    }
}

pub fn compare_function(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn blend_component(component: &BlendComponent) -> wgpu::BlendComponent {
    let factor = |factor: BlendFactor| match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
    };
    wgpu::BlendComponent {
        src_factor: factor(component.src_factor),
        dst_factor: factor(component.dst_factor),
        operation: match component.operation {
            BlendOperation::Add => wgpu::BlendOperation::Add,
            BlendOperation::Max => wgpu::BlendOperation::Max,
        },
    }
}

pub fn blend_state(blend: &BlendState) -> wgpu::BlendState {
    wgpu::BlendState {
        color: blend_component(&blend.color),
        alpha: blend_component(&blend.alpha),
    }
}

pub fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
    }
}

pub fn binding_type(ty: BindingType) -> wgpu::BindingType {
    match ty {
        BindingType::UniformBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingType::Texture { filterable } => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingType::Sampler { filtering: true } => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
        }
        BindingType::Sampler { filtering: false } => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering)
        }
    }
}

pub fn color_ops(load: &LoadOp) -> wgpu::Operations<wgpu::Color> {
    let load = match load {
        LoadOp::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
            r: *r as f64,
            g: *g as f64,
            b: *b as f64,
            a: *a as f64,
        }),
        LoadOp::Load => wgpu::LoadOp::Load,
    };
    wgpu::Operations {
        load,
        store: wgpu::StoreOp::Store,
    }
}

pub fn depth_ops(load: &LoadOp, clear_value: f32) -> wgpu::Operations<f32> {
    wgpu::Operations {
        load: match load {
            LoadOp::Clear(_) => wgpu::LoadOp::Clear(clear_value),
            LoadOp::Load => wgpu::LoadOp::Load,
        },
        store: wgpu::StoreOp::Store,
    }
}

/// Classify an uncaptured device error
pub fn gpu_error(error: &wgpu::Error) -> GpuError {
    match error {
        wgpu::Error::OutOfMemory { .. } => GpuError::new(GpuErrorKind::OutOfMemory, error.to_string()),
        wgpu::Error::Validation { description, .. } => {
            GpuError::new(GpuErrorKind::InvalidOperation, description.clone())
        }
        other => GpuError::new(GpuErrorKind::Unknown, other.to_string()),
    }
}

pub fn surface_error(error: wgpu::SurfaceError) -> BackendError {
    match error {
        wgpu::SurfaceError::Lost => BackendError::SurfaceLost,
        wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
        other => BackendError::Surface(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip_and_gaps() {
        for format in SUPPORTED_FORMATS {
            let converted = texture_format(format).unwrap();
            assert_eq!(texture_format_from_wgpu(converted), Some(format));
        }
        assert_eq!(texture_format(TextureFormat::Rgb8Unorm), None);
        assert_eq!(texture_format(TextureFormat::Depth8Unorm), None);
        assert_eq!(texture_format_from_wgpu(wgpu::TextureFormat::R8Unorm), None);
    }

    #[test]
    fn test_usage_flags() {
        let usages = buffer_usages(BufferUsage::UNIFORM | BufferUsage::COPY_DST);
        assert_eq!(usages, wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST);
        assert_eq!(
            texture_usages(TextureUsage::RENDER_ATTACHMENT),
            wgpu::TextureUsages::RENDER_ATTACHMENT
        );
    }
}
