//! Point lights for the deferred lighting pass

use crate::scene::Color;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Point light with a linear falloff to zero at `size`
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub size: f32,
    pub color: Color,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            size: 10.0,
            color: Color::WHITE,
        }
    }
}

impl Light {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// Convert to GPU data format
    pub fn to_gpu_data(&self, eye: Vec3) -> LightUniforms {
        LightUniforms {
            position_size: self.position.extend(self.size).to_array(),
            color: self.color.to_array(),
            eye: eye.extend(1.0).to_array(),
        }
    }
}

/// Uniform block the lighting shader reads from `@group(2)`
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightUniforms {
    pub position_size: [f32; 4],
    pub color: [f32; 4],
    pub eye: [f32; 4],
}
