//! Resource management
//!
//! GPU resource primitives plus the meshes, materials and importers built on
//! them. Every resource releases its backend handles on drop.

mod buffer;
mod framebuffer;
mod import;
pub mod material;
mod mesh;
pub mod shader;
pub mod shaders;
mod texture;

pub use buffer::*;
pub use framebuffer::*;
pub use import::*;
pub use material::{Material, MaterialRecord, Surface};
pub use mesh::*;
pub use shader::{Program, Shader, ShaderStage};
pub use texture::*;
