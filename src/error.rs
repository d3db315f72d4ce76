//! Renderer-level error types

use crate::backend::{BackendError, TextureFormat};
use std::path::PathBuf;
use thiserror::Error;

/// Rejections raised by render targets, effects and resource creation
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("framebuffer already has {max} color attachments")]
    TooManyAttachments { max: usize },
    #[error("input is {actual:?} but the effect was built for {expected:?}")]
    ResolutionMismatch { expected: (u32, u32), actual: (u32, u32) },
    #[error("texture format {0:?} is not supported by the backend")]
    UnsupportedFormat(TextureFormat),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Failures of a [`SceneImporter`](crate::resources::SceneImporter)
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("failed to load {path}: {message}")]
    Load { path: PathBuf, message: String },
    #[error("{0} contains no meshes")]
    EmptyScene(PathBuf),
}

/// Arena and scene bookkeeping errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SceneError {
    #[error("object {0} is still referenced by {1} instance(s)")]
    ObjectInUse(usize, usize),
    #[error("object {0} does not exist")]
    UnknownObject(usize),
}

/// WGSL compile and link failures
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Validation(String),
    #[error("missing entry point `{0}`")]
    MissingEntryPoint(String),
}
