//! Engine error types

use thiserror::Error;

use kiln_core::{CoreError, ResourceId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid chart at {path}: {message}")]
    InvalidChart { path: String, message: String },

    #[error("template '{template}' failed: {message}")]
    Template { template: String, message: String },

    #[error("render of release {id} timed out after {seconds}s")]
    Timeout { id: ResourceId, seconds: u64 },

    #[error("post-render failed for release {id}: {message}")]
    PostRender { id: ResourceId, message: String },

    #[error("kustomize build failed in {path}: {message}")]
    Kustomize { path: String, message: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
