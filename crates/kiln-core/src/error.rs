//! Core error types

use thiserror::Error;

use crate::resource::ResourceId;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("duplicate resource {id} (already ingested, duplicate at {path})")]
    DuplicateResource { id: ResourceId, path: String },

    #[error("unresolved reference {id} required by {referrer}")]
    UnresolvedReference { id: ResourceId, referrer: ResourceId },

    #[error("missing key '{key}' in {id}")]
    MissingKey { key: String, id: ResourceId },

    #[error("invalid CRD policy '{policy}' in {id}, valid values are 'Skip', 'Create' or 'CreateReplace'")]
    InvalidPolicy { id: ResourceId, policy: String },

    #[error("malformed values reference in {id}: {message}")]
    InvalidValuesReference { id: ResourceId, message: String },

    #[error("invalid document in {path}: {message}")]
    InvalidDocument { path: String, message: String },

    #[error("invalid duration '{value}'")]
    InvalidDuration { value: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
