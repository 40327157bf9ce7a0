//! Error types for chart source operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Configuration Errors ============
    #[error("invalid repository URL: {url} - {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("invalid OCI reference: {reference}")]
    InvalidOciReference { reference: String },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    // ============ Authentication Errors ============
    #[error("authentication failed: {message}")]
    AuthFailure { message: String },

    #[error("provider {provider} has no ambient credentials configured")]
    ProviderUnconfigured { provider: String },

    // ============ Index Errors ============
    #[error("index not found at {url}")]
    IndexNotFound { url: String },

    #[error("invalid index format: {message}")]
    IndexParseError { message: String },

    // ============ Chart Errors ============
    #[error("chart unavailable: {name}@{version} in repository {repo}")]
    ChartUnavailable {
        name: String,
        version: String,
        repo: String,
    },

    #[error("integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("OCI registry error: {message}")]
    OciError { message: String },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation canceled")]
    Canceled,
}

pub type Result<T> = std::result::Result<T, RepoError>;

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout { seconds: 60 }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}
