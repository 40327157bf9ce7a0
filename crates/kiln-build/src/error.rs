//! Build error taxonomy
//!
//! Every failure carries the reference key(s) it concerns and reaches
//! the orchestrator verbatim; the orchestrator either stops (fail-fast)
//! or collects failures into an aggregate.

use thiserror::Error;

use kiln_cache::CacheError;
use kiln_core::{CoreError, ResourceId};
use kiln_engine::EngineError;
use kiln_repo::RepoError;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("cache error: {0}")]
    Cache(CacheError),

    #[error("unsupported source kind '{kind}' referenced by {referrer}")]
    UnsupportedSource { kind: String, referrer: ResourceId },

    #[error("cyclic dependency: {cycle}")]
    CyclicDependency { cycle: String },

    #[error("build canceled")]
    Canceled,

    #[error("build failed for {} release(s):\n{}", failures.len(), format_failures(failures))]
    Aggregate { failures: Vec<ReleaseFailure> },
}

/// A failed release and the error that stopped it
#[derive(Debug)]
pub struct ReleaseFailure {
    pub id: ResourceId,
    pub error: BuildError,
}

impl std::fmt::Display for ReleaseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.error)
    }
}

fn format_failures(failures: &[ReleaseFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {}", f))
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<CacheError> for BuildError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Canceled => BuildError::Canceled,
            other => BuildError::Cache(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
