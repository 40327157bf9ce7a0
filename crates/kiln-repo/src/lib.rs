//! Chart repository adapters for kiln
//!
//! This crate turns a HelmRepository declaration into a usable chart
//! source:
//!
//! - **HTTP repositories**: Helm-style repos with index.yaml
//! - **OCI registries**: chart tarballs behind the distribution API
//! - **Auth resolution**: basic auth and TLS from referenced Secrets,
//!   ambient cloud-provider login for OCI
//!
//! Both source kinds implement [`ChartSource`], the one-operation
//! handle the build engine caches per normalized URL.

pub mod auth;
pub mod error;
pub mod http;
pub mod index;
pub mod normalize;
pub mod oci;
pub mod provider;
pub mod source;

pub use auth::{
    BasicCredentials, ClientOptions, RegistryCredentials, RepositoryAuth, TlsSpec,
    REPOSITORY_TIMEOUT,
};
pub use error::{RepoError, Result};
pub use http::HttpChartSource;
pub use index::{ChartEntry, RepositoryIndex};
pub use normalize::normalize_url;
pub use oci::OciChartSource;
pub use provider::{ProviderEndpoints, ProviderLogin};
pub use source::{ChartArtifact, ChartSource};
