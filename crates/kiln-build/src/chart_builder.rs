//! Chart acquisition through the single-flight caches
//!
//! Two cache instances carry all shared state: repository handles keyed
//! by normalized URL, and chart artifacts keyed by (url, chart,
//! version). Any number of releases pointing at the same chart cause
//! exactly one index fetch and one chart pull.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use kiln_cache::{ArtifactCache, GetOrLock};
use kiln_core::{
    Document, HelmRelease, HelmRepository, Provider, ResourceDatabase, HELM_REPOSITORY_KIND,
    SOURCE_GROUP,
};
use kiln_repo::{
    normalize_url, ChartSource, HttpChartSource, OciChartSource, ProviderLogin, RepoError,
    RepositoryAuth,
};

use crate::error::{BuildError, Result};

/// Cache key for fetched chart artifacts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartKey {
    pub url: String,
    pub name: String,
    pub version: String,
}

/// A chart artifact resolved for one release
#[derive(Debug, Clone)]
pub struct ChartBuild {
    /// Extracted chart directory
    pub path: PathBuf,
    pub name: String,
    /// Exact resolved version
    pub version: String,
    /// Variant identity suffix when values files sub-select the chart;
    /// changes whenever the declaration's generation changes. The
    /// orchestrator appends it to the chart version as semver build
    /// metadata before rendering.
    pub version_metadata: Option<String>,
}

/// Constructs chart sources for repository declarations
///
/// The seam tests use to count remote fetches without a network.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn create(
        &self,
        repo: &HelmRepository,
        normalized_url: &str,
        secret: Option<&Document>,
    ) -> Result<Arc<dyn ChartSource>>;
}

/// Production factory: resolves auth, performs provider login for OCI,
/// instantiates the matching adapter
pub struct DefaultSourceFactory {
    provider_login: ProviderLogin,
}

impl DefaultSourceFactory {
    pub fn new() -> Result<Self> {
        Ok(Self {
            provider_login: ProviderLogin::new().map_err(BuildError::Repo)?,
        })
    }

    /// Use a provider login with non-default endpoints, for tests
    pub fn with_provider_login(provider_login: ProviderLogin) -> Self {
        Self { provider_login }
    }
}

#[async_trait]
impl SourceFactory for DefaultSourceFactory {
    async fn create(
        &self,
        repo: &HelmRepository,
        normalized_url: &str,
        secret: Option<&Document>,
    ) -> Result<Arc<dyn ChartSource>> {
        let mut auth = RepositoryAuth::from_secret(repo, normalized_url, secret)
            .map_err(BuildError::Repo)?;

        // Provider login only applies to OCI repositories with a
        // non-generic provider and no configured secret.
        if repo.is_oci() && repo.spec.provider != Provider::Generic && secret.is_none() {
            match self
                .provider_login
                .login(repo.spec.provider, normalized_url)
                .await
            {
                Ok(credentials) => auth.registry = Some(credentials),
                Err(RepoError::ProviderUnconfigured { provider }) => {
                    tracing::debug!(provider, url = normalized_url, "provider unconfigured, proceeding anonymously");
                }
                Err(other) => return Err(BuildError::Repo(other)),
            }
        }

        let source: Arc<dyn ChartSource> = if repo.is_oci() {
            Arc::new(OciChartSource::new(auth).map_err(BuildError::Repo)?)
        } else {
            Arc::new(HttpChartSource::new(auth).map_err(BuildError::Repo)?)
        };
        Ok(source)
    }
}

pub struct ChartBuilder {
    repos: ArtifactCache<String, Arc<dyn ChartSource>>,
    charts: ArtifactCache<ChartKey, ChartBuild>,
    factory: Arc<dyn SourceFactory>,
    /// Directory extracted charts land in
    workdir: PathBuf,
}

impl ChartBuilder {
    pub fn new(factory: Arc<dyn SourceFactory>, workdir: PathBuf) -> Self {
        Self {
            repos: ArtifactCache::new(),
            charts: ArtifactCache::new(),
            factory,
            workdir,
        }
    }

    /// Obtain the chart a release references, consulting the caches
    pub async fn build(
        &self,
        db: &ResourceDatabase,
        hr: &HelmRelease,
        cancel: &CancellationToken,
    ) -> Result<ChartBuild> {
        let source_id = hr.source_id(SOURCE_GROUP);
        if source_id.kind != HELM_REPOSITORY_KIND {
            return Err(BuildError::UnsupportedSource {
                kind: source_id.kind,
                referrer: hr.id(),
            });
        }

        let source_doc = db
            .get(&source_id)
            .ok_or_else(|| kiln_core::CoreError::UnresolvedReference {
                id: source_id.clone(),
                referrer: hr.id(),
            })?;
        let repo: HelmRepository = source_doc.decode().map_err(BuildError::Core)?;
        let url = normalize_url(&repo.spec.url).map_err(BuildError::Repo)?;

        let source = self.repository(db, &repo, &url, cancel).await?;

        let chart_spec = &hr.spec.chart.spec;
        let key = ChartKey {
            url: url.clone(),
            name: chart_spec.chart.clone(),
            version: chart_spec.version.clone(),
        };

        let mut build = match self.charts.get_or_lock(&key).await? {
            GetOrLock::Hit(build) => {
                tracing::debug!(chart = %key.name, version = %key.version, "using cached chart artifact");
                build
            }
            GetOrLock::Miss(lock) => {
                let resolved = tokio::select! {
                    _ = cancel.cancelled() => {
                        lock.cancel();
                        return Err(BuildError::Canceled);
                    }
                    resolved = source.resolve(&key.name, &key.version, &self.workdir) => resolved,
                };
                match resolved {
                    Ok(artifact) => {
                        let build = ChartBuild {
                            path: artifact.path,
                            name: artifact.name,
                            version: artifact.version,
                            version_metadata: None,
                        };
                        lock.publish(build.clone());
                        tracing::debug!(chart = %key.name, version = %build.version, "cached new chart artifact");
                        build
                    }
                    Err(e) => {
                        // The lock drop fails waiters; surface the cause here.
                        return Err(BuildError::Repo(chart_unavailable(e, &key)));
                    }
                }
            }
        };

        // Values-files sub-selection changes what the chart renders to,
        // so downstream consumers need a variant identity.
        if !chart_spec.values_files.is_empty() {
            build.version_metadata = Some(format!("build.{}", hr.metadata.generation));
        }

        Ok(build)
    }

    /// Get or initialize the repository handle for a normalized URL
    async fn repository(
        &self,
        db: &ResourceDatabase,
        repo: &HelmRepository,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ChartSource>> {
        match self.repos.get_or_lock(&url.to_string()).await? {
            GetOrLock::Hit(source) => Ok(source),
            GetOrLock::Miss(lock) => {
                let secret = match repo.secret_id() {
                    Some(secret_id) => Some(db.get(&secret_id).ok_or_else(|| {
                        kiln_core::CoreError::UnresolvedReference {
                            id: secret_id.clone(),
                            referrer: repo.id(),
                        }
                    })?),
                    None => None,
                };

                let created = tokio::select! {
                    _ = cancel.cancelled() => {
                        lock.cancel();
                        return Err(BuildError::Canceled);
                    }
                    created = self.factory.create(repo, url, secret) => created,
                };
                let source = created?;
                lock.publish(source.clone());
                tracing::debug!(url, "initialized chart repository");
                Ok(source)
            }
        }
    }
}

/// Resolution failures surface as ChartUnavailable with the chart key
fn chart_unavailable(e: RepoError, key: &ChartKey) -> RepoError {
    match e {
        unavailable @ RepoError::ChartUnavailable { .. } => unavailable,
        other => RepoError::ChartUnavailable {
            name: key.name.clone(),
            version: if key.version.is_empty() {
                "*".to_string()
            } else {
                key.version.clone()
            },
            repo: format!("{} ({})", key.url, other),
        },
    }
}
