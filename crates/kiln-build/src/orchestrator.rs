//! Build orchestration
//!
//! Collects release declarations, validates the dependency graph, runs
//! each release through acquisition, rendering and fusion on a bounded
//! worker pool, and assembles the final YAML stream.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use kiln_core::{HelmRelease, ResourceDatabase, ResourceId, HELM_RELEASE_KIND};
use kiln_engine::{fuse, Chart, ReleaseRenderer, RenderOptions};

use crate::chart_builder::{ChartBuilder, SourceFactory};
use crate::error::{BuildError, ReleaseFailure, Result};
use crate::graph::DependencyGraph;

/// Kinds the pipeline consumes; everything else passes through
const CONSUMED_KINDS: &[&str] = &[
    "HelmRelease",
    "HelmRepository",
    "ConfigMap",
    "Secret",
    "Kustomization",
];

#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Abort on the first failure instead of aggregating
    pub fail_fast: bool,

    /// Upper bound on concurrent release builds
    pub workers: usize,

    /// Extra API versions for every install context
    pub api_versions: Vec<String>,

    /// Kubernetes version reported to charts
    pub kube_version: Option<String>,

    /// Include hook manifests in the output
    pub include_hooks: bool,

    /// Directory for extracted chart artifacts; temporary when unset
    pub cache_dir: Option<PathBuf>,

    /// Sort release outputs by (namespace, name)
    pub deterministic: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            fail_fast: false,
            workers: 4,
            api_versions: Vec::new(),
            kube_version: None,
            include_hooks: false,
            cache_dir: None,
            deterministic: true,
        }
    }
}

/// One release's fused output
#[derive(Debug)]
pub struct ReleaseOutput {
    pub id: ResourceId,
    pub namespace: String,
    pub name: String,
    pub yaml: String,
}

/// Everything a build produced, successes and failures both
#[derive(Debug, Default)]
pub struct BuildReport {
    pub releases: Vec<ReleaseOutput>,
    /// Documents of unrecognized kinds, emitted unchanged
    pub passthrough: Vec<String>,
    pub failures: Vec<ReleaseFailure>,
}

impl BuildReport {
    /// Concatenate passthrough documents and release streams
    pub fn to_yaml_stream(&self) -> String {
        let mut out = String::new();
        let mut push = |doc: &str| {
            let doc = doc.trim();
            if doc.is_empty() {
                return;
            }
            out.push_str("---\n");
            out.push_str(doc);
            out.push('\n');
        };

        for doc in &self.passthrough {
            push(doc);
        }
        for release in &self.releases {
            for doc in release.yaml.split("\n---\n") {
                push(doc);
            }
        }
        out
    }

    /// The aggregate error, when any release failed
    pub fn into_error(self) -> Option<BuildError> {
        if self.failures.is_empty() {
            None
        } else {
            Some(BuildError::Aggregate {
                failures: self.failures,
            })
        }
    }
}

pub struct Orchestrator {
    config: BuildConfig,
    builder: Arc<ChartBuilder>,
    renderer: Arc<ReleaseRenderer>,
    /// Keeps a generated chart workdir alive for the build's lifetime
    _workdir_guard: Option<tempfile::TempDir>,
}

impl Orchestrator {
    pub fn new(config: BuildConfig, factory: Arc<dyn SourceFactory>) -> Result<Self> {
        let (workdir, guard) = match &config.cache_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(kiln_core::CoreError::Io)?;
                (dir.clone(), None)
            }
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("kiln-charts-")
                    .tempdir()
                    .map_err(kiln_core::CoreError::Io)?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        let renderer = ReleaseRenderer::new(RenderOptions {
            kube_version: config.kube_version.clone(),
            api_versions: config.api_versions.clone(),
            include_hooks: config.include_hooks,
        });

        Ok(Self {
            builder: Arc::new(ChartBuilder::new(factory, workdir)),
            renderer: Arc::new(renderer),
            config,
            _workdir_guard: guard,
        })
    }

    /// Run the build over every release in the database
    ///
    /// Graph validation failures abort before any work is dispatched.
    /// Release failures either cancel the build (fail-fast) or are
    /// collected into the report.
    pub async fn run(
        &self,
        db: Arc<ResourceDatabase>,
        cancel: CancellationToken,
    ) -> Result<BuildReport> {
        DependencyGraph::build(&db)?;

        let mut releases: Vec<HelmRelease> = Vec::new();
        for (_, doc) in db.iter().filter(|(id, _)| id.kind == HELM_RELEASE_KIND) {
            releases.push(doc.decode().map_err(BuildError::Core)?);
        }
        tracing::debug!(count = releases.len(), "dispatching release builds");

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks: JoinSet<std::result::Result<ReleaseOutput, ReleaseFailure>> = JoinSet::new();

        for hr in releases {
            let db = Arc::clone(&db);
            let builder = Arc::clone(&self.builder);
            let renderer = Arc::clone(&self.renderer);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let id = hr.id();
                if cancel.is_cancelled() {
                    return Err(ReleaseFailure { id, error: BuildError::Canceled });
                }
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(ReleaseFailure { id, error: BuildError::Canceled });
                    }
                    permit = semaphore.acquire_owned() => permit.expect("semaphore never closed"),
                };

                build_release(&db, &builder, &renderer, &hr, &cancel)
                    .await
                    .map_err(|error| ReleaseFailure { id, error })
            });
        }

        let mut report = BuildReport::default();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| {
                BuildError::Engine(kiln_engine::EngineError::Template {
                    template: "<worker>".to_string(),
                    message: e.to_string(),
                })
            })?;

            match outcome {
                Ok(output) => report.releases.push(output),
                Err(failure) => {
                    tracing::warn!(release = %failure.id, error = %failure.error, "release build failed");
                    report.failures.push(failure);
                    if self.config.fail_fast {
                        cancel.cancel();
                    }
                }
            }
        }

        if self.config.deterministic {
            report
                .releases
                .sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
            report.failures.sort_by(|a, b| a.id.cmp(&b.id));
        }

        report.passthrough = collect_passthrough(&db, self.config.deterministic);
        Ok(report)
    }
}

/// The per-release pipeline: acquire, compose, render, fuse
async fn build_release(
    db: &ResourceDatabase,
    builder: &ChartBuilder,
    renderer: &ReleaseRenderer,
    hr: &HelmRelease,
    cancel: &CancellationToken,
) -> Result<ReleaseOutput> {
    // The builder threads the token through its network fetches and
    // cache waits; a canceled producer releases its lock so waiters
    // observe Canceled rather than hanging.
    let build = builder.build(db, hr, cancel).await?;
    if cancel.is_cancelled() {
        return Err(BuildError::Canceled);
    }

    let mut chart = Chart::load_with_values_files(&build.path, &hr.spec.chart.spec.values_files)
        .map_err(BuildError::Engine)?;

    // Variant identity travels as semver build metadata on the chart
    // version, so the install context (and anything rendered from it)
    // distinguishes values-files variants of the same artifact.
    if let Some(metadata) = &build.version_metadata {
        chart.metadata.version = format!("{}+{}", chart.metadata.version, metadata);
    }

    let composed = renderer.compose_values(db, hr).map_err(BuildError::Engine)?;
    let rendered = renderer
        .render(hr, &chart, composed, &[])
        .await
        .map_err(BuildError::Engine)?;

    let dir = renderer
        .materialize(&rendered, None)
        .map_err(BuildError::Engine)?;
    let yaml = fuse(&dir).map_err(BuildError::Engine)?;

    Ok(ReleaseOutput {
        id: hr.id(),
        namespace: hr.release_namespace().to_string(),
        name: hr.release_name().to_string(),
        yaml,
    })
}

fn collect_passthrough(db: &ResourceDatabase, deterministic: bool) -> Vec<String> {
    let mut docs: Vec<(&ResourceId, String)> = db
        .iter()
        .filter(|(id, _)| !CONSUMED_KINDS.contains(&id.kind.as_str()))
        .map(|(id, doc)| (id, doc.raw().to_string()))
        .collect();
    if deterministic {
        docs.sort_by(|a, b| a.0.cmp(b.0));
    }
    docs.into_iter().map(|(_, raw)| raw).collect()
}
