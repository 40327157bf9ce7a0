//! Release rendering
//!
//! Drives the synthetic install for one HelmRelease: compose values
//! from referenced documents, render the chart templates against the
//! install context, post-process the manifests and materialize the
//! result to a directory for Kustomize fusion.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;

use kiln_core::{values, CoreError, HelmRelease, ResourceDatabase, ResourceId, Values};

use crate::chart::Chart;
use crate::context::{Capabilities, InstallContext, KubeVersion, ReleaseInfo};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::postrender::{NamespaceTransformer, PostRenderer};

/// Annotation marking a manifest as a lifecycle hook
const HOOK_ANNOTATION: &str = "helm.sh/hook";

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Kubernetes version reported to charts; releases may override
    pub kube_version: Option<String>,

    /// Extra API versions injected into every install context
    pub api_versions: Vec<String>,

    /// Materialize hook manifests alongside the main manifest
    pub include_hooks: bool,
}

/// Rendered manifests for one release, post-renderers applied
#[derive(Debug)]
pub struct RenderedRelease {
    pub manifest: String,
    /// Hook manifests in declared order; materialized only when hook
    /// inclusion is requested
    pub hooks: Vec<String>,
}

pub struct ReleaseRenderer {
    options: RenderOptions,
}

impl ReleaseRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    /// Compose the effective values for a release
    ///
    /// Walks the valuesFrom list in declared order, merging referenced
    /// documents or assigning scalars at target paths, then merges the
    /// inline values on top.
    pub fn compose_values(&self, db: &ResourceDatabase, hr: &HelmRelease) -> Result<Values> {
        let mut result = Values::new();

        for reference in &hr.spec.values_from {
            let id = ResourceId::core(&reference.kind, &hr.metadata.namespace, &reference.name);

            let doc = match db.get(&id) {
                Some(doc) => doc,
                None if reference.optional => {
                    tracing::debug!(%id, release = %hr.id(), "skipping optional values reference");
                    continue;
                }
                None => {
                    return Err(CoreError::UnresolvedReference {
                        id,
                        referrer: hr.id(),
                    }
                    .into())
                }
            };

            let key = reference.values_key();
            let data = match reference.kind.as_str() {
                "ConfigMap" => config_map_value(doc, key)?,
                "Secret" => secret_value(doc, key)?,
                other => {
                    return Err(CoreError::InvalidValuesReference {
                        id: hr.id(),
                        message: format!("unsupported values reference kind '{}'", other),
                    }
                    .into())
                }
            };
            let data = String::from_utf8(data).map_err(|_| CoreError::InvalidValuesReference {
                id: hr.id(),
                message: format!("key '{}' in {} is not valid UTF-8", key, id),
            })?;

            match &reference.target_path {
                None => {
                    let overlay =
                        Values::from_yaml(&data).map_err(|e| CoreError::InvalidValuesReference {
                            id: hr.id(),
                            message: format!("key '{}' in {} is not a values document: {}", key, id, e),
                        })?;
                    result.merge(&overlay);
                }
                Some(path) => {
                    let (stripped, was_quoted) = values::strip_quotes(data.trim());
                    let value = if was_quoted {
                        serde_json::Value::String(stripped.to_string())
                    } else {
                        values::parse_scalar(stripped)
                    };
                    result.set(path, value);
                }
            }
        }

        if let Some(inline) = &hr.spec.values {
            result.merge(&Values(inline.clone()));
        }

        Ok(result)
    }

    /// Run the synthetic install and apply post-renderers
    ///
    /// `extra_renderers` run after the mandatory namespace transformer,
    /// in declared order. The release's install timeout bounds the
    /// whole render.
    pub async fn render(
        &self,
        hr: &HelmRelease,
        chart: &Chart,
        composed: Values,
        extra_renderers: &[Box<dyn PostRenderer>],
    ) -> Result<RenderedRelease> {
        let policy = hr.crd_policy()?;
        let timeout = hr.timeout()?;

        let namespace = {
            let ns = hr.release_namespace();
            if ns.is_empty() { "default" } else { ns }.to_string()
        };

        let kube_version = hr
            .spec
            .kube_version
            .as_deref()
            .or(self.options.kube_version.as_deref())
            .map(KubeVersion::new)
            .unwrap_or_default();

        let mut api_versions = self.options.api_versions.clone();
        api_versions.extend(hr.spec.api_versions.iter().cloned());

        // Chart defaults sit under the composed values.
        let mut effective = chart.default_values.clone();
        effective.merge(&composed);

        let context = InstallContext::new(
            effective,
            ReleaseInfo::for_install(hr.release_name(), &namespace),
            &chart.metadata,
            Capabilities::new(kube_version, &api_versions),
        );

        let rendered = {
            let chart = chart.clone();
            let render = tokio::task::spawn_blocking(move || Engine::new().render(&chart, &context));
            match timeout {
                Some(limit) => tokio::time::timeout(limit, render).await.map_err(|_| {
                    EngineError::Timeout {
                        id: hr.id(),
                        seconds: limit.as_secs(),
                    }
                })?,
                None => render.await,
            }
            .map_err(|e| EngineError::Template {
                template: "<engine>".to_string(),
                message: e.to_string(),
            })??
        };

        let mut manifest_docs: Vec<String> = Vec::new();
        let mut hooks: Vec<String> = Vec::new();

        if policy.include_crds() {
            for crd in &chart.crds {
                let mut content = crd.content.clone();
                if !content.ends_with('\n') {
                    content.push('\n');
                }
                manifest_docs.push(content);
            }
        }

        // disableHooks is an install flag; a client-only dry run never
        // executes hooks, so it does not affect which hooks are
        // collected. Output inclusion is gated by include_hooks alone.
        for (_, output) in rendered {
            for doc in split_rendered(&output)? {
                if is_hook(&doc)? {
                    hooks.push(doc);
                } else {
                    manifest_docs.push(doc);
                }
            }
        }

        let mut manifest = manifest_docs.join("---\n").into_bytes();
        let namespace_transformer = NamespaceTransformer::new(&namespace);
        manifest = namespace_transformer
            .run(&manifest)
            .map_err(|e| post_render_error(hr, e))?;
        for renderer in extra_renderers {
            manifest = renderer.run(&manifest).map_err(|e| post_render_error(hr, e))?;
        }

        Ok(RenderedRelease {
            manifest: String::from_utf8(manifest).expect("post-renderers emit UTF-8 YAML"),
            hooks,
        })
    }

    /// Write the rendered release to a fresh directory
    ///
    /// The directory holds `manifest.yaml` plus `hook_<i>.yaml` in
    /// declared order when hook inclusion is requested. Cleanup is the
    /// caller's concern.
    pub fn materialize(&self, rendered: &RenderedRelease, base: Option<&Path>) -> Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("kiln-release-");
        let dir = match base {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        }
        .into_path();

        std::fs::write(dir.join("manifest.yaml"), &rendered.manifest)?;

        if self.options.include_hooks {
            for (i, hook) in rendered.hooks.iter().enumerate() {
                std::fs::write(dir.join(format!("hook_{}.yaml", i)), hook)?;
            }
        }

        Ok(dir)
    }
}

/// Split a rendered template into its YAML documents, normalized
fn split_rendered(output: &str) -> Result<Vec<String>> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(output) {
        let value = serde_yaml::Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        docs.push(serde_yaml::to_string(&value)?);
    }
    Ok(docs)
}

fn is_hook(doc: &str) -> Result<bool> {
    let value: serde_yaml::Value = serde_yaml::from_str(doc)?;
    Ok(value
        .get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(|a| a.get(HOOK_ANNOTATION))
        .is_some())
}

fn post_render_error(hr: &HelmRelease, e: EngineError) -> EngineError {
    EngineError::PostRender {
        id: hr.id(),
        message: e.to_string(),
    }
}

fn config_map_value(doc: &kiln_core::Document, key: &str) -> Result<Vec<u8>> {
    doc.body()
        .get("data")
        .and_then(|d| d.get(key))
        .and_then(|v| v.as_str())
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| {
            CoreError::MissingKey {
                key: key.to_string(),
                id: doc.id().clone(),
            }
            .into()
        })
}

fn secret_value(doc: &kiln_core::Document, key: &str) -> Result<Vec<u8>> {
    if let Some(encoded) = doc
        .body()
        .get("data")
        .and_then(|d| d.get(key))
        .and_then(|v| v.as_str())
    {
        return base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| {
                CoreError::InvalidValuesReference {
                    id: doc.id().clone(),
                    message: format!("key '{}' is not valid base64: {}", key, e),
                }
                .into()
            });
    }

    doc.body()
        .get("stringData")
        .and_then(|d| d.get(key))
        .and_then(|v| v.as_str())
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| {
            CoreError::MissingKey {
                key: key.to_string(),
                id: doc.id().clone(),
            }
            .into()
        })
}
