//! Kustomize fusion
//!
//! The renderer's output directory is treated as a Kustomize base and
//! flattened into a canonical YAML stream. With no kustomization file
//! present every manifest in the directory is taken as a resource and
//! the result is the identity transform up to YAML normalization.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::postrender::is_cluster_scoped;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kustomization {
    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub name_prefix: Option<String>,

    #[serde(default)]
    pub name_suffix: Option<String>,

    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,

    /// Strategic-merge patch files, matched by (apiVersion, kind, name)
    #[serde(default)]
    pub patches_strategic_merge: Vec<String>,
}

/// Flatten a directory of manifests into one canonical YAML stream
pub fn fuse(dir: &Path) -> Result<String> {
    let kustomize_err = |message: String| EngineError::Kustomize {
        path: dir.display().to_string(),
        message,
    };

    let kustomization = load_kustomization(dir)?;

    let resource_files: Vec<String> = match &kustomization {
        Some(k) if !k.resources.is_empty() => k.resources.clone(),
        _ => {
            let mut files: Vec<String> = std::fs::read_dir(dir)?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| {
                    (name.ends_with(".yaml") || name.ends_with(".yml"))
                        && name != "kustomization.yaml"
                        && name != "kustomization.yml"
                })
                .collect();
            files.sort();
            files
        }
    };

    let mut documents = Vec::new();
    for file in &resource_files {
        let path = dir.join(file);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| kustomize_err(format!("cannot read resource '{}': {}", file, e)))?;
        for doc in serde_yaml::Deserializer::from_str(&text) {
            let value = serde_yaml::Value::deserialize(doc)
                .map_err(|e| kustomize_err(format!("invalid resource '{}': {}", file, e)))?;
            if !value.is_null() {
                documents.push(value);
            }
        }
    }

    if let Some(kustomization) = &kustomization {
        let patches = load_patches(dir, kustomization)?;
        for doc in &mut documents {
            apply_patches(doc, &patches);
            apply_transforms(doc, kustomization);
        }
    }

    let mut out = String::new();
    for doc in documents {
        if !out.is_empty() {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(&doc)?);
    }
    Ok(out)
}

fn load_kustomization(dir: &Path) -> Result<Option<Kustomization>> {
    for name in ["kustomization.yaml", "kustomization.yml"] {
        let path = dir.join(name);
        if path.is_file() {
            let text = std::fs::read_to_string(&path)?;
            let kustomization =
                serde_yaml::from_str(&text).map_err(|e| EngineError::Kustomize {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            return Ok(Some(kustomization));
        }
    }
    Ok(None)
}

fn load_patches(dir: &Path, kustomization: &Kustomization) -> Result<Vec<serde_yaml::Value>> {
    let mut patches = Vec::new();
    for file in &kustomization.patches_strategic_merge {
        let text = std::fs::read_to_string(dir.join(file)).map_err(|e| EngineError::Kustomize {
            path: dir.display().to_string(),
            message: format!("cannot read patch '{}': {}", file, e),
        })?;
        for doc in serde_yaml::Deserializer::from_str(&text) {
            let value = serde_yaml::Value::deserialize(doc).map_err(|e| EngineError::Kustomize {
                path: dir.display().to_string(),
                message: format!("invalid patch '{}': {}", file, e),
            })?;
            if !value.is_null() {
                patches.push(value);
            }
        }
    }
    Ok(patches)
}

fn identity(doc: &serde_yaml::Value) -> (&str, &str, &str) {
    let api_version = doc.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("");
    let kind = doc.get("kind").and_then(|v| v.as_str()).unwrap_or("");
    let name = doc
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    (api_version, kind, name)
}

fn apply_patches(doc: &mut serde_yaml::Value, patches: &[serde_yaml::Value]) {
    for patch in patches {
        if identity(doc) == identity(patch) {
            merge_yaml(doc, patch);
        }
    }
}

/// Strategic merge approximated as a recursive map merge; patch scalars
/// and sequences replace the target's
fn merge_yaml(base: &mut serde_yaml::Value, patch: &serde_yaml::Value) {
    match (base, patch) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_yaml(base_value, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => {
            *base = patch.clone();
        }
    }
}

fn apply_transforms(doc: &mut serde_yaml::Value, kustomization: &Kustomization) {
    let kind = doc
        .get("kind")
        .and_then(|k| k.as_str())
        .unwrap_or("")
        .to_string();

    let Some(metadata) = doc.get_mut("metadata").and_then(|m| m.as_mapping_mut()) else {
        return;
    };

    let str_key = |s: &str| serde_yaml::Value::String(s.to_string());

    if let Some(namespace) = &kustomization.namespace {
        if !is_cluster_scoped(&kind) {
            metadata.insert(str_key("namespace"), str_key(namespace));
        }
    }

    if kustomization.name_prefix.is_some() || kustomization.name_suffix.is_some() {
        if let Some(name) = metadata.get(str_key("name")).and_then(|n| n.as_str()) {
            let renamed = format!(
                "{}{}{}",
                kustomization.name_prefix.as_deref().unwrap_or(""),
                name,
                kustomization.name_suffix.as_deref().unwrap_or("")
            );
            metadata.insert(str_key("name"), str_key(&renamed));
        }
    }

    if !kustomization.common_labels.is_empty() {
        let labels = metadata
            .entry(str_key("labels"))
            .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
        if let Some(labels) = labels.as_mapping_mut() {
            for (k, v) in &kustomization.common_labels {
                labels.insert(str_key(k), str_key(v));
            }
        }
    }

    if !kustomization.common_annotations.is_empty() {
        let annotations = metadata
            .entry(str_key("annotations"))
            .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
        if let Some(annotations) = annotations.as_mapping_mut() {
            for (k, v) in &kustomization.common_annotations {
                annotations.insert(str_key(k), str_key(v));
            }
        }
    }
}
