//! Chart model and loader
//!
//! An extracted chart directory holds Chart.yaml, default values,
//! templated manifests under templates/ and static CRDs under crds/.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use kiln_core::Values;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default)]
    pub api_version: String,

    pub name: String,
    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub kube_version: Option<String>,
}

/// A file within the chart, named relative to its section directory
#[derive(Debug, Clone)]
pub struct ChartFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct Chart {
    pub root: PathBuf,
    pub metadata: ChartMetadata,
    pub default_values: Values,
    /// Templated manifests; helper files (leading underscore) included
    /// for template inheritance but never rendered standalone
    pub templates: Vec<ChartFile>,
    /// Static CRDs, emitted verbatim subject to the install policy
    pub crds: Vec<ChartFile>,
}

impl Chart {
    /// Load a chart from an extracted directory
    pub fn load(root: &Path) -> Result<Self> {
        let invalid = |message: String| EngineError::InvalidChart {
            path: root.display().to_string(),
            message,
        };

        let metadata_path = root.join("Chart.yaml");
        let metadata_raw = std::fs::read_to_string(&metadata_path)
            .map_err(|e| invalid(format!("cannot read Chart.yaml: {}", e)))?;
        let metadata: ChartMetadata =
            serde_yaml::from_str(&metadata_raw).map_err(|e| invalid(format!("invalid Chart.yaml: {}", e)))?;

        let default_values = match std::fs::read_to_string(root.join("values.yaml")) {
            Ok(raw) => Values::from_yaml(&raw)
                .map_err(|e| invalid(format!("invalid values.yaml: {}", e)))?,
            Err(_) => Values::new(),
        };

        let templates = load_section(root, "templates")?;
        let crds = load_section(root, "crds")?;

        Ok(Self {
            root: root.to_path_buf(),
            metadata,
            default_values,
            templates,
            crds,
        })
    }

    /// Load a chart, replacing the default values with the named files
    ///
    /// When a release selects alternative values files, those files
    /// (relative to the chart root, merged in order) stand in for
    /// values.yaml entirely.
    pub fn load_with_values_files(root: &Path, files: &[String]) -> Result<Self> {
        let mut chart = Self::load(root)?;
        if files.is_empty() {
            return Ok(chart);
        }

        let mut merged = Values::new();
        for file in files {
            let path = chart.root.join(file);
            let raw = std::fs::read_to_string(&path).map_err(|_| EngineError::InvalidChart {
                path: root.display().to_string(),
                message: format!("values file '{}' not found in chart", file),
            })?;
            let values = Values::from_yaml(&raw).map_err(|e| EngineError::InvalidChart {
                path: root.display().to_string(),
                message: format!("values file '{}' is invalid: {}", file, e),
            })?;
            merged.merge(&values);
        }
        chart.default_values = merged;
        Ok(chart)
    }
}

fn load_section(root: &Path, section: &str) -> Result<Vec<ChartFile>> {
    let dir = root.join(section);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&dir).sort_by_file_name() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") | Some("tpl") | Some("txt") => {}
            _ => continue,
        }

        let name = path
            .strip_prefix(&dir)
            .expect("walked under section dir")
            .to_string_lossy()
            .into_owned();
        files.push(ChartFile {
            name,
            content: std::fs::read_to_string(path)?,
        });
    }
    Ok(files)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_chart() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_chart(dir.path(), "demo", "1.2.3");

        let chart = Chart::load(dir.path()).unwrap();
        assert_eq!(chart.metadata.name, "demo");
        assert_eq!(chart.metadata.version, "1.2.3");
        assert_eq!(chart.templates.len(), 1);
        assert!(chart.crds.is_empty());
        assert_eq!(chart.default_values.get("replicas").unwrap(), 1);
    }

    #[test]
    fn test_missing_chart_yaml_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Chart::load(dir.path()).unwrap_err(),
            EngineError::InvalidChart { .. }
        ));
    }

    #[test]
    fn test_values_files_replace_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_chart(dir.path(), "demo", "1.0.0");
        std::fs::write(dir.path().join("values-prod.yaml"), "replicas: 5\n").unwrap();

        let chart =
            Chart::load_with_values_files(dir.path(), &["values-prod.yaml".to_string()]).unwrap();
        assert_eq!(chart.default_values.get("replicas").unwrap(), 5);
        // values.yaml is replaced, not merged
        assert!(chart.default_values.get("image").is_none());
    }

    #[test]
    fn test_missing_values_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_chart(dir.path(), "demo", "1.0.0");

        assert!(Chart::load_with_values_files(dir.path(), &["nope.yaml".to_string()]).is_err());
    }
}
