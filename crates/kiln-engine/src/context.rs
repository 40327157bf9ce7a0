//! Synthetic install context
//!
//! The context a dry-run render sees: release identity, composed
//! values, chart metadata and cluster capabilities. No cluster is ever
//! contacted; capabilities are whatever the configuration claims.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use kiln_core::Values;

use crate::chart::ChartMetadata;

/// API versions every chart may assume, before configured additions
pub const DEFAULT_API_VERSIONS: &[&str] = &[
    "v1",
    "apps/v1",
    "batch/v1",
    "networking.k8s.io/v1",
    "policy/v1",
    "rbac.authorization.k8s.io/v1",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallContext {
    pub values: JsonValue,
    pub release: ReleaseInfo,
    pub chart: ChartInfo,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub revision: i64,
    pub is_install: bool,
}

impl ReleaseInfo {
    pub fn for_install(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            revision: 1,
            is_install: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
}

impl From<&ChartMetadata> for ChartInfo {
    fn from(meta: &ChartMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.clone(),
            app_version: meta.app_version.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub kube_version: KubeVersion,
    pub api_versions: Vec<String>,
}

impl Capabilities {
    /// Defaults plus configured and per-release API versions, deduplicated
    pub fn new(kube_version: KubeVersion, extra_api_versions: &[String]) -> Self {
        let mut api_versions: Vec<String> =
            DEFAULT_API_VERSIONS.iter().map(|s| s.to_string()).collect();
        for v in extra_api_versions {
            if !api_versions.contains(v) {
                api_versions.push(v.clone());
            }
        }
        Self {
            kube_version,
            api_versions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        Self::new("1.30.0")
    }
}

impl KubeVersion {
    pub fn new(version: &str) -> Self {
        let version = version.trim_start_matches('v');
        let parts: Vec<&str> = version.split('.').collect();
        Self {
            version: format!("v{}", version),
            major: parts.first().unwrap_or(&"1").to_string(),
            minor: parts.get(1).unwrap_or(&"30").to_string(),
        }
    }
}

impl InstallContext {
    pub fn new(
        values: Values,
        release: ReleaseInfo,
        chart: &ChartMetadata,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            values: values.into_inner(),
            release,
            chart: ChartInfo::from(chart),
            capabilities,
        }
    }

    /// Serialize for the template environment
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
