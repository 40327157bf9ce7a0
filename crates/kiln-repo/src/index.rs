//! Repository index types
//!
//! Helm-compatible index.yaml format. Version resolution honors exact
//! matches first, then semver ranges; devel mode admits pre-release
//! versions into range resolution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, Result};

/// Repository index (Helm-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "Utc::now")]
    pub generated: DateTime<Utc>,

    /// Charts indexed by name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

/// Chart entry in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// URLs to download the chart archive
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deprecated: bool,
}

impl ChartEntry {
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }
}

impl RepositoryIndex {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Resolve a chart entry for an exact version or a semver range
    ///
    /// An empty or `*` version selects the highest available release;
    /// pre-releases are admitted only in devel mode.
    pub fn resolve(&self, name: &str, version: &str, devel: bool) -> Result<&ChartEntry> {
        let unavailable = || RepoError::ChartUnavailable {
            name: name.to_string(),
            version: if version.is_empty() { "*" } else { version }.to_string(),
            repo: "index".to_string(),
        };

        let entries = self.entries.get(name).ok_or_else(unavailable)?;

        // Exact version match wins over range interpretation.
        if let Some(entry) = entries.iter().find(|e| e.version == version) {
            return Ok(entry);
        }

        let spec = if version.is_empty() { "*" } else { version };
        let req = VersionReq::parse(spec).map_err(|e| RepoError::IndexParseError {
            message: format!("invalid version range '{}': {}", spec, e),
        })?;

        entries
            .iter()
            .filter_map(|e| Version::parse(&e.version).ok().map(|v| (e, v)))
            .filter(|(_, v)| matches_req(&req, v, devel))
            .max_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(e, _)| e)
            .ok_or_else(unavailable)
    }
}

/// Range matching with optional pre-release admission
///
/// semver excludes pre-releases from ranges without a pre-release
/// comparator; devel mode compares against the release core instead.
fn matches_req(req: &VersionReq, version: &Version, devel: bool) -> bool {
    if req.matches(version) {
        return true;
    }
    if devel && !version.pre.is_empty() {
        let core = Version::new(version.major, version.minor, version.patch);
        return req.matches(&core);
    }
    false
}
