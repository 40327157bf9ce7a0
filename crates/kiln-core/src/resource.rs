//! Resource identity and documents
//!
//! Every ingested YAML document is indexed by a `ResourceId`, the
//! (group, kind, namespace, name) tuple that uniquely identifies it.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Unique identity of a document in the resource database
///
/// An empty group denotes the core API group. Cluster-scoped resources
/// carry an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity in the core group, e.g. ConfigMap or Secret
    pub fn core(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new("", kind, namespace, name)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        } else {
            write!(f, "{}.{} {}/{}", self.kind, self.group, self.namespace, self.name)
        }
    }
}

/// A single ingested YAML document
///
/// The body is immutable after ingestion; `raw` preserves the exact text
/// the document was decoded from (after environment substitution).
#[derive(Debug, Clone)]
pub struct Document {
    id: ResourceId,
    body: serde_yaml::Value,
    raw: String,
}

impl Document {
    /// Decode a single YAML document and extract its identity
    pub fn parse(raw: &str, path: &str) -> Result<Self> {
        let body: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|e| CoreError::InvalidDocument {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let id = extract_id(&body).ok_or_else(|| CoreError::InvalidDocument {
            path: path.to_string(),
            message: "document has no apiVersion, kind or metadata.name".to_string(),
        })?;

        Ok(Self {
            id,
            body,
            raw: raw.to_string(),
        })
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn body(&self) -> &serde_yaml::Value {
        &self.body
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The `apiVersion` field of the document, if any
    pub fn api_version(&self) -> Option<&str> {
        self.body.get("apiVersion").and_then(|v| v.as_str())
    }

    /// `metadata.generation`, 0 when absent
    pub fn generation(&self) -> i64 {
        self.body
            .get("metadata")
            .and_then(|m| m.get("generation"))
            .and_then(|g| g.as_i64())
            .unwrap_or(0)
    }

    /// Deserialize the document body into a typed declaration
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_yaml::from_value(self.body.clone())?)
    }
}

/// Extract (group, kind, namespace, name) from a decoded document
fn extract_id(body: &serde_yaml::Value) -> Option<ResourceId> {
    let api_version = body.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("v1");
    let group = match api_version.split_once('/') {
        Some((group, _version)) => group,
        None => "",
    };

    let kind = body.get("kind").and_then(|v| v.as_str())?;
    let metadata = body.get("metadata")?;
    let name = metadata.get("name").and_then(|v| v.as_str())?;
    let namespace = metadata
        .get("namespace")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    Some(ResourceId::new(group, kind, namespace, name))
}
