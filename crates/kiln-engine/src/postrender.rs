//! Post-render transformations
//!
//! A post-renderer is a buffer-to-buffer transformation applied after
//! templating and before output. The namespace transformer is the one
//! mandatory stage: every namespaced resource ends up in the release's
//! target namespace.

use serde::Deserialize;

use crate::error::Result;

/// Buffer-to-buffer manifest transformation
pub trait PostRenderer: Send + Sync {
    fn run(&self, manifests: &[u8]) -> Result<Vec<u8>>;
}

/// Kinds that exist outside any namespace and must not be rewritten
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "StorageClass",
    "PriorityClass",
    "IngressClass",
    "RuntimeClass",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
    "ValidatingAdmissionPolicy",
    "ValidatingAdmissionPolicyBinding",
    "APIService",
    "CSIDriver",
    "CSINode",
    "VolumeAttachment",
];

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Rewrites `metadata.namespace` on every namespaced resource
pub struct NamespaceTransformer {
    namespace: String,
}

impl NamespaceTransformer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

impl PostRenderer for NamespaceTransformer {
    fn run(&self, manifests: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(manifests)
            .map_err(|e| std::io::Error::other(format!("manifests are not UTF-8: {}", e)))?;

        let mut out = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let mut doc = serde_yaml::Value::deserialize(document)?;
            if doc.is_null() {
                continue;
            }

            let kind = doc.get("kind").and_then(|k| k.as_str()).unwrap_or("");
            if !kind.is_empty() && !is_cluster_scoped(kind) {
                if let Some(metadata) = doc.get_mut("metadata").and_then(|m| m.as_mapping_mut()) {
                    metadata.insert(
                        serde_yaml::Value::String("namespace".to_string()),
                        serde_yaml::Value::String(self.namespace.clone()),
                    );
                }
            }
            out.push(doc);
        }

        let mut buffer = String::new();
        for doc in out {
            if !buffer.is_empty() {
                buffer.push_str("---\n");
            }
            buffer.push_str(&serde_yaml::to_string(&doc)?);
        }
        Ok(buffer.into_bytes())
    }
}
