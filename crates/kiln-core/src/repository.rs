//! HelmRepository declaration types

use serde::{Deserialize, Serialize};

use crate::release::ObjectMeta;
use crate::resource::ResourceId;

pub const HELM_REPOSITORY_KIND: &str = "HelmRepository";
pub const SOURCE_GROUP: &str = "source.toolkit.fluxcd.io";

/// Prefix marking an OCI registry URL
pub const OCI_PREFIX: &str = "oci://";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRepository {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: HelmRepositorySpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRepositorySpec {
    pub url: String,

    #[serde(default)]
    pub secret_ref: Option<LocalObjectReference>,

    #[serde(default, rename = "type")]
    pub repo_type: RepositoryType,

    #[serde(default)]
    pub provider: Provider,

    /// Forward credentials to hosts the index redirects chart downloads to
    #[serde(default)]
    pub pass_credentials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    #[default]
    Default,
    Oci,
}

/// Cloud provider used for registry login when no secret is configured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Generic,
    Aws,
    Azure,
    Gcp,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Generic => write!(f, "generic"),
            Provider::Aws => write!(f, "aws"),
            Provider::Azure => write!(f, "azure"),
            Provider::Gcp => write!(f, "gcp"),
        }
    }
}

impl HelmRepository {
    pub fn id(&self) -> ResourceId {
        ResourceId::new(
            SOURCE_GROUP,
            HELM_REPOSITORY_KIND,
            &self.metadata.namespace,
            &self.metadata.name,
        )
    }

    /// Identity of the referenced secret, if any
    pub fn secret_id(&self) -> Option<ResourceId> {
        self.spec
            .secret_ref
            .as_ref()
            .map(|r| ResourceId::core("Secret", &self.metadata.namespace, &r.name))
    }

    pub fn is_oci(&self) -> bool {
        self.spec.repo_type == RepositoryType::Oci
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_defaults() {
        let repo: HelmRepository = serde_yaml::from_str(
            r#"
apiVersion: source.toolkit.fluxcd.io/v1
kind: HelmRepository
metadata:
  name: charts
  namespace: flux-system
spec:
  url: https://charts.example/
"#,
        )
        .unwrap();

        assert_eq!(repo.spec.repo_type, RepositoryType::Default);
        assert_eq!(repo.spec.provider, Provider::Generic);
        assert!(!repo.spec.pass_credentials);
        assert!(repo.secret_id().is_none());
    }

    #[test]
    fn test_deserialize_oci_with_provider() {
        let repo: HelmRepository = serde_yaml::from_str(
            r#"
apiVersion: source.toolkit.fluxcd.io/v1
kind: HelmRepository
metadata:
  name: registry
  namespace: flux-system
spec:
  url: oci://ghcr.io/org/charts
  type: oci
  provider: aws
  secretRef:
    name: registry-auth
"#,
        )
        .unwrap();

        assert!(repo.is_oci());
        assert_eq!(repo.spec.provider, Provider::Aws);
        assert_eq!(
            repo.secret_id().unwrap(),
            ResourceId::core("Secret", "flux-system", "registry-auth")
        );
    }
}
