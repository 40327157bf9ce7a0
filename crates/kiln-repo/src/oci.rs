//! OCI registry chart source
//!
//! Pulls chart tarballs published under the Helm OCI media types and
//! materializes them to a local directory. Version ranges resolve via
//! the registry's tag list.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use oci_distribution::client::{Client, ClientConfig};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use semver::{Version, VersionReq};

use kiln_core::OCI_PREFIX;

use crate::auth::{RegistryCredentials, RepositoryAuth};
use crate::error::{RepoError, Result};
use crate::source::{extract_chart_archive, ChartArtifact, ChartSource};

/// Media types for Helm charts in OCI
pub mod media_types {
    /// Helm chart config
    pub const HELM_CONFIG: &str = "application/vnd.cncf.helm.config.v1+json";
    /// Helm chart content layer
    pub const HELM_CONTENT: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
}

pub struct OciChartSource {
    url: String,
    client: Client,
    auth: RegistryAuth,
}

impl std::fmt::Debug for OciChartSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciChartSource")
            .field("url", &self.url)
            .finish()
    }
}

impl OciChartSource {
    pub fn new(auth: RepositoryAuth) -> Result<Self> {
        let url = auth.options.url.clone();
        if !url.starts_with(OCI_PREFIX) {
            return Err(RepoError::InvalidOciReference { reference: url });
        }

        Ok(Self {
            url,
            client: Client::new(ClientConfig::default()),
            auth: registry_auth(auth.registry),
        })
    }

    /// Resolve the tag a version spec selects
    ///
    /// Exact versions go straight to the registry; empty versions and
    /// ranges are matched against the tag list, pre-releases admitted.
    async fn resolve_tag(&self, chart: &str, version: &str) -> Result<String> {
        if !version.is_empty() && Version::parse(version).is_ok() {
            return Ok(version.to_string());
        }

        let spec = if version.is_empty() { "*" } else { version };
        let req = VersionReq::parse(spec).map_err(|_| RepoError::ChartUnavailable {
            name: chart.to_string(),
            version: version.to_string(),
            repo: self.url.clone(),
        })?;

        let reference = self.reference(chart, "latest")?;
        let tags = self
            .client
            .list_tags(&reference, &self.auth, None, None)
            .await
            .map_err(|e| RepoError::OciError {
                message: format!("failed to list tags: {}", e),
            })?;

        tags.tags
            .iter()
            .filter_map(|t| Version::parse(t).ok())
            .filter(|v| {
                req.matches(v)
                    || (!v.pre.is_empty() && req.matches(&Version::new(v.major, v.minor, v.patch)))
            })
            .max()
            .map(|v| v.to_string())
            .ok_or_else(|| RepoError::ChartUnavailable {
                name: chart.to_string(),
                version: spec.to_string(),
                repo: self.url.clone(),
            })
    }

    fn reference(&self, chart: &str, tag: &str) -> Result<Reference> {
        let base = self.url.trim_start_matches(OCI_PREFIX).trim_end_matches('/');
        let raw = format!("{}/{}:{}", base, chart, tag);
        Reference::try_from(raw.as_str()).map_err(|e| RepoError::InvalidOciReference {
            reference: format!("{}: {}", raw, e),
        })
    }
}

#[async_trait]
impl ChartSource for OciChartSource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn resolve(&self, chart: &str, version: &str, workdir: &Path) -> Result<ChartArtifact> {
        let tag = self.resolve_tag(chart, version).await?;
        let reference = self.reference(chart, &tag)?;

        tracing::debug!(chart, tag = %tag, registry = %self.url, "pulling chart from registry");
        let image = self
            .client
            .pull(
                &reference,
                &self.auth,
                vec![media_types::HELM_CONFIG, media_types::HELM_CONTENT],
            )
            .await
            .map_err(|e| RepoError::OciError {
                message: format!("failed to pull {}: {}", reference, e),
            })?;

        let layer = image
            .layers
            .iter()
            .find(|l| l.media_type == media_types::HELM_CONTENT)
            .ok_or_else(|| RepoError::OciError {
                message: format!("no chart content layer in manifest for {}", reference),
            })?;

        let dest = workdir.join(format!("{}-{}", chart, tag));
        let path = extract_chart_archive(&layer.data, &dest, chart)?;

        Ok(ChartArtifact {
            path,
            name: chart.to_string(),
            version: tag,
            digest: image.digest,
        })
    }
}

/// Map resolved credentials onto the OCI client's auth type
///
/// Opaque tokens (the ECR exchange) decode to `user:password` pairs;
/// anything else is passed as the password of an empty user.
fn registry_auth(credentials: Option<RegistryCredentials>) -> RegistryAuth {
    match credentials {
        None => RegistryAuth::Anonymous,
        Some(RegistryCredentials::Basic { username, password }) => {
            RegistryAuth::Basic(username, password)
        }
        Some(RegistryCredentials::Token { token }) => {
            if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(&token) {
                if let Ok(pair) = String::from_utf8(decoded) {
                    if let Some((user, pass)) = pair.split_once(':') {
                        return RegistryAuth::Basic(user.to_string(), pass.to_string());
                    }
                }
            }
            RegistryAuth::Basic(String::new(), token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ClientOptions, REPOSITORY_TIMEOUT};

    fn auth(url: &str) -> RepositoryAuth {
        RepositoryAuth {
            options: ClientOptions {
                url: url.to_string(),
                timeout: REPOSITORY_TIMEOUT,
                pass_credentials: false,
                basic: None,
            },
            tls: None,
            registry: None,
        }
    }

    #[test]
    fn test_requires_oci_prefix() {
        assert!(OciChartSource::new(auth("https://ghcr.io/org/charts")).is_err());
        assert!(OciChartSource::new(auth("oci://ghcr.io/org/charts")).is_ok());
    }

    #[test]
    fn test_reference_construction() {
        let source = OciChartSource::new(auth("oci://ghcr.io/org/charts")).unwrap();
        let reference = source.reference("podinfo", "6.5.0").unwrap();
        assert_eq!(reference.registry(), "ghcr.io");
        assert_eq!(reference.repository(), "org/charts/podinfo");
        assert_eq!(reference.tag(), Some("6.5.0"));
    }

    #[test]
    fn test_ecr_token_decodes_to_basic() {
        let token = base64::engine::general_purpose::STANDARD.encode("AWS:ecr-password");
        match registry_auth(Some(RegistryCredentials::Token { token })) {
            RegistryAuth::Basic(user, pass) => {
                assert_eq!(user, "AWS");
                assert_eq!(pass, "ecr-password");
            }
            _ => panic!("expected basic auth"),
        }
    }

    #[test]
    fn test_opaque_token_kept_as_password() {
        match registry_auth(Some(RegistryCredentials::Token {
            token: "opaque".to_string(),
        })) {
            RegistryAuth::Basic(user, pass) => {
                assert_eq!(user, "");
                assert_eq!(pass, "opaque");
            }
            _ => panic!("expected basic auth"),
        }
    }
}
