//! HTTP chart repository
//!
//! Traditional Helm-style repositories serving an index.yaml. The index
//! is fetched once per handle; handles themselves are cached per URL by
//! the build engine, so each repository is indexed at most once per
//! build.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use url::Url;

use crate::auth::{RepositoryAuth, TlsSpec};
use crate::error::{RepoError, Result};
use crate::index::RepositoryIndex;
use crate::source::{compute_digest, digest_matches, extract_chart_archive, ChartArtifact, ChartSource};

pub struct HttpChartSource {
    auth: RepositoryAuth,
    client: reqwest::Client,
    index: OnceCell<RepositoryIndex>,
}

impl std::fmt::Debug for HttpChartSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChartSource")
            .field("url", &self.auth.options.url)
            .finish()
    }
}

impl HttpChartSource {
    pub fn new(auth: RepositoryAuth) -> Result<Self> {
        let client = build_client(&auth)?;
        Ok(Self {
            auth,
            client,
            index: OnceCell::new(),
        })
    }

    /// Fetch and parse the repository index, once per handle
    pub async fn index(&self) -> Result<&RepositoryIndex> {
        self.index
            .get_or_try_init(|| async {
                let index_url = format!("{}/index.yaml", self.auth.options.url);
                tracing::debug!(url = %index_url, "fetching repository index");

                let data = self.get_bytes(&index_url).await?;
                RepositoryIndex::from_bytes(&data)
            })
            .await
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some(basic) = self.credentials_for(url) {
            request = request.basic_auth(&basic.username, Some(&basic.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RepoError::IndexNotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                message: format!("GET {}", url),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Credentials are only sent to the repository's own host unless
    /// the declaration opted into forwarding them
    fn credentials_for(&self, url: &str) -> Option<&crate::auth::BasicCredentials> {
        let basic = self.auth.options.basic.as_ref()?;
        if self.auth.options.pass_credentials {
            return Some(basic);
        }

        let repo_host = Url::parse(&self.auth.options.url).ok()?.host_str()?.to_string();
        let target_host = Url::parse(url).ok()?.host_str()?.to_string();
        (repo_host == target_host).then_some(basic)
    }

    /// Resolve a chart entry's download URL against the repository URL
    fn absolute_url(&self, entry_url: &str) -> String {
        if entry_url.starts_with("http://") || entry_url.starts_with("https://") {
            entry_url.to_string()
        } else {
            format!("{}/{}", self.auth.options.url, entry_url.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl ChartSource for HttpChartSource {
    fn url(&self) -> &str {
        &self.auth.options.url
    }

    async fn resolve(&self, chart: &str, version: &str, workdir: &Path) -> Result<ChartArtifact> {
        let entry = self
            .index()
            .await?
            .resolve(chart, version, true)
            .map_err(|e| match e {
                RepoError::ChartUnavailable { name, version, .. } => RepoError::ChartUnavailable {
                    name,
                    version,
                    repo: self.auth.options.url.clone(),
                },
                other => other,
            })?
            .clone();

        let url = entry
            .download_url()
            .map(|u| self.absolute_url(u))
            .ok_or_else(|| RepoError::ChartUnavailable {
                name: chart.to_string(),
                version: entry.version.clone(),
                repo: self.auth.options.url.clone(),
            })?;

        tracing::debug!(chart, version = %entry.version, url = %url, "downloading chart");
        let data = self.get_bytes(&url).await?;

        if let Some(expected) = &entry.digest {
            let actual = compute_digest(&data);
            if !digest_matches(expected, &actual) {
                return Err(RepoError::IntegrityCheckFailed {
                    name: chart.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let dest = workdir.join(format!("{}-{}", chart, entry.version));
        let path = extract_chart_archive(&data, &dest, chart)?;

        Ok(ChartArtifact {
            path,
            name: chart.to_string(),
            version: entry.version.clone(),
            digest: entry.digest.clone(),
        })
    }
}

fn build_client(auth: &RepositoryAuth) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(auth.options.timeout)
        .use_rustls_tls();

    if let Some(tls) = &auth.tls {
        builder = apply_tls(builder, tls)?;
    }

    builder.build().map_err(RepoError::from)
}

fn apply_tls(mut builder: reqwest::ClientBuilder, tls: &TlsSpec) -> Result<reqwest::ClientBuilder> {
    if let Some(ca) = &tls.ca_pem {
        let cert = reqwest::Certificate::from_pem(ca).map_err(|e| RepoError::AuthFailure {
            message: format!("invalid caFile: {}", e),
        })?;
        builder = builder.add_root_certificate(cert);
    }

    if let (Some(cert), Some(key)) = (&tls.cert_pem, &tls.key_pem) {
        let mut pem = cert.clone();
        pem.push(b'\n');
        pem.extend_from_slice(key);
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| RepoError::AuthFailure {
            message: format!("invalid certFile/keyFile pair: {}", e),
        })?;
        builder = builder.identity(identity);
    }

    Ok(builder)
}
