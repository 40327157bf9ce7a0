//! Cloud-provider registry login
//!
//! OCI repositories that declare a non-generic provider and no secret
//! obtain registry credentials from the provider's ambient identity
//! source: the ECR public token endpoint for AWS, the IMDS identity
//! endpoint for Azure, the metadata server for GCP. An unreachable
//! source means the provider is unconfigured and the repository proceeds
//! anonymously; every other failure is fatal.

use std::time::Duration;

use serde::Deserialize;

use kiln_core::Provider;

use crate::auth::{RegistryCredentials, REPOSITORY_TIMEOUT};
use crate::error::{RepoError, Result};

/// Azure's documented client id for exchanging an AAD token at a
/// registry
const ACR_TOKEN_USER: &str = "00000000-0000-0000-0000-000000000000";

/// Ambient endpoints, overridable for tests
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub aws: String,
    pub azure: String,
    pub gcp: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            aws: "https://public.ecr.aws/token/".to_string(),
            azure: "http://169.254.169.254/metadata/identity/oauth2/token?api-version=2018-02-01&resource=https%3A%2F%2Fcontainerregistry.azure.net".to_string(),
            gcp: "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token".to_string(),
        }
    }
}

/// Performs ambient registry logins with a bounded deadline
pub struct ProviderLogin {
    endpoints: ProviderEndpoints,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EcrToken {
    token: String,
}

#[derive(Deserialize)]
struct OauthToken {
    access_token: String,
}

impl ProviderLogin {
    pub fn new() -> Result<Self> {
        Self::with_endpoints(ProviderEndpoints::default())
    }

    pub fn with_endpoints(endpoints: ProviderEndpoints) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REPOSITORY_TIMEOUT)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(RepoError::from)?;
        Ok(Self { endpoints, client })
    }

    /// Exchange ambient identity for registry credentials
    ///
    /// Returns `ProviderUnconfigured` when the ambient source cannot be
    /// reached; callers ignore that case silently.
    pub async fn login(&self, provider: Provider, url: &str) -> Result<RegistryCredentials> {
        tracing::debug!(%provider, url, "attempting provider registry login");
        match provider {
            Provider::Generic => Err(RepoError::ProviderUnconfigured {
                provider: provider.to_string(),
            }),
            Provider::Aws => self.login_aws(provider).await,
            Provider::Azure => self.login_azure(provider).await,
            Provider::Gcp => self.login_gcp(provider).await,
        }
    }

    async fn login_aws(&self, provider: Provider) -> Result<RegistryCredentials> {
        let response = self
            .client
            .get(&self.endpoints.aws)
            .send()
            .await
            .map_err(|e| unconfigured_on_connect(e, provider))?;
        let token: EcrToken = decode(provider, response).await?;
        Ok(RegistryCredentials::Token { token: token.token })
    }

    async fn login_azure(&self, provider: Provider) -> Result<RegistryCredentials> {
        let response = self
            .client
            .get(&self.endpoints.azure)
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| unconfigured_on_connect(e, provider))?;
        let token: OauthToken = decode(provider, response).await?;
        Ok(RegistryCredentials::Basic {
            username: ACR_TOKEN_USER.to_string(),
            password: token.access_token,
        })
    }

    async fn login_gcp(&self, provider: Provider) -> Result<RegistryCredentials> {
        let response = self
            .client
            .get(&self.endpoints.gcp)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| unconfigured_on_connect(e, provider))?;
        let token: OauthToken = decode(provider, response).await?;
        Ok(RegistryCredentials::Basic {
            username: "oauth2accesstoken".to_string(),
            password: token.access_token,
        })
    }
}

/// Connection failures mean no ambient identity; anything else is a
/// real authentication error
fn unconfigured_on_connect(e: reqwest::Error, provider: Provider) -> RepoError {
    if e.is_connect() || e.is_timeout() {
        RepoError::ProviderUnconfigured {
            provider: provider.to_string(),
        }
    } else {
        RepoError::AuthFailure {
            message: format!("provider {} login failed: {}", provider, e),
        }
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    provider: Provider,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(RepoError::AuthFailure {
            message: format!(
                "provider {} login failed with status {}",
                provider,
                status.as_u16()
            ),
        });
    }
    response.json::<T>().await.map_err(|e| RepoError::AuthFailure {
        message: format!("provider {} returned an invalid token response: {}", provider, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP responder on a local port
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
        });
        format!("http://{}", addr)
    }

    fn endpoints(aws: String) -> ProviderEndpoints {
        ProviderEndpoints {
            aws,
            ..ProviderEndpoints::default()
        }
    }

    #[tokio::test]
    async fn test_aws_token_exchange() {
        let base = serve_once("200 OK", r#"{"token":"ZWNyOnRva2Vu"}"#).await;
        let login = ProviderLogin::with_endpoints(endpoints(base)).unwrap();

        let creds = login.login(Provider::Aws, "oci://123.dkr.ecr.io/charts").await.unwrap();
        match creds {
            RegistryCredentials::Token { token } => assert_eq!(token, "ZWNyOnRva2Vu"),
            _ => panic!("expected token credentials"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unconfigured() {
        // Nothing listens on this port.
        let login = ProviderLogin::with_endpoints(endpoints("http://127.0.0.1:1/token".to_string())).unwrap();
        let err = login.login(Provider::Aws, "oci://example/charts").await.unwrap_err();
        assert!(matches!(err, RepoError::ProviderUnconfigured { .. }));
    }

    #[tokio::test]
    async fn test_error_status_is_fatal() {
        let base = serve_once("403 Forbidden", r#"{"message":"denied"}"#).await;
        let login = ProviderLogin::with_endpoints(endpoints(base)).unwrap();
        let err = login.login(Provider::Aws, "oci://example/charts").await.unwrap_err();
        assert!(matches!(err, RepoError::AuthFailure { .. }));
    }

    #[tokio::test]
    async fn test_generic_provider_is_never_configured() {
        let login = ProviderLogin::new().unwrap();
        let err = login.login(Provider::Generic, "oci://example/charts").await.unwrap_err();
        assert!(matches!(err, RepoError::ProviderUnconfigured { .. }));
    }
}
