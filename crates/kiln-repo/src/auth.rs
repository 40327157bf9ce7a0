//! Credential and TLS resolution from repository secrets
//!
//! A HelmRepository may reference a Secret carrying `username`/
//! `password` for transport auth and `certFile`/`keyFile`/`caFile` for
//! TLS. Secret values come base64-encoded under `data` or plain under
//! `stringData`.

use std::time::Duration;

use base64::Engine;
use kiln_core::{Document, HelmRepository};

use crate::error::{RepoError, Result};

/// Ceiling for every remote operation a repository performs during
/// initialization (index fetch, registry login, provider exchange)
pub const REPOSITORY_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport options derived from the repository declaration
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    pub timeout: Duration,
    /// Forward credentials to hosts other than the repository host
    pub pass_credentials: bool,
    pub basic: Option<BasicCredentials>,
}

#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Client TLS material from a repository secret
#[derive(Debug, Clone, Default)]
pub struct TlsSpec {
    pub cert_pem: Option<Vec<u8>>,
    pub key_pem: Option<Vec<u8>>,
    pub ca_pem: Option<Vec<u8>>,
}

impl TlsSpec {
    pub fn is_empty(&self) -> bool {
        self.cert_pem.is_none() && self.key_pem.is_none() && self.ca_pem.is_none()
    }
}

/// Registry login material for OCI repositories
#[derive(Debug, Clone)]
pub enum RegistryCredentials {
    Basic { username: String, password: String },
    Token { token: String },
}

/// Everything the chart source constructors need
#[derive(Debug, Clone)]
pub struct RepositoryAuth {
    pub options: ClientOptions,
    pub tls: Option<TlsSpec>,
    pub registry: Option<RegistryCredentials>,
}

impl RepositoryAuth {
    /// Derive auth material from the declaration and its optional secret
    pub fn from_secret(
        repo: &HelmRepository,
        normalized_url: &str,
        secret: Option<&Document>,
    ) -> Result<Self> {
        let mut options = ClientOptions {
            url: normalized_url.to_string(),
            timeout: REPOSITORY_TIMEOUT,
            pass_credentials: repo.spec.pass_credentials,
            basic: None,
        };
        let mut tls = TlsSpec::default();
        let mut registry = None;

        if let Some(secret) = secret {
            let username = secret_value(secret, "username")?;
            let password = secret_value(secret, "password")?;
            match (username, password) {
                (Some(username), Some(password)) => {
                    let username = into_utf8(username, "username")?;
                    let password = into_utf8(password, "password")?;
                    options.basic = Some(BasicCredentials {
                        username: username.clone(),
                        password: password.clone(),
                    });
                    if repo.is_oci() {
                        registry = Some(RegistryCredentials::Basic { username, password });
                    }
                }
                (None, None) => {}
                _ => {
                    return Err(RepoError::AuthFailure {
                        message: format!(
                            "secret for repository {} must provide both username and password",
                            normalized_url
                        ),
                    })
                }
            }

            tls.cert_pem = secret_value(secret, "certFile")?;
            tls.key_pem = secret_value(secret, "keyFile")?;
            tls.ca_pem = secret_value(secret, "caFile")?;

            if tls.cert_pem.is_some() != tls.key_pem.is_some() {
                return Err(RepoError::AuthFailure {
                    message: format!(
                        "secret for repository {} must provide certFile and keyFile together",
                        normalized_url
                    ),
                });
            }
        }

        Ok(Self {
            options,
            tls: if tls.is_empty() { None } else { Some(tls) },
            registry,
        })
    }
}

/// Look up a key in a Secret document: base64 `data` first, then
/// `stringData`
pub fn secret_value(secret: &Document, key: &str) -> Result<Option<Vec<u8>>> {
    let body = secret.body();

    if let Some(encoded) = body.get("data").and_then(|d| d.get(key)).and_then(|v| v.as_str()) {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| RepoError::AuthFailure {
                message: format!("key '{}' in {} is not valid base64: {}", key, secret.id(), e),
            })?;
        return Ok(Some(decoded));
    }

    if let Some(plain) = body
        .get("stringData")
        .and_then(|d| d.get(key))
        .and_then(|v| v.as_str())
    {
        return Ok(Some(plain.as_bytes().to_vec()));
    }

    Ok(None)
}

fn into_utf8(bytes: Vec<u8>, key: &str) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| RepoError::AuthFailure {
        message: format!("secret key '{}' is not valid UTF-8", key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(yaml: &str) -> Document {
        Document::parse(yaml, "secret.yaml").unwrap()
    }

    fn repo(yaml: &str) -> HelmRepository {
        serde_yaml::from_str(yaml).unwrap()
    }

    const HTTP_REPO: &str = r#"
apiVersion: source.toolkit.fluxcd.io/v1
kind: HelmRepository
metadata:
  name: charts
  namespace: flux-system
spec:
  url: https://charts.example/
"#;

    #[test]
    fn test_no_secret_yields_anonymous_options() {
        let auth = RepositoryAuth::from_secret(&repo(HTTP_REPO), "https://charts.example", None).unwrap();
        assert!(auth.options.basic.is_none());
        assert!(auth.tls.is_none());
        assert!(auth.registry.is_none());
        assert_eq!(auth.options.timeout, REPOSITORY_TIMEOUT);
    }

    #[test]
    fn test_basic_credentials_from_data() {
        // "admin" / "s3cret"
        let s = secret(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: auth\n  namespace: flux-system\ndata:\n  username: YWRtaW4=\n  password: czNjcmV0\n",
        );
        let auth = RepositoryAuth::from_secret(&repo(HTTP_REPO), "https://charts.example", Some(&s)).unwrap();

        let basic = auth.options.basic.unwrap();
        assert_eq!(basic.username, "admin");
        assert_eq!(basic.password, "s3cret");
        // HTTP repositories carry no registry login
        assert!(auth.registry.is_none());
    }

    #[test]
    fn test_string_data_fallback() {
        let s = secret(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: auth\nstringData:\n  username: admin\n  password: hunter2\n",
        );
        let auth = RepositoryAuth::from_secret(&repo(HTTP_REPO), "https://charts.example", Some(&s)).unwrap();
        assert_eq!(auth.options.basic.unwrap().password, "hunter2");
    }

    #[test]
    fn test_username_without_password_is_fatal() {
        let s = secret(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: auth\nstringData:\n  username: admin\n",
        );
        let err =
            RepositoryAuth::from_secret(&repo(HTTP_REPO), "https://charts.example", Some(&s)).unwrap_err();
        assert!(matches!(err, RepoError::AuthFailure { .. }));
    }

    #[test]
    fn test_cert_without_key_is_fatal() {
        let s = secret(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: auth\nstringData:\n  certFile: |\n    cert\n",
        );
        let err =
            RepositoryAuth::from_secret(&repo(HTTP_REPO), "https://charts.example", Some(&s)).unwrap_err();
        assert!(matches!(err, RepoError::AuthFailure { .. }));
    }

    #[test]
    fn test_oci_secret_becomes_registry_login() {
        let r = repo(
            r#"
apiVersion: source.toolkit.fluxcd.io/v1
kind: HelmRepository
metadata:
  name: registry
  namespace: flux-system
spec:
  url: oci://ghcr.io/org/charts
  type: oci
"#,
        );
        let s = secret(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: auth\nstringData:\n  username: bot\n  password: token\n",
        );
        let auth = RepositoryAuth::from_secret(&r, "oci://ghcr.io/org/charts", Some(&s)).unwrap();
        assert!(matches!(
            auth.registry,
            Some(RegistryCredentials::Basic { .. })
        ));
    }

    #[test]
    fn test_invalid_base64_is_fatal() {
        let s = secret(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: auth\ndata:\n  username: '!!!'\n",
        );
        assert!(secret_value(&s, "username").is_err());
    }
}
