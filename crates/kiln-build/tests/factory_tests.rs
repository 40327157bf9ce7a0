//! Provider-login gating in the default source factory
//!
//! OCI repositories with a non-generic provider and no secret exchange
//! ambient identity for registry credentials; an unconfigured provider
//! is swallowed, every other provider failure is fatal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use kiln_build::{BuildError, DefaultSourceFactory, SourceFactory};
use kiln_core::{Document, HelmRepository};
use kiln_repo::{ProviderEndpoints, ProviderLogin, RepoError};

/// One-shot HTTP responder that counts how often it is hit
async fn serve_counting(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
        }
    });

    (format!("http://{}", addr), hits)
}

fn factory_for(aws_endpoint: String) -> DefaultSourceFactory {
    let endpoints = ProviderEndpoints {
        aws: aws_endpoint,
        ..ProviderEndpoints::default()
    };
    DefaultSourceFactory::with_provider_login(ProviderLogin::with_endpoints(endpoints).unwrap())
}

fn repository(yaml: &str) -> HelmRepository {
    serde_yaml::from_str(yaml).unwrap()
}

const OCI_AWS_REPO: &str = r#"
apiVersion: source.toolkit.fluxcd.io/v1
kind: HelmRepository
metadata:
  name: registry
  namespace: flux-system
spec:
  url: oci://123456789012.dkr.ecr.eu-west-1.amazonaws.com/charts
  type: oci
  provider: aws
"#;

#[tokio::test]
async fn test_provider_exchange_fires_for_oci_aws_without_secret() {
    let (endpoint, hits) = serve_counting("200 OK", r#"{"token":"QVdTOmVjci10b2tlbg=="}"#).await;
    let factory = factory_for(endpoint);

    let repo = repository(OCI_AWS_REPO);
    let source = factory
        .create(&repo, "oci://123456789012.dkr.ecr.eu-west-1.amazonaws.com/charts", None)
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1, "exchange not invoked exactly once");
    assert!(source.url().starts_with("oci://"));
}

#[tokio::test]
async fn test_unconfigured_provider_is_swallowed() {
    // Nothing listens here; the connect failure means "unconfigured"
    // and the repository proceeds anonymously.
    let factory = factory_for("http://127.0.0.1:1/token".to_string());

    let repo = repository(OCI_AWS_REPO);
    let source = factory
        .create(&repo, "oci://123456789012.dkr.ecr.eu-west-1.amazonaws.com/charts", None)
        .await
        .unwrap();
    assert!(source.url().starts_with("oci://"));
}

#[tokio::test]
async fn test_provider_error_is_fatal() {
    let (endpoint, _) = serve_counting("403 Forbidden", r#"{"message":"denied"}"#).await;
    let factory = factory_for(endpoint);

    let repo = repository(OCI_AWS_REPO);
    let err = factory
        .create(&repo, "oci://123456789012.dkr.ecr.eu-west-1.amazonaws.com/charts", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BuildError::Repo(RepoError::AuthFailure { .. })
    ));
}

#[tokio::test]
async fn test_no_exchange_when_secret_is_configured() {
    let (endpoint, hits) = serve_counting("200 OK", r#"{"token":"unused"}"#).await;
    let factory = factory_for(endpoint);

    let repo = repository(
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
    );
    let secret = Document::parse(
        "apiVersion: v1\nkind: Secret\nmetadata:\n  name: registry-auth\n  namespace: flux-system\nstringData:\n  username: bot\n  password: token\n",
        "secret.yaml",
    )
    .unwrap();

    factory
        .create(&repo, "oci://ghcr.io/org/charts", Some(&secret))
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0, "secret must suppress the exchange");
}

#[tokio::test]
async fn test_no_exchange_for_generic_provider_or_http_repo() {
    let (endpoint, hits) = serve_counting("200 OK", r#"{"token":"unused"}"#).await;
    let factory = factory_for(endpoint);

    let generic_oci = repository(
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
    factory
        .create(&generic_oci, "oci://ghcr.io/org/charts", None)
        .await
        .unwrap();

    let http = repository(
        r#"
apiVersion: source.toolkit.fluxcd.io/v1
kind: HelmRepository
metadata:
  name: charts
  namespace: flux-system
spec:
  url: https://charts.example/
  provider: aws
"#,
    );
    factory
        .create(&http, "https://charts.example", None)
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
