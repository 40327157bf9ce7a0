//! Repository URL normalization
//!
//! Normalized URLs are the cache key for repository handles and chart
//! artifacts, so two spellings of the same repository must collapse to
//! one string: scheme and host lowercased, trailing slash trimmed, the
//! `oci://` prefix preserved.

use url::Url;

use crate::error::{RepoError, Result};

pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RepoError::InvalidRepositoryUrl {
            url: raw.to_string(),
            reason: "empty URL".to_string(),
        });
    }

    let parsed = Url::parse(trimmed).map_err(|e| RepoError::InvalidRepositoryUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" | "oci" => {}
        other => {
            return Err(RepoError::InvalidRepositoryUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            })
        }
    }

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_scheme_and_host() {
        assert_eq!(
            normalize_url("HTTPS://Charts.Example/stable").unwrap(),
            "https://charts.example/stable"
        );
    }

    #[test]
    fn test_trims_trailing_slash() {
        assert_eq!(
            normalize_url("https://charts.example/").unwrap(),
            "https://charts.example"
        );
        assert_eq!(
            normalize_url("https://charts.example/stable///").unwrap(),
            "https://charts.example/stable"
        );
    }

    #[test]
    fn test_preserves_oci_prefix() {
        assert_eq!(
            normalize_url("oci://ghcr.io/org/charts/").unwrap(),
            "oci://ghcr.io/org/charts"
        );
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            normalize_url("ftp://charts.example").unwrap_err(),
            RepoError::InvalidRepositoryUrl { .. }
        ));
        assert!(normalize_url("").is_err());
    }

    #[test]
    fn test_equal_spellings_collapse() {
        let a = normalize_url("https://charts.example/stable/").unwrap();
        let b = normalize_url("HTTPS://CHARTS.EXAMPLE/stable").unwrap();
        assert_eq!(a, b);
    }
}
