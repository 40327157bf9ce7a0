//! Uniform chart source handle
//!
//! One operation, two implementations: HTTP index repositories and OCI
//! registries both resolve a (chart, version) pair to an extracted
//! chart directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// A resolved chart on local disk
#[derive(Debug, Clone)]
pub struct ChartArtifact {
    /// Extracted chart directory
    pub path: PathBuf,
    pub name: String,
    /// Exact resolved version (range resolution already applied)
    pub version: String,
    pub digest: Option<String>,
}

/// Uniform handle over chart repositories
#[async_trait]
pub trait ChartSource: Send + Sync + std::fmt::Debug {
    /// Normalized repository URL this source serves
    fn url(&self) -> &str;

    /// Fetch the chart and materialize it under `workdir`
    async fn resolve(&self, chart: &str, version: &str, workdir: &Path) -> Result<ChartArtifact>;
}

/// Compute a `sha256:<hex>` digest of data
pub(crate) fn compute_digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Compare digests across the `sha256:` / `sha256-` spellings
pub(crate) fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |d: &str| {
        d.trim()
            .to_lowercase()
            .replace("sha256:", "")
            .replace("sha256-", "")
    };
    normalize(expected) == normalize(actual)
}

/// Extract a chart archive (tar.gz) and return the chart root
///
/// Helm archives contain a single top-level directory named after the
/// chart; when present that directory is the chart root.
pub(crate) fn extract_chart_archive(data: &[u8], dest: &Path, chart: &str) -> Result<PathBuf> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let gz = GzDecoder::new(std::io::Cursor::new(data));
    let mut archive = Archive::new(gz);

    std::fs::create_dir_all(dest)?;
    archive.unpack(dest)?;

    let nested = dest.join(chart);
    Ok(if nested.is_dir() { nested } else { dest.to_path_buf() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_digest() {
        let digest = compute_digest(b"hello world");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), 7 + 64);
    }

    #[test]
    fn test_digest_matches() {
        assert!(digest_matches("sha256:abc123", "sha256:ABC123"));
        assert!(digest_matches("sha256:abc123", "abc123"));
        assert!(digest_matches("sha256-abc123", "sha256:abc123"));
        assert!(!digest_matches("sha256:abc123", "sha256:xyz789"));
    }

    #[test]
    fn test_extract_chart_archive() {
        // Build a tar.gz with chart/Chart.yaml inside.
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let content = b"apiVersion: v2\nname: demo\nversion: 1.0.0\n";
        let mut header = tar::Header::new_gnu();
        header.set_path("demo/Chart.yaml").unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, content.as_slice()).unwrap();
        let data = builder.into_inner().unwrap().finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let root = extract_chart_archive(&data, dir.path(), "demo").unwrap();

        assert_eq!(root, dir.path().join("demo"));
        assert!(root.join("Chart.yaml").is_file());
    }
}
