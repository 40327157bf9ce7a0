//! HelmRelease declaration types
//!
//! A release declaration is a rendering target: a chart reference, an
//! ordered list of values references, inline values and an install
//! policy. Field names follow the Kubernetes camelCase convention.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::resource::ResourceId;

pub const HELM_RELEASE_KIND: &str = "HelmRelease";
pub const HELM_RELEASE_GROUP: &str = "helm.toolkit.fluxcd.io";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRelease {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: HelmReleaseSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub generation: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseSpec {
    pub chart: ChartTemplate,

    /// Release name override; defaults to the object name
    #[serde(default)]
    pub release_name: Option<String>,

    /// Namespace the rendered resources target; defaults to the object
    /// namespace
    #[serde(default)]
    pub target_namespace: Option<String>,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub install: Option<Install>,

    /// Ordered values references, later entries override earlier ones
    #[serde(default)]
    pub values_from: Vec<ValuesReference>,

    /// Inline values, merged last
    #[serde(default)]
    pub values: Option<JsonValue>,

    /// Kubernetes version reported to the chart
    #[serde(default)]
    pub kube_version: Option<String>,

    /// Extra API versions injected into the install context
    #[serde(default)]
    pub api_versions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartTemplate {
    pub spec: ChartSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Chart name within the repository
    pub chart: String,

    /// Exact version or semver range; empty means latest
    #[serde(default)]
    pub version: String,

    pub source_ref: SourceRef,

    /// Alternative values files within the chart, replacing values.yaml
    #[serde(default)]
    pub values_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// Reference to a ConfigMap or Secret providing values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesReference {
    pub kind: String,
    pub name: String,

    /// Key within the data map; defaults to `values.yaml`
    #[serde(default)]
    pub values_key: Option<String>,

    /// When set, the key's content is assigned as a scalar at this path
    /// instead of being merged as a values document
    #[serde(default)]
    pub target_path: Option<String>,

    #[serde(default)]
    pub optional: bool,
}

impl ValuesReference {
    pub fn values_key(&self) -> &str {
        self.values_key.as_deref().unwrap_or("values.yaml")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Install {
    /// CRD policy; takes precedence over the legacy skipCRDs flag
    #[serde(default)]
    pub crds: Option<String>,

    #[serde(default, rename = "skipCRDs")]
    pub skip_crds: bool,

    #[serde(default)]
    pub disable_hooks: bool,

    #[serde(default, rename = "disableOpenAPIValidation")]
    pub disable_open_api_validation: bool,

    #[serde(default)]
    pub timeout: Option<String>,
}

/// How CRDs shipped with a chart are handled during the install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrdPolicy {
    Skip,
    Create,
    CreateReplace,
}

impl CrdPolicy {
    pub fn include_crds(self) -> bool {
        !matches!(self, CrdPolicy::Skip)
    }
}

impl std::fmt::Display for CrdPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrdPolicy::Skip => write!(f, "Skip"),
            CrdPolicy::Create => write!(f, "Create"),
            CrdPolicy::CreateReplace => write!(f, "CreateReplace"),
        }
    }
}

impl HelmRelease {
    pub fn id(&self) -> ResourceId {
        ResourceId::new(
            HELM_RELEASE_GROUP,
            HELM_RELEASE_KIND,
            &self.metadata.namespace,
            &self.metadata.name,
        )
    }

    /// Name the release is rendered under
    pub fn release_name(&self) -> &str {
        self.spec
            .release_name
            .as_deref()
            .unwrap_or(&self.metadata.name)
    }

    /// Namespace the rendered resources are placed in
    pub fn release_namespace(&self) -> &str {
        self.spec
            .target_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.metadata.namespace)
    }

    /// Identity of the source repository, namespace defaulted
    pub fn source_id(&self, group: &str) -> ResourceId {
        let source = &self.spec.chart.spec.source_ref;
        let namespace = if source.namespace.is_empty() {
            &self.metadata.namespace
        } else {
            &source.namespace
        };
        ResourceId::new(group, &source.kind, namespace, &source.name)
    }

    /// Effective CRD policy: the crds field wins when set, otherwise the
    /// legacy skipCRDs flag applies
    pub fn crd_policy(&self) -> Result<CrdPolicy> {
        let install = self.spec.install.clone().unwrap_or_default();
        let legacy = if install.skip_crds {
            CrdPolicy::Skip
        } else {
            CrdPolicy::Create
        };

        match install.crds.as_deref() {
            None | Some("") => Ok(legacy),
            Some("Skip") => Ok(CrdPolicy::Skip),
            Some("Create") => Ok(CrdPolicy::Create),
            Some("CreateReplace") => Ok(CrdPolicy::CreateReplace),
            Some(other) => Err(CoreError::InvalidPolicy {
                id: self.id(),
                policy: other.to_string(),
            }),
        }
    }

    /// Install timeout: the install override wins over the spec timeout
    pub fn timeout(&self) -> Result<Option<Duration>> {
        let raw = self
            .spec
            .install
            .as_ref()
            .and_then(|i| i.timeout.as_deref())
            .or(self.spec.timeout.as_deref());
        raw.map(parse_duration).transpose()
    }

    pub fn disable_hooks(&self) -> bool {
        self.spec
            .install
            .as_ref()
            .map(|i| i.disable_hooks)
            .unwrap_or(false)
    }
}

/// Parse Go-style duration strings such as "90s", "5m" or "1h30m"
pub fn parse_duration(value: &str) -> Result<Duration> {
    let invalid = || CoreError::InvalidDuration {
        value: value.to_string(),
    };

    let mut total = Duration::ZERO;
    let mut rest = value.trim();
    if rest.is_empty() {
        return Err(invalid());
    }

    while !rest.is_empty() {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return Err(invalid());
        }
        let number: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()).len();
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        total += match unit {
            "ms" => Duration::from_millis(number),
            "s" => Duration::from_secs(number),
            "m" => Duration::from_secs(number * 60),
            "h" => Duration::from_secs(number * 3600),
            _ => return Err(invalid()),
        };
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(yaml: &str) -> HelmRelease {
        serde_yaml::from_str(yaml).unwrap()
    }

    const MINIMAL: &str = r#"
apiVersion: helm.toolkit.fluxcd.io/v2
kind: HelmRelease
metadata:
  name: app
  namespace: team-a
spec:
  chart:
    spec:
      chart: podinfo
      version: "6.x"
      sourceRef:
        kind: HelmRepository
        name: podinfo
"#;

    #[test]
    fn test_defaults() {
        let hr = release(MINIMAL);
        assert_eq!(hr.release_name(), "app");
        assert_eq!(hr.release_namespace(), "team-a");
        assert_eq!(hr.crd_policy().unwrap(), CrdPolicy::Create);
        assert!(hr.timeout().unwrap().is_none());
        assert!(!hr.disable_hooks());
    }

    #[test]
    fn test_source_ref_namespace_defaults_to_release() {
        let hr = release(MINIMAL);
        let id = hr.source_id("source.toolkit.fluxcd.io");
        assert_eq!(id.kind, "HelmRepository");
        assert_eq!(id.namespace, "team-a");
        assert_eq!(id.name, "podinfo");
    }

    #[test]
    fn test_crds_field_takes_precedence_over_skip_crds() {
        let mut hr = release(MINIMAL);
        hr.spec.install = Some(Install {
            crds: Some("CreateReplace".to_string()),
            skip_crds: true,
            ..Default::default()
        });
        assert_eq!(hr.crd_policy().unwrap(), CrdPolicy::CreateReplace);

        hr.spec.install = Some(Install {
            crds: None,
            skip_crds: true,
            ..Default::default()
        });
        assert_eq!(hr.crd_policy().unwrap(), CrdPolicy::Skip);
    }

    #[test]
    fn test_unknown_crd_policy_is_fatal() {
        let mut hr = release(MINIMAL);
        hr.spec.install = Some(Install {
            crds: Some("Replace".to_string()),
            ..Default::default()
        });
        assert!(matches!(
            hr.crd_policy().unwrap_err(),
            CoreError::InvalidPolicy { .. }
        ));
    }

    #[test]
    fn test_values_key_default() {
        let vr = ValuesReference {
            kind: "ConfigMap".to_string(),
            name: "cm".to_string(),
            values_key: None,
            target_path: None,
            optional: false,
        };
        assert_eq!(vr.values_key(), "values.yaml");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("yesterday").is_err());
        assert!(parse_duration("").is_err());
    }
}
