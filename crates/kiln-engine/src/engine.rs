//! Template engine based on MiniJinja
//!
//! Renders chart templates against the synthetic install context with
//! Helm-flavored filters. Lenient undefined behavior matches dry-run
//! semantics where values may be sparse.

use base64::Engine as _;
use indexmap::IndexMap;
use minijinja::{Environment, UndefinedBehavior};

use crate::chart::Chart;
use crate::context::InstallContext;
use crate::error::{EngineError, Result};

/// Helper templates are available for inheritance but never rendered
/// standalone
const HELPER_PREFIX: char = '_';

pub struct Engine {
    strict: bool,
}

impl Engine {
    pub fn new() -> Self {
        Self { strict: false }
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Render every template of a chart, keyed by template name
    pub fn render(&self, chart: &Chart, context: &InstallContext) -> Result<IndexMap<String, String>> {
        let mut env = self.environment();

        for template in &chart.templates {
            env.add_template_owned(template.name.clone(), template.content.clone())
                .map_err(|e| EngineError::Template {
                    template: template.name.clone(),
                    message: e.to_string(),
                })?;
        }

        let ctx = context.to_json();
        let mut manifests = IndexMap::new();

        for template in &chart.templates {
            let file_name = template
                .name
                .rsplit('/')
                .next()
                .unwrap_or(template.name.as_str());
            if file_name.starts_with(HELPER_PREFIX) || file_name.ends_with(".txt") {
                continue;
            }

            let rendered = env
                .get_template(&template.name)
                .and_then(|t| t.render(&ctx))
                .map_err(|e| EngineError::Template {
                    template: template.name.clone(),
                    message: e.to_string(),
                })?;

            if rendered.trim().is_empty() {
                continue;
            }
            manifests.insert(template.name.clone(), rendered);
        }

        Ok(manifests)
    }

    fn environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(if self.strict {
            UndefinedBehavior::Chainable
        } else {
            UndefinedBehavior::Lenient
        });

        env.add_filter("toyaml", toyaml);
        env.add_filter("tojson", tojson);
        env.add_filter("b64encode", b64encode);
        env.add_filter("b64decode", b64decode);
        env.add_filter("quote", quote);
        env.add_filter("indent", indent);
        env.add_filter("nindent", nindent);
        env.add_filter("sha256", sha256sum);
        env.add_filter("trunc", trunc);

        env
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Filters ============

fn toyaml(value: minijinja::Value) -> std::result::Result<String, minijinja::Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))?;
    let yaml = serde_yaml::to_string(&json)
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

fn tojson(value: minijinja::Value) -> std::result::Result<String, minijinja::Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))?;
    serde_json::to_string(&json)
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))
}

fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn b64decode(value: String) -> std::result::Result<String, minijinja::Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.as_bytes())
        .map_err(|e| {
            minijinja::Error::new(
                minijinja::ErrorKind::InvalidOperation,
                format!("base64 decode error: {}", e),
            )
        })?;
    String::from_utf8(decoded).map_err(|e| {
        minijinja::Error::new(
            minijinja::ErrorKind::InvalidOperation,
            format!("UTF-8 decode error: {}", e),
        )
    })
}

fn quote(value: minijinja::Value) -> String {
    let s = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|l| if l.is_empty() { l.to_string() } else { format!("{}{}", pad, l) })
        .collect::<Vec<_>>()
        .join("\n")
}

fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

fn sha256sum(value: String) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

fn trunc(value: String, length: usize) -> String {
    value.chars().take(length).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::fixtures::write_chart;
    use crate::context::{Capabilities, InstallContext, KubeVersion, ReleaseInfo};
    use kiln_core::Values;

    fn context(values: Values) -> InstallContext {
        InstallContext {
            values: values.into_inner(),
            release: ReleaseInfo::for_install("demo", "team-a"),
            chart: crate::context::ChartInfo {
                name: "demo".to_string(),
                version: "1.0.0".to_string(),
                app_version: None,
            },
            capabilities: Capabilities::new(KubeVersion::default(), &[]),
        }
    }

    #[test]
    fn test_render_chart_templates() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(dir.path(), "demo", "1.0.0");
        let chart = Chart::load(dir.path()).unwrap();

        let engine = Engine::new();
        let values = Values::from_yaml("replicas: 3\nimage:\n  repository: nginx\n  tag: \"2.0\"\n").unwrap();
        let manifests = engine.render(&chart, &context(values)).unwrap();

        let deployment = &manifests["deployment.yaml"];
        assert!(deployment.contains("name: demo-web"));
        assert!(deployment.contains("replicas: 3"));
        assert!(deployment.contains("image: nginx:2.0"));
    }

    #[test]
    fn test_helper_templates_not_rendered() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(dir.path(), "demo", "1.0.0");
        std::fs::write(
            dir.path().join("templates/_helpers.tpl"),
            "{% macro name() %}demo{% endmacro %}",
        )
        .unwrap();
        let chart = Chart::load(dir.path()).unwrap();

        let manifests = Engine::new().render(&chart, &context(Values::new())).unwrap();
        assert!(!manifests.contains_key("_helpers.tpl"));
        assert!(manifests.contains_key("deployment.yaml"));
    }

    #[test]
    fn test_template_error_names_template() {
        let dir = tempfile::tempdir().unwrap();
        write_chart(dir.path(), "demo", "1.0.0");
        std::fs::write(dir.path().join("templates/broken.yaml"), "{{ values.x | nosuchfilter }}")
            .unwrap();
        let chart = Chart::load(dir.path()).unwrap();

        let err = Engine::new().render(&chart, &context(Values::new())).unwrap_err();
        match err {
            EngineError::Template { template, .. } => assert_eq!(template, "broken.yaml"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_filters() {
        assert_eq!(b64encode("hi".to_string()), "aGk=");
        assert_eq!(b64decode("aGk=".to_string()).unwrap(), "hi");
        assert_eq!(indent("a\nb".to_string(), 2), "  a\n  b");
        assert_eq!(nindent("a".to_string(), 2), "\n  a");
        assert_eq!(trunc("hello".to_string(), 3), "hel");
        assert_eq!(sha256sum(String::new()).len(), 64);
    }
}
