//! Values handling with deep merge support

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self(normalize_null(value)))
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let parts: Vec<&str> = path.split('.').collect();
        set_nested(&mut self.0, &parts, value);
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }
}

/// An empty YAML document parses to null; values treat that as empty
fn normalize_null(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Null => JsonValue::Object(serde_json::Map::new()),
        other => other,
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    if path.is_empty() {
        *value = new_value;
        return;
    }

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }
    let map = value.as_object_mut().expect("object ensured above");

    let key = path[0];
    let remaining = &path[1..];
    if remaining.is_empty() {
        map.insert(key.to_string(), new_value);
    } else {
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
        set_nested(entry, remaining, new_value);
    }
}

fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(value);
    }
    match value {
        JsonValue::Object(map) => map.get(path[0]).and_then(|v| get_nested(v, &path[1..])),
        _ => None,
    }
}

/// Interpret a raw scalar the way it would read in a values document
///
/// Booleans, integers, floats and null keep their type; everything else
/// stays a string.
pub fn parse_scalar(raw: &str) -> JsonValue {
    match raw {
        "true" => JsonValue::Bool(true),
        "false" => JsonValue::Bool(false),
        "null" | "~" => JsonValue::Null,
        _ => {
            if let Ok(num) = raw.parse::<i64>() {
                JsonValue::Number(num.into())
            } else if let Ok(num) = raw.parse::<f64>() {
                serde_json::Number::from_f64(num)
                    .map(JsonValue::Number)
                    .unwrap_or_else(|| JsonValue::String(raw.to_string()))
            } else {
                JsonValue::String(raw.to_string())
            }
        }
    }
}

/// Strip a matched pair of surrounding single or double quotes
///
/// Returns the stripped content together with whether quotes were
/// removed; quoted scalars are always assigned as strings.
pub fn strip_quotes(raw: &str) -> (&str, bool) {
    let quoted = (raw.len() >= 2)
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')));
    if quoted {
        (&raw[1..raw.len() - 1], true)
    } else {
        (raw, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_merge() {
        let mut base = Values::from_yaml(
            r#"
image:
  repository: nginx
  tag: "1.0"
replicas: 1
"#,
        )
        .unwrap();

        let overlay = Values::from_yaml(
            r#"
image:
  tag: "2.0"
  pullPolicy: Always
replicas: 3
"#,
        )
        .unwrap();

        base.merge(&overlay);

        assert_eq!(base.get("image.repository").unwrap(), "nginx");
        assert_eq!(base.get("image.tag").unwrap(), "2.0");
        assert_eq!(base.get("image.pullPolicy").unwrap(), "Always");
        assert_eq!(base.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_merge_replaces_arrays() {
        let mut base = Values::from_yaml("ports: [80, 443]").unwrap();
        let overlay = Values::from_yaml("ports: [8080]").unwrap();
        base.merge(&overlay);
        assert_eq!(base.get("ports").unwrap(), &serde_json::json!([8080]));
    }

    #[test]
    fn test_set_nested() {
        let mut values = Values::new();
        values.set("image.tag", JsonValue::String("v1".into()));
        values.set("replicas", JsonValue::Number(3.into()));

        assert_eq!(values.get("image.tag").unwrap(), "v1");
        assert_eq!(values.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_empty_document_is_empty_values() {
        let values = Values::from_yaml("").unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar("true"), JsonValue::Bool(true));
        assert_eq!(parse_scalar("42"), JsonValue::Number(42.into()));
        assert_eq!(parse_scalar("null"), JsonValue::Null);
        assert_eq!(parse_scalar("v1.2.3"), JsonValue::String("v1.2.3".into()));
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"hello\""), ("hello", true));
        assert_eq!(strip_quotes("'hello'"), ("hello", true));
        assert_eq!(strip_quotes("hello"), ("hello", false));
        assert_eq!(strip_quotes("\"unbalanced'"), ("\"unbalanced'", false));
        assert_eq!(strip_quotes("\""), ("\"", false));
    }
}
