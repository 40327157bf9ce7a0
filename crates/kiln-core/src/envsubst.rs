//! Shell-style environment substitution
//!
//! Documents are expanded before decoding: `${VAR}` resolves from the
//! process environment (empty when unset), `${VAR:-default}` falls back
//! to the default when the variable is unset or empty. Bare `$VAR` is
//! left untouched so chart content survives ingestion.

use std::sync::OnceLock;

use regex::{Captures, Regex};

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid pattern")
    })
}

/// Expand `${VAR}` and `${VAR:-default}` references in `input`
pub fn expand(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Expansion against an explicit lookup, used by tests
pub fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    pattern()
        .replace_all(input, |caps: &Captures<'_>| {
            let name = &caps[1];
            let value = lookup(name).unwrap_or_default();
            if value.is_empty() {
                caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default()
            } else {
                value
            }
        })
        .into_owned()
}
