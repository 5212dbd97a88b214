//! Run-scoped variable store and `{{name}}` interpolation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").expect("valid placeholder regex"));

/// Key→string mapping seeded with repository context and grown by step
/// output capture. Last write wins.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    variables: HashMap<String, String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    /// Replace every `{{identifier}}` with its current value in a single
    /// pass. Unresolved placeholders are left verbatim so misconfigured
    /// pipelines stay debuggable; newly inserted text is never rescanned.
    pub fn interpolate(&self, text: &str) -> String {
        PLACEHOLDER
            .replace_all(text, |caps: &regex::Captures| {
                let name = &caps[1];
                self.variables
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// When `text` is exactly one `{{name}}` reference, the name.
    pub fn exact_reference(text: &str) -> Option<&str> {
        let inner = text.strip_prefix("{{")?.strip_suffix("}}")?;
        let mut chars = inner.chars();
        let first = chars.next()?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }
        if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            Some(inner)
        } else {
            None
        }
    }
}
