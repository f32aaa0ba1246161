//! Variable reference resolution.
//!
//! Substitutes `namespace:name` tokens found anywhere in a nested value
//! against a binding table. Two passes: the brace form `<<ns:name>>` first,
//! then the bare form, each with full-match-preserves-type semantics.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::ops::text_form;

static BRACE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<([A-Za-z_]\w*):([\w.-]+)>>").unwrap());

static BARE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Za-z_]\w*):([\w.-]+)").unwrap());

/// The merged map of all named values available for reference resolution.
///
/// Keys are full `namespace:name` tokens.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    table: HashMap<String, serde_json::Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `defaults` then `inputs` (inputs override) under `i:` and
    /// `envs` under `e:`.
    pub fn from_scopes(
        defaults: &serde_json::Map<String, serde_json::Value>,
        inputs: &serde_json::Map<String, serde_json::Value>,
        envs: &serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut bindings = Self::new();
        for (name, value) in defaults {
            bindings.bind("i", name, value.clone());
        }
        for (name, value) in inputs {
            bindings.bind("i", name, value.clone());
        }
        for (name, value) in envs {
            bindings.bind("e", name, value.clone());
        }
        bindings
    }

    /// Bind one `namespace:name` entry.
    pub fn bind(&mut self, namespace: &str, name: &str, value: serde_json::Value) {
        self.table.insert(format!("{}:{}", namespace, name), value);
    }

    /// Bind every key of a result map under the given namespace.
    pub fn bind_map(
        &mut self,
        namespace: &str,
        values: &serde_json::Map<String, serde_json::Value>,
    ) {
        for (name, value) in values {
            self.bind(namespace, name, value.clone());
        }
    }

    /// Look up a full `namespace:name` token.
    pub fn get(&self, token: &str) -> Option<&serde_json::Value> {
        self.table.get(token)
    }

    /// Union with another table; `other` wins on collisions.
    pub fn merge(&mut self, other: &Bindings) {
        for (token, value) in &other.table {
            self.table.insert(token.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Resolve every reference token in `value`, brace pass then bare pass.
///
/// A string consisting of exactly one token is replaced by the bound value
/// unchanged in type; tokens embedded among other text are replaced by their
/// text form. Unresolved tokens stay as their literal text. Both passes are
/// idempotent on fully resolved trees.
pub fn resolve_refs(value: &serde_json::Value, bindings: &Bindings) -> serde_json::Value {
    let braced = resolve_pass(value, bindings, &BRACE_TOKEN);
    resolve_pass(&braced, bindings, &BARE_TOKEN)
}

fn resolve_pass(
    value: &serde_json::Value,
    bindings: &Bindings,
    token: &Regex,
) -> serde_json::Value {
    match value {
        serde_json::Value::String(text) => resolve_string(text, bindings, token),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|item| resolve_pass(item, bindings, token)).collect(),
        ),
        serde_json::Value::Object(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(key, entry)| (key.clone(), resolve_pass(entry, bindings, token)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(text: &str, bindings: &Bindings, token: &Regex) -> serde_json::Value {
    // Full-string token: replace with the bound value, type preserved.
    if let Some(caps) = token.captures(text) {
        if let Some(whole) = caps.get(0) {
            if whole.start() == 0 && whole.end() == text.len() {
                let key = format!("{}:{}", &caps[1], &caps[2]);
                return match bindings.get(&key) {
                    Some(bound) => bound.clone(),
                    None => serde_json::Value::String(text.to_string()),
                };
            }
        }
    }

    // Embedded tokens: each resolvable occurrence is stringified in place.
    let replaced = token.replace_all(text, |caps: &regex::Captures<'_>| {
        let key = format!("{}:{}", &caps[1], &caps[2]);
        match bindings.get(&key) {
            Some(bound) => text_form(bound),
            None => caps[0].to_string(),
        }
    });

    serde_json::Value::String(replaced.into_owned())
}
