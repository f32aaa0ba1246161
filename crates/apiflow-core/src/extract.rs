//! Output extraction from response envelopes.
//!
//! Each named rule is one of four expression grammars: an explicit `regex `
//! pattern, an inferred regex, a `$`-prefixed bracket path, or a bare
//! bracket path. Every failure mode resolves to an empty string.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ops::text_form;
use crate::xml::xml_to_value;

/// Declared body kind of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    Json,
    Xml,
    Text,
    /// Sniff XML from the content-type header or a leading `<`, else JSON.
    #[default]
    Auto,
}

/// A response as seen by the extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub kind: BodyKind,
    pub body: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub cookies: HashMap<String, String>,
}

impl ResponseEnvelope {
    pub fn new(kind: BodyKind, body: impl Into<String>) -> Self {
        Self {
            kind,
            body: body.into(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_cookies(mut self, cookies: HashMap<String, String>) -> Self {
        self.cookies = cookies;
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Resolve `auto` to a concrete kind.
    fn resolved_kind(&self) -> BodyKind {
        match self.kind {
            BodyKind::Auto => {
                let content_type = self.header("content-type").unwrap_or("");
                if content_type.to_ascii_lowercase().contains("xml")
                    || self.body.trim_start().starts_with('<')
                {
                    BodyKind::Xml
                } else {
                    BodyKind::Json
                }
            }
            kind => kind,
        }
    }

    /// Materialize the body text into a value tree.
    ///
    /// Parse failures fall back to an empty object, logged, never raised.
    pub fn materialize(&self) -> serde_json::Value {
        match self.resolved_kind() {
            BodyKind::Json | BodyKind::Auto => match serde_json::from_str(&self.body) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(error = %e, "response body is not valid JSON");
                    serde_json::json!({})
                }
            },
            BodyKind::Xml => match xml_to_value(&self.body) {
                Some(value) => value,
                None => {
                    tracing::warn!("response body is not well-formed XML");
                    serde_json::json!({})
                }
            },
            BodyKind::Text => serde_json::Value::String(self.body.clone()),
        }
    }
}

/// Evaluate every extraction rule against the envelope.
///
/// Returns one entry per rule; empty string on no match or any failure.
pub fn extract_outputs(
    envelope: &ResponseEnvelope,
    rules: &HashMap<String, String>,
) -> HashMap<String, String> {
    let body = envelope.materialize();
    rules
        .iter()
        .map(|(name, expr)| (name.clone(), extract_one(envelope, &body, expr)))
        .collect()
}

fn extract_one(envelope: &ResponseEnvelope, body: &serde_json::Value, expr: &str) -> String {
    // 1. Explicit regex against the raw body text.
    if let Some(pattern) = expr.strip_prefix("regex ") {
        return regex_capture(pattern, &envelope.body);
    }

    // 2. Inferred regex: grouped pattern without any bracket path.
    if expr.contains('(') && expr.contains(')') && !expr.contains('[') {
        return regex_capture(expr, &envelope.body);
    }

    // 3. `$`-prefixed bracket path, section defaulting to body.
    if let Some(path) = expr.strip_prefix('$') {
        return bracket_path(envelope, body, path, true);
    }

    // 4. Bare bracket path, section name required.
    if expr.contains('[') || expr.contains(']') {
        return bracket_path(envelope, body, expr, false);
    }

    // 5. Anything else (dot notation included) is unsupported.
    tracing::warn!(expr = %expr, "unsupported extraction expression");
    String::new()
}

fn regex_capture(pattern: &str, body: &str) -> String {
    let re = match regex::Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "invalid extraction pattern");
            return String::new();
        }
    };

    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|group| group.as_str().to_string())
        .unwrap_or_default()
}

fn bracket_path(
    envelope: &ResponseEnvelope,
    body: &serde_json::Value,
    path: &str,
    section_optional: bool,
) -> String {
    let bracket = path.find('[').unwrap_or(path.len());
    let (section, parts) = path.split_at(bracket);

    let root = match section {
        "" if section_optional => body.clone(),
        "body" => body.clone(),
        "headers" => map_to_value(&envelope.headers),
        "cookies" => map_to_value(&envelope.cookies),
        other => {
            tracing::warn!(section = %other, "unknown extraction section");
            return String::new();
        }
    };

    let mut current = root;
    let mut rest = parts;
    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            return String::new();
        };
        let Some(end) = inner.find(']') else {
            return String::new();
        };
        let part = &inner[..end];
        rest = &inner[end + 1..];

        let next = if part.is_empty() {
            None
        } else if part.chars().all(|c| c.is_ascii_digit()) && current.is_array() {
            part.parse::<usize>().ok().and_then(|index| current.get(index).cloned())
        } else {
            current.get(part).cloned()
        };

        match next {
            Some(value) => current = value,
            // Any missing step short-circuits to empty.
            None => return String::new(),
        }
    }

    text_form(&current)
}

fn map_to_value(map: &HashMap<String, String>) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
            .collect(),
    )
}
