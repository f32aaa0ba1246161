//! Definition model for api/test documents.
//!
//! Definitions are immutable value trees produced by the loader and consumed
//! read-only by the compiler. Step and stage kinds carry an explicit
//! discriminator tag instead of being inferred from which keys are present.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CompileError;

/// A loaded definition document, discriminated by its `type` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Definition {
    /// A single API call description.
    Api(ApiDefinition),
    /// A multi-step or multi-stage test.
    Test(TestDefinition),
    /// Named variable table (not executable).
    Var(OpaqueDefinition),
    /// Environment table (not executable).
    Env(OpaqueDefinition),
    /// Documentation page (not executable).
    Doc(OpaqueDefinition),
    /// CSV data table marker (the rows live in the referenced file).
    Csv(OpaqueDefinition),
}

impl Definition {
    /// The `type` discriminator as written in definition files.
    pub fn kind(&self) -> &'static str {
        match self {
            Definition::Api(_) => "api",
            Definition::Test(_) => "test",
            Definition::Var(_) => "var",
            Definition::Env(_) => "env",
            Definition::Doc(_) => "doc",
            Definition::Csv(_) => "csv",
        }
    }
}

/// Recognized but non-executable definition kinds carry their entries opaquely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpaqueDefinition {
    #[serde(flatten)]
    pub entries: serde_json::Map<String, serde_json::Value>,
}

/// A multi-step test definition.
///
/// The body is either `steps` (an ordered sequence) or `stages` (a dependency
/// graph of concurrent stage bodies), never both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Imported definitions, alias to path.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub import: HashMap<String, String>,

    /// Declared inputs with default literals.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub inputs: serde_json::Map<String, serde_json::Value>,

    /// Declared outputs, name to expression resolved against the final scope.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, String>,

    /// Metric declarations, carried through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,

    /// Sequential body. `flow` is a legacy alias for `steps`.
    #[serde(default, alias = "flow", skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,

    /// Concurrent staged body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<Stage>>,
}

impl TestDefinition {
    /// Enforce the steps-XOR-stages invariant.
    ///
    /// Raised before any compilation proceeds.
    pub fn validate(&self, name: &str) -> Result<(), CompileError> {
        if self.steps.is_some() && self.stages.is_some() {
            return Err(CompileError::AmbiguousBody(name.to_string()));
        }
        Ok(())
    }
}

/// A single API call definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub import: HashMap<String, String>,

    /// Declared inputs with default literals.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub inputs: serde_json::Map<String, serde_json::Value>,

    /// Output extraction rules, name to expression. `extract` is accepted
    /// as an alias for `outputs`.
    #[serde(default, alias = "extract", skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, String>,

    /// Environment entries written after extraction, name to expression.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub setenv: HashMap<String, String>,

    #[serde(default)]
    pub protocol: Protocol,

    /// Body format used when serializing the request body.
    #[serde(default)]
    pub format: BodyFormat,

    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Request body template; references are resolved before sending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cookies: HashMap<String, String>,

    /// Example invocations, carried through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<serde_json::Value>,
}

/// Wire protocol for an API definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Ws,
}

/// Request/response body format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[default]
    Json,
    Xml,
    Text,
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)] // HTTP methods are conventionally uppercase
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
    OPTIONS,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
        };
        write!(f, "{}", name)
    }
}

/// One step in a step sequence.
///
/// Closed tagged variant; condition and loop kinds nest further sequences,
/// forming a tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Invoke an imported target; with `id`, bind the result into scope.
    Call {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        target: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        inputs: serde_json::Map<String, serde_json::Value>,
    },

    /// Soft comparison; failure is logged and execution continues.
    Check { expr: String },

    /// Hard comparison; failure aborts the enclosing routine.
    Assert { expr: String },

    /// Branch on a comparison expression.
    Condition {
        expr: String,
        then: Vec<Step>,
        #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
        otherwise: Option<Vec<Step>>,
    },

    /// Counted or wall-clock loop, depending on the count text.
    CountLoop {
        count: serde_json::Value,
        body: Vec<Step>,
    },

    /// Loop with a verbatim, unvalidated header. Escape hatch.
    RawLoop { header: String, body: Vec<Step> },

    /// Verbatim code carried through to a scripting backend.
    InlineCode { code: String },

    /// Write an interpolated message to the logging sink.
    Print { template: String },

    /// Declare or assign one binding per entry.
    Binding {
        strength: BindStrength,
        assignments: serde_json::Map<String, serde_json::Value>,
    },

    /// Bring an imported data table into scope. No inline statement.
    DataImport { alias: String },
}

/// Declaration strength of a binding step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindStrength {
    Set,
    Var,
    Const,
    Let,
}

/// A named, independently schedulable unit of steps with declared
/// dependencies on other stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stage {
    /// Stage id; anonymous stages are assigned one at compile time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default, alias = "depends_on", skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_tagged_deserialization() {
        let json = serde_json::json!({
            "step": "call",
            "id": "r",
            "target": "get_user",
            "inputs": {"id": 7}
        });

        let step: Step = serde_json::from_value(json).unwrap();
        match step {
            Step::Call { id, target, inputs } => {
                assert_eq!(id.as_deref(), Some("r"));
                assert_eq!(target, "get_user");
                assert_eq!(inputs.get("id"), Some(&serde_json::json!(7)));
            }
            other => panic!("expected call step, got {:?}", other),
        }
    }

    #[test]
    fn test_condition_else_key() {
        let json = serde_json::json!({
            "step": "condition",
            "expr": "i:count > 0",
            "then": [{"step": "print", "template": "yes"}],
            "else": [{"step": "print", "template": "no"}]
        });

        let step: Step = serde_json::from_value(json).unwrap();
        match step {
            Step::Condition { otherwise, .. } => assert!(otherwise.is_some()),
            other => panic!("expected condition step, got {:?}", other),
        }
    }

    #[test]
    fn test_flow_alias_for_steps() {
        let json = serde_json::json!({
            "type": "test",
            "title": "legacy",
            "flow": [{"step": "print", "template": "hi"}]
        });

        let def: Definition = serde_json::from_value(json).unwrap();
        match def {
            Definition::Test(test) => {
                assert_eq!(test.steps.map(|s| s.len()), Some(1));
            }
            other => panic!("expected test definition, got {:?}", other),
        }
    }

    #[test]
    fn test_both_bodies_rejected() {
        let def = TestDefinition {
            steps: Some(vec![]),
            stages: Some(vec![]),
            ..Default::default()
        };

        let err = def.validate("dual").unwrap_err();
        assert!(matches!(err, CompileError::AmbiguousBody(name) if name == "dual"));
    }

    #[test]
    fn test_api_extract_alias() {
        let json = serde_json::json!({
            "type": "api",
            "url": "https://api.example.com/users",
            "method": "POST",
            "extract": {"id": "$body[id]"}
        });

        let def: Definition = serde_json::from_value(json).unwrap();
        match def {
            Definition::Api(api) => {
                assert_eq!(api.method, HttpMethod::POST);
                assert_eq!(api.outputs.get("id").map(String::as_str), Some("$body[id]"));
            }
            other => panic!("expected api definition, got {:?}", other),
        }
    }

    #[test]
    fn test_definition_kind() {
        let def: Definition =
            serde_json::from_value(serde_json::json!({"type": "env", "HOST": "api.local"}))
                .unwrap();
        assert_eq!(def.kind(), "env");
    }
}
