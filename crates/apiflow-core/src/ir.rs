//! Executable flow representation.
//!
//! Compilation targets an explicit statement tree interpreted by the
//! runner, not generated program text. Loop and inline escape hatches are
//! carried verbatim so a scripting backend could still render them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::definition::{ApiDefinition, BindStrength};
use crate::ops::CheckExpr;

/// A compiled, runnable flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    /// Routine name, taken from the definition.
    pub name: String,

    /// Declared inputs with their compile-time default literals.
    pub inputs: serde_json::Map<String, serde_json::Value>,

    /// Declared outputs, name to expression resolved against the final scope.
    pub outputs: HashMap<String, String>,

    pub body: Vec<Stmt>,

    /// Compiled import table, alias to callable routine.
    pub imports: HashMap<String, Routine>,
}

/// A callable import target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routine {
    /// An API-calling routine.
    Api(ApiDefinition),
    /// A nested test routine.
    Test(Box<Program>),
    /// A literal data table (CSV rows as row-objects).
    Table(Vec<serde_json::Value>),
}

/// An awaited invocation of an imported target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSpec {
    /// Binds the result into the enclosing scope when present.
    pub id: Option<String>,
    pub target: String,
    pub inputs: serde_json::Map<String, serde_json::Value>,
}

/// One executable statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    Call(CallSpec),

    /// Soft comparison: failure is logged, execution continues.
    Check(CheckExpr),

    /// Hard comparison: failure aborts the enclosing routine.
    Assert(CheckExpr),

    If {
        cond: CheckExpr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },

    /// Counted loop, `0..times`.
    Repeat { times: u64, body: Vec<Stmt> },

    /// Wall-clock loop re-running the body until the duration elapses.
    RepeatFor { duration_ms: f64, body: Vec<Stmt> },

    /// Verbatim loop header for a scripting backend; the tree-walking
    /// runner skips it with a warning.
    RawLoop { header: String, body: Vec<Stmt> },

    /// Verbatim code for a scripting backend; skipped with a warning.
    Inline { code: String },

    /// Interpolated message to the logging sink.
    Print { template: String },

    /// Declare or assign one binding.
    Bind {
        strength: BindStrength,
        name: String,
        value: serde_json::Value,
    },

    /// Start a stage body as a concurrent task once `deps` have completed.
    StageTask {
        id: String,
        deps: Vec<String>,
        body: Vec<Stmt>,
    },

    /// Await the listed stage futures, each exactly once.
    StageBarrier { ids: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Comparator;

    #[test]
    fn test_stmt_serialization_shape() {
        let stmt = Stmt::Check(CheckExpr {
            left: "i:status".to_string(),
            op: Comparator::Equals,
            right: "200".to_string(),
        });

        let json = serde_json::to_value(&stmt).unwrap();
        assert_eq!(json["check"]["op"], serde_json::json!("equals"));
    }

    #[test]
    fn test_program_round_trip() {
        let program = Program {
            name: "smoke".to_string(),
            inputs: serde_json::Map::new(),
            outputs: HashMap::new(),
            body: vec![Stmt::Print { template: "hello".to_string() }],
            imports: HashMap::new(),
        };

        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "smoke");
        assert_eq!(back.body.len(), 1);
    }
}
