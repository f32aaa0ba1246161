//! Definition compilation.
//!
//! Translates a test definition into a runnable [`Program`]: a sequential
//! step body compiles depth-first in source order, a staged body compiles
//! into a concurrency plan respecting the declared dependency graph.

mod stages;
mod steps;

use std::collections::HashMap;

use crate::definition::TestDefinition;
use crate::error::CompileError;
use crate::imports::ImportSource;
use crate::ir::{Program, Routine};

/// Compile a test definition against its resolved imports.
pub fn compile(
    name: &str,
    definition: &TestDefinition,
    imports: &HashMap<String, ImportSource>,
) -> Result<Program, CompileError> {
    definition.validate(name)?;

    let routines = compile_imports(imports)?;

    let body = match (&definition.steps, &definition.stages) {
        (Some(steps), None) => steps::compile_steps(steps, &routines)?,
        (None, Some(stage_set)) => stages::compile_stages(stage_set, &routines)?,
        (None, None) => Vec::new(),
        // validate() rejected the both-bodies case above.
        (Some(_), Some(_)) => return Err(CompileError::AmbiguousBody(name.to_string())),
    };

    Ok(Program {
        name: name.to_string(),
        inputs: definition.inputs.clone(),
        outputs: definition.outputs.clone(),
        body,
        imports: routines,
    })
}

fn compile_imports(
    imports: &HashMap<String, ImportSource>,
) -> Result<HashMap<String, Routine>, CompileError> {
    let mut routines = HashMap::new();
    for (alias, source) in imports {
        let routine = match source {
            ImportSource::Api(api) => Routine::Api(api.clone()),
            ImportSource::Table(rows) => Routine::Table(rows.clone()),
            ImportSource::Test { definition, imports } => {
                Routine::Test(Box::new(compile(alias, definition, imports)?))
            }
        };
        routines.insert(alias.clone(), routine);
    }
    Ok(routines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Stage, Step};
    use crate::ir::Stmt;

    #[test]
    fn test_both_bodies_fail_before_compilation() {
        let definition = TestDefinition {
            steps: Some(vec![Step::Check { expr: "broken".to_string() }]),
            stages: Some(vec![Stage::default()]),
            ..Default::default()
        };

        // The malformed check inside the body is never reached.
        let err = compile("dual", &definition, &HashMap::new()).unwrap_err();
        assert!(matches!(err, CompileError::AmbiguousBody(name) if name == "dual"));
    }

    #[test]
    fn test_empty_definition_compiles_to_empty_body() {
        let program = compile("empty", &TestDefinition::default(), &HashMap::new()).unwrap();
        assert!(program.body.is_empty());
    }

    #[test]
    fn test_nested_test_import_compiles_recursively() {
        let nested = TestDefinition {
            steps: Some(vec![Step::Print { template: "inner".to_string() }]),
            ..Default::default()
        };
        let imports = HashMap::from([(
            "child".to_string(),
            ImportSource::Test { definition: nested, imports: HashMap::new() },
        )]);
        let definition = TestDefinition {
            steps: Some(vec![Step::Call {
                id: None,
                target: "child".to_string(),
                inputs: serde_json::Map::new(),
            }]),
            ..Default::default()
        };

        let program = compile("outer", &definition, &imports).unwrap();
        match program.imports.get("child") {
            Some(Routine::Test(child)) => {
                assert_eq!(child.name, "child");
                assert!(matches!(child.body[0], Stmt::Print { .. }));
            }
            other => panic!("expected compiled nested test, got {:?}", other),
        }
    }
}
