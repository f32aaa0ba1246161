//! Stage set compilation.
//!
//! Builds a concurrency plan from the declared dependency graph: every
//! stage becomes a concurrent task that first joins its direct
//! dependencies, and one final barrier awaits all stage futures.

use std::collections::{HashMap, HashSet};

use crate::definition::Stage;
use crate::error::CompileError;
use crate::ir::{Routine, Stmt};

use super::steps::compile_steps;

struct Node {
    deps: Vec<String>,
    body: Vec<Stmt>,
}

/// Compile a stage set into stage-task statements plus the final barrier.
///
/// Launch uses an explicit worklist over a node map, so deep graphs do not
/// recurse. Each stage is launched at most once; dependencies naming a
/// nonexistent stage are dropped with a warning. Cycles are not detected
/// here and deadlock their joins at run time.
pub(crate) fn compile_stages(
    stage_set: &[Stage],
    routines: &HashMap<String, Routine>,
) -> Result<Vec<Stmt>, CompileError> {
    let mut order: Vec<String> = Vec::with_capacity(stage_set.len());
    let mut nodes: HashMap<String, Node> = HashMap::with_capacity(stage_set.len());

    for stage in stage_set {
        // Anonymous stages get a fresh unique id at compile time.
        let id = stage
            .id
            .clone()
            .unwrap_or_else(|| format!("stage-{}", uuid::Uuid::new_v4()));
        let body = compile_steps(&stage.steps, routines)?;
        if nodes.contains_key(&id) {
            tracing::warn!(stage = %id, "duplicate stage id, later definition wins");
        } else {
            order.push(id.clone());
        }
        nodes.insert(id, Node { deps: stage.dependencies.clone(), body });
    }

    let known: HashSet<&String> = nodes.keys().collect();
    let mut launched: HashSet<String> = HashSet::with_capacity(nodes.len());
    let mut discovery: Vec<String> = Vec::with_capacity(nodes.len());
    let mut stmts: Vec<Stmt> = Vec::with_capacity(nodes.len() + 1);

    for start in &order {
        // Explicit worklist: a stage stays on the stack until every
        // dependency has launched, then launches itself.
        let mut stack: Vec<String> = vec![start.clone()];
        while let Some(current) = stack.last().cloned() {
            if launched.contains(&current) {
                stack.pop();
                continue;
            }

            let deps = join_list(&nodes[&current].deps, &known, &current);
            let pending: Vec<String> = deps
                .iter()
                // A dependency already on the stack is part of a cycle;
                // skipping it here keeps compilation finite, the join
                // still deadlocks at run time.
                .filter(|dep| !launched.contains(*dep) && !stack.contains(dep))
                .cloned()
                .collect();

            if pending.is_empty() {
                stack.pop();
                launched.insert(current.clone());
                discovery.push(current.clone());
                stmts.push(Stmt::StageTask {
                    id: current.clone(),
                    deps,
                    body: nodes[&current].body.clone(),
                });
            } else {
                // Reverse keeps declared dependency order on the LIFO stack.
                stack.extend(pending.into_iter().rev());
            }
        }
    }

    stmts.push(Stmt::StageBarrier { ids: discovery });
    Ok(stmts)
}

/// A stage's join list: its declared dependencies, deduplicated, with
/// unknown ids dropped.
fn join_list(deps: &[String], known: &HashSet<&String>, stage: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut list = Vec::with_capacity(deps.len());
    for dep in deps {
        if !known.contains(dep) {
            tracing::warn!(stage = %stage, dependency = %dep, "dependency names no stage, dropped");
            continue;
        }
        if seen.insert(dep.clone()) {
            list.push(dep.clone());
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Step;

    fn stage(id: &str, deps: &[&str]) -> Stage {
        Stage {
            id: Some(id.to_string()),
            steps: vec![Step::Print { template: id.to_string() }],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn task_ids(stmts: &[Stmt]) -> Vec<&str> {
        stmts
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::StageTask { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    fn barrier(stmts: &[Stmt]) -> &[String] {
        match stmts.last() {
            Some(Stmt::StageBarrier { ids }) => ids,
            other => panic!("expected trailing barrier, got {:?}", other),
        }
    }

    #[test]
    fn test_dependency_launches_before_dependent() {
        let stmts =
            compile_stages(&[stage("b", &["a"]), stage("a", &[])], &HashMap::new()).unwrap();

        assert_eq!(task_ids(&stmts), vec!["a", "b"]);
        match &stmts[1] {
            Stmt::StageTask { id, deps, .. } => {
                assert_eq!(id, "b");
                assert_eq!(deps, &["a".to_string()]);
            }
            other => panic!("expected stage task, got {:?}", other),
        }
    }

    #[test]
    fn test_diamond_joins_each_stage_once() {
        let stmts = compile_stages(
            &[
                stage("top", &[]),
                stage("left", &["top"]),
                stage("right", &["top"]),
                stage("bottom", &["left", "right"]),
            ],
            &HashMap::new(),
        )
        .unwrap();

        assert_eq!(task_ids(&stmts), vec!["top", "left", "right", "bottom"]);
        // The shared dependency appears once in the final barrier.
        assert_eq!(barrier(&stmts), &["top", "left", "right", "bottom"]);
    }

    #[test]
    fn test_fan_in_barrier_in_discovery_order() {
        let stmts = compile_stages(
            &[
                stage("x", &["shared"]),
                stage("y", &["shared"]),
                stage("z", &["shared"]),
                stage("shared", &[]),
            ],
            &HashMap::new(),
        )
        .unwrap();

        // `shared` is discovered while launching `x`, then never again.
        assert_eq!(barrier(&stmts), &["shared", "x", "y", "z"]);
    }

    #[test]
    fn test_unknown_dependency_dropped() {
        let stmts = compile_stages(&[stage("a", &["ghost"])], &HashMap::new()).unwrap();

        match &stmts[0] {
            Stmt::StageTask { deps, .. } => assert!(deps.is_empty()),
            other => panic!("expected stage task, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_dependency_joined_once() {
        let stmts = compile_stages(
            &[stage("a", &[]), stage("b", &["a", "a"])],
            &HashMap::new(),
        )
        .unwrap();

        match &stmts[1] {
            Stmt::StageTask { deps, .. } => assert_eq!(deps, &["a".to_string()]),
            other => panic!("expected stage task, got {:?}", other),
        }
    }

    #[test]
    fn test_anonymous_stage_gets_unique_id() {
        let anonymous = Stage { id: None, steps: vec![], dependencies: vec![] };
        let stmts = compile_stages(&[anonymous.clone(), anonymous], &HashMap::new()).unwrap();

        let ids = task_ids(&stmts);
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert!(ids[0].starts_with("stage-"));
    }

    #[test]
    fn test_cycle_compiles_finitely() {
        // The joins would deadlock at run time; compilation must terminate.
        let stmts =
            compile_stages(&[stage("a", &["b"]), stage("b", &["a"])], &HashMap::new()).unwrap();
        assert_eq!(task_ids(&stmts).len(), 2);
    }
}
