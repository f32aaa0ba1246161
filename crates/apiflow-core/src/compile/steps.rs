//! Step sequence compilation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::definition::Step;
use crate::error::CompileError;
use crate::ir::{CallSpec, Routine, Stmt};
use crate::ops::parse_check;

static DURATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)(ns|ms|s|m|h)$").unwrap());

/// Depth-first, order-preserving translation of a step sequence.
pub(crate) fn compile_steps(
    steps: &[Step],
    routines: &HashMap<String, Routine>,
) -> Result<Vec<Stmt>, CompileError> {
    let mut stmts = Vec::with_capacity(steps.len());

    for step in steps {
        match step {
            Step::Call { id, target, inputs } => {
                if !routines.contains_key(target) {
                    return Err(CompileError::UnknownTarget(target.clone()));
                }
                stmts.push(Stmt::Call(CallSpec {
                    id: id.clone(),
                    target: target.clone(),
                    inputs: inputs.clone(),
                }));
            }

            Step::Check { expr } => stmts.push(Stmt::Check(parse_check(expr)?)),

            Step::Assert { expr } => stmts.push(Stmt::Assert(parse_check(expr)?)),

            Step::Condition { expr, then, otherwise } => {
                let cond = parse_check(expr)?;
                let then_body = compile_steps(then, routines)?;
                let else_body = match otherwise {
                    Some(steps) => compile_steps(steps, routines)?,
                    None => Vec::new(),
                };
                stmts.push(Stmt::If { cond, then_body, else_body });
            }

            Step::CountLoop { count, body } => {
                let body = compile_steps(body, routines)?;
                stmts.push(compile_count(count, body)?);
            }

            Step::RawLoop { header, body } => {
                // Header text passes through verbatim, unvalidated.
                let body = compile_steps(body, routines)?;
                stmts.push(Stmt::RawLoop { header: header.clone(), body });
            }

            Step::InlineCode { code } => stmts.push(Stmt::Inline { code: code.clone() }),

            Step::Print { template } => {
                stmts.push(Stmt::Print { template: template.clone() })
            }

            Step::Binding { strength, assignments } => {
                for (name, value) in assignments {
                    stmts.push(Stmt::Bind {
                        strength: *strength,
                        name: name.clone(),
                        value: value.clone(),
                    });
                }
            }

            // Consumed by import resolution; the runner pre-binds every
            // imported table, so no inline statement is emitted.
            Step::DataImport { alias } => {
                if !routines.contains_key(alias) {
                    return Err(CompileError::UnknownTarget(alias.clone()));
                }
            }
        }
    }

    Ok(stmts)
}

/// Compile a count-loop header: an integer count or a `<number><unit>`
/// duration with unit in {ns, ms, s, m, h}.
fn compile_count(count: &serde_json::Value, body: Vec<Stmt>) -> Result<Stmt, CompileError> {
    match count {
        serde_json::Value::Number(n) => match n.as_u64() {
            Some(times) => Ok(Stmt::Repeat { times, body }),
            None => Err(CompileError::InvalidLoopCount(n.to_string())),
        },
        serde_json::Value::String(text) => {
            let trimmed = text.trim();
            if let Ok(times) = trimmed.parse::<u64>() {
                return Ok(Stmt::Repeat { times, body });
            }
            if let Some(caps) = DURATION.captures(trimmed) {
                let amount: f64 = caps[1].parse().map_err(|_| {
                    CompileError::InvalidLoopCount(text.clone())
                })?;
                let duration_ms = match &caps[2] {
                    "ns" => amount / 1_000_000.0,
                    "ms" => amount,
                    "s" => amount * 1_000.0,
                    "m" => amount * 60_000.0,
                    "h" => amount * 3_600_000.0,
                    _ => return Err(CompileError::InvalidLoopCount(text.clone())),
                };
                return Ok(Stmt::RepeatFor { duration_ms, body });
            }
            Err(CompileError::InvalidLoopCount(text.clone()))
        }
        other => Err(CompileError::InvalidLoopCount(other.to_string())),
    }
}
