//! Tree-walking flow runner.
//!
//! Interprets the compiled statement tree directly. Within one sequence,
//! statements execute in source order; stage tasks are spawned eagerly and
//! gate on the completion signals of their declared dependencies, so
//! independent stages overlap while a stage body never begins before its
//! dependencies have completed.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

use crate::definition::ApiDefinition;
use crate::error::RunError;
use crate::extract::extract_outputs;
use crate::format::format_body;
use crate::ir::{CallSpec, Program, Routine, Stmt};
use crate::ops::{text_form, CheckExpr};
use crate::resolve::{resolve_refs, Bindings};
use crate::runtime::transport::{ApiRequest, Transport};

/// Outcome of one flow run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunReport {
    pub name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub outputs: serde_json::Map<String, serde_json::Value>,
}

impl RunReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

type SharedEnvs = Arc<RwLock<serde_json::Map<String, serde_json::Value>>>;

#[derive(Debug, Default)]
struct ScopeData {
    /// Reference table: `i:` inputs, call-result `id:key` entries, table rows.
    refs: Bindings,
    /// Whole values bound by call ids and binding steps.
    locals: HashMap<String, serde_json::Value>,
}

/// Per-run state shared with spawned stage tasks.
#[derive(Clone)]
struct RunCtx {
    scope: Arc<RwLock<ScopeData>>,
    envs: SharedEnvs,
    imports: Arc<HashMap<String, Routine>>,
    board: Arc<StageBoard>,
}

type SlotState = Option<Result<(), String>>;

/// Completion signals for stage tasks.
///
/// Slots are created on first use from either side, so a join can be
/// issued before its stage task has been spawned (a cyclic graph parks
/// there forever, which is the documented run-time behavior).
#[derive(Debug, Default)]
struct StageBoard {
    slots: Mutex<HashMap<String, (watch::Sender<SlotState>, watch::Receiver<SlotState>)>>,
}

impl StageBoard {
    fn slot(&self, id: &str) -> watch::Receiver<SlotState> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None))
            .1
            .clone()
    }

    fn complete(&self, id: &str, result: Result<(), String>) {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (sender, _) = slots
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None));
        sender.send_replace(Some(result));
    }

    async fn wait(mut receiver: watch::Receiver<SlotState>) -> Result<(), String> {
        loop {
            if let Some(result) = receiver.borrow().clone() {
                return result;
            }
            if receiver.changed().await.is_err() {
                return Err("stage task dropped without completing".to_string());
            }
        }
    }
}

/// Runs compiled programs against an injected transport.
#[derive(Clone)]
pub struct Runner {
    transport: Arc<dyn Transport>,
}

impl Runner {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Run a compiled program with the given inputs and environment table.
    pub async fn run(
        &self,
        program: &Program,
        inputs: serde_json::Map<String, serde_json::Value>,
        envs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<RunReport, RunError> {
        let started_at = chrono::Utc::now();
        let outputs = self
            .run_program(program, inputs, Arc::new(RwLock::new(envs)))
            .await?;

        Ok(RunReport {
            name: program.name.clone(),
            started_at,
            finished_at: chrono::Utc::now(),
            outputs,
        })
    }

    /// Run a standalone API definition as its own one-call flow.
    pub async fn run_api_definition(
        &self,
        name: &str,
        api: &ApiDefinition,
        inputs: serde_json::Map<String, serde_json::Value>,
        envs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<RunReport, RunError> {
        let started_at = chrono::Utc::now();
        let envs = Arc::new(RwLock::new(envs));
        let result = self.run_api(api, &inputs, &envs).await?;

        let outputs = match result {
            serde_json::Value::Object(entries) => entries,
            other => serde_json::Map::from_iter([("result".to_string(), other)]),
        };

        Ok(RunReport {
            name: name.to_string(),
            started_at,
            finished_at: chrono::Utc::now(),
            outputs,
        })
    }

    fn run_program<'a>(
        &'a self,
        program: &'a Program,
        inputs: serde_json::Map<String, serde_json::Value>,
        envs: SharedEnvs,
    ) -> BoxFuture<'a, Result<serde_json::Map<String, serde_json::Value>, RunError>> {
        async move {
            let mut refs = Bindings::from_scopes(&program.inputs, &inputs, &serde_json::Map::new());
            let mut locals = HashMap::new();

            // Imported data tables are in scope from the start: the whole
            // table under its alias, each row under `alias:index`.
            for (alias, routine) in &program.imports {
                if let Routine::Table(rows) = routine {
                    for (index, row) in rows.iter().enumerate() {
                        refs.bind(alias, &index.to_string(), row.clone());
                    }
                    locals.insert(alias.clone(), serde_json::Value::Array(rows.clone()));
                }
            }

            let ctx = RunCtx {
                scope: Arc::new(RwLock::new(ScopeData { refs, locals })),
                envs,
                imports: Arc::new(program.imports.clone()),
                board: Arc::new(StageBoard::default()),
            };

            self.exec_seq(&program.body, &ctx).await?;

            let mut outputs = serde_json::Map::new();
            for (name, expr) in &program.outputs {
                outputs.insert(name.clone(), self.eval_operand(expr, &ctx).await);
            }
            Ok(outputs)
        }
        .boxed()
    }

    fn exec_seq<'a>(
        &'a self,
        stmts: &'a [Stmt],
        ctx: &'a RunCtx,
    ) -> BoxFuture<'a, Result<(), RunError>> {
        async move {
            for stmt in stmts {
                self.exec(stmt, ctx).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn exec(&self, stmt: &Stmt, ctx: &RunCtx) -> Result<(), RunError> {
        match stmt {
            Stmt::Call(spec) => self.exec_call(spec, ctx).await,

            Stmt::Check(check) => {
                if !self.eval_check(check, ctx).await {
                    tracing::warn!(check = %describe(check), "check failed");
                }
                Ok(())
            }

            Stmt::Assert(check) => {
                if !self.eval_check(check, ctx).await {
                    return Err(RunError::AssertFailed(describe(check)));
                }
                Ok(())
            }

            Stmt::If { cond, then_body, else_body } => {
                if self.eval_check(cond, ctx).await {
                    self.exec_seq(then_body, ctx).await
                } else {
                    self.exec_seq(else_body, ctx).await
                }
            }

            Stmt::Repeat { times, body } => {
                for _ in 0..*times {
                    self.exec_seq(body, ctx).await?;
                }
                Ok(())
            }

            Stmt::RepeatFor { duration_ms, body } => {
                let deadline = Duration::from_secs_f64(duration_ms / 1000.0);
                let start = Instant::now();
                // The body runs at least once and re-runs until the
                // duration has elapsed; each tick is a suspension point.
                loop {
                    self.exec_seq(body, ctx).await?;
                    if start.elapsed() >= deadline {
                        return Ok(());
                    }
                    tokio::task::yield_now().await;
                }
            }

            Stmt::RawLoop { header, .. } => {
                tracing::warn!(header = %header, "raw loop needs a scripting backend, skipped");
                Ok(())
            }

            Stmt::Inline { code } => {
                tracing::warn!(code = %code, "inline code needs a scripting backend, skipped");
                Ok(())
            }

            Stmt::Print { template } => {
                let message = self.render_text(template, ctx).await;
                tracing::info!("{}", message);
                Ok(())
            }

            Stmt::Bind { name, value, .. } => {
                let resolved = self.resolve_in_scope(value, ctx).await;
                let mut scope = ctx.scope.write().await;
                scope.locals.insert(name.clone(), resolved);
                Ok(())
            }

            Stmt::StageTask { id, deps, body } => {
                self.spawn_stage(id, deps, body, ctx);
                Ok(())
            }

            Stmt::StageBarrier { ids } => {
                for id in ids {
                    StageBoard::wait(ctx.board.slot(id))
                        .await
                        .map_err(|reason| RunError::StageFailed(id.clone(), reason))?;
                }
                Ok(())
            }
        }
    }

    fn spawn_stage(&self, id: &str, deps: &[String], body: &[Stmt], ctx: &RunCtx) {
        let runner = self.clone();
        let task_ctx = ctx.clone();
        let stage_id = id.to_string();
        let deps = deps.to_vec();
        let body = body.to_vec();

        // Register the slot before the task runs so joins always find it.
        let _ = ctx.board.slot(id);

        tokio::spawn(async move {
            for dep in &deps {
                if let Err(reason) = StageBoard::wait(task_ctx.board.slot(dep)).await {
                    tracing::warn!(
                        stage = %stage_id,
                        dependency = %dep,
                        "dependency failed, stage body not started"
                    );
                    task_ctx.board.complete(&stage_id, Err(reason));
                    return;
                }
            }

            tracing::debug!(stage = %stage_id, "stage started");
            let result = runner.exec_seq(&body, &task_ctx).await;
            if let Err(ref error) = result {
                tracing::error!(stage = %stage_id, error = %error, "stage body failed");
            }
            task_ctx
                .board
                .complete(&stage_id, result.map_err(|error| error.to_string()));
        });
    }

    async fn exec_call(&self, spec: &CallSpec, ctx: &RunCtx) -> Result<(), RunError> {
        let routine = ctx
            .imports
            .get(&spec.target)
            .cloned()
            .ok_or_else(|| RunError::UnknownTarget(spec.target.clone()))?;

        let inputs = match self
            .resolve_in_scope(&serde_json::Value::Object(spec.inputs.clone()), ctx)
            .await
        {
            serde_json::Value::Object(entries) => entries,
            _ => serde_json::Map::new(),
        };

        let result = match &routine {
            Routine::Api(api) => self.run_api(api, &inputs, &ctx.envs).await?,
            Routine::Test(nested) => {
                let outputs = self.run_program(nested, inputs, ctx.envs.clone()).await?;
                serde_json::Value::Object(outputs)
            }
            Routine::Table(rows) => serde_json::Value::Array(rows.clone()),
        };

        if let Some(id) = &spec.id {
            let mut scope = ctx.scope.write().await;
            if let serde_json::Value::Object(entries) = &result {
                scope.refs.bind_map(id, entries);
            }
            scope.locals.insert(id.clone(), result);
        }
        Ok(())
    }

    async fn run_api(
        &self,
        api: &ApiDefinition,
        inputs: &serde_json::Map<String, serde_json::Value>,
        envs: &SharedEnvs,
    ) -> Result<serde_json::Value, RunError> {
        let env_table = envs.read().await.clone();
        let bindings = Bindings::from_scopes(&api.inputs, inputs, &env_table);

        let request = ApiRequest {
            url: resolve_text(&api.url, &bindings),
            method: api.method,
            protocol: api.protocol,
            headers: resolve_text_map(&api.headers, &bindings),
            query: resolve_text_map(&api.query, &bindings),
            cookies: resolve_text_map(&api.cookies, &bindings),
            body: api
                .body
                .as_ref()
                .map(|template| format_body(&resolve_refs(template, &bindings), api.format)),
            format: api.format,
        };

        tracing::debug!(url = %request.url, method = %request.method, "sending call");
        let envelope = self.transport.send(&request).await?;

        let extracted = extract_outputs(&envelope, &api.outputs);

        if !api.setenv.is_empty() {
            let updates = extract_outputs(&envelope, &api.setenv);
            let mut envs = envs.write().await;
            for (name, value) in updates {
                envs.insert(name, serde_json::Value::String(value));
            }
        }

        Ok(serde_json::Value::Object(
            extracted
                .into_iter()
                .map(|(name, value)| (name, serde_json::Value::String(value)))
                .collect(),
        ))
    }

    async fn eval_check(&self, check: &CheckExpr, ctx: &RunCtx) -> bool {
        let left = self.eval_operand(&check.left, ctx).await;
        let right = self.eval_operand(&check.right, ctx).await;
        check.op.eval(&left, &right)
    }

    /// Resolve one comparison operand: reference tokens first, then local
    /// bindings, else the literal text.
    async fn eval_operand(&self, text: &str, ctx: &RunCtx) -> serde_json::Value {
        let resolved = self
            .resolve_in_scope(&serde_json::Value::String(text.to_string()), ctx)
            .await;

        if let serde_json::Value::String(unchanged) = &resolved {
            if unchanged == text {
                let scope = ctx.scope.read().await;
                if let Some(local) = scope.locals.get(text) {
                    return local.clone();
                }
            }
        }
        resolved
    }

    async fn resolve_in_scope(
        &self,
        value: &serde_json::Value,
        ctx: &RunCtx,
    ) -> serde_json::Value {
        let bindings = self.snapshot(ctx).await;
        resolve_refs(value, &bindings)
    }

    /// Current reference table: scope refs plus the shared `e:` entries.
    async fn snapshot(&self, ctx: &RunCtx) -> Bindings {
        let mut bindings = ctx.scope.read().await.refs.clone();
        for (name, value) in ctx.envs.read().await.iter() {
            bindings.bind("e", name, value.clone());
        }
        bindings
    }

    async fn render_text(&self, template: &str, ctx: &RunCtx) -> String {
        let resolved = self
            .resolve_in_scope(&serde_json::Value::String(template.to_string()), ctx)
            .await;
        text_form(&resolved)
    }
}

fn resolve_text(template: &str, bindings: &Bindings) -> String {
    text_form(&resolve_refs(
        &serde_json::Value::String(template.to_string()),
        bindings,
    ))
}

fn resolve_text_map(
    map: &HashMap<String, String>,
    bindings: &Bindings,
) -> HashMap<String, String> {
    map.iter()
        .map(|(key, value)| (key.clone(), resolve_text(value, bindings)))
        .collect()
}

fn describe(check: &CheckExpr) -> String {
    format!("{} {} {}", check.left, check.op.symbol(), check.right)
}
