//! Orchestrator: drives one run of a compiled graph to completion.
//!
//! Scheduling is event driven. After every completed node the orchestrator
//! re-scans pending nodes in topological order and starts whatever became
//! ready, so "any" joins and isolated branches start as soon as their inputs
//! allow instead of waiting for a whole wave.
//!
//! # Node lifecycle
//!
//! 1. Readiness from upstream states and the node's join strategy.
//! 2. `run_if` evaluated against the context; falsy -> `Skipped`.
//! 3. Arguments resolved (once, or once per item for a `for_each` node) and
//!    validated against the registry when one is attached.
//! 4. Dispatch on a task, with per-attempt `Running` transitions and retries.
//! 5. Result recorded into the context, transition logged, context saved.
//!
//! Every state change is checkpointed before the orchestrator moves on, so
//! [`Orchestrator::resume`] can pick a run up after a crash without
//! re-dispatching finished nodes.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use warden_types::config::{LoopConfig, WardenConfig};
use warden_types::result::{ActionResult, ErrorInfo};
use warden_types::retry::RetryPolicy;
use warden_types::role::Role;
use warden_types::run::{ActionStatus, RunStatus};
use warden_types::workflow::{FailurePolicy, JoinStrategy};

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::compiler::{CompiledGraph, CompiledNode};
use super::context::ExecutionContext;
use super::retry::RetryHandler;
use crate::dispatch::fanout::{LoopOptions, run_loop};
use crate::dispatch::{ActionDispatcher, DispatchRequest, RunContext};
use crate::expression::{self, is_truthy};
use crate::registry::ActionRegistry;
use crate::repository::RunRepository;

// ---------------------------------------------------------------------------
// Options, outcome, errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Used for nodes without their own retry policy.
    pub retry: RetryPolicy,
    /// Per-dispatch timeout for nodes without `timeout_secs`.
    pub action_timeout: Duration,
    pub loops: LoopConfig,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            action_timeout: Duration::from_secs(120),
            loops: LoopConfig::default(),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &WardenConfig) -> Self {
        Self {
            retry: config.substrate.retry.clone(),
            action_timeout: Duration::from_secs(config.executor.timeout_secs),
            loops: config.loops.clone(),
        }
    }
}

/// Final state of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub actions: BTreeMap<String, ActionStatus>,
    pub results: BTreeMap<String, ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("run {run_id} belongs to {expected}, not {actual}")]
    GraphMismatch {
        run_id: Uuid,
        expected: String,
        actual: String,
    },
}

// ---------------------------------------------------------------------------
// Internal run state
// ---------------------------------------------------------------------------

struct RunState {
    graph: Arc<CompiledGraph>,
    ctx: ExecutionContext,
    role: Role,
    statuses: BTreeMap<String, ActionStatus>,
    /// Attempt number the next dispatch of a node starts at (resume only).
    next_attempt: BTreeMap<String, u32>,
    /// Node task ids, so a task that fails to join can be attributed.
    in_flight: HashMap<Id, String>,
}

impl RunState {
    fn new(graph: Arc<CompiledGraph>, ctx: ExecutionContext, role: Role) -> Self {
        let statuses = graph
            .nodes()
            .map(|n| (n.action_ref().to_string(), ActionStatus::Pending))
            .collect();
        Self {
            graph,
            ctx,
            role,
            statuses,
            next_attempt: BTreeMap::new(),
            in_flight: HashMap::new(),
        }
    }

    fn status(&self, action_ref: &str) -> ActionStatus {
        self.statuses.get(action_ref).copied().unwrap_or(ActionStatus::Pending)
    }

    fn attempt(&self, action_ref: &str) -> u32 {
        self.next_attempt.get(action_ref).copied().unwrap_or(1)
    }

    fn outcome(&self, status: RunStatus, error: Option<ErrorInfo>) -> RunOutcome {
        RunOutcome {
            run_id: self.ctx.run_id,
            status,
            actions: self.statuses.clone(),
            results: self.ctx.results.clone(),
            error,
        }
    }
}

enum Readiness {
    Wait,
    Ready,
    Skip,
}

fn readiness(node: &CompiledNode, statuses: &BTreeMap<String, ActionStatus>) -> Readiness {
    if node.upstream.is_empty() {
        return Readiness::Ready;
    }
    let status = |r: &str| statuses.get(r).copied().unwrap_or(ActionStatus::Pending);
    match node.definition.join_strategy {
        JoinStrategy::All => {
            let mut waiting = false;
            for dep in &node.upstream {
                let s = status(&dep.action_ref);
                if !s.is_terminal() {
                    waiting = true;
                } else if dep.on_failure == FailurePolicy::Propagate && s != ActionStatus::Succeeded {
                    return Readiness::Skip;
                }
            }
            if waiting { Readiness::Wait } else { Readiness::Ready }
        }
        JoinStrategy::Any => {
            let mut waiting = false;
            for dep in &node.upstream {
                let s = status(&dep.action_ref);
                let satisfied = match dep.on_failure {
                    FailurePolicy::Propagate => s == ActionStatus::Succeeded,
                    FailurePolicy::Isolate => s.is_terminal(),
                };
                if satisfied {
                    return Readiness::Ready;
                }
                waiting |= !s.is_terminal();
            }
            if waiting { Readiness::Wait } else { Readiness::Skip }
        }
    }
}

/// Whether some downstream node tolerates `action_ref` failing.
fn has_isolated_edge(graph: &CompiledGraph, action_ref: &str) -> bool {
    graph.downstream(action_ref).iter().any(|d| {
        graph
            .upstream(d)
            .iter()
            .any(|dep| dep.action_ref == action_ref && dep.on_failure == FailurePolicy::Isolate)
    })
}

enum Work {
    Single(Value),
    Loop(Vec<Value>),
}

enum Prepared {
    Skip,
    Dispatch(Work),
}

struct NodeTask {
    action_type: String,
    work: Work,
    run_context: RunContext,
    retry: RetryPolicy,
    timeout: Duration,
    loop_options: LoopOptions,
    first_attempt: u32,
}

struct NodeOutcome {
    result: ActionResult,
    attempt: u32,
}

enum Interrupt {
    Cancelled,
    TimedOut(Duration),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<D: ActionDispatcher, R: RunRepository> {
    dispatcher: Arc<D>,
    checkpoints: Arc<CheckpointManager<R>>,
    registry: Option<Arc<ActionRegistry>>,
    options: OrchestratorOptions,
    secrets: BTreeMap<String, Value>,
}

impl<D: ActionDispatcher, R: RunRepository> Orchestrator<D, R> {
    pub fn new(dispatcher: Arc<D>, checkpoints: Arc<CheckpointManager<R>>) -> Self {
        Self {
            dispatcher,
            checkpoints,
            registry: None,
            options: OrchestratorOptions::default(),
            secrets: BTreeMap::new(),
        }
    }

    /// Validate arguments against `registry` before every dispatch.
    pub fn with_registry(mut self, registry: Arc<ActionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Values exposed as `SECRETS`. Never checkpointed.
    pub fn with_secrets(mut self, secrets: BTreeMap<String, Value>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager<R>> {
        &self.checkpoints
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Start a new run and drive it to a terminal status.
    pub async fn execute(
        &self,
        graph: Arc<CompiledGraph>,
        run_id: Uuid,
        trigger: Value,
        role: Role,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.begin(&graph, run_id, trigger.clone(), role.clone()).await?;
        let ctx = ExecutionContext::new(run_id, &graph, trigger).with_secrets(self.secrets.clone());

        tracing::info!(
            run_id = %run_id,
            workflow_id = graph.workflow_id(),
            version = graph.version(),
            actions = graph.len(),
            "starting workflow run"
        );
        self.drive(RunState::new(graph, ctx, role), &cancel).await
    }

    /// Record a new run and its initial context without executing anything.
    /// [`Orchestrator::resume`] drives it from there.
    pub async fn begin(
        &self,
        graph: &CompiledGraph,
        run_id: Uuid,
        trigger: Value,
        role: Role,
    ) -> Result<(), OrchestratorError> {
        self.checkpoints
            .start_run(run_id, graph.workflow_id(), graph.version(), trigger.clone(), role)
            .await?;
        self.checkpoints
            .save_context(&ExecutionContext::new(run_id, graph, trigger))
            .await?;
        Ok(())
    }

    /// Continue a run from its last checkpoint.
    ///
    /// Terminal nodes keep their recorded state and result. Nodes caught
    /// mid-dispatch are dispatched again at the attempt they reached.
    pub async fn resume(
        &self,
        graph: Arc<CompiledGraph>,
        run_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        let restored = self.checkpoints.restore(run_id).await?;
        if restored.run.workflow_id != graph.workflow_id() || restored.run.version != graph.version() {
            return Err(OrchestratorError::GraphMismatch {
                run_id,
                expected: format!("{}@{}", restored.run.workflow_id, restored.run.version),
                actual: format!("{}@{}", graph.workflow_id(), graph.version()),
            });
        }

        let mut ctx = restored
            .context
            .unwrap_or_else(|| ExecutionContext::new(run_id, &graph, restored.run.trigger.clone()));
        ctx.set_secrets(self.secrets.clone());

        let mut state = RunState::new(graph, ctx, restored.run.role.clone());
        for (action_ref, node) in restored.nodes {
            if state.graph.node(&action_ref).is_none() {
                continue;
            }
            if node.status.is_terminal() {
                if let Some(result) = node.result {
                    state.ctx.results.entry(action_ref.clone()).or_insert(result);
                }
                state.statuses.insert(action_ref, node.status);
            } else {
                state.next_attempt.insert(action_ref, node.attempt.max(1));
            }
        }

        if restored.run.status.is_terminal() {
            return Ok(state.outcome(restored.run.status, restored.run.error));
        }

        let done = state.statuses.values().filter(|s| s.is_terminal()).count();
        tracing::info!(
            run_id = %run_id,
            workflow_id = state.graph.workflow_id(),
            restored = done,
            remaining = state.graph.len() - done,
            "resuming workflow run"
        );
        self.drive(state, &cancel).await
    }

    async fn drive(&self, mut state: RunState, cancel: &CancellationToken) -> Result<RunOutcome, OrchestratorError> {
        let run_id = state.ctx.run_id;
        let run_cancel = cancel.child_token();
        let mut tasks: JoinSet<(String, NodeOutcome)> = JoinSet::new();

        let timeout = state.graph.config().timeout_secs.map(Duration::from_secs);
        let deadline = async move {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut interrupted = None;
        loop {
            self.schedule(&mut state, &mut tasks, &run_cancel).await?;
            if tasks.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = Some(Interrupt::Cancelled);
                    break;
                }
                _ = &mut deadline => {
                    interrupted = timeout.map(Interrupt::TimedOut);
                    break;
                }
                Some(joined) = tasks.join_next_with_id() => {
                    self.complete(&mut state, joined).await?;
                }
            }
        }

        if interrupted.is_some() {
            run_cancel.cancel();
            tracing::info!(run_id = %run_id, in_flight = tasks.len(), "run interrupted, draining in-flight actions");
            while let Some(joined) = tasks.join_next_with_id().await {
                self.complete(&mut state, joined).await?;
            }
        }

        let (status, error) = match interrupted {
            Some(Interrupt::Cancelled) => (RunStatus::Cancelled, None),
            Some(Interrupt::TimedOut(after)) => (
                RunStatus::Failed,
                Some(ErrorInfo::new(
                    "TimeoutError",
                    format!("workflow did not complete within {}s", after.as_secs()),
                )),
            ),
            None => match self.first_failure(&state) {
                Some(error) => (RunStatus::Failed, Some(error)),
                None => (RunStatus::Succeeded, None),
            },
        };

        self.checkpoints.finish_run(run_id, status, error.as_ref()).await?;
        match &error {
            Some(e) => tracing::warn!(run_id = %run_id, status = %status, error = %e, "workflow run finished"),
            None => tracing::info!(run_id = %run_id, status = %status, "workflow run finished"),
        }
        Ok(state.outcome(status, error))
    }

    /// Start or skip every pending node whose upstream allows it.
    async fn schedule(
        &self,
        state: &mut RunState,
        tasks: &mut JoinSet<(String, NodeOutcome)>,
        run_cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let graph = state.graph.clone();
        for node in graph.nodes() {
            let action_ref = node.action_ref();
            if state.status(action_ref) != ActionStatus::Pending {
                continue;
            }
            match readiness(node, &state.statuses) {
                Readiness::Wait => {}
                Readiness::Skip => self.mark_skipped(state, action_ref, "upstream did not succeed").await?,
                Readiness::Ready => match self.prepare(state, node) {
                    Ok(Prepared::Skip) => self.mark_skipped(state, action_ref, "run_if evaluated falsy").await?,
                    Ok(Prepared::Dispatch(work)) => {
                        let task = self.node_task(state, node, work);
                        let action_ref = action_ref.to_string();
                        tracing::debug!(run_id = %state.ctx.run_id, action_ref = %action_ref, "starting action");
                        state.statuses.insert(action_ref.clone(), ActionStatus::Running);
                        let handle = tasks.spawn(run_node(
                            self.dispatcher.clone(),
                            self.checkpoints.clone(),
                            action_ref.clone(),
                            task,
                            run_cancel.clone(),
                        ));
                        state.in_flight.insert(handle.id(), action_ref);
                    }
                    Err(error) => {
                        let attempt = state.attempt(action_ref);
                        self.finish_node(state, action_ref, ActionResult::error(error, false), attempt)
                            .await?;
                    }
                },
            }
        }
        Ok(())
    }

    /// Evaluate `run_if`, then resolve and validate arguments.
    fn prepare(&self, state: &RunState, node: &CompiledNode) -> Result<Prepared, ErrorInfo> {
        let scope = state.ctx.scope();
        if let Some(condition) = &node.run_if {
            let value = condition.evaluate(&scope).map_err(|e| e.to_error_info())?;
            if !is_truthy(&value) {
                return Ok(Prepared::Skip);
            }
        }

        let args = Value::Object(node.definition.args.clone());
        let work = match &node.for_each {
            None => {
                let resolved = expression::resolve_args(&args, &scope).map_err(|e| e.to_error_info())?;
                Work::Single(self.validate(node.action_type(), resolved)?)
            }
            Some(header) => {
                let items = expression::evaluate_iterable(header, &scope).map_err(|e| e.to_error_info())?;
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    let locals = BTreeMap::from([(header.variable.clone(), item)]);
                    let args = expression::resolve_args(&args, &scope.with_locals(&locals))
                        .map_err(|e| e.to_error_info())?;
                    resolved.push(self.validate(node.action_type(), args)?);
                }
                Work::Loop(resolved)
            }
        };
        Ok(Prepared::Dispatch(work))
    }

    fn validate(&self, action_type: &str, args: Value) -> Result<Value, ErrorInfo> {
        match &self.registry {
            Some(registry) => registry.validate_args(action_type, &args).map_err(|e| e.to_error_info()),
            None => Ok(args),
        }
    }

    fn node_task(&self, state: &RunState, node: &CompiledNode, work: Work) -> NodeTask {
        let def = &node.definition;
        let timeout = def
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.options.action_timeout);
        let retry = RetryHandler::effective(def.retry_policy.as_ref(), &self.options.retry).clone();
        NodeTask {
            action_type: def.action.clone(),
            work,
            run_context: RunContext {
                run_id: state.ctx.run_id,
                workflow_id: state.graph.workflow_id().to_string(),
                action_ref: def.action_ref.clone(),
                role: state.role.clone(),
                loop_index: None,
            },
            loop_options: LoopOptions {
                max_parallel: def.max_parallel.unwrap_or(self.options.loops.max_parallel),
                continue_on_error: def.continue_on_error.unwrap_or(self.options.loops.continue_on_error),
                timeout,
                retry: retry.clone(),
            },
            retry,
            timeout,
            first_attempt: state.attempt(&def.action_ref),
        }
    }

    async fn complete(
        &self,
        state: &mut RunState,
        joined: Result<(Id, (String, NodeOutcome)), JoinError>,
    ) -> Result<(), OrchestratorError> {
        match joined {
            Ok((id, (action_ref, outcome))) => {
                state.in_flight.remove(&id);
                self.finish_node(state, &action_ref, outcome.result, outcome.attempt).await
            }
            // A lost task fails its node so the failure propagates like any other.
            Err(e) => {
                let Some(action_ref) = state.in_flight.remove(&e.id()) else {
                    tracing::error!(run_id = %state.ctx.run_id, error = %e, "unknown action task failed to join");
                    return Ok(());
                };
                tracing::error!(run_id = %state.ctx.run_id, action_ref = %action_ref, error = %e, "action task failed to join");
                let attempt = state.attempt(&action_ref);
                let error = ErrorInfo::new("InternalError", format!("action task did not complete: {e}"));
                self.finish_node(state, &action_ref, ActionResult::error(error, false), attempt)
                    .await
            }
        }
    }

    async fn finish_node(
        &self,
        state: &mut RunState,
        action_ref: &str,
        result: ActionResult,
        attempt: u32,
    ) -> Result<(), OrchestratorError> {
        let run_id = state.ctx.run_id;
        if let Err(e) = state.ctx.record_result(action_ref, result) {
            tracing::error!(run_id = %run_id, action_ref, error = %e, "execution context limit reached");
            state.ctx.results.insert(
                action_ref.to_string(),
                ActionResult::error(ErrorInfo::new("ContextSizeExceeded", e.to_string()), false),
            );
        }
        let stored = state.ctx.result(action_ref).cloned();
        let status = match &stored {
            Some(r) if r.is_success() => ActionStatus::Succeeded,
            _ => ActionStatus::Failed,
        };

        self.checkpoints
            .record(run_id, action_ref, status, attempt, stored.as_ref())
            .await?;
        self.checkpoints.save_context(&state.ctx).await?;
        state.statuses.insert(action_ref.to_string(), status);

        match stored.as_ref().and_then(ActionResult::error_info) {
            Some(error) => tracing::warn!(run_id = %run_id, action_ref, attempt, error = %error, "action failed"),
            None => tracing::info!(run_id = %run_id, action_ref, attempt, "action succeeded"),
        }
        Ok(())
    }

    async fn mark_skipped(&self, state: &mut RunState, action_ref: &str, reason: &str) -> Result<(), OrchestratorError> {
        self.checkpoints
            .record(state.ctx.run_id, action_ref, ActionStatus::Skipped, 0, None)
            .await?;
        state.statuses.insert(action_ref.to_string(), ActionStatus::Skipped);
        tracing::info!(run_id = %state.ctx.run_id, action_ref, reason, "action skipped");
        Ok(())
    }

    /// The first failed node (topological order) that no edge isolates.
    fn first_failure(&self, state: &RunState) -> Option<ErrorInfo> {
        state.graph.nodes().find_map(|node| {
            let action_ref = node.action_ref();
            if state.status(action_ref) != ActionStatus::Failed || has_isolated_edge(&state.graph, action_ref) {
                return None;
            }
            let cause = state.ctx.result(action_ref).and_then(ActionResult::error_info).cloned();
            let message = match &cause {
                Some(c) => format!("action '{action_ref}' failed: {c}"),
                None => format!("action '{action_ref}' failed"),
            };
            Some(
                ErrorInfo::new("ActionFailed", message)
                    .with_detail(json!({ "action_ref": action_ref, "error": cause })),
            )
        })
    }
}

// ---------------------------------------------------------------------------
// Node task
// ---------------------------------------------------------------------------

/// Runs one node on its own task. Panics become `InternalError` results so
/// they never cross the task boundary.
async fn run_node<D: ActionDispatcher, R: RunRepository>(
    dispatcher: Arc<D>,
    checkpoints: Arc<CheckpointManager<R>>,
    action_ref: String,
    task: NodeTask,
    cancel: CancellationToken,
) -> (String, NodeOutcome) {
    let first_attempt = task.first_attempt;
    let outcome = AssertUnwindSafe(dispatch_node(dispatcher, checkpoints, task, cancel))
        .catch_unwind()
        .await;
    let outcome = match outcome {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => NodeOutcome {
            result: ActionResult::error(ErrorInfo::new("CheckpointError", e.to_string()), false),
            attempt: first_attempt,
        },
        Err(_) => {
            tracing::error!(action_ref = %action_ref, "action task panicked");
            NodeOutcome {
                result: ActionResult::error(ErrorInfo::new("InternalError", "action task panicked"), false),
                attempt: first_attempt,
            }
        }
    };
    (action_ref, outcome)
}

async fn dispatch_node<D: ActionDispatcher, R: RunRepository>(
    dispatcher: Arc<D>,
    checkpoints: Arc<CheckpointManager<R>>,
    task: NodeTask,
    cancel: CancellationToken,
) -> Result<NodeOutcome, CheckpointError> {
    let run_id = task.run_context.run_id;
    let action_ref = task.run_context.action_ref.clone();
    let mut attempt = task.first_attempt;

    match task.work {
        Work::Single(args) => loop {
            checkpoints
                .record(run_id, &action_ref, ActionStatus::Running, attempt, None)
                .await?;
            let request = DispatchRequest {
                action_type: task.action_type.clone(),
                args: args.clone(),
                run_context: task.run_context.clone(),
            };
            let err = match dispatcher.dispatch(request, task.timeout).await {
                Ok(value) => {
                    return Ok(NodeOutcome {
                        result: ActionResult::success(value),
                        attempt,
                    });
                }
                Err(e) => e,
            };
            let Some(delay) = RetryHandler::next_delay(&task.retry, attempt, &err) else {
                return Ok(NodeOutcome {
                    result: err.to_action_result(),
                    attempt,
                });
            };
            tracing::warn!(
                run_id = %run_id,
                action_ref = %action_ref,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "action attempt failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(NodeOutcome {
                        result: err.to_action_result(),
                        attempt,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        },
        Work::Loop(items) => {
            checkpoints
                .record(run_id, &action_ref, ActionStatus::Running, attempt, None)
                .await?;
            let result = match run_loop(
                dispatcher,
                &task.action_type,
                items,
                &task.run_context,
                &task.loop_options,
                &cancel,
            )
            .await
            {
                // With continue_on_error, failed slots hold their error payload.
                Ok(results) => ActionResult::success(Value::Array(
                    results
                        .iter()
                        .map(|r| r.value().cloned().unwrap_or_else(|| json!(r.error_info())))
                        .collect(),
                )),
                Err(e) => ActionResult::error(e.to_error_info(), false),
            };
            Ok(NodeOutcome { result, attempt })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
