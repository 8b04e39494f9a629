//! In-process substrate: runs orchestrator tasks on the current tokio
//! runtime and persists through the orchestrator's checkpoint manager.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use warden_types::retry::RetryPolicy;
use warden_types::role::Role;
use warden_types::run::{ActionStatus, RunSnapshot};

use super::{DurableSubstrate, ExecutionHandle, Signal, SubstrateError};
use crate::dispatch::ActionDispatcher;
use crate::repository::RunRepository;
use crate::workflow::checkpoint::CheckpointError;
use crate::workflow::compiler::CompiledGraph;
use crate::workflow::orchestrator::{Orchestrator, OrchestratorError, RunOutcome};

pub struct LocalSubstrate<D: ActionDispatcher, R: RunRepository> {
    orchestrator: Arc<Orchestrator<D, R>>,
    /// Compiled graphs keyed by `(workflow_id, version)`.
    graphs: DashMap<(String, u32), Arc<CompiledGraph>>,
    /// Cancellation tokens of runs currently executing in this process.
    active: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<D: ActionDispatcher, R: RunRepository> LocalSubstrate<D, R> {
    pub fn new(orchestrator: Arc<Orchestrator<D, R>>) -> Self {
        Self {
            orchestrator,
            graphs: DashMap::new(),
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<D, R>> {
        &self.orchestrator
    }

    /// Make a compiled workflow version startable. Re-registering the same
    /// version replaces it.
    pub fn register(&self, graph: CompiledGraph) -> Arc<CompiledGraph> {
        let key = (graph.workflow_id().to_string(), graph.version());
        let graph = Arc::new(graph);
        tracing::info!(workflow_id = %key.0, version = key.1, "registered workflow");
        self.graphs.insert(key, graph.clone());
        graph
    }

    pub fn latest_version(&self, workflow_id: &str) -> Option<u32> {
        self.graphs
            .iter()
            .filter(|e| e.key().0 == workflow_id)
            .map(|e| e.key().1)
            .max()
    }

    /// Registered `(workflow_id, version)` pairs, sorted.
    pub fn workflows(&self) -> Vec<(String, u32)> {
        let mut keys: Vec<(String, u32)> = self.graphs.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn graph(&self, workflow_id: &str, version: Option<u32>) -> Result<Arc<CompiledGraph>, SubstrateError> {
        let unknown = || SubstrateError::UnknownWorkflow {
            workflow_id: workflow_id.to_string(),
            version,
        };
        let version = match version {
            Some(v) => v,
            None => self.latest_version(workflow_id).ok_or_else(unknown)?,
        };
        self.graphs
            .get(&(workflow_id.to_string(), version))
            .map(|g| g.value().clone())
            .ok_or_else(unknown)
    }

    pub fn is_active(&self, run_id: &Uuid) -> bool {
        self.active.contains_key(run_id)
    }

    /// Start a run and wait for it to finish.
    ///
    /// The run executes on its own task, so dropping the returned future
    /// stops the wait but not the run.
    pub async fn start_and_wait(
        &self,
        workflow_id: &str,
        version: Option<u32>,
        trigger: Value,
        role: Role,
    ) -> Result<RunOutcome, SubstrateError> {
        let graph = self.graph(workflow_id, version)?;
        let run_id = Uuid::now_v7();
        self.orchestrator.begin(&graph, run_id, trigger, role).await?;
        Ok(self.spawn(graph, run_id).await??)
    }

    /// Resume every run left incomplete by a previous process. Runs of
    /// workflow versions that are no longer registered are left untouched.
    pub async fn recover(&self) -> Result<Vec<ExecutionHandle>, SubstrateError> {
        let runs = self.orchestrator.checkpoints().incomplete_runs().await?;
        let mut handles = Vec::with_capacity(runs.len());
        for run in runs {
            if self.is_active(&run.id) {
                continue;
            }
            let Ok(graph) = self.graph(&run.workflow_id, Some(run.version)) else {
                tracing::warn!(
                    run_id = %run.id,
                    workflow_id = %run.workflow_id,
                    version = run.version,
                    "cannot recover run: workflow version not registered"
                );
                continue;
            };
            let handle = ExecutionHandle {
                run_id: run.id,
                workflow_id: run.workflow_id,
                version: run.version,
            };
            self.spawn(graph, handle.run_id);
            handles.push(handle);
        }
        tracing::info!(recovered = handles.len(), "recovered incomplete runs");
        Ok(handles)
    }

    /// Cancel every run executing in this process.
    pub fn shutdown(&self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
    }

    fn spawn(&self, graph: Arc<CompiledGraph>, run_id: Uuid) -> JoinHandle<Result<RunOutcome, OrchestratorError>> {
        let token = CancellationToken::new();
        self.active.insert(run_id, token.clone());
        let orchestrator = self.orchestrator.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            let result = orchestrator.resume(graph, run_id, token).await;
            if let Err(e) = &result {
                tracing::error!(run_id = %run_id, error = %e, "workflow run aborted");
            }
            active.remove(&run_id);
            result
        })
    }
}

impl<D: ActionDispatcher, R: RunRepository> DurableSubstrate for LocalSubstrate<D, R> {
    async fn start(
        &self,
        workflow_id: &str,
        version: Option<u32>,
        trigger: Value,
        role: Role,
    ) -> Result<ExecutionHandle, SubstrateError> {
        let graph = self.graph(workflow_id, version)?;
        let handle = ExecutionHandle {
            run_id: Uuid::now_v7(),
            workflow_id: graph.workflow_id().to_string(),
            version: graph.version(),
        };
        self.orchestrator.begin(&graph, handle.run_id, trigger, role).await?;
        self.spawn(graph, handle.run_id);
        tracing::info!(run_id = %handle.run_id, workflow_id = %handle.workflow_id, version = handle.version, "run started");
        Ok(handle)
    }

    async fn signal(&self, handle: &ExecutionHandle, signal: Signal) -> Result<(), SubstrateError> {
        match signal {
            Signal::Cancel => {
                if let Some(token) = self.active.get(&handle.run_id) {
                    tracing::info!(run_id = %handle.run_id, "cancelling run");
                    token.cancel();
                    return Ok(());
                }
                // Not running here: fine if it already finished.
                let snapshot = self.query(handle).await?;
                if snapshot.run.status.is_terminal() {
                    Ok(())
                } else {
                    Err(SubstrateError::RunNotFound(handle.run_id))
                }
            }
        }
    }

    async fn query(&self, handle: &ExecutionHandle) -> Result<RunSnapshot, SubstrateError> {
        let mut snapshot = match self.orchestrator.checkpoints().snapshot(handle.run_id).await {
            Ok(snapshot) => snapshot,
            Err(CheckpointError::RunNotFound(id)) => {
                return Err(SubstrateError::RunNotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        if let Ok(graph) = self.graph(&snapshot.run.workflow_id, Some(snapshot.run.version)) {
            for node in graph.nodes() {
                snapshot
                    .actions
                    .entry(node.action_ref().to_string())
                    .or_insert(ActionStatus::Pending);
            }
        }
        Ok(snapshot)
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.orchestrator.options().retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::local::LocalDispatcher;
    use crate::registry::ActionRegistry;
    use crate::repository::MemoryRunRepository;
    use crate::workflow::checkpoint::CheckpointManager;
    use crate::workflow::compiler::compile;
    use serde_json::json;
    use std::time::Duration;
    use warden_types::run::RunStatus;
    use warden_types::workflow::{ActionNode, WorkflowDefinition};

    fn substrate() -> LocalSubstrate<LocalDispatcher, MemoryRunRepository> {
        let registry = Arc::new(ActionRegistry::with_bundled());
        let orchestrator = Orchestrator::new(
            Arc::new(LocalDispatcher::new(registry.clone())),
            Arc::new(CheckpointManager::new(MemoryRunRepository::default())),
        )
        .with_registry(registry);
        LocalSubstrate::new(Arc::new(orchestrator))
    }

    fn echo_workflow(version: u32, value: &str) -> CompiledGraph {
        let mut def = WorkflowDefinition::new(
            "wf-echo",
            "Echo",
            vec![ActionNode::new("echo", "core.transform.reshape").with_arg("value", json!(value))],
        );
        def.version = version;
        compile(&def).unwrap()
    }

    fn role() -> Role {
        Role::service("warden-test")
    }

    #[tokio::test]
    async fn test_start_and_wait_uses_latest_version() {
        let substrate = substrate();
        substrate.register(echo_workflow(1, "v1"));
        substrate.register(echo_workflow(2, "v2"));

        let outcome = substrate
            .start_and_wait("wf-echo", None, json!({}), role())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.results["echo"].value(), Some(&json!("v2")));

        let pinned = substrate
            .start_and_wait("wf-echo", Some(1), json!({}), role())
            .await
            .unwrap();
        assert_eq!(pinned.results["echo"].value(), Some(&json!("v1")));
    }

    #[tokio::test]
    async fn test_start_then_query_until_done() {
        let substrate = substrate();
        substrate.register(echo_workflow(1, "hi"));
        let handle = substrate.start("wf-echo", None, Value::Null, role()).await.unwrap();

        let mut snapshot = substrate.query(&handle).await.unwrap();
        for _ in 0..100 {
            if snapshot.run.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            snapshot = substrate.query(&handle).await.unwrap();
        }
        assert_eq!(snapshot.run.status, RunStatus::Succeeded);
        assert_eq!(snapshot.actions["echo"], ActionStatus::Succeeded);

        // Cancelling a finished run is a no-op.
        substrate.signal(&handle, Signal::Cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let substrate = substrate();
        let err = substrate
            .start("wf-missing", None, Value::Null, role())
            .await
            .unwrap_err();
        assert!(matches!(err, SubstrateError::UnknownWorkflow { .. }));
        assert_eq!(err.to_string(), "workflow 'wf-missing' is not registered");
    }

    #[tokio::test]
    async fn test_recover_resumes_incomplete_runs() {
        let substrate = substrate();
        let graph = substrate.register(echo_workflow(1, "recovered"));
        let run_id = Uuid::now_v7();
        // A run recorded by a previous process that never got to execute.
        substrate
            .orchestrator()
            .begin(&graph, run_id, Value::Null, role())
            .await
            .unwrap();

        let handles = substrate.recover().await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].run_id, run_id);

        let mut status = RunStatus::Running;
        for _ in 0..100 {
            status = substrate.query(&handles[0]).await.unwrap().run.status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_run_outlives_dropped_wait() {
        let registry = Arc::new(ActionRegistry::with_bundled());
        let origin = crate::registry::RegistryOrigin::bundled("test");
        registry.register(crate::registry::ActionSpec::new(
            "test",
            "pause",
            "Sleeps briefly",
            crate::registry::InputSchema::new(),
            origin,
            Pause,
        ));
        let orchestrator = Orchestrator::new(
            Arc::new(LocalDispatcher::new(registry.clone())),
            Arc::new(CheckpointManager::new(MemoryRunRepository::default())),
        )
        .with_registry(registry);
        let substrate = LocalSubstrate::new(Arc::new(orchestrator));
        substrate.register(
            compile(&WorkflowDefinition::new(
                "wf-pause",
                "Pause",
                vec![ActionNode::new("pause", "test.pause")],
            ))
            .unwrap(),
        );

        // The caller gives up while the action is still running.
        let waited = tokio::time::timeout(
            Duration::from_millis(20),
            substrate.start_and_wait("wf-pause", None, Value::Null, role()),
        )
        .await;
        assert!(waited.is_err());

        // Still executing, and registered as active so recovery leaves it alone.
        let runs = substrate.orchestrator().checkpoints().incomplete_runs().await.unwrap();
        assert_eq!(runs.len(), 1);
        let handle = ExecutionHandle {
            run_id: runs[0].id,
            workflow_id: "wf-pause".to_string(),
            version: runs[0].version,
        };
        assert!(substrate.is_active(&handle.run_id));

        let mut status = RunStatus::Running;
        for _ in 0..100 {
            status = substrate.query(&handle).await.unwrap().run.status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, RunStatus::Succeeded);
        assert!(!substrate.is_active(&handle.run_id));
    }

    struct Pause;

    impl crate::registry::ActionHandler for Pause {
        async fn call<'a>(
            &'a self,
            _args: Value,
            _ctx: crate::registry::ActionContext<'a>,
        ) -> Result<Value, warden_types::result::ErrorInfo> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(json!("done"))
        }
    }
}
