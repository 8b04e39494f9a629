//! Durable checkpoint manager for workflow runs.
//!
//! Wraps a [`RunRepository`] with the operations the orchestrator needs:
//! open a run, append node transitions, persist the execution context and
//! close the run. [`CheckpointManager::restore`] folds the transition log
//! back into per-node state so a crashed run can resume without
//! re-dispatching anything that already finished.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use warden_types::result::{ActionResult, ErrorInfo};
use warden_types::role::Role;
use warden_types::run::{ActionStatus, ActionTransition, RunSnapshot, RunStatus, WorkflowRun};

use super::context::ExecutionContext;
use crate::repository::RunRepository;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("repository error: {0}")]
    Repository(String),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("checkpoint is corrupt: {0}")]
    Corrupt(String),
}

/// Latest recorded state of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCheckpoint {
    pub status: ActionStatus,
    pub attempt: u32,
    pub result: Option<ActionResult>,
}

/// Everything needed to resume a run.
#[derive(Debug, Clone)]
pub struct RestoredRun {
    pub run: WorkflowRun,
    /// Last saved context, if one was saved before the crash.
    pub context: Option<ExecutionContext>,
    pub nodes: BTreeMap<String, NodeCheckpoint>,
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Generic over `R: RunRepository` so it works with any storage backend.
pub struct CheckpointManager<R: RunRepository> {
    repo: R,
}

impl<R: RunRepository> CheckpointManager<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Create the run record in `Running` state.
    pub async fn start_run(
        &self,
        run_id: Uuid,
        workflow_id: &str,
        version: u32,
        trigger: Value,
        role: Role,
    ) -> Result<WorkflowRun, CheckpointError> {
        let mut run = WorkflowRun::new(workflow_id, version, trigger, role);
        run.id = run_id;
        run.status = RunStatus::Running;
        self.repo
            .create_run(&run)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        tracing::debug!(run_id = %run_id, workflow_id, version, "checkpointed run start");
        Ok(run)
    }

    /// Append a node transition. Duplicates (same idempotency key) are
    /// ignored and reported as `false`.
    pub async fn record(
        &self,
        run_id: Uuid,
        action_ref: &str,
        status: ActionStatus,
        attempt: u32,
        result: Option<&ActionResult>,
    ) -> Result<bool, CheckpointError> {
        let transition = ActionTransition::new(run_id, action_ref, status, attempt, result.cloned());
        let recorded = self
            .repo
            .record_transition(&transition)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        if recorded {
            tracing::debug!(run_id = %run_id, action_ref, status = %status, attempt, "checkpointed transition");
        } else {
            tracing::debug!(run_id = %run_id, action_ref, status = %status, attempt, "duplicate transition ignored");
        }
        Ok(recorded)
    }

    pub async fn save_context(&self, context: &ExecutionContext) -> Result<(), CheckpointError> {
        self.repo
            .save_context(&context.run_id, &context.to_json())
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Move the run to a terminal (or any other) status.
    pub async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&ErrorInfo>,
    ) -> Result<(), CheckpointError> {
        self.repo
            .update_run_status(&run_id, status, error)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        tracing::debug!(run_id = %run_id, status = %status, "checkpointed run status");
        Ok(())
    }

    /// Runs that never reached a terminal status.
    pub async fn incomplete_runs(&self) -> Result<Vec<WorkflowRun>, CheckpointError> {
        self.repo
            .list_incomplete_runs()
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Load the run, its saved context and the latest state of every node.
    pub async fn restore(&self, run_id: Uuid) -> Result<RestoredRun, CheckpointError> {
        let run = self
            .repo
            .get_run(&run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::RunNotFound(run_id))?;

        let context = self
            .repo
            .load_context(&run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .map(ExecutionContext::from_json)
            .transpose()
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;

        let transitions = self
            .repo
            .list_transitions(&run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        let nodes = fold_transitions(transitions);

        tracing::debug!(
            run_id = %run_id,
            nodes = nodes.len(),
            has_context = context.is_some(),
            "restored run checkpoint"
        );
        Ok(RestoredRun { run, context, nodes })
    }

    /// Current view of a run from the transition log. Nodes without any
    /// recorded transition are absent.
    pub async fn snapshot(&self, run_id: Uuid) -> Result<RunSnapshot, CheckpointError> {
        let restored = self.restore(run_id).await?;
        let mut actions = BTreeMap::new();
        let mut results = BTreeMap::new();
        for (action_ref, node) in restored.nodes {
            actions.insert(action_ref.clone(), node.status);
            if let Some(result) = node.result {
                results.insert(action_ref, result);
            }
        }
        Ok(RunSnapshot {
            run: restored.run,
            actions,
            results,
        })
    }
}

/// Latest transition per ref wins; a terminal state is never overwritten by
/// a later non-terminal one.
fn fold_transitions(transitions: Vec<ActionTransition>) -> BTreeMap<String, NodeCheckpoint> {
    let mut nodes: BTreeMap<String, NodeCheckpoint> = BTreeMap::new();
    for t in transitions {
        if nodes.get(&t.action_ref).is_some_and(|n| n.status.is_terminal()) && !t.status.is_terminal() {
            continue;
        }
        nodes.insert(
            t.action_ref,
            NodeCheckpoint {
                status: t.status,
                attempt: t.attempt,
                result: t.result,
            },
        );
    }
    nodes
}
