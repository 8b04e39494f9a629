//! In-process run repository backed by `DashMap`.
//!
//! Cloning shares the underlying maps, so a clone handed to the substrate and
//! one kept by a caller observe the same runs. State lives only as long as the
//! process; restarting loses it.

use std::sync::Arc;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use uuid::Uuid;
use warden_types::error::RepositoryError;
use warden_types::result::ErrorInfo;
use warden_types::run::{ActionTransition, RunStatus, WorkflowRun};

use super::run::RunRepository;

#[derive(Debug, Default)]
struct Store {
    runs: DashMap<Uuid, WorkflowRun>,
    transitions: DashMap<Uuid, Vec<ActionTransition>>,
    idempotency_keys: DashSet<String>,
    contexts: DashMap<Uuid, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRunRepository {
    store: Arc<Store>,
}

impl MemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunRepository for MemoryRunRepository {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        if self.store.runs.contains_key(&run.id) {
            return Err(RepositoryError::Conflict(format!("run {} already exists", run.id)));
        }
        self.store.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self.store.runs.get(run_id).map(|r| r.clone()))
    }

    async fn update_run_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&ErrorInfo>,
    ) -> Result<(), RepositoryError> {
        let mut run = self.store.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        run.status = status;
        if let Some(error) = error {
            run.error = Some(error.clone());
        }
        if status.is_terminal() {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_incomplete_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let mut runs: Vec<WorkflowRun> = self
            .store
            .runs
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.clone())
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    async fn record_transition(&self, transition: &ActionTransition) -> Result<bool, RepositoryError> {
        if !self.store.runs.contains_key(&transition.run_id) {
            return Err(RepositoryError::NotFound);
        }
        if !self.store.idempotency_keys.insert(transition.idempotency_key.clone()) {
            return Ok(false);
        }
        self.store
            .transitions
            .entry(transition.run_id)
            .or_default()
            .push(transition.clone());
        Ok(true)
    }

    async fn list_transitions(&self, run_id: &Uuid) -> Result<Vec<ActionTransition>, RepositoryError> {
        Ok(self
            .store
            .transitions
            .get(run_id)
            .map(|t| t.clone())
            .unwrap_or_default())
    }

    async fn save_context(&self, run_id: &Uuid, context: &Value) -> Result<(), RepositoryError> {
        if !self.store.runs.contains_key(run_id) {
            return Err(RepositoryError::NotFound);
        }
        self.store.contexts.insert(*run_id, context.clone());
        Ok(())
    }

    async fn load_context(&self, run_id: &Uuid) -> Result<Option<Value>, RepositoryError> {
        Ok(self.store.contexts.get(run_id).map(|c| c.clone()))
    }
}
