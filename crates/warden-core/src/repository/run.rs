//! Run repository trait definition.
//!
//! Persists run records, the per-action transition log and execution context
//! checkpoints. The transition log is append-only and idempotent: a
//! transition whose idempotency key was already recorded is ignored.

use serde_json::Value;
use uuid::Uuid;
use warden_types::error::RepositoryError;
use warden_types::result::ErrorInfo;
use warden_types::run::{ActionTransition, RunStatus, WorkflowRun};

/// Repository trait for workflow run persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RunRepository: Send + Sync + 'static {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a new run record. Fails with `Conflict` if the ID exists.
    fn create_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// Update a run's status. Terminal statuses also set `completed_at`.
    fn update_run_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&ErrorInfo>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Runs that have not reached a terminal status (crash recovery).
    fn list_incomplete_runs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Append a transition. Returns `false` when its idempotency key was
    /// already recorded (the call is then a no-op).
    fn record_transition(
        &self,
        transition: &ActionTransition,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// All transitions of a run in recording order.
    fn list_transitions(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ActionTransition>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Context checkpoints
    // -----------------------------------------------------------------------

    /// Replace the stored execution context of a run.
    fn save_context(
        &self,
        run_id: &Uuid,
        context: &Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn load_context(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Value>, RepositoryError>> + Send;
}
