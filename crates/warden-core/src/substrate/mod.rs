//! Durable execution substrate.
//!
//! The substrate owns run lifecycles: it pins a workflow version at start,
//! keeps runs going across restarts, accepts signals and answers queries.
//! [`local::LocalSubstrate`] is the in-process implementation backed by a
//! [`crate::repository::RunRepository`].

pub mod local;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use warden_types::retry::RetryPolicy;
use warden_types::role::Role;
use warden_types::run::RunSnapshot;

use crate::workflow::checkpoint::CheckpointError;
use crate::workflow::orchestrator::OrchestratorError;

pub use local::LocalSubstrate;

/// Identifies a started run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub version: u32,
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.workflow_id, self.version, self.run_id)
    }
}

/// Signals a running workflow accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Cancel,
}

#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("workflow '{workflow_id}' is not registered{}", version_hint(.version))]
    UnknownWorkflow { workflow_id: String, version: Option<u32> },

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("run task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn version_hint(version: &Option<u32>) -> String {
    version.map(|v| format!(" at version {v}")).unwrap_or_default()
}

/// Client view of a durable substrate.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait DurableSubstrate: Send + Sync + 'static {
    /// Start a run. `version: None` pins the latest registered version.
    fn start(
        &self,
        workflow_id: &str,
        version: Option<u32>,
        trigger: Value,
        role: Role,
    ) -> impl std::future::Future<Output = Result<ExecutionHandle, SubstrateError>> + Send;

    fn signal(
        &self,
        handle: &ExecutionHandle,
        signal: Signal,
    ) -> impl std::future::Future<Output = Result<(), SubstrateError>> + Send;

    fn query(
        &self,
        handle: &ExecutionHandle,
    ) -> impl std::future::Future<Output = Result<RunSnapshot, SubstrateError>> + Send;

    /// Default retry policy for actions without their own.
    fn retry_policy(&self) -> &RetryPolicy;
}
