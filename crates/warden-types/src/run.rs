//! Execution tracking types: run records, per-action state and the
//! transition log the durable substrate replays after a crash.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::{ActionResult, ErrorInfo};
use crate::role::Role;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// State of one action node within a run.
///
/// `Pending -> Running -> {Succeeded, Failed}`, or `Pending -> Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

/// A single execution of a workflow version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// UUIDv7 run ID.
    pub id: Uuid,
    pub workflow_id: String,
    /// Definition version pinned at start.
    pub version: u32,
    pub status: RunStatus,
    /// Trigger payload (e.g. webhook body). `Null` when absent.
    #[serde(default)]
    pub trigger: serde_json::Value,
    /// Role the run executes as.
    pub role: Role,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl WorkflowRun {
    /// Create a pending run record with a fresh UUIDv7.
    pub fn new(workflow_id: &str, version: u32, trigger: serde_json::Value, role: Role) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            version,
            status: RunStatus::Pending,
            trigger,
            role,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}

/// One durable state transition of an action node.
///
/// The log of transitions is the source of truth for replay: the latest
/// entry per ref gives the node's state, and a `Succeeded` entry carries the
/// result that must be restored instead of re-dispatching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTransition {
    pub id: Uuid,
    pub run_id: Uuid,
    pub action_ref: String,
    pub status: ActionStatus,
    /// Attempt number (1-based, increments on retry).
    pub attempt: u32,
    /// `{run_id}-{ref}-{attempt}-{status}`; duplicate keys are ignored by repositories.
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
    pub recorded_at: DateTime<Utc>,
}

impl ActionTransition {
    pub fn new(
        run_id: Uuid,
        action_ref: &str,
        status: ActionStatus,
        attempt: u32,
        result: Option<ActionResult>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            action_ref: action_ref.to_string(),
            status,
            attempt,
            idempotency_key: format!("{run_id}-{action_ref}-{attempt}-{status}"),
            result,
            recorded_at: Utc::now(),
        }
    }
}

/// Point-in-time view of a run, returned by substrate queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run: WorkflowRun,
    pub actions: BTreeMap<String, ActionStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, ActionResult>,
}
