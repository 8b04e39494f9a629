//! Action dispatch.
//!
//! [`ActionDispatcher`] is the seam between the orchestrator and whatever
//! actually runs an action: the remote executor over HTTP (infra) or the
//! in-process registry ([`local::LocalDispatcher`]). Dispatchers never retry
//! internally; retry decisions belong to the caller via
//! [`crate::workflow::retry::RetryHandler`].

pub mod fanout;
pub mod local;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;
use warden_types::result::{ActionResult, ErrorInfo};
use warden_types::role::Role;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Identifies the run an action executes for. Sent with every dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub action_ref: String,
    pub role: Role,
    /// Position within a for-each loop, when dispatched as a loop item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_index: Option<usize>,
}

/// A fully resolved action invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub action_type: String,
    /// Arguments with every expression already evaluated.
    pub args: Value,
    pub run_context: RunContext,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// Transport-level failure talking to the executor. Retryable.
    #[error("executor client error: {message}")]
    ExecutorClient { message: String },

    /// The executor asked us to back off. Retryable after `retry_after` seconds.
    #[error("Rate limit exceeded. Please try again later.{}", retry_hint(.retry_after))]
    RateLimitExceeded { retry_after: Option<u64> },

    /// The dispatch did not complete within its timeout. Retryable.
    #[error("action did not complete within {}s", .after.as_secs())]
    Timeout { after: Duration },

    /// The action ran and reported an application error. Not retryable.
    #[error("{0}")]
    Execution(ErrorInfo),
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    retry_after
        .map(|secs| format!(" Server suggests waiting {secs} seconds."))
        .unwrap_or_default()
}

impl DispatchError {
    pub fn executor_client(message: impl Into<String>) -> Self {
        Self::ExecutorClient {
            message: message.into(),
        }
    }

    pub fn execution(kind: &str, message: impl Into<String>) -> Self {
        Self::Execution(ErrorInfo::new(kind, message))
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Execution(_))
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::ExecutorClient { .. } => "ExecutorClientError",
            Self::RateLimitExceeded { .. } => "RateLimitExceeded",
            Self::Timeout { .. } => "TimeoutError",
            Self::Execution(info) => &info.kind,
        }
    }

    /// Sanitized error payload recorded on the failed action.
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            Self::Execution(info) => info.clone(),
            Self::RateLimitExceeded {
                retry_after: Some(secs),
            } => ErrorInfo::new(self.kind(), self.to_string()).with_detail(json!({ "retry_after": secs })),
            other => ErrorInfo::new(other.kind(), other.to_string()),
        }
    }

    pub fn to_action_result(&self) -> ActionResult {
        ActionResult::error(self.to_error_info(), self.is_retryable())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher trait
// ---------------------------------------------------------------------------

/// Runs one resolved action and returns its result value.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ActionDispatcher: Send + Sync + 'static {
    fn dispatch(
        &self,
        request: DispatchRequest,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Value, DispatchError>> + Send;
}

impl<D: ActionDispatcher> ActionDispatcher for Arc<D> {
    fn dispatch(
        &self,
        request: DispatchRequest,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Value, DispatchError>> + Send {
        (**self).dispatch(request, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_message() {
        let err = DispatchError::RateLimitExceeded { retry_after: None };
        assert_eq!(err.to_string(), "Rate limit exceeded. Please try again later.");

        let err = DispatchError::RateLimitExceeded { retry_after: Some(30) };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded. Please try again later. Server suggests waiting 30 seconds."
        );
        assert_eq!(err.to_error_info().detail, Some(json!({"retry_after": 30})));
    }

    #[test]
    fn test_retryability() {
        assert!(DispatchError::executor_client("connection reset").is_retryable());
        assert!(DispatchError::RateLimitExceeded { retry_after: None }.is_retryable());
        assert!(
            DispatchError::Timeout {
                after: Duration::from_secs(5)
            }
            .is_retryable()
        );
        assert!(!DispatchError::execution("ValueError", "bad input").is_retryable());
    }

    #[test]
    fn test_execution_error_keeps_executor_payload() {
        let info = ErrorInfo::new("HTTPStatusError", "404 Not Found").with_detail(json!({"url": "x"}));
        let err = DispatchError::Execution(info.clone());
        assert_eq!(err.kind(), "HTTPStatusError");
        let result = err.to_action_result();
        assert_eq!(result.error_info(), Some(&info));
        assert!(matches!(result, ActionResult::Error { retryable: false, .. }));
    }

    #[test]
    fn test_run_context_wire_format() {
        let ctx = RunContext {
            run_id: Uuid::now_v7(),
            workflow_id: "wf".to_string(),
            action_ref: "a".to_string(),
            role: Role::service("warden-test"),
            loop_index: None,
        };
        let value = serde_json::to_value(&ctx).unwrap();
        assert!(value.get("loop_index").is_none());
        assert_eq!(value["role"]["type"], "service");
    }
}
