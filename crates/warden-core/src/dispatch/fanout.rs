//! Bounded fan-out for for-each actions.
//!
//! Each item is dispatched on its own task. A semaphore caps the number of
//! dispatches in flight; results land in index-addressed slots so output
//! order always equals input order regardless of completion order.
//!
//! A failing item never cancels its siblings. Every in-flight item is
//! awaited, then failures are reported together.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use warden_types::result::{ActionResult, ErrorInfo};
use warden_types::retry::RetryPolicy;

use super::{ActionDispatcher, DispatchRequest, RunContext};
use crate::workflow::retry::RetryHandler;

/// Fallback when neither the node nor the config sets a bound.
pub const DEFAULT_MAX_PARALLEL: usize = 64;

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub max_parallel: usize,
    pub continue_on_error: bool,
    /// Per-item dispatch timeout.
    pub timeout: Duration,
    /// Applied to each item independently.
    pub retry: RetryPolicy,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            continue_on_error: false,
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::no_retry(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LoopFailure {
    pub index: usize,
    pub error: ErrorInfo,
}

/// Aggregate failure of a loop. Successful items stay retrievable through
/// `results`, which has one slot per input item.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} of {} loop items failed: {}", .failures.len(), .results.len(), summarize(.failures))]
pub struct LoopExecutionError {
    /// Ordered by index.
    pub failures: Vec<LoopFailure>,
    pub results: Vec<ActionResult>,
}

fn summarize(failures: &[LoopFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.index, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl LoopExecutionError {
    /// Successful slots with their indices.
    pub fn successes(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.results.iter().enumerate().filter_map(|(i, r)| r.value().map(|v| (i, v)))
    }

    /// `detail.results` has one slot per item: the value for a success,
    /// `null` for a failure.
    pub fn to_error_info(&self) -> ErrorInfo {
        let failures: Vec<Value> = self
            .failures
            .iter()
            .map(|f| json!({ "index": f.index, "error": f.error }))
            .collect();
        let results: Vec<Value> = self
            .results
            .iter()
            .map(|r| r.value().cloned().unwrap_or(Value::Null))
            .collect();
        ErrorInfo::new("LoopExecutionError", self.to_string()).with_detail(json!({
            "failures": failures,
            "results": results,
            "total": self.results.len(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Dispatch `action_type` once per item of `items` (each item is the fully
/// resolved args for that iteration).
///
/// Cancellation stops new items from starting; items already running finish.
/// Items that never started are reported as cancelled failures even when
/// `continue_on_error` is set.
pub async fn run_loop<D: ActionDispatcher>(
    dispatcher: Arc<D>,
    action_type: &str,
    items: Vec<Value>,
    run_context: &RunContext,
    options: &LoopOptions,
    cancel: &CancellationToken,
) -> Result<Vec<ActionResult>, LoopExecutionError> {
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let max_parallel = options.max_parallel.max(1);
    tracing::debug!(
        action_ref = %run_context.action_ref,
        action_type,
        items = total,
        max_parallel,
        "starting loop"
    );

    let semaphore = Arc::new(Semaphore::new(max_parallel));
    let mut tasks: JoinSet<(usize, ActionResult)> = JoinSet::new();
    let mut started = vec![false; total];

    for (index, args) in items.into_iter().enumerate() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        started[index] = true;

        let dispatcher = dispatcher.clone();
        let request = DispatchRequest {
            action_type: action_type.to_string(),
            args,
            run_context: RunContext {
                loop_index: Some(index),
                ..run_context.clone()
            },
        };
        let timeout = options.timeout;
        let retry = options.retry.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let result = dispatch_with_retry(dispatcher.as_ref(), request, timeout, &retry, &cancel).await;
            drop(permit);
            (index, result)
        });
    }

    let mut slots: Vec<Option<ActionResult>> = vec![None; total];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => tracing::error!(error = %e, "loop item task failed to complete"),
        }
    }

    let mut failures = Vec::new();
    let mut cancelled = false;
    let results: Vec<ActionResult> = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            let result = slot.unwrap_or_else(|| {
                let info = if started[index] {
                    ErrorInfo::new("InternalError", "loop item task terminated unexpectedly")
                } else {
                    cancelled = true;
                    ErrorInfo::new("Cancelled", "loop item was not started because the run was cancelled")
                };
                ActionResult::error(info, false)
            });
            if let Some(error) = result.error_info() {
                failures.push(LoopFailure {
                    index,
                    error: error.clone(),
                });
            }
            result
        })
        .collect();

    if failures.is_empty() || (options.continue_on_error && !cancelled) {
        if !failures.is_empty() {
            tracing::warn!(
                action_ref = %run_context.action_ref,
                failed = failures.len(),
                total,
                "loop items failed, continuing"
            );
        }
        return Ok(results);
    }

    let err = LoopExecutionError { failures, results };
    tracing::warn!(action_ref = %run_context.action_ref, error = %err, "loop failed");
    Err(err)
}

/// Dispatch one request, retrying per `retry` until success or a final error.
/// A cancelled token cuts a pending backoff short.
pub async fn dispatch_with_retry<D: ActionDispatcher>(
    dispatcher: &D,
    request: DispatchRequest,
    timeout: Duration,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> ActionResult {
    let mut attempt = 1;
    loop {
        let err = match dispatcher.dispatch(request.clone(), timeout).await {
            Ok(value) => return ActionResult::success(value),
            Err(e) => e,
        };
        let Some(delay) = RetryHandler::next_delay(retry, attempt, &err) else {
            return err.to_action_result();
        };
        tracing::debug!(
            action_ref = %request.run_context.action_ref,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying dispatch"
        );
        tokio::select! {
            _ = cancel.cancelled() => return err.to_action_result(),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchError;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;
    use warden_types::role::Role;

    #[derive(Default)]
    struct FakeDispatcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        fail: HashSet<u64>,
        /// Items that fail with a transport error on their first attempt only.
        flaky: Mutex<HashSet<u64>>,
    }

    impl ActionDispatcher for FakeDispatcher {
        async fn dispatch(&self, request: DispatchRequest, _timeout: Duration) -> Result<Value, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let n = request.args["n"].as_u64().unwrap_or(0);
            // Later items finish first.
            tokio::time::sleep(Duration::from_millis(20 - n.min(19))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.flaky.lock().unwrap().remove(&n) {
                return Err(DispatchError::executor_client("connection reset"));
            }
            if self.fail.contains(&n) {
                return Err(DispatchError::execution("ValueError", format!("item {n} is invalid")));
            }
            Ok(json!({ "doubled": n * 2 }))
        }
    }

    fn run_context() -> RunContext {
        RunContext {
            run_id: Uuid::now_v7(),
            workflow_id: "wf-loop".to_string(),
            action_ref: "each".to_string(),
            role: Role::service("warden-test"),
            loop_index: None,
        }
    }

    fn items(n: u64) -> Vec<Value> {
        (0..n).map(|i| json!({ "n": i })).collect()
    }

    fn options(max_parallel: usize, continue_on_error: bool) -> LoopOptions {
        LoopOptions {
            max_parallel,
            continue_on_error,
            ..LoopOptions::default()
        }
    }

    #[tokio::test]
    async fn test_bounded_concurrency_and_order() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        let results = run_loop(
            dispatcher.clone(),
            "core.transform.reshape",
            items(10),
            &run_context(),
            &options(3, false),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 10);
        assert!(dispatcher.peak.load(Ordering::SeqCst) <= 3);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.value().unwrap()["doubled"], json!(i * 2));
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let dispatcher = Arc::new(FakeDispatcher {
            fail: HashSet::from([1]),
            ..FakeDispatcher::default()
        });
        let err = run_loop(
            dispatcher.clone(),
            "core.transform.reshape",
            items(5),
            &run_context(),
            &options(2, false),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].index, 1);
        assert_eq!(err.failures[0].error.kind, "ValueError");
        let ok: Vec<usize> = err.successes().map(|(i, _)| i).collect();
        assert_eq!(ok, vec![0, 2, 3, 4]);
        // Siblings were not cancelled.
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 5);
        assert!(err.to_string().starts_with("1 of 5 loop items failed"));
        let info = err.to_error_info();
        assert_eq!(info.kind, "LoopExecutionError");
        let detail = info.detail.unwrap();
        assert_eq!(detail["results"][0], json!({ "doubled": 0 }));
        assert_eq!(detail["results"][1], Value::Null);
        assert_eq!(detail["results"][4], json!({ "doubled": 8 }));
    }

    #[tokio::test]
    async fn test_continue_on_error_records_failures() {
        let dispatcher = Arc::new(FakeDispatcher {
            fail: HashSet::from([0, 3]),
            ..FakeDispatcher::default()
        });
        let results = run_loop(
            dispatcher,
            "core.transform.reshape",
            items(4),
            &run_context(),
            &options(4, true),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!results[0].is_success());
        assert!(results[1].is_success());
        assert!(results[2].is_success());
        assert_eq!(results[3].error_info().unwrap().message, "item 3 is invalid");
    }

    #[tokio::test]
    async fn test_empty_input_dispatches_nothing() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        let results = run_loop(
            dispatcher.clone(),
            "core.transform.reshape",
            Vec::new(),
            &run_context(),
            &LoopOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(results.is_empty());
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_per_item() {
        let dispatcher = Arc::new(FakeDispatcher {
            flaky: Mutex::new(HashSet::from([2])),
            ..FakeDispatcher::default()
        });
        let opts = LoopOptions {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_interval_ms: 1,
                backoff_coefficient: 1.0,
                max_interval_ms: 1,
            },
            ..options(4, false)
        };
        let results = run_loop(
            dispatcher.clone(),
            "core.transform.reshape",
            items(3),
            &run_context(),
            &opts,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(results.iter().all(ActionResult::is_success));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_loop_starts_nothing() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_loop(
            dispatcher.clone(),
            "core.transform.reshape",
            items(3),
            &run_context(),
            &options(2, true),
            &cancel,
        )
        .await
        .unwrap_err();
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(err.failures.len(), 3);
        assert!(err.failures.iter().all(|f| f.error.kind == "Cancelled"));
    }
}
