//! Per-run execution context.
//!
//! `ExecutionContext` owns everything expressions may read during one run:
//! action results, the trigger payload, `ENV`, `VARS` and secrets. It is
//! exclusive to its run; the orchestrator writes a result only after the
//! action finished, and downstream nodes read it only after the graph says
//! the upstream is terminal.
//!
//! Secrets are never serialized. A context restored from a checkpoint gets
//! its secrets re-attached by the orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;
use warden_types::result::ActionResult;

use super::compiler::CompiledGraph;
use crate::expression::Scope;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum serialized size of a single action result (1 MB).
pub const MAX_RESULT_SIZE: usize = 1_048_576;

/// Maximum total serialized size of a context (10 MB).
pub const MAX_CONTEXT_SIZE: usize = 10_485_760;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("execution context size ({size} bytes) exceeds maximum ({max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("failed to restore execution context: {0}")]
    Restore(String),
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub workflow_id: String,
    /// Trigger payload. `Null` when the run was started without one.
    #[serde(default)]
    pub trigger: Value,
    /// Object exposed as `ENV`.
    pub env: Value,
    /// Object exposed as `VARS`.
    pub vars: Value,
    /// Results keyed by action ref.
    #[serde(default)]
    pub results: BTreeMap<String, ActionResult>,
    #[serde(skip)]
    secrets: BTreeMap<String, Value>,
}

impl ExecutionContext {
    /// Build a fresh context for a run of `graph`.
    pub fn new(run_id: Uuid, graph: &CompiledGraph, trigger: Value) -> Self {
        let config = graph.config();
        let mut env = serde_json::Map::new();
        for (key, value) in &config.env {
            env.insert(key.clone(), value.clone());
        }
        env.insert("environment".to_string(), json!(config.environment));
        env.insert(
            "workflow".to_string(),
            json!({
                "id": graph.workflow_id(),
                "version": graph.version(),
                "run_id": run_id.to_string(),
            }),
        );

        Self {
            run_id,
            workflow_id: graph.workflow_id().to_string(),
            trigger,
            env: Value::Object(env),
            vars: json!(config.vars),
            results: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }

    pub fn with_secrets(mut self, secrets: BTreeMap<String, Value>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn set_secrets(&mut self, secrets: BTreeMap<String, Value>) {
        self.secrets = secrets;
    }

    /// Record the final result of an action.
    ///
    /// A success value larger than [`MAX_RESULT_SIZE`] is replaced with a
    /// truncation marker. Exceeding [`MAX_CONTEXT_SIZE`] overall is an error.
    pub fn record_result(&mut self, action_ref: &str, result: ActionResult) -> Result<(), ContextError> {
        let size = json_size(&result);
        let result = if size > MAX_RESULT_SIZE && result.is_success() {
            tracing::warn!(
                action_ref,
                size,
                max = MAX_RESULT_SIZE,
                "action result exceeds size limit, truncating"
            );
            ActionResult::success(json!({
                "_truncated": true,
                "_original_size": size,
                "_message": format!("result exceeded {MAX_RESULT_SIZE} byte limit and was truncated"),
            }))
        } else {
            result
        };
        self.results.insert(action_ref.to_string(), result);

        let total = self.total_size();
        if total > MAX_CONTEXT_SIZE {
            return Err(ContextError::TooLarge {
                size: total,
                max: MAX_CONTEXT_SIZE,
            });
        }
        Ok(())
    }

    pub fn result(&self, action_ref: &str) -> Option<&ActionResult> {
        self.results.get(action_ref)
    }

    /// Borrowed view for expression evaluation.
    pub fn scope(&self) -> Scope<'_> {
        Scope {
            actions: Some(&self.results),
            trigger: Some(&self.trigger),
            env: Some(&self.env),
            secrets: Some(&self.secrets),
            vars: Some(&self.vars),
            inputs: None,
            locals: None,
        }
    }

    /// Serialized size of results, trigger and vars in bytes.
    pub fn total_size(&self) -> usize {
        self.results.values().map(json_size).sum::<usize>() + json_size(&self.trigger) + json_size(&self.vars)
    }

    /// Serialize for checkpointing. Secrets are omitted.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_json(value: Value) -> Result<Self, ContextError> {
        serde_json::from_value(value).map_err(|e| ContextError::Restore(e.to_string()))
    }
}

fn json_size<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::evaluate;
    use crate::workflow::compiler::compile;
    use warden_types::result::ErrorInfo;
    use warden_types::workflow::{ActionNode, WorkflowConfig, WorkflowDefinition};

    fn graph() -> CompiledGraph {
        let mut config = WorkflowConfig::default();
        config.environment = "staging".to_string();
        config.env.insert("region".to_string(), json!("eu-west-1"));
        config.vars.insert("threshold".to_string(), json!(5));
        compile(&WorkflowDefinition {
            id: "wf-ctx".to_string(),
            version: 3,
            title: "Ctx".to_string(),
            description: None,
            entrypoint: None,
            actions: vec![ActionNode::new("a", "core.transform.reshape")],
            config,
        })
        .unwrap()
    }

    #[test]
    fn test_scope_exposes_every_context() {
        let run_id = Uuid::now_v7();
        let mut secrets = BTreeMap::new();
        secrets.insert("api".to_string(), json!({"token": "s3cr3t"}));
        let mut ctx = ExecutionContext::new(run_id, &graph(), json!({"x": 1})).with_secrets(secrets);
        ctx.record_result("a", ActionResult::success(json!({"value": 7}))).unwrap();

        let scope = ctx.scope();
        assert_eq!(evaluate("${{ TRIGGER.x }}", &scope).unwrap(), json!(1));
        assert_eq!(evaluate("${{ ENV.environment }}", &scope).unwrap(), json!("staging"));
        assert_eq!(evaluate("${{ ENV.region }}", &scope).unwrap(), json!("eu-west-1"));
        assert_eq!(evaluate("${{ ENV.workflow.version }}", &scope).unwrap(), json!(3));
        assert_eq!(evaluate("${{ VARS.threshold }}", &scope).unwrap(), json!(5));
        assert_eq!(evaluate("${{ SECRETS.api.token }}", &scope).unwrap(), json!("s3cr3t"));
        assert_eq!(evaluate("${{ ACTIONS.a.result.value }}", &scope).unwrap(), json!(7));
        assert_eq!(
            evaluate("${{ ENV.workflow.run_id }}", &scope).unwrap(),
            json!(run_id.to_string())
        );
    }

    #[test]
    fn test_checkpoint_round_trip_drops_secrets() {
        let mut secrets = BTreeMap::new();
        secrets.insert("api".to_string(), json!("hidden"));
        let mut ctx = ExecutionContext::new(Uuid::now_v7(), &graph(), Value::Null).with_secrets(secrets);
        ctx.record_result("a", ActionResult::error(ErrorInfo::new("ExecutionError", "boom"), false))
            .unwrap();

        let json = ctx.to_json();
        assert!(!json.to_string().contains("hidden"));

        let restored = ExecutionContext::from_json(json).unwrap();
        assert_eq!(restored.results.len(), 1);
        assert!(!restored.result("a").unwrap().is_success());
        assert!(evaluate("${{ SECRETS.api }}", &restored.scope()).is_err());
    }

    #[test]
    fn test_oversized_result_is_truncated() {
        let mut ctx = ExecutionContext::new(Uuid::now_v7(), &graph(), Value::Null);
        let big = "x".repeat(MAX_RESULT_SIZE + 10);
        ctx.record_result("a", ActionResult::success(json!(big))).unwrap();
        let stored = ctx.result("a").unwrap().value().unwrap();
        assert_eq!(stored["_truncated"], json!(true));
    }

    #[test]
    fn test_context_size_limit() {
        let mut ctx = ExecutionContext::new(Uuid::now_v7(), &graph(), Value::Null);
        let chunk = "y".repeat(MAX_RESULT_SIZE - 100);
        let mut outcome = Ok(());
        for i in 0..12 {
            outcome = ctx.record_result(&format!("r{i}"), ActionResult::success(json!(chunk)));
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(outcome, Err(ContextError::TooLarge { .. })));
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let err = ExecutionContext::from_json(json!({"run_id": 5})).unwrap_err();
        assert!(err.to_string().contains("restore"));
    }
}
