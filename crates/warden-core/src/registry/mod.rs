//! Action registry.
//!
//! Maps action keys (`namespace.name`) to [`ActionSpec`]s. The registry is
//! populated explicitly: bundled actions at construction, then whatever
//! origins the caller loads through an [`ActionLoader`]. Nothing is
//! discovered implicitly at import time.

pub mod builtin;
pub mod loader;
pub mod spec;
pub mod template;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Value, json};
use thiserror::Error;
use warden_types::result::ErrorInfo;

pub use loader::{ActionLoader, BundledLoader, TemplateDirLoader};
pub use spec::{
    ActionContext, ActionHandler, ActionSpec, ActionSummary, FieldSpec, FieldType, FnHandler, InputSchema,
    RegistryOrigin,
};

use crate::dispatch::RunContext;
use spec::ActionHandlerDyn;

/// Template actions may call other template actions up to this depth.
pub const MAX_TEMPLATE_DEPTH: usize = 8;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("action '{0}' is not registered")]
    NotFound(String),

    /// The action ran and failed. Carries the action's own error payload.
    #[error("{0}")]
    Action(ErrorInfo),

    #[error("invalid arguments for action '{key}': {}", .issues.join("; "))]
    Validation { key: String, issues: Vec<String> },

    #[error("failed to load actions from {origin}: {message}")]
    Load { origin: String, message: String },
}

impl RegistryError {
    pub fn kind(&self) -> &str {
        match self {
            Self::NotFound(_) => "RegistryNotFound",
            Self::Action(info) => &info.kind,
            Self::Validation { .. } => "RegistryActionValidationError",
            Self::Load { .. } => "RegistryLoadError",
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            Self::Action(info) => info.clone(),
            Self::Validation { key, issues } => {
                ErrorInfo::new(self.kind(), self.to_string()).with_detail(json!({ "action": key, "issues": issues }))
            }
            other => ErrorInfo::new(other.kind(), other.to_string()),
        }
    }

    pub fn load(origin: &RegistryOrigin, message: impl Into<String>) -> Self {
        Self::Load {
            origin: origin.to_string(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: DashMap<String, Arc<ActionSpec>>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the bundled `core.*` actions.
    pub fn with_bundled() -> Self {
        let registry = Self::new();
        for spec in builtin::bundled_actions() {
            registry.register(spec);
        }
        registry
    }

    /// Register a spec, returning the one it replaced.
    pub fn register(&self, spec: ActionSpec) -> Option<Arc<ActionSpec>> {
        let key = spec.key.clone();
        let previous = self.actions.insert(key.clone(), Arc::new(spec));
        if previous.is_some() {
            tracing::debug!(key = %key, "replaced registered action");
        }
        previous
    }

    pub fn lookup(&self, key: &str) -> Result<Arc<ActionSpec>, RegistryError> {
        self.actions
            .get(key)
            .map(|s| s.value().clone())
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.actions.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.actions.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn summaries(&self) -> Vec<ActionSummary> {
        let mut summaries: Vec<ActionSummary> = self.actions.iter().map(|e| ActionSummary::from(e.value().as_ref())).collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Load every action from `origin`.
    ///
    /// Actions previously loaded from the same origin are dropped first, so a
    /// reload also removes actions that disappeared from the source. Returns
    /// the number of actions loaded.
    pub async fn load<L: ActionLoader>(&self, loader: &L, origin: &RegistryOrigin) -> Result<usize, RegistryError> {
        let specs = loader.load(origin).await?;
        self.actions.retain(|_, spec| &spec.origin != origin);
        let count = specs.len();
        for spec in specs {
            self.register(spec);
        }
        tracing::info!(origin = %origin, actions = count, "loaded registry actions");
        Ok(count)
    }

    /// Validate `args` against the action's schema, returning them with
    /// defaults applied.
    pub fn validate_args(&self, key: &str, args: &Value) -> Result<Value, RegistryError> {
        let spec = self.lookup(key)?;
        spec.input_schema.validate(args).map_err(|issues| RegistryError::Validation {
            key: key.to_string(),
            issues,
        })
    }

    /// Look up, validate and run an action.
    pub async fn call(&self, key: &str, args: Value, run_context: &RunContext) -> Result<Value, RegistryError> {
        self.call_nested(key, args, run_context, 0).await
    }

    pub(crate) async fn call_nested(
        &self,
        key: &str,
        args: Value,
        run_context: &RunContext,
        depth: usize,
    ) -> Result<Value, RegistryError> {
        if depth > MAX_TEMPLATE_DEPTH {
            return Err(RegistryError::Action(ErrorInfo::new(
                "RegistryActionError",
                format!("action '{key}' exceeds the maximum template nesting depth of {MAX_TEMPLATE_DEPTH}"),
            )));
        }
        let spec = self.lookup(key)?;
        let args = spec.input_schema.validate(&args).map_err(|issues| RegistryError::Validation {
            key: key.to_string(),
            issues,
        })?;
        let ctx = ActionContext {
            registry: self,
            run_context,
            depth,
        };
        spec.handler.call_boxed(args, ctx).await.map_err(RegistryError::Action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use warden_types::role::Role;

    fn run_context() -> RunContext {
        RunContext {
            run_id: Uuid::now_v7(),
            workflow_id: "wf-registry".to_string(),
            action_ref: "a".to_string(),
            role: Role::service("warden-test"),
            loop_index: None,
        }
    }

    fn echo(namespace: &str, origin: RegistryOrigin) -> ActionSpec {
        ActionSpec::new(
            namespace,
            "echo",
            "Echo args",
            InputSchema::new(),
            origin,
            FnHandler::new(Ok),
        )
    }

    #[test]
    fn test_bundled_actions_registered() {
        let registry = ActionRegistry::with_bundled();
        let keys = registry.list();
        assert!(keys.contains(&"core.transform.reshape".to_string()));
        assert!(keys.contains(&"core.transform.merge".to_string()));
        assert!(keys.contains(&"core.transform.flatten".to_string()));
        assert!(keys.contains(&"core.transform.filter_nulls".to_string()));
    }

    #[test]
    fn test_lookup_missing() {
        let err = ActionRegistry::new().lookup("tools.nope").unwrap_err();
        assert_eq!(err, RegistryError::NotFound("tools.nope".to_string()));
        assert_eq!(err.kind(), "RegistryNotFound");
    }

    #[test]
    fn test_register_replaces_same_key() {
        let registry = ActionRegistry::new();
        assert!(registry.register(echo("tools", RegistryOrigin::bundled("a"))).is_none());
        let previous = registry.register(echo("tools", RegistryOrigin::bundled("b"))).unwrap();
        assert_eq!(previous.origin, RegistryOrigin::bundled("a"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_error_payload() {
        let registry = ActionRegistry::with_bundled();
        let err = registry
            .call("core.transform.reshape", serde_json::json!({"bogus": 1}), &run_context())
            .await
            .unwrap_err();
        let info = err.to_error_info();
        assert_eq!(info.kind, "RegistryActionValidationError");
        assert_eq!(info.detail.unwrap()["action"], "core.transform.reshape");
    }

    #[tokio::test]
    async fn test_call_runs_handler() {
        let registry = ActionRegistry::new();
        registry.register(echo("tools", RegistryOrigin::bundled("test")));
        let out = registry
            .call("tools.echo", serde_json::json!({"x": 1}), &run_context())
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"x": 1}));
    }
}
