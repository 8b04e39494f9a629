//! Workflow definition types for warden.
//!
//! `WorkflowDefinition` is the parsed form of the workflow DSL (YAML or JSON).
//! It is immutable once published and is reused across many executions; the
//! compiler in `warden-core` turns it into an executable graph. Run-time
//! tracking types live in [`crate::run`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A published workflow: an ordered set of action nodes plus the control-flow
/// edges declared through each node's `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable workflow identifier (e.g. "wf-phishing-triage").
    pub id: String,
    /// Definition version. Each publish bumps it; runs pin the version they started with.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Human-readable title.
    pub title: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional single entry action. When set, every action must be reachable from it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    /// Action nodes in declaration order.
    pub actions: Vec<ActionNode>,
    /// Workflow-level configuration.
    #[serde(default)]
    pub config: WorkflowConfig,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Version 1 definition with default config.
    pub fn new(id: &str, title: &str, actions: Vec<ActionNode>) -> Self {
        Self {
            id: id.to_string(),
            version: default_version(),
            title: title.to_string(),
            description: None,
            entrypoint: None,
            actions,
            config: WorkflowConfig::default(),
        }
    }

    /// Find an action node by its ref.
    pub fn action(&self, action_ref: &str) -> Option<&ActionNode> {
        self.actions.iter().find(|a| a.action_ref == action_ref)
    }
}

/// Workflow-level settings shared by every action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Name of the environment the workflow runs in (exposed as `ENV.environment`).
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Static environment values exposed under `ENV`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, serde_json::Value>,
    /// Workflow variables exposed under `VARS`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, serde_json::Value>,
    /// Whole-run timeout in seconds (None = unbounded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_environment() -> String {
    "default".to_string()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            env: BTreeMap::new(),
            vars: BTreeMap::new(),
            timeout_secs: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Action Node
// ---------------------------------------------------------------------------

/// A single action in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionNode {
    /// Unique reference within the workflow (e.g. "enrich_ip").
    #[serde(rename = "ref")]
    pub action_ref: String,
    /// Registered action type (e.g. "core.http_request").
    pub action: String,
    /// Raw input template. String leaves may embed `${{ ... }}` expressions.
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
    /// Upstream dependencies (control-flow edges).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<Dependency>,
    /// Optional run-if condition; the node is skipped when it evaluates falsy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_if: Option<String>,
    /// Optional for-each spec: `${{ for var.item in <expr> }}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each: Option<String>,
    /// How upstream completions gate this node.
    #[serde(default)]
    pub join_strategy: JoinStrategy,
    /// Retry policy override (falls back to the substrate default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Loop failure handling override (falls back to the global loop config).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,
    /// Loop concurrency override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    /// Per-dispatch timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ActionNode {
    /// Create a node with empty args and no dependencies.
    pub fn new(action_ref: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            action_ref: action_ref.into(),
            action: action.into(),
            args: serde_json::Map::new(),
            depends_on: Vec::new(),
            run_if: None,
            for_each: None,
            join_strategy: JoinStrategy::default(),
            retry_policy: None,
            continue_on_error: None,
            max_parallel: None,
            timeout_secs: None,
            description: None,
        }
    }

    /// Set a single argument.
    pub fn with_arg(mut self, key: &str, value: serde_json::Value) -> Self {
        self.args.insert(key.to_string(), value);
        self
    }

    /// Add a propagating dependency on `upstream`.
    pub fn after(mut self, upstream: &str) -> Self {
        self.depends_on.push(Dependency::propagate(upstream));
        self
    }

    /// Add an isolating dependency on `upstream`.
    pub fn after_isolated(mut self, upstream: &str) -> Self {
        self.depends_on.push(Dependency::isolate(upstream));
        self
    }

    pub fn with_run_if(mut self, condition: &str) -> Self {
        self.run_if = Some(condition.to_string());
        self
    }

    pub fn with_for_each(mut self, spec: &str) -> Self {
        self.for_each = Some(spec.to_string());
        self
    }

    pub fn with_join(mut self, join: JoinStrategy) -> Self {
        self.join_strategy = join;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// What happens to a node when an upstream dependency fails or is skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The downstream node is skipped.
    #[default]
    Propagate,
    /// The downstream node still runs once the upstream is terminal.
    Isolate,
}

/// How a node with several upstream dependencies becomes ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Every upstream dependency must be satisfied.
    #[default]
    All,
    /// One satisfied upstream dependency is enough.
    Any,
}

/// A control-flow edge from an upstream node.
///
/// Deserializes from either a bare ref (`"enrich_ip"`) or a mapping
/// (`{ref: enrich_ip, on_failure: isolate}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DependencyRepr")]
pub struct Dependency {
    #[serde(rename = "ref")]
    pub action_ref: String,
    pub on_failure: FailurePolicy,
}

impl Dependency {
    pub fn propagate(action_ref: &str) -> Self {
        Self {
            action_ref: action_ref.to_string(),
            on_failure: FailurePolicy::Propagate,
        }
    }

    pub fn isolate(action_ref: &str) -> Self {
        Self {
            action_ref: action_ref.to_string(),
            on_failure: FailurePolicy::Isolate,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyRepr {
    Ref(String),
    Detailed {
        #[serde(rename = "ref")]
        action_ref: String,
        #[serde(default)]
        on_failure: FailurePolicy,
    },
}

impl From<DependencyRepr> for Dependency {
    fn from(repr: DependencyRepr) -> Self {
        match repr {
            DependencyRepr::Ref(action_ref) => Self {
                action_ref,
                on_failure: FailurePolicy::Propagate,
            },
            DependencyRepr::Detailed {
                action_ref,
                on_failure,
            } => Self {
                action_ref,
                on_failure,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
