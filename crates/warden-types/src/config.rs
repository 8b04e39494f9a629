//! Configuration types for warden.
//!
//! `WardenConfig` mirrors `config.toml`. Every section and field has a
//! default so a missing or partial file still yields a usable config;
//! `WARDEN__*` environment overrides are applied on top by the infra loader.

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub loops: LoopConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub substrate: SubstrateConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Remote executor endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Base URL of the executor service.
    #[serde(default = "default_executor_url")]
    pub url: String,
    /// Per-dispatch timeout in seconds. Actions can run for minutes, so this
    /// is deliberately far above typical HTTP client defaults.
    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,
    /// Shared service key sent as `x-warden-service-key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,
}

fn default_executor_url() -> String {
    "http://executor:8000".to_string()
}

fn default_executor_timeout_secs() -> u64 {
    120
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            url: default_executor_url(),
            timeout_secs: default_executor_timeout_secs(),
            service_key: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

/// Fan-out defaults for for-each actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Maximum concurrent item dispatches per loop (default 64).
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Record failed items instead of failing the loop (default false).
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_max_parallel() -> usize {
    64
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            continue_on_error: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Token-bucket rate limiting, shared across dispatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Refill rate in tokens per second.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Bucket capacity (burst size).
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Buckets idle longer than this are evicted.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Key buckets by client IP.
    #[serde(default = "default_true")]
    pub by_ip: bool,
    /// Key buckets by endpoint.
    #[serde(default = "default_true")]
    pub by_endpoint: bool,
}

fn default_true() -> bool {
    true
}

fn default_rate() -> f64 {
    40.0
}

fn default_capacity() -> u32 {
    80
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate: default_rate(),
            capacity: default_capacity(),
            window_secs: default_window_secs(),
            by_ip: true,
            by_endpoint: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Durable substrate
// ---------------------------------------------------------------------------

/// Durable-execution substrate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstrateConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
    /// Retry policy applied to actions without their own override.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_task_queue() -> String {
    "warden-task-queue".to_string()
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            task_queue: default_task_queue(),
            retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Action registry origins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Load template actions from `local_path` at startup.
    #[serde(default)]
    pub local_enabled: bool,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    /// Remote git repositories to load at startup (`git+https://...`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_urls: Vec<String>,
    /// Hosts remote registries may be cloned from.
    #[serde(default = "default_allowed_git_domains")]
    pub allowed_git_domains: Vec<String>,
    /// Where remote registries are cloned (default: platform cache dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
}

fn default_local_path() -> String {
    "/app/local_registry".to_string()
}

fn default_allowed_git_domains() -> Vec<String> {
    vec![
        "github.com".to_string(),
        "gitlab.com".to_string(),
        "bitbucket.org".to_string(),
    ]
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            local_enabled: false,
            local_path: default_local_path(),
            remote_urls: Vec::new(),
            allowed_git_domains: default_allowed_git_domains(),
            cache_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP server settings for the webhook and executor endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Key used to derive per-workflow webhook secrets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
    /// Directory of workflow definitions served by the webhook endpoint.
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_workflows_dir() -> String {
    "workflows".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            signing_secret: None,
            workflows_dir: default_workflows_dir(),
        }
    }
}
