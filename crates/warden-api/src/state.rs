//! Application state wiring the engine to its adapters.
//!
//! AppState holds the concrete instances used by both CLI commands and the
//! HTTP server. The engine is generic over dispatcher and repository; this
//! module pins them to the in-memory run repository and either the local
//! registry or the remote executor.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use secrecy::SecretString;
use serde_json::Value;
use warden_core::dispatch::local::LocalDispatcher;
use warden_core::dispatch::rate_limit::RateLimiter;
use warden_core::dispatch::{ActionDispatcher, DispatchError, DispatchRequest};
use warden_core::registry::ActionRegistry;
use warden_core::repository::MemoryRunRepository;
use warden_core::substrate::local::LocalSubstrate;
use warden_core::workflow::checkpoint::CheckpointManager;
use warden_core::workflow::definition::discover_workflows;
use warden_core::workflow::{Orchestrator, OrchestratorOptions, compile};
use warden_infra::executor_client::ExecutorClient;
use warden_infra::webhook::{WebhookRecord, WebhookRegistry, WebhookSigner};
use warden_types::config::WardenConfig;

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Where actions run: in this process, or on the remote executor.
pub enum AppDispatcher {
    Local(LocalDispatcher),
    Remote(ExecutorClient),
}

impl ActionDispatcher for AppDispatcher {
    async fn dispatch(&self, request: DispatchRequest, timeout: Duration) -> Result<Value, DispatchError> {
        match self {
            Self::Local(d) => d.dispatch(request, timeout).await,
            Self::Remote(d) => d.dispatch(request, timeout).await,
        }
    }
}

pub type AppSubstrate = LocalSubstrate<AppDispatcher, MemoryRunRepository>;

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Shared state for CLI commands and HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WardenConfig>,
    pub registry: Arc<ActionRegistry>,
    pub substrate: Arc<AppSubstrate>,
    /// `None` when no signing secret is configured; webhooks are then off.
    pub webhooks: Option<Arc<WebhookRegistry>>,
    pub limiter: Arc<RateLimiter>,
    pub service_key: Option<Arc<SecretString>>,
}

impl AppState {
    /// Build the registry (bundled, infra and configured origins), the
    /// dispatcher and the substrate.
    pub async fn init(config: WardenConfig, remote: bool) -> anyhow::Result<Self> {
        let registry = Arc::new(ActionRegistry::with_bundled());
        warden_infra::actions::register_all(&registry, reqwest_client()?);
        let loaded = warden_infra::registry::load_configured(&registry, &config.registry)
            .await
            .context("failed to load configured registry origins")?;
        tracing::info!(actions = registry.len(), loaded, "action registry ready");

        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()).context("invalid rate_limit config")?);
        let dispatcher = if remote {
            let client = ExecutorClient::new(&config.executor)
                .context("failed to build executor client")?
                .with_rate_limiter(limiter.clone());
            tracing::info!(url = %client.base_url(), "dispatching actions to remote executor");
            AppDispatcher::Remote(client)
        } else {
            AppDispatcher::Local(LocalDispatcher::new(registry.clone()))
        };

        let orchestrator = Orchestrator::new(
            Arc::new(dispatcher),
            Arc::new(CheckpointManager::new(MemoryRunRepository::default())),
        )
        .with_registry(registry.clone())
        .with_options(OrchestratorOptions::from_config(&config))
        .with_secrets(secrets_from_env(std::env::vars()));
        let substrate = Arc::new(LocalSubstrate::new(Arc::new(orchestrator)));

        let webhooks = config.server.signing_secret.as_ref().map(|secret| {
            Arc::new(WebhookRegistry::new(WebhookSigner::new(SecretString::from(secret.clone()))))
        });
        let service_key = config
            .executor
            .service_key
            .as_ref()
            .map(|key| Arc::new(SecretString::from(key.clone())));

        Ok(Self {
            config: Arc::new(config),
            registry,
            substrate,
            webhooks,
            limiter,
            service_key,
        })
    }

    /// Compile and register every definition under `dir`, giving each an
    /// online POST webhook when webhooks are enabled. Definitions that fail
    /// to compile are logged and skipped. Returns how many were registered.
    pub fn register_workflows(&self, dir: &Path) -> anyhow::Result<usize> {
        let found = discover_workflows(dir).with_context(|| format!("failed to read {}", dir.display()))?;
        let mut registered = 0;
        for (path, def) in found {
            match compile(&def) {
                Ok(graph) => {
                    self.substrate.register(graph);
                    if let Some(webhooks) = &self.webhooks {
                        webhooks.register(WebhookRecord::new(&def.id));
                    }
                    registered += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping workflow that does not compile");
                }
            }
        }
        Ok(registered)
    }
}

/// Prefix of environment variables exposed to expressions as `SECRETS.<name>`.
pub const SECRET_ENV_PREFIX: &str = "WARDEN_SECRET__";

/// Collect `WARDEN_SECRET__<NAME>` variables into the `SECRETS` map, keyed by
/// the lowercased name. Values that parse as JSON keep their structure.
fn secrets_from_env(vars: impl IntoIterator<Item = (String, String)>) -> BTreeMap<String, Value> {
    vars.into_iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix(SECRET_ENV_PREFIX)?.to_ascii_lowercase();
            if name.is_empty() {
                return None;
            }
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            Some((name, value))
        })
        .collect()
}

fn reqwest_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}
