//! ExecutorClient -- [`ActionDispatcher`] over HTTP to the executor service.
//!
//! Sends `POST {base_url}/executor/run/{action_type}` with
//! `{args, run_context}` and maps the reply onto [`DispatchError`]:
//!
//! - transport failure: `ExecutorClient` (retryable)
//! - request timeout: `Timeout` (retryable)
//! - HTTP 429: `RateLimitExceeded` with the `Retry-After` seconds, if sent
//! - `{status: "error", error}`: `Execution` (not retryable)
//!
//! The client never retries on its own. The service key is wrapped in
//! [`SecretString`] and only exposed when building the request header.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::dispatch::rate_limit::RateLimiter;
use warden_core::dispatch::{ActionDispatcher, DispatchError, DispatchRequest, RunContext};
use warden_types::config::ExecutorConfig;
use warden_types::result::ErrorInfo;

/// Header carrying the shared service key.
pub const SERVICE_KEY_HEADER: &str = "x-warden-service-key";

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Body of `POST /executor/run/{action_type}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorRunRequest {
    #[serde(default)]
    pub args: Value,
    pub run_context: RunContext,
}

/// Executor reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutorResponse {
    Success { result: Value },
    Error { error: ErrorInfo },
}

// ---------------------------------------------------------------------------
// ExecutorClient
// ---------------------------------------------------------------------------

pub struct ExecutorClient {
    client: reqwest::Client,
    base_url: String,
    service_key: Option<SecretString>,
    limiter: Option<Arc<RateLimiter>>,
}

impl ExecutorClient {
    /// Build a client for the configured executor endpoint.
    pub fn new(config: &ExecutorConfig) -> Result<Self, reqwest::Error> {
        // Per-request timeouts come from the dispatch call; this is only a
        // connect bound.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone().map(SecretString::from),
            limiter: None,
        })
    }

    /// Throttle outgoing dispatches through a shared limiter, keyed by
    /// action endpoint.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn run_url(&self, action_type: &str) -> String {
        format!("{}/executor/run/{action_type}", self.base_url)
    }
}

impl ActionDispatcher for ExecutorClient {
    async fn dispatch(&self, request: DispatchRequest, timeout: Duration) -> Result<Value, DispatchError> {
        let url = self.run_url(&request.action_type);
        if let Some(limiter) = &self.limiter {
            limiter
                .acquire(&limiter.key(None, Some(&request.action_type)))
                .await
                .map_err(|_| DispatchError::RateLimitExceeded { retry_after: None })?;
        }

        let body = ExecutorRunRequest {
            args: request.args,
            run_context: request.run_context,
        };
        let mut builder = self.client.post(&url).timeout(timeout).json(&body);
        if let Some(key) = &self.service_key {
            builder = builder.header(SERVICE_KEY_HEADER, key.expose_secret());
        }

        tracing::debug!(
            action_type = %request.action_type,
            action_ref = %body.run_context.action_ref,
            run_id = %body.run_context.run_id,
            "dispatching to executor"
        );

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::warn!(action_type = %request.action_type, "executor request timed out");
                DispatchError::Timeout { after: timeout }
            } else {
                DispatchError::executor_client(format!("HTTP request to {url} failed: {e}"))
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            tracing::warn!(action_type = %request.action_type, ?retry_after, "executor rate limited the dispatch");
            return Err(DispatchError::RateLimitExceeded { retry_after });
        }

        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout { after: timeout }
            } else {
                DispatchError::executor_client(format!("failed to read executor response: {e}"))
            }
        })?;

        match serde_json::from_str::<ExecutorResponse>(&text) {
            Ok(ExecutorResponse::Success { result }) => Ok(result),
            Ok(ExecutorResponse::Error { error }) => {
                tracing::debug!(action_type = %request.action_type, kind = %error.kind, "executor reported an error");
                Err(DispatchError::Execution(error))
            }
            Err(_) if status.is_server_error() => {
                Err(DispatchError::executor_client(format!("HTTP {status}: {text}")))
            }
            Err(_) if !status.is_success() => Err(DispatchError::Execution(ErrorInfo::new(
                "HTTPStatusError",
                format!("executor returned HTTP {status}: {text}"),
            ))),
            Err(e) => Err(DispatchError::executor_client(format!(
                "failed to parse executor response: {e}"
            ))),
        }
    }
}

/// `Retry-After` in whole seconds. HTTP-date values are not supported.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
