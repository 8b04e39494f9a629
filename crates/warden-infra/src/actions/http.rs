//! `core.http_request`: call an HTTP endpoint from a workflow.
//!
//! Returns `{status_code, headers, data}` where `data` is the parsed JSON
//! body when the response is JSON and the raw text otherwise. Non-2xx
//! responses fail the action with `HTTPStatusError`.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use warden_core::registry::{ActionContext, ActionHandler, ActionSpec, FieldSpec, FieldType, InputSchema, RegistryOrigin};
use warden_types::result::ErrorInfo;

/// Bundled package name these actions are attributed to.
pub const HTTP_PACKAGE: &str = "http";

#[derive(Debug, Deserialize)]
struct HttpRequestArgs {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    params: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default = "default_timeout")]
    timeout: f64,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> f64 {
    30.0
}

pub struct HttpRequestHandler {
    client: reqwest::Client,
}

impl HttpRequestHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, args: Value) -> Result<Value, ErrorInfo> {
        let args: HttpRequestArgs = serde_json::from_value(args)
            .map_err(|e| ErrorInfo::new("ValueError", format!("invalid http_request arguments: {e}")))?;
        let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ErrorInfo::new("ValueError", format!("unsupported HTTP method '{}'", args.method)))?;
        if !args.timeout.is_finite() || args.timeout <= 0.0 {
            return Err(ErrorInfo::new("ValueError", "timeout must be a positive number of seconds"));
        }

        let mut request = self
            .client
            .request(method.clone(), &args.url)
            .timeout(Duration::from_secs_f64(args.timeout));
        for (name, value) in args.headers.unwrap_or_default() {
            request = request.header(name, value);
        }
        if let Some(params) = &args.params {
            let pairs: Vec<(&str, String)> = params
                .iter()
                .map(|(k, v)| (k.as_str(), query_value(v)))
                .collect();
            request = request.query(&pairs);
        }
        if let Some(payload) = &args.payload {
            request = request.json(payload);
        }

        tracing::debug!(method = %method, url = %args.url, "sending http_request");
        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() { "TimeoutError" } else { "HTTPRequestError" };
            ErrorInfo::new(kind, format!("{method} {} failed: {e}", args.url))
        })?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), Value::String(v.to_str().ok()?.to_string()))))
            .collect();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        let text = response
            .text()
            .await
            .map_err(|e| ErrorInfo::new("HTTPRequestError", format!("failed to read response body: {e}")))?;
        let data = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        if !status.is_success() {
            return Err(ErrorInfo::new(
                "HTTPStatusError",
                format!("{method} {} returned {status}", args.url),
            )
            .with_detail(json!({ "status_code": status.as_u16(), "data": data })));
        }

        Ok(json!({
            "status_code": status.as_u16(),
            "headers": headers,
            "data": data,
        }))
    }
}

/// Strings go through unquoted; everything else as its JSON text.
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ActionHandler for HttpRequestHandler {
    fn call<'a>(
        &'a self,
        args: Value,
        _ctx: ActionContext<'a>,
    ) -> impl Future<Output = Result<Value, ErrorInfo>> + Send + 'a {
        self.send(args)
    }
}

/// The HTTP actions, sharing one connection pool.
pub fn http_actions(client: reqwest::Client) -> Vec<ActionSpec> {
    vec![ActionSpec::new(
        "core",
        "http_request",
        "Perform an HTTP request and return its status, headers and body.",
        InputSchema::new()
            .field("url", FieldSpec::new(FieldType::String))
            .field("method", FieldSpec::new(FieldType::String).with_default(json!("GET")))
            .field("headers", FieldSpec::new(FieldType::Object).optional())
            .field("params", FieldSpec::new(FieldType::Object).optional())
            .field("payload", FieldSpec::new(FieldType::Any).optional())
            .field("timeout", FieldSpec::new(FieldType::Number).with_default(json!(30.0))),
        RegistryOrigin::bundled(HTTP_PACKAGE),
        HttpRequestHandler::new(client),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use std::collections::HashMap;
    use std::sync::Arc;
    use uuid::Uuid;
    use warden_core::dispatch::RunContext;
    use warden_core::registry::{ActionRegistry, RegistryError};
    use warden_types::role::Role;

    async fn spawn_server() -> String {
        let app = Router::new()
            .route(
                "/search",
                get(|Query(q): Query<HashMap<String, String>>| async move { Json(json!({ "q": q })) }),
            )
            .route("/echo", post(|Json(body): Json<Value>| async move { Json(body) }))
            .route("/text", get(|| async { "plain body" }))
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn registry() -> Arc<ActionRegistry> {
        let registry = Arc::new(ActionRegistry::new());
        for spec in http_actions(reqwest::Client::new()) {
            registry.register(spec);
        }
        registry
    }

    fn run_context() -> RunContext {
        RunContext {
            run_id: Uuid::now_v7(),
            workflow_id: "wf".to_string(),
            action_ref: "call".to_string(),
            role: Role::service("warden-test"),
            loop_index: None,
        }
    }

    #[tokio::test]
    async fn get_with_params_parses_json() {
        let base = spawn_server().await;
        let out = registry()
            .call(
                "core.http_request",
                json!({"url": format!("{base}/search"), "params": {"q": "ip", "limit": 5}}),
                &run_context(),
            )
            .await
            .unwrap();
        assert_eq!(out["status_code"], 200);
        assert_eq!(out["data"], json!({"q": {"q": "ip", "limit": "5"}}));
    }

    #[tokio::test]
    async fn post_sends_json_payload() {
        let base = spawn_server().await;
        let out = registry()
            .call(
                "core.http_request",
                json!({"url": format!("{base}/echo"), "method": "post", "payload": {"a": [1, 2]}}),
                &run_context(),
            )
            .await
            .unwrap();
        assert_eq!(out["data"], json!({"a": [1, 2]}));
    }

    #[tokio::test]
    async fn text_body_is_returned_as_string() {
        let base = spawn_server().await;
        let out = registry()
            .call("core.http_request", json!({"url": format!("{base}/text")}), &run_context())
            .await
            .unwrap();
        assert_eq!(out["data"], json!("plain body"));
    }

    #[tokio::test]
    async fn error_status_fails_the_action() {
        let base = spawn_server().await;
        let err = registry()
            .call("core.http_request", json!({"url": format!("{base}/missing")}), &run_context())
            .await
            .unwrap_err();
        let RegistryError::Action(info) = err else {
            panic!("expected action error, got {err:?}");
        };
        assert_eq!(info.kind, "HTTPStatusError");
        assert_eq!(info.detail.unwrap()["status_code"], 404);
    }

    #[tokio::test]
    async fn missing_url_is_a_validation_error() {
        let err = registry()
            .call("core.http_request", json!({"method": "GET"}), &run_context())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "RegistryActionValidationError");
    }
}
