//! Webhook trigger handlers.
//!
//! `/webhooks/{workflow_id}/{secret}` starts a run in the background and
//! answers immediately; the `/wait` variant blocks until the run finishes
//! and returns its outcome. Both authorize against the webhook registry
//! before reading the body.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use serde_json::{Value, json};
use warden_core::substrate::DurableSubstrate;
use warden_core::workflow::RunOutcome;
use warden_infra::webhook::WebhookError;
use warden_observe::attrs;
use warden_types::role::Role;

use crate::http::error::AppError;
use crate::state::AppState;

/// Service identity runs started by webhooks execute as.
pub const WEBHOOK_SERVICE_ID: &str = "warden-webhook";

/// ANY /webhooks/{workflow_id}/{secret} - Start a run, 202 with its id.
pub async fn incoming_webhook(
    State(state): State<AppState>,
    Path((workflow_id, secret)): Path<(String, String)>,
    method: Method,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let trigger = accept(&state, &workflow_id, &secret, &method, &body)?;
    let handle = state
        .substrate
        .start(&workflow_id, None, trigger, Role::service(WEBHOOK_SERVICE_ID))
        .await?;

    tracing::info!(
        { attrs::WORKFLOW_ID } = %handle.workflow_id,
        { attrs::WORKFLOW_VERSION } = handle.version,
        { attrs::RUN_ID } = %handle.run_id,
        { attrs::TRIGGER_TYPE } = attrs::TRIGGER_WEBHOOK,
        "webhook started run"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "ok",
            "message": "Workflow started",
            "run_id": handle.run_id,
            "workflow_id": handle.workflow_id,
            "version": handle.version,
        })),
    ))
}

/// ANY /webhooks/{workflow_id}/{secret}/wait - Run to completion.
pub async fn incoming_webhook_wait(
    State(state): State<AppState>,
    Path((workflow_id, secret)): Path<(String, String)>,
    method: Method,
    body: Bytes,
) -> Result<Json<RunOutcome>, AppError> {
    let trigger = accept(&state, &workflow_id, &secret, &method, &body)?;
    let outcome = state
        .substrate
        .start_and_wait(&workflow_id, None, trigger, Role::service(WEBHOOK_SERVICE_ID))
        .await?;

    tracing::info!(
        { attrs::WORKFLOW_ID } = %workflow_id,
        { attrs::RUN_ID } = %outcome.run_id,
        { attrs::RUN_STATUS } = ?outcome.status,
        { attrs::TRIGGER_TYPE } = attrs::TRIGGER_WEBHOOK,
        "webhook run finished"
    );
    Ok(Json(outcome))
}

/// Authorize the call and parse its body. An empty body is a `null` trigger.
fn accept(state: &AppState, workflow_id: &str, secret: &str, method: &Method, body: &[u8]) -> Result<Value, AppError> {
    let webhooks = state
        .webhooks
        .as_ref()
        .ok_or_else(|| WebhookError::NotFound(workflow_id.to_string()))?;
    webhooks.authorize(workflow_id, secret, method.as_str())?;

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Webhook payload is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::workflow::compile;
    use warden_core::workflow::definition::parse_workflow_yaml;
    use warden_infra::webhook::{WebhookRecord, WebhookStatus};
    use warden_types::config::WardenConfig;
    use warden_types::result::ActionResult;
    use warden_types::run::RunStatus;

    const ECHO: &str = r#"
id: wf-echo
title: Echo
actions:
  - ref: echo
    action: core.transform.reshape
    args:
      value: "${{ TRIGGER.x }}"
"#;

    async fn state() -> AppState {
        let mut config = WardenConfig::default();
        config.server.signing_secret = Some("test-signing-key".to_string());
        let state = AppState::init(config, false).await.unwrap();
        let def = parse_workflow_yaml(ECHO).unwrap();
        state.substrate.register(compile(&def).unwrap());
        state.webhooks.as_ref().unwrap().register(WebhookRecord::new(&def.id));
        state
    }

    fn secret(state: &AppState, workflow_id: &str) -> String {
        state.webhooks.as_ref().unwrap().signer().secret_for(workflow_id).unwrap()
    }

    fn path(workflow_id: &str, secret: String) -> Path<(String, String)> {
        Path((workflow_id.to_string(), secret))
    }

    #[tokio::test]
    async fn wait_runs_with_trigger_payload() {
        let state = state().await;
        let secret = secret(&state, "wf-echo");
        let Json(outcome) = incoming_webhook_wait(
            State(state),
            path("wf-echo", secret),
            Method::POST,
            Bytes::from_static(br#"{"x": 1}"#),
        )
        .await
        .unwrap();

        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.results["echo"], ActionResult::success(json!(1)));
    }

    #[tokio::test]
    async fn start_returns_accepted_with_run_id() {
        let state = state().await;
        let secret = secret(&state, "wf-echo");
        let (status, Json(body)) = incoming_webhook(
            State(state),
            path("wf-echo", secret),
            Method::POST,
            Bytes::from_static(b"{}"),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["message"], "Workflow started");
        assert!(body["run_id"].is_string());
    }

    #[tokio::test]
    async fn rejects_bad_secret_offline_and_method() {
        let state = state().await;
        let good = secret(&state, "wf-echo");

        let err = accept(&state, "wf-echo", "00", &Method::POST, b"").unwrap_err();
        assert!(matches!(err, AppError::Webhook(WebhookError::InvalidSecret)));

        let err = accept(&state, "wf-echo", &good, &Method::GET, b"").unwrap_err();
        assert!(matches!(err, AppError::Webhook(WebhookError::MethodNotAllowed { .. })));

        let err = accept(&state, "wf-missing", &good, &Method::POST, b"").unwrap_err();
        assert!(matches!(err, AppError::Webhook(WebhookError::NotFound(_))));

        state
            .webhooks
            .as_ref()
            .unwrap()
            .set_status("wf-echo", WebhookStatus::Offline)
            .unwrap();
        let err = accept(&state, "wf-echo", &good, &Method::POST, b"").unwrap_err();
        assert!(matches!(err, AppError::Webhook(WebhookError::Offline(_))));
    }

    #[tokio::test]
    async fn body_parsing() {
        let state = state().await;
        let good = secret(&state, "wf-echo");

        assert_eq!(accept(&state, "wf-echo", &good, &Method::POST, b"  ").unwrap(), Value::Null);
        assert_eq!(
            accept(&state, "wf-echo", &good, &Method::POST, br#"{"a": [1]}"#).unwrap(),
            json!({"a": [1]})
        );
        let err = accept(&state, "wf-echo", &good, &Method::POST, b"not json").unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn disabled_without_signing_secret() {
        let state = AppState::init(WardenConfig::default(), false).await.unwrap();
        assert!(state.webhooks.is_none());
        let err = accept(&state, "wf-echo", "anything", &Method::POST, b"").unwrap_err();
        assert!(matches!(err, AppError::Webhook(WebhookError::NotFound(_))));
    }
}
