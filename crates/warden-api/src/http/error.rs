//! Application error type mapping to HTTP status codes and the error
//! envelope `{"type": ..., "message": ..., "detail": ...}`.
//!
//! Internal failures never leak their message; the client sees a generic
//! one and the real error is logged.

use axum::Json;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use warden_core::dispatch::rate_limit::RateLimitError;
use warden_core::substrate::SubstrateError;
use warden_infra::webhook::WebhookError;

pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

#[derive(Debug)]
pub enum AppError {
    Webhook(WebhookError),
    Substrate(SubstrateError),
    RateLimited(RateLimitError),
    Unauthorized(String),
    BadRequest(String),
    Internal(String),
}

impl From<WebhookError> for AppError {
    fn from(e: WebhookError) -> Self {
        AppError::Webhook(e)
    }
}

impl From<SubstrateError> for AppError {
    fn from(e: SubstrateError) -> Self {
        AppError::Substrate(e)
    }
}

impl From<RateLimitError> for AppError {
    fn from(e: RateLimitError) -> Self {
        AppError::RateLimited(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, String, String, Option<Value>) {
        match self {
            AppError::Webhook(e) => {
                let status = match e {
                    WebhookError::NotFound(_) => StatusCode::NOT_FOUND,
                    WebhookError::InvalidSecret => StatusCode::UNAUTHORIZED,
                    WebhookError::Offline(_) => StatusCode::FORBIDDEN,
                    WebhookError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
                    WebhookError::InvalidKey(_) => return internal(e),
                };
                (status, e.kind().to_string(), e.to_string(), None)
            }
            AppError::Substrate(SubstrateError::UnknownWorkflow { workflow_id, .. }) => (
                StatusCode::NOT_FOUND,
                "WorkflowNotFound".to_string(),
                self.to_string(),
                Some(json!({ "workflow_id": workflow_id })),
            ),
            AppError::Substrate(SubstrateError::RunNotFound(run_id)) => (
                StatusCode::NOT_FOUND,
                "RunNotFound".to_string(),
                self.to_string(),
                Some(json!({ "run_id": run_id })),
            ),
            AppError::Substrate(e) => internal(e),
            AppError::RateLimited(e) => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded".to_string(),
                format!(
                    "Rate limit exceeded. Please try again later. Server suggests waiting {} seconds.",
                    e.retry_after_secs()
                ),
                Some(json!({ "retry_after": e.retry_after_secs() })),
            ),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), msg.clone(), None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BadRequest".to_string(), msg.clone(), None),
            AppError::Internal(msg) => internal(msg),
        }
    }
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, String, String, Option<Value>) {
    tracing::error!(error = %e, "request failed with an internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "InternalServerError".to_string(),
        UNEXPECTED_ERROR_MESSAGE.to_string(),
        None,
    )
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Webhook(e) => write!(f, "{e}"),
            AppError::Substrate(e) => write!(f, "{e}"),
            AppError::RateLimited(e) => write!(f, "{e}"),
            AppError::Unauthorized(msg) | AppError::BadRequest(msg) | AppError::Internal(msg) => f.write_str(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message, detail) = self.parts();
        let mut body = json!({ "type": kind, "message": message });
        if let Some(detail) = detail {
            body["detail"] = detail;
        }

        let mut response = (status, Json(body)).into_response();
        if let AppError::RateLimited(e) = &self {
            if let Ok(value) = HeaderValue::from_str(&e.retry_after_secs().to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn webhook_errors_map_to_statuses() {
        let cases = [
            (WebhookError::NotFound("wf".into()), StatusCode::NOT_FOUND),
            (WebhookError::InvalidSecret, StatusCode::UNAUTHORIZED),
            (WebhookError::Offline("wf".into()), StatusCode::FORBIDDEN),
            (
                WebhookError::MethodNotAllowed { method: "GET".into() },
                StatusCode::METHOD_NOT_ALLOWED,
            ),
        ];
        for (err, status) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[tokio::test]
    async fn internal_errors_are_sanitized() {
        let response = AppError::Internal("db password is hunter2".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["type"], "InternalServerError");
        assert_eq!(body["message"], UNEXPECTED_ERROR_MESSAGE);
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn rate_limit_sets_retry_after() {
        let err = RateLimitError {
            retry_after: Duration::from_millis(1500),
        };
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "2");
        let body = body_json(response).await;
        assert_eq!(body["type"], "RateLimitExceeded");
        assert_eq!(body["detail"]["retry_after"], 2);
        assert_eq!(
            body["message"],
            "Rate limit exceeded. Please try again later. Server suggests waiting 2 seconds."
        );
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let err = SubstrateError::UnknownWorkflow {
            workflow_id: "wf-x".into(),
            version: None,
        };
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["message"], "workflow 'wf-x' is not registered");
        assert_eq!(body["detail"]["workflow_id"], "wf-x");
    }
}
