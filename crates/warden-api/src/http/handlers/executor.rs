//! Executor service handlers.
//!
//! Runs registered actions on behalf of a remote orchestrator. Action
//! failures are part of the protocol and come back as 200 with
//! `{"status": "error", ...}`; only transport-level problems (auth, rate
//! limit, malformed body) use HTTP error statuses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use warden_core::registry::ActionSummary;
use warden_infra::executor_client::{ExecutorResponse, ExecutorRunRequest};
use warden_observe::attrs;

use crate::http::error::AppError;
use crate::http::extractors::auth::ServiceAuthorized;
use crate::state::AppState;

/// POST /executor/run/{action_type} - Run one action.
pub async fn run_action(
    _auth: ServiceAuthorized,
    State(state): State<AppState>,
    Path(action_type): Path<String>,
    payload: Result<Json<ExecutorRunRequest>, JsonRejection>,
) -> Result<Json<ExecutorResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let ctx = &request.run_context;

    let response = match state.registry.call(&action_type, request.args, ctx).await {
        Ok(result) => {
            tracing::debug!(
                { attrs::ACTION_TYPE } = %action_type,
                { attrs::RUN_ID } = %ctx.run_id,
                { attrs::ACTION_REF } = %ctx.action_ref,
                "executor action succeeded"
            );
            ExecutorResponse::Success { result }
        }
        Err(e) => {
            tracing::warn!(
                { attrs::ACTION_TYPE } = %action_type,
                { attrs::RUN_ID } = %ctx.run_id,
                { attrs::ACTION_REF } = %ctx.action_ref,
                { attrs::ERROR_KIND } = e.kind(),
                error = %e,
                "executor action failed"
            );
            ExecutorResponse::Error {
                error: e.to_error_info(),
            }
        }
    };
    Ok(Json(response))
}

/// GET /executor/actions - Registered actions, sorted by key.
pub async fn list_actions(_auth: ServiceAuthorized, State(state): State<AppState>) -> Json<Vec<ActionSummary>> {
    Json(state.registry.summaries())
}
