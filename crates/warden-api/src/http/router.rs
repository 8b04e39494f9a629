//! Axum router configuration with middleware.
//!
//! Webhook and executor routes share the rate-limit middleware; `/health`
//! is left outside it. `TraceLayer` wraps everything.

use axum::Router;
use axum::middleware;
use axum::routing::{any, get, post};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::http::middleware::rate_limit;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let limited = Router::new()
        .route(
            "/webhooks/{workflow_id}/{secret}",
            any(handlers::webhook::incoming_webhook),
        )
        .route(
            "/webhooks/{workflow_id}/{secret}/wait",
            any(handlers::webhook::incoming_webhook_wait),
        )
        .route(
            "/executor/run/{action_type}",
            post(handlers::executor::run_action),
        )
        .route("/executor/actions", get(handlers::executor::list_actions))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .merge(limited)
        .route("/health", get(handlers::health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
