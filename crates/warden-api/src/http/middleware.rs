//! Token-bucket rate limiting middleware.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::http::error::AppError;
use crate::state::AppState;

/// Reject requests whose bucket is empty with 429 and `Retry-After`.
///
/// Buckets are keyed by client IP and/or matched route, per the rate-limit
/// config. Without connection info the IP part reads as `unknown`.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.limiter.is_enabled() {
        return next.run(request).await;
    }
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let key = state.limiter.key(ip.as_deref(), Some(&endpoint));

    match state.limiter.try_acquire(&key) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::warn!(key = %key, retry_after = e.retry_after_secs(), "request rate limited");
            AppError::from(e).into_response()
        }
    }
}
