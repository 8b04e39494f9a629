//! Service key extractor for executor routes.
//!
//! Reads `x-warden-service-key` and compares it in constant time against
//! the configured key. With no key configured every request passes.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use secrecy::ExposeSecret;
use warden_infra::executor_client::SERVICE_KEY_HEADER;

use crate::http::error::AppError;
use crate::state::AppState;

/// Marker extracted by executor routes. Passes when no service key is
/// configured or the request carries the configured key.
pub struct ServiceAuthorized;

impl FromRequestParts<AppState> for ServiceAuthorized {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.service_key else {
            return Ok(ServiceAuthorized);
        };
        let provided = parts
            .headers
            .get(SERVICE_KEY_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {SERVICE_KEY_HEADER} header.")))?
            .to_str()
            .map_err(|_| AppError::Unauthorized(format!("Invalid {SERVICE_KEY_HEADER} header encoding.")))?;

        if constant_time_eq(expected.expose_secret().as_bytes(), provided.as_bytes()) {
            Ok(ServiceAuthorized)
        } else {
            Err(AppError::Unauthorized("Invalid service key.".to_string()))
        }
    }
}

/// Byte comparison whose time does not depend on where the inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
