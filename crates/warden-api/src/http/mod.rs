//! HTTP layer for warden.
//!
//! Webhook triggers, the executor endpoint and a health check. Triggers and
//! executor routes sit behind the rate-limit middleware; everything gets
//! `TraceLayer`.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
