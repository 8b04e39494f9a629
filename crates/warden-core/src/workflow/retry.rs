//! Retry decisions for failed dispatches.
//!
//! Stateless: the caller owns the attempt counter and the sleep. Backoff
//! comes from the effective [`RetryPolicy`]; a `Retry-After` hint from the
//! executor overrides it.

use std::time::Duration;

use warden_types::retry::RetryPolicy;

use crate::dispatch::DispatchError;

pub struct RetryHandler;

impl RetryHandler {
    /// Delay before the next attempt, or `None` when the error is final.
    ///
    /// `attempt` is 1-based and counts attempts already made.
    pub fn next_delay(policy: &RetryPolicy, attempt: u32, error: &DispatchError) -> Option<Duration> {
        if !error.is_retryable() || attempt >= policy.max_attempts {
            return None;
        }
        match error {
            DispatchError::RateLimitExceeded {
                retry_after: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => Some(policy.backoff(attempt)),
        }
    }

    /// Effective policy: a node override wins over the substrate default.
    pub fn effective<'a>(node: Option<&'a RetryPolicy>, default: &'a RetryPolicy) -> &'a RetryPolicy {
        node.unwrap_or(default)
    }
}
