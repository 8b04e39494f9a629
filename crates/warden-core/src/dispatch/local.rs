//! In-process dispatch straight into an [`ActionRegistry`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{ActionDispatcher, DispatchError, DispatchRequest};
use crate::registry::ActionRegistry;

#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    registry: Arc<ActionRegistry>,
}

impl LocalDispatcher {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }
}

impl ActionDispatcher for LocalDispatcher {
    async fn dispatch(&self, request: DispatchRequest, timeout: Duration) -> Result<Value, DispatchError> {
        let call = self
            .registry
            .call(&request.action_type, request.args, &request.run_context);
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DispatchError::Execution(e.to_error_info())),
            Err(_) => {
                tracing::warn!(
                    action_type = %request.action_type,
                    action_ref = %request.run_context.action_ref,
                    timeout_secs = timeout.as_secs(),
                    "local dispatch timed out"
                );
                Err(DispatchError::Timeout { after: timeout })
            }
        }
    }
}
