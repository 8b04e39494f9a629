//! Span and event attribute names.
//!
//! Usable as field names in `tracing::info_span!` and as OpenTelemetry
//! attribute keys when the OTel layer is enabled.

// --- Run ---

/// Run identifier (UUID v7).
pub const RUN_ID: &str = "warden.run_id";

/// Workflow identifier of the run.
pub const WORKFLOW_ID: &str = "warden.workflow.id";

/// Definition version the run is pinned to.
pub const WORKFLOW_VERSION: &str = "warden.workflow.version";

/// Final or current run status.
pub const RUN_STATUS: &str = "warden.run.status";

// --- Action ---

/// Action ref within the workflow.
pub const ACTION_REF: &str = "warden.action.ref";

/// Registered action type, e.g. `core.http_request`.
pub const ACTION_TYPE: &str = "warden.action.type";

/// Attempt number, starting at 1.
pub const ACTION_ATTEMPT: &str = "warden.action.attempt";

/// Loop item index for for-each dispatches.
pub const LOOP_INDEX: &str = "warden.loop.index";

// --- Errors ---

/// `ErrorInfo` kind of a failure.
pub const ERROR_KIND: &str = "warden.error.kind";

// --- Trigger ---

/// How the run was started.
pub const TRIGGER_TYPE: &str = "warden.trigger.type";

/// Trigger type values.
pub const TRIGGER_WEBHOOK: &str = "webhook";
pub const TRIGGER_MANUAL: &str = "manual";
