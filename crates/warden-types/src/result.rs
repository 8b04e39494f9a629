//! Action results as recorded into an execution context.
//!
//! An `ActionResult` is written once per action ref and never mutated. The
//! serialized form doubles as the executor service's response body:
//! `{"status": "success", "result": ...}` or
//! `{"status": "error", "error": {"kind", "message", "detail"}, "retryable": ...}`.

use serde::{Deserialize, Serialize};

/// Sanitized, user-displayable error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error kind (e.g. "ExecutionError", "EvaluationError").
    #[serde(alias = "type")]
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail (never a raw stack trace).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of one action (or one loop item).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionResult {
    Success {
        result: serde_json::Value,
    },
    Error {
        error: ErrorInfo,
        #[serde(default)]
        retryable: bool,
    },
}

impl ActionResult {
    pub fn success(result: serde_json::Value) -> Self {
        Self::Success { result }
    }

    pub fn error(error: ErrorInfo, retryable: bool) -> Self {
        Self::Error { error, retryable }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Success { result } => Some(result),
            Self::Error { .. } => None,
        }
    }

    /// The error payload, if any.
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Success { .. } => None,
            Self::Error { error, .. } => Some(error),
        }
    }

    /// Shape exposed to expressions as `ACTIONS.<ref>`.
    ///
    /// Successful actions expose `result`; failed actions expose `error` and a
    /// null `result`.
    pub fn to_expression_value(&self) -> serde_json::Value {
        match self {
            Self::Success { result } => serde_json::json!({ "result": result }),
            Self::Error { error, .. } => serde_json::json!({
                "result": serde_json::Value::Null,
                "error": error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_wire_format() {
        let r = ActionResult::success(json!({"value": 7}));
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"status": "success", "result": {"value": 7}})
        );
    }

    #[test]
    fn test_error_wire_format_accepts_type_alias() {
        let r: ActionResult = serde_json::from_value(json!({
            "status": "error",
            "error": {"type": "ValueError", "message": "bad input"}
        }))
        .unwrap();
        let info = r.error_info().unwrap();
        assert_eq!(info.kind, "ValueError");
        assert!(info.detail.is_none());
        assert!(!r.is_success());
        assert!(matches!(r, ActionResult::Error { retryable: false, .. }));
    }

    #[test]
    fn test_expression_value_shapes() {
        let ok = ActionResult::success(json!(3)).to_expression_value();
        assert_eq!(ok, json!({"result": 3}));

        let err = ActionResult::error(ErrorInfo::new("ExecutionError", "boom"), false)
            .to_expression_value();
        assert_eq!(err["result"], serde_json::Value::Null);
        assert_eq!(err["error"]["message"], "boom");
    }

    #[test]
    fn test_error_info_display() {
        let info = ErrorInfo::new("EvaluationError", "missing segment 'x'");
        assert_eq!(info.to_string(), "EvaluationError: missing segment 'x'");
    }
}
