//! Webhook triggers.
//!
//! Provides:
//! - [`WebhookSigner`] -- derives and verifies per-workflow path secrets
//!   (hex HMAC-SHA256 of the workflow id under the signing secret)
//! - [`WebhookRegistry`] -- DashMap-backed registry of webhook records
//!
//! A request is authorized in this order: the workflow has a webhook (404),
//! the path secret matches (401), the webhook is online (403), the HTTP
//! method is allowed (405).

use std::sync::Arc;

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WebhookError {
    #[error("no webhook registered for workflow '{0}'")]
    NotFound(String),

    #[error("invalid webhook secret")]
    InvalidSecret,

    #[error("webhook for workflow '{0}' is offline")]
    Offline(String),

    #[error("method {method} is not allowed for this webhook")]
    MethodNotAllowed { method: String },

    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

impl WebhookError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "WebhookNotFound",
            Self::InvalidSecret => "WebhookUnauthorized",
            Self::Offline(_) => "WebhookOffline",
            Self::MethodNotAllowed { .. } => "WebhookMethodNotAllowed",
            Self::InvalidKey(_) => "WebhookConfigurationError",
        }
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Derives webhook path secrets from the server's signing secret.
#[derive(Clone)]
pub struct WebhookSigner {
    key: SecretString,
}

impl WebhookSigner {
    pub fn new(key: SecretString) -> Self {
        Self { key }
    }

    fn mac(&self, workflow_id: &str) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
        mac.update(workflow_id.as_bytes());
        Ok(mac)
    }

    /// Hex-encoded secret for `workflow_id`.
    pub fn secret_for(&self, workflow_id: &str) -> Result<String, WebhookError> {
        let tag = self.mac(workflow_id)?.finalize().into_bytes();
        Ok(hex_encode(&tag))
    }

    /// Constant-time check of a secret taken from a request path.
    pub fn verify(&self, workflow_id: &str, provided: &str) -> Result<(), WebhookError> {
        let provided = hex_decode(provided).ok_or(WebhookError::InvalidSecret)?;
        self.mac(workflow_id)?
            .verify_slice(&provided)
            .map_err(|_| WebhookError::InvalidSecret)
    }
}

impl std::fmt::Debug for WebhookSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSigner").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    #[default]
    Online,
    Offline,
}

/// Webhook settings for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub workflow_id: String,
    #[serde(default)]
    pub status: WebhookStatus,
    /// Allowed HTTP methods, upper-case.
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
}

fn default_methods() -> Vec<String> {
    vec!["POST".to_string()]
}

impl WebhookRecord {
    /// An online webhook accepting POST.
    pub fn new(workflow_id: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            status: WebhookStatus::Online,
            methods: default_methods(),
        }
    }

    pub fn with_methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_ascii_uppercase()).collect();
        self
    }

    pub fn allows(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

// ---------------------------------------------------------------------------
// WebhookRegistry
// ---------------------------------------------------------------------------

/// Thread-safe map of workflow id to webhook record.
pub struct WebhookRegistry {
    signer: WebhookSigner,
    records: Arc<DashMap<String, WebhookRecord>>,
}

impl WebhookRegistry {
    pub fn new(signer: WebhookSigner) -> Self {
        Self {
            signer,
            records: Arc::new(DashMap::new()),
        }
    }

    pub fn signer(&self) -> &WebhookSigner {
        &self.signer
    }

    /// Register or replace the webhook for a workflow.
    pub fn register(&self, record: WebhookRecord) {
        tracing::info!(
            workflow_id = %record.workflow_id,
            status = ?record.status,
            methods = ?record.methods,
            "registered webhook"
        );
        self.records.insert(record.workflow_id.clone(), record);
    }

    pub fn unregister(&self, workflow_id: &str) -> Option<WebhookRecord> {
        self.records.remove(workflow_id).map(|(_, v)| v)
    }

    pub fn get(&self, workflow_id: &str) -> Option<WebhookRecord> {
        self.records.get(workflow_id).map(|r| r.value().clone())
    }

    /// Flip a webhook online or offline.
    pub fn set_status(&self, workflow_id: &str, status: WebhookStatus) -> Result<(), WebhookError> {
        let mut record = self
            .records
            .get_mut(workflow_id)
            .ok_or_else(|| WebhookError::NotFound(workflow_id.to_string()))?;
        record.status = status;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Verify an incoming request for `workflow_id`.
    pub fn authorize(&self, workflow_id: &str, secret: &str, method: &str) -> Result<WebhookRecord, WebhookError> {
        let record = self
            .get(workflow_id)
            .ok_or_else(|| WebhookError::NotFound(workflow_id.to_string()))?;
        self.signer.verify(workflow_id, secret)?;
        if record.status == WebhookStatus::Offline {
            return Err(WebhookError::Offline(workflow_id.to_string()));
        }
        if !record.allows(method) {
            return Err(WebhookError::MethodNotAllowed {
                method: method.to_string(),
            });
        }
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> WebhookSigner {
        WebhookSigner::new(SecretString::from("test-signing-secret".to_string()))
    }

    fn registry() -> WebhookRegistry {
        WebhookRegistry::new(signer())
    }

    #[test]
    fn secret_is_stable_hex_per_workflow() {
        let s = signer();
        let a = s.secret_for("wf-a").unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, s.secret_for("wf-a").unwrap());
        assert_ne!(a, s.secret_for("wf-b").unwrap());

        let other = WebhookSigner::new(SecretString::from("another-key".to_string()));
        assert_ne!(a, other.secret_for("wf-a").unwrap());
    }

    #[test]
    fn verify_accepts_own_secret_only() {
        let s = signer();
        let secret = s.secret_for("wf-a").unwrap();
        assert!(s.verify("wf-a", &secret).is_ok());
        assert_eq!(s.verify("wf-b", &secret), Err(WebhookError::InvalidSecret));
        assert_eq!(s.verify("wf-a", "zz"), Err(WebhookError::InvalidSecret));
        assert_eq!(s.verify("wf-a", "abc"), Err(WebhookError::InvalidSecret));
        assert_eq!(s.verify("wf-a", ""), Err(WebhookError::InvalidSecret));
    }

    #[test]
    fn authorize_checks_in_order() {
        let reg = registry();
        let secret = reg.signer().secret_for("wf-a").unwrap();

        assert!(matches!(reg.authorize("wf-a", &secret, "POST"), Err(WebhookError::NotFound(_))));

        reg.register(WebhookRecord::new("wf-a"));
        assert_eq!(reg.authorize("wf-a", "deadbeef", "POST"), Err(WebhookError::InvalidSecret));
        assert!(reg.authorize("wf-a", &secret, "POST").is_ok());
        assert!(matches!(
            reg.authorize("wf-a", &secret, "GET"),
            Err(WebhookError::MethodNotAllowed { .. })
        ));

        reg.set_status("wf-a", WebhookStatus::Offline).unwrap();
        // A bad secret is still reported as such while offline.
        assert_eq!(reg.authorize("wf-a", "deadbeef", "POST"), Err(WebhookError::InvalidSecret));
        assert!(matches!(reg.authorize("wf-a", &secret, "POST"), Err(WebhookError::Offline(_))));
    }

    #[test]
    fn methods_are_case_insensitive() {
        let record = WebhookRecord::new("wf").with_methods(&["get", "Post"]);
        assert_eq!(record.methods, vec!["GET", "POST"]);
        assert!(record.allows("post"));
        assert!(!record.allows("PUT"));
    }

    #[test]
    fn set_status_on_unknown_workflow() {
        let reg = registry();
        assert!(matches!(
            reg.set_status("nope", WebhookStatus::Online),
            Err(WebhookError::NotFound(_))
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let record: WebhookRecord = serde_json::from_str(r#"{"workflow_id": "wf"}"#).unwrap();
        assert_eq!(record, WebhookRecord::new("wf"));
    }
}
