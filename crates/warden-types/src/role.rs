//! Caller identity passed explicitly through every engine call.
//!
//! There is no ambient/task-local role: whoever starts a run hands a `Role`
//! to the substrate, which hands it to the orchestrator, which attaches it to
//! every dispatch as part of the run context.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether the caller is a human user or an internal service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    User,
    Service,
}

/// Access levels, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Basic,
    Admin,
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => f.write_str("basic"),
            Self::Admin => f.write_str("admin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(rename = "type")]
    pub kind: RoleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Service identifier, e.g. "warden-webhook" or "warden-cli".
    pub service_id: String,
    pub access_level: AccessLevel,
}

/// Returned when a role lacks the access level an operation requires.
#[derive(Debug, thiserror::Error)]
#[error("access level '{actual}' is insufficient, '{required}' required")]
pub struct AccessDenied {
    pub required: AccessLevel,
    pub actual: AccessLevel,
}

impl Role {
    /// A service role with basic access.
    pub fn service(service_id: &str) -> Self {
        Self {
            kind: RoleKind::Service,
            workspace_id: None,
            user_id: None,
            service_id: service_id.to_string(),
            access_level: AccessLevel::Basic,
        }
    }

    /// A user role acting through `service_id`.
    pub fn user(user_id: Uuid, service_id: &str, access_level: AccessLevel) -> Self {
        Self {
            kind: RoleKind::User,
            workspace_id: None,
            user_id: Some(user_id),
            service_id: service_id.to_string(),
            access_level,
        }
    }

    pub fn with_workspace(mut self, workspace_id: Uuid) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    pub fn with_access_level(mut self, access_level: AccessLevel) -> Self {
        self.access_level = access_level;
        self
    }

    pub fn require_access_level(&self, required: AccessLevel) -> Result<(), AccessDenied> {
        if self.access_level >= required {
            Ok(())
        } else {
            Err(AccessDenied {
                required,
                actual: self.access_level,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_access_level() {
        let basic = Role::service("warden-webhook");
        assert!(basic.require_access_level(AccessLevel::Basic).is_ok());
        let err = basic.require_access_level(AccessLevel::Admin).unwrap_err();
        assert_eq!(
            err.to_string(),
            "access level 'basic' is insufficient, 'admin' required"
        );

        let admin = basic.with_access_level(AccessLevel::Admin);
        assert!(admin.require_access_level(AccessLevel::Admin).is_ok());
    }

    #[test]
    fn test_role_serde_uses_type_tag() {
        let role = Role::user(Uuid::now_v7(), "warden-api", AccessLevel::Basic);
        let value = serde_json::to_value(&role).unwrap();
        assert_eq!(value["type"], "user");
        assert!(value.get("workspace_id").is_none());
    }
}
