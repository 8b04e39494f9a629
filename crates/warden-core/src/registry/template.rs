//! Template actions: YAML-defined actions that bind their inputs into the
//! arguments of another registered action.
//!
//! ```yaml
//! namespace: tools.netcheck
//! name: lookup
//! description: Look up an address
//! expects:
//!   ip:
//!     type: str
//! uses: core.http_request
//! args:
//!   url: "https://api.example.com/ip/${{ INPUTS.ip }}"
//! ```

use std::collections::BTreeMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_types::result::ErrorInfo;

use super::spec::{ActionContext, ActionHandler, ActionSpec, FieldSpec, InputSchema, RegistryOrigin};
use crate::expression::{self, ExpressionError, Scope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateActionDefinition {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expects: BTreeMap<String, FieldSpec>,
    /// Key of the action this template calls.
    pub uses: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl TemplateActionDefinition {
    pub fn key(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Structural checks that need no registry: names present, arguments
    /// parse, and no `ACTIONS` references (a template only sees `INPUTS`).
    pub fn check(&self) -> Result<(), String> {
        if self.namespace.trim().is_empty() || self.name.trim().is_empty() {
            return Err("template action needs a namespace and a name".to_string());
        }
        if self.uses.trim().is_empty() {
            return Err(format!("template action '{}' has an empty 'uses'", self.key()));
        }
        if self.uses == self.key() {
            return Err(format!("template action '{}' uses itself", self.key()));
        }
        let refs = expression::check_args(&Value::Object(self.args.clone()))
            .map_err(|e| format!("template action '{}': {e}", self.key()))?;
        if let Some(r) = refs.first() {
            return Err(format!(
                "template action '{}' references ACTIONS.{r}; templates may only read INPUTS",
                self.key()
            ));
        }
        Ok(())
    }

    /// Build a registry spec from this definition.
    pub fn into_spec(self, origin: RegistryOrigin) -> Result<ActionSpec, String> {
        self.check()?;
        let schema = InputSchema { fields: self.expects };
        let handler = TemplateHandler {
            uses: self.uses,
            args: Value::Object(self.args),
        };
        Ok(ActionSpec::new(
            &self.namespace,
            &self.name,
            &self.description,
            schema,
            origin,
            handler,
        ))
    }
}

/// Resolves the template's arguments against `INPUTS` and calls `uses`.
pub struct TemplateHandler {
    uses: String,
    args: Value,
}

impl ActionHandler for TemplateHandler {
    fn call<'a>(
        &'a self,
        args: Value,
        ctx: ActionContext<'a>,
    ) -> impl Future<Output = Result<Value, ErrorInfo>> + Send + 'a {
        async move {
            let resolved = expression::resolve_args(&self.args, &Scope::default().with_inputs(&args))
                .map_err(|e: ExpressionError| e.to_error_info())?;
            tracing::debug!(uses = %self.uses, depth = ctx.depth, "calling template target");
            ctx.registry
                .call_nested(&self.uses, resolved, ctx.run_context, ctx.depth + 1)
                .await
                .map_err(|e| e.to_error_info())
        }
    }
}

/// Parse one YAML template action.
pub fn parse_template_yaml(yaml: &str) -> Result<TemplateActionDefinition, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RunContext;
    use crate::registry::ActionRegistry;
    use serde_json::json;
    use uuid::Uuid;
    use warden_types::role::Role;

    fn run_context() -> RunContext {
        RunContext {
            run_id: Uuid::now_v7(),
            workflow_id: "wf-template".to_string(),
            action_ref: "t".to_string(),
            role: Role::service("warden-test"),
            loop_index: None,
        }
    }

    const GREET: &str = r#"
namespace: tools.text
name: greet
description: Build a greeting
expects:
  who:
    type: str
  punctuation:
    type: str
    default: "!"
uses: core.transform.reshape
args:
  value:
    text: "hello ${{ INPUTS.who }}${{ INPUTS.punctuation }}"
    raw: "${{ INPUTS.who }}"
"#;

    #[test]
    fn test_parse_definition() {
        let def = parse_template_yaml(GREET).unwrap();
        assert_eq!(def.key(), "tools.text.greet");
        assert_eq!(def.uses, "core.transform.reshape");
        assert!(def.expects["punctuation"].default.is_some());
        assert!(def.check().is_ok());
    }

    #[test]
    fn test_check_rejects_action_refs_and_self_use() {
        let mut def = parse_template_yaml(GREET).unwrap();
        def.args.insert("x".to_string(), json!("${{ ACTIONS.a.result }}"));
        assert!(def.check().unwrap_err().contains("ACTIONS.a"));

        let mut def = parse_template_yaml(GREET).unwrap();
        def.uses = "tools.text.greet".to_string();
        assert!(def.check().unwrap_err().contains("uses itself"));
    }

    #[tokio::test]
    async fn test_template_binds_inputs() {
        let registry = ActionRegistry::with_bundled();
        let spec = parse_template_yaml(GREET)
            .unwrap()
            .into_spec(RegistryOrigin::bundled("test"))
            .unwrap();
        registry.register(spec);

        let out = registry
            .call("tools.text.greet", json!({"who": "ops"}), &run_context())
            .await
            .unwrap();
        assert_eq!(out, json!({"text": "hello ops!", "raw": "ops"}));
    }

    #[tokio::test]
    async fn test_template_input_validation() {
        let registry = ActionRegistry::with_bundled();
        registry.register(
            parse_template_yaml(GREET)
                .unwrap()
                .into_spec(RegistryOrigin::bundled("test"))
                .unwrap(),
        );
        let err = registry
            .call("tools.text.greet", json!({"who": 5}), &run_context())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "RegistryActionValidationError");
    }

    #[tokio::test]
    async fn test_recursive_templates_hit_depth_limit() {
        let registry = ActionRegistry::with_bundled();
        for (name, uses) in [("ping", "tools.loop.pong"), ("pong", "tools.loop.ping")] {
            let def = TemplateActionDefinition {
                namespace: "tools.loop".to_string(),
                name: name.to_string(),
                description: String::new(),
                expects: BTreeMap::new(),
                uses: uses.to_string(),
                args: Map::new(),
            };
            registry.register(def.into_spec(RegistryOrigin::bundled("test")).unwrap());
        }
        let err = registry
            .call("tools.loop.ping", json!({}), &run_context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nesting depth"), "got: {err}");
    }
}
