//! Action specifications: what a registered action accepts and how it runs.
//!
//! Handlers follow the object-safe wrapper pattern: implement
//! [`ActionHandler`] with a native async method, and the blanket impl of
//! [`ActionHandlerDyn`] lets the registry store it as a trait object.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_types::result::ErrorInfo;

use super::ActionRegistry;
use crate::dispatch::RunContext;

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Where a set of actions came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryOrigin {
    /// Actions compiled into the binary, grouped by package name.
    BundledPackage { name: String },
    /// Template actions read from a directory of YAML files.
    LocalDirectory { path: PathBuf },
    /// Template actions read from a cloned git repository.
    RemoteGit {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
}

impl RegistryOrigin {
    pub fn bundled(name: &str) -> Self {
        Self::BundledPackage {
            name: name.to_string(),
        }
    }
}

impl fmt::Display for RegistryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BundledPackage { name } => write!(f, "bundled:{name}"),
            Self::LocalDirectory { path } => write!(f, "local:{}", path.display()),
            Self::RemoteGit {
                url,
                reference: Some(r),
            } => write!(f, "git+{url}@{r}"),
            Self::RemoteGit { url, reference: None } => write!(f, "git+{url}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Input schema
// ---------------------------------------------------------------------------

/// JSON type accepted by an input field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Any,
    #[serde(alias = "str")]
    String,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "float")]
    Number,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "list")]
    Array,
    #[serde(alias = "dict")]
    Object,
}

impl FieldType {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Defaults to `true` unless a default value is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Self::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = Some(false);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(self.default.is_none())
    }
}

/// Named input fields of an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputSchema {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.insert(name.to_string(), spec);
        self
    }

    /// Check `args` against the schema and fill in defaults.
    ///
    /// An empty schema accepts any object. Otherwise unknown fields are
    /// rejected. Every problem is reported, not just the first.
    pub fn validate(&self, args: &Value) -> Result<Value, Vec<String>> {
        let mut map = match args {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(vec![format!(
                    "arguments must be an object, got {}",
                    crate::expression::type_name(other)
                )]);
            }
        };
        if self.fields.is_empty() {
            return Ok(Value::Object(map));
        }

        let mut issues = Vec::new();
        for key in map.keys() {
            if !self.fields.contains_key(key) {
                issues.push(format!("unexpected field '{key}'"));
            }
        }
        for (name, spec) in &self.fields {
            match map.get(name) {
                Some(value) if !spec.field_type.accepts(value) => {
                    if !(value.is_null() && !spec.is_required()) {
                        issues.push(format!(
                            "field '{name}' expected {}, got {}",
                            spec.field_type,
                            crate::expression::type_name(value)
                        ));
                    }
                }
                Some(_) => {}
                None => match &spec.default {
                    Some(default) => {
                        map.insert(name.clone(), default.clone());
                    }
                    None if spec.is_required() => issues.push(format!("missing required field '{name}'")),
                    None => {}
                },
            }
        }

        if issues.is_empty() {
            Ok(Value::Object(map))
        } else {
            Err(issues)
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// What a handler may reach while running.
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub registry: &'a ActionRegistry,
    pub run_context: &'a RunContext,
    /// Nesting depth of template calls.
    pub depth: usize,
}

/// Executes one action with validated arguments.
pub trait ActionHandler: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        args: Value,
        ctx: ActionContext<'a>,
    ) -> impl Future<Output = Result<Value, ErrorInfo>> + Send + 'a;
}

/// Object-safe version of [`ActionHandler`] with boxed futures.
pub trait ActionHandlerDyn: Send + Sync {
    fn call_boxed<'a>(
        &'a self,
        args: Value,
        ctx: ActionContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ErrorInfo>> + Send + 'a>>;
}

impl<T: ActionHandler> ActionHandlerDyn for T {
    fn call_boxed<'a>(
        &'a self,
        args: Value,
        ctx: ActionContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ErrorInfo>> + Send + 'a>> {
        Box::pin(self.call(args, ctx))
    }
}

/// Adapts a synchronous function into a handler.
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(Value) -> Result<Value, ErrorInfo> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(Value) -> Result<Value, ErrorInfo> + Send + Sync + 'static,
{
    fn call<'a>(
        &'a self,
        args: Value,
        _ctx: ActionContext<'a>,
    ) -> impl Future<Output = Result<Value, ErrorInfo>> + Send + 'a {
        std::future::ready((self.0)(args))
    }
}

// ---------------------------------------------------------------------------
// ActionSpec
// ---------------------------------------------------------------------------

/// A registered action.
#[derive(Clone)]
pub struct ActionSpec {
    /// `namespace.name`, e.g. `core.transform.reshape`.
    pub key: String,
    pub namespace: String,
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub origin: RegistryOrigin,
    pub handler: Arc<dyn ActionHandlerDyn>,
}

impl ActionSpec {
    pub fn new(
        namespace: &str,
        name: &str,
        description: &str,
        input_schema: InputSchema,
        origin: RegistryOrigin,
        handler: impl ActionHandler,
    ) -> Self {
        Self {
            key: format!("{namespace}.{name}"),
            namespace: namespace.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            origin,
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("key", &self.key)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Serializable summary of a registered action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub key: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub origin: RegistryOrigin,
}

impl From<&ActionSpec> for ActionSummary {
    fn from(spec: &ActionSpec) -> Self {
        Self {
            key: spec.key.clone(),
            description: spec.description.clone(),
            input_schema: spec.input_schema.clone(),
            origin: spec.origin.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> InputSchema {
        InputSchema::new()
            .field("url", FieldSpec::new(FieldType::String))
            .field("retries", FieldSpec::new(FieldType::Integer).with_default(json!(3)))
            .field("headers", FieldSpec::new(FieldType::Object).optional())
    }

    #[test]
    fn test_validate_fills_defaults() {
        let args = schema().validate(&json!({"url": "https://x"})).unwrap();
        assert_eq!(args, json!({"url": "https://x", "retries": 3}));
    }

    #[test]
    fn test_validate_reports_every_issue() {
        let issues = schema()
            .validate(&json!({"retries": "many", "extra": true}))
            .unwrap_err();
        assert_eq!(issues.len(), 3, "got: {issues:?}");
        assert!(issues.contains(&"unexpected field 'extra'".to_string()));
        assert!(issues.contains(&"field 'retries' expected integer, got string".to_string()));
        assert!(issues.contains(&"missing required field 'url'".to_string()));
    }

    #[test]
    fn test_optional_field_accepts_null() {
        assert!(schema().validate(&json!({"url": "u", "headers": null})).is_ok());
    }

    #[test]
    fn test_non_object_args_rejected() {
        let issues = schema().validate(&json!([1, 2])).unwrap_err();
        assert!(issues[0].contains("must be an object"));
    }

    #[test]
    fn test_empty_schema_accepts_anything_object() {
        let args = InputSchema::new().validate(&json!({"a": 1})).unwrap();
        assert_eq!(args["a"], 1);
    }

    #[test]
    fn test_field_type_aliases() {
        let spec: FieldSpec = serde_yaml_ng::from_str("type: str\ndescription: An IP").unwrap();
        assert_eq!(spec.field_type, FieldType::String);
        assert!(spec.is_required());
        let spec: FieldSpec = serde_yaml_ng::from_str("type: list\ndefault: []").unwrap();
        assert_eq!(spec.field_type, FieldType::Array);
        assert!(!spec.is_required());
    }

    #[test]
    fn test_origin_display_and_serde() {
        let origin = RegistryOrigin::RemoteGit {
            url: "https://github.com/acme/actions".to_string(),
            reference: Some("v1".to_string()),
        };
        assert_eq!(origin.to_string(), "git+https://github.com/acme/actions@v1");
        let value = serde_json::to_value(&origin).unwrap();
        assert_eq!(value["type"], "remote_git");
        assert_eq!(RegistryOrigin::bundled("core").to_string(), "bundled:core");
    }
}
