//! Bundled `core.transform.*` actions.
//!
//! Pure data transforms that need no I/O, so they run in-process wherever
//! the registry lives.

use serde_json::{Map, Value, json};
use warden_types::result::ErrorInfo;

use super::spec::{ActionSpec, FieldSpec, FieldType, FnHandler, InputSchema, RegistryOrigin};

pub const BUNDLED_PACKAGE: &str = "core";

const NAMESPACE: &str = "core.transform";

/// Every bundled action.
pub fn bundled_actions() -> Vec<ActionSpec> {
    let origin = RegistryOrigin::bundled(BUNDLED_PACKAGE);
    vec![
        ActionSpec::new(
            NAMESPACE,
            "reshape",
            "Return the given value unchanged. Used to build new shapes from expressions.",
            InputSchema::new().field("value", FieldSpec::new(FieldType::Any)),
            origin.clone(),
            FnHandler::new(reshape),
        ),
        ActionSpec::new(
            NAMESPACE,
            "merge",
            "Shallow-merge a list of objects; later keys win.",
            InputSchema::new().field("items", FieldSpec::new(FieldType::Array)),
            origin.clone(),
            FnHandler::new(merge),
        ),
        ActionSpec::new(
            NAMESPACE,
            "flatten",
            "Flatten nested lists by one level.",
            InputSchema::new().field("items", FieldSpec::new(FieldType::Array)),
            origin.clone(),
            FnHandler::new(flatten),
        ),
        ActionSpec::new(
            NAMESPACE,
            "filter_nulls",
            "Drop null entries from a list.",
            InputSchema::new().field("items", FieldSpec::new(FieldType::Array)),
            origin,
            FnHandler::new(filter_nulls),
        ),
    ]
}

fn items(args: &Value) -> &[Value] {
    args.get("items").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default()
}

fn reshape(args: Value) -> Result<Value, ErrorInfo> {
    Ok(args.get("value").cloned().unwrap_or(Value::Null))
}

fn merge(args: Value) -> Result<Value, ErrorInfo> {
    let mut merged = Map::new();
    for (index, item) in items(&args).iter().enumerate() {
        match item {
            Value::Object(map) => merged.extend(map.clone()),
            Value::Null => {}
            other => {
                return Err(ErrorInfo::new(
                    "ValueError",
                    format!("item {index} is not an object"),
                )
                .with_detail(json!({ "index": index, "value": other })));
            }
        }
    }
    Ok(Value::Object(merged))
}

fn flatten(args: Value) -> Result<Value, ErrorInfo> {
    let mut out = Vec::new();
    for item in items(&args) {
        match item {
            Value::Array(inner) => out.extend(inner.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    Ok(Value::Array(out))
}

fn filter_nulls(args: Value) -> Result<Value, ErrorInfo> {
    Ok(Value::Array(items(&args).iter().filter(|v| !v.is_null()).cloned().collect()))
}
