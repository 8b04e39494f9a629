//! Built-in `FN.*` functions.
//!
//! Every function is pure.

use serde_json::Value;

use super::{stringify, ExpressionError};

const FUNCTIONS: &[&str] = &[
    "lowercase",
    "uppercase",
    "length",
    "join",
    "contains",
    "is_null",
    "to_json",
    "from_json",
    "default",
];

pub(crate) fn is_known(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

pub(crate) fn call(name: &str, args: Vec<Value>) -> Result<Value, ExpressionError> {
    match name {
        "lowercase" => {
            let [s] = exact::<1>(name, args)?;
            Ok(Value::String(as_str(name, &s)?.to_lowercase()))
        }
        "uppercase" => {
            let [s] = exact::<1>(name, args)?;
            Ok(Value::String(as_str(name, &s)?.to_uppercase()))
        }
        "length" => {
            let [v] = exact::<1>(name, args)?;
            let len = match &v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => {
                    return Err(ExpressionError::evaluation(format!(
                        "FN.length expects a string, list or object, got {}",
                        type_name(other)
                    )));
                }
            };
            Ok(Value::from(len))
        }
        "join" => {
            let [items, sep] = exact::<2>(name, args)?;
            let sep = as_str(name, &sep)?;
            let items = items.as_array().ok_or_else(|| {
                ExpressionError::evaluation(format!(
                    "FN.join expects a list, got {}",
                    type_name(&items)
                ))
            })?;
            let parts: Vec<String> = items.iter().map(stringify).collect();
            Ok(Value::String(parts.join(sep)))
        }
        "contains" => {
            let [container, item] = exact::<2>(name, args)?;
            let found = match (&container, &item) {
                (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
                (Value::Array(a), needle) => a.iter().any(|v| super::eval::values_equal(v, needle)),
                (Value::Object(o), Value::String(key)) => o.contains_key(key),
                (other, _) => {
                    return Err(ExpressionError::evaluation(format!(
                        "FN.contains cannot search a {}",
                        type_name(other)
                    )));
                }
            };
            Ok(Value::Bool(found))
        }
        "is_null" => {
            let [v] = exact::<1>(name, args)?;
            Ok(Value::Bool(v.is_null()))
        }
        "to_json" => {
            let [v] = exact::<1>(name, args)?;
            serde_json::to_string(&v)
                .map(Value::String)
                .map_err(|e| ExpressionError::evaluation(format!("FN.to_json failed: {e}")))
        }
        "from_json" => {
            let [s] = exact::<1>(name, args)?;
            serde_json::from_str(as_str(name, &s)?)
                .map_err(|e| ExpressionError::evaluation(format!("FN.from_json failed: {e}")))
        }
        "default" => {
            let [v, fallback] = exact::<2>(name, args)?;
            Ok(if v.is_null() { fallback } else { v })
        }
        other => Err(ExpressionError::evaluation(format!(
            "unknown function 'FN.{other}'"
        ))),
    }
}

fn exact<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], ExpressionError> {
    let got = args.len();
    args.try_into().map_err(|_| {
        ExpressionError::evaluation(format!(
            "FN.{name} takes {N} argument(s) but {got} were given"
        ))
    })
}

fn as_str<'a>(name: &str, value: &'a Value) -> Result<&'a str, ExpressionError> {
    value.as_str().ok_or_else(|| {
        ExpressionError::evaluation(format!(
            "FN.{name} expects a string, got {}",
            type_name(value)
        ))
    })
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_functions() {
        assert_eq!(call("lowercase", vec![json!("AbC")]).unwrap(), json!("abc"));
        assert_eq!(call("uppercase", vec![json!("AbC")]).unwrap(), json!("ABC"));
        assert_eq!(
            call("join", vec![json!(["a", 1, true]), json!(",")]).unwrap(),
            json!("a,1,true")
        );
    }

    #[test]
    fn test_length_and_contains() {
        assert_eq!(call("length", vec![json!([1, 2, 3])]).unwrap(), json!(3));
        assert_eq!(call("contains", vec![json!([1, 2]), json!(2.0)]).unwrap(), json!(true));
        assert_eq!(call("contains", vec![json!({"k": 1}), json!("k")]).unwrap(), json!(true));
        assert!(call("length", vec![json!(5)]).is_err());
    }

    #[test]
    fn test_default_and_json() {
        assert_eq!(call("default", vec![json!(null), json!("x")]).unwrap(), json!("x"));
        assert_eq!(call("default", vec![json!(0), json!("x")]).unwrap(), json!(0));
        assert_eq!(call("from_json", vec![json!("{\"a\":1}")]).unwrap(), json!({"a": 1}));
        assert_eq!(call("to_json", vec![json!([1])]).unwrap(), json!("[1]"));
    }

    #[test]
    fn test_arity_error() {
        let err = call("join", vec![json!([])]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to evaluate expression: FN.join takes 2 argument(s) but 1 were given"
        );
    }
}
