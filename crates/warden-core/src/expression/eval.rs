//! AST evaluation against a [`Scope`].

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::Value;

use super::functions::{self, type_name};
use super::parser::{BinaryOp, ContextRoot, Expr};
use super::{is_truthy, ExpressionError, Scope};

static NULL: Value = Value::Null;

pub(crate) fn eval<'s>(expr: &Expr, scope: &Scope<'s>) -> Result<Cow<'s, Value>, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(Cow::Owned(v.clone())),
        Expr::Root(root) => root_value(*root, scope),
        Expr::Member { target, field } => {
            if let Expr::Root(ContextRoot::Actions) = target.as_ref() {
                return action_value(field, scope);
            }
            let base = eval(target, scope)?;
            member(base, field, target)
        }
        Expr::Index { target, index } => {
            let key = eval(index, scope)?.into_owned();
            if let (Expr::Root(ContextRoot::Actions), Value::String(action_ref)) =
                (target.as_ref(), &key)
            {
                return action_value(action_ref, scope);
            }
            let base = eval(target, scope)?;
            index_into(base, &key, target)
        }
        Expr::Not(inner) => {
            let v = eval(inner, scope)?;
            Ok(Cow::Owned(Value::Bool(!is_truthy(&v))))
        }
        Expr::Binary { op, lhs, rhs } => binary(*op, lhs, rhs, scope).map(Cow::Owned),
        Expr::Call { function, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, scope).map(Cow::into_owned))
                .collect::<Result<Vec<_>, _>>()?;
            functions::call(function, values).map(Cow::Owned)
        }
    }
}

fn root_value<'s>(root: ContextRoot, scope: &Scope<'s>) -> Result<Cow<'s, Value>, ExpressionError> {
    let unavailable = || {
        ExpressionError::evaluation(format!(
            "context '{}' is not available here",
            root.as_str()
        ))
    };
    match root {
        ContextRoot::Actions => {
            let actions = scope.actions.ok_or_else(unavailable)?;
            let map: serde_json::Map<String, Value> = actions
                .iter()
                .map(|(k, v)| (k.clone(), v.to_expression_value()))
                .collect();
            Ok(Cow::Owned(Value::Object(map)))
        }
        ContextRoot::Trigger => Ok(Cow::Borrowed(scope.trigger.unwrap_or(&NULL))),
        ContextRoot::Env => scope.env.map(Cow::Borrowed).ok_or_else(unavailable),
        ContextRoot::Secrets => {
            let secrets = scope.secrets.ok_or_else(unavailable)?;
            let map: serde_json::Map<String, Value> =
                secrets.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            Ok(Cow::Owned(Value::Object(map)))
        }
        ContextRoot::Vars => scope.vars.map(Cow::Borrowed).ok_or_else(unavailable),
        ContextRoot::Inputs => scope.inputs.map(Cow::Borrowed).ok_or_else(unavailable),
        ContextRoot::Local => {
            let locals = scope.locals.ok_or_else(unavailable)?;
            let map: serde_json::Map<String, Value> =
                locals.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            Ok(Cow::Owned(Value::Object(map)))
        }
    }
}

fn action_value<'s>(action_ref: &str, scope: &Scope<'s>) -> Result<Cow<'s, Value>, ExpressionError> {
    let actions = scope.actions.ok_or_else(|| {
        ExpressionError::evaluation("context 'ACTIONS' is not available here")
    })?;
    actions
        .get(action_ref)
        .map(|r| Cow::Owned(r.to_expression_value()))
        .ok_or_else(|| {
            ExpressionError::evaluation(format!(
                "unresolved reference 'ACTIONS.{action_ref}': no result for action '{action_ref}'"
            ))
        })
}

fn member<'s>(base: Cow<'s, Value>, field: &str, target: &Expr) -> Result<Cow<'s, Value>, ExpressionError> {
    let missing = || {
        ExpressionError::evaluation(format!(
            "unresolved reference '{target}.{field}': segment '{field}' not found"
        ))
    };
    match base {
        Cow::Borrowed(Value::Object(map)) => map.get(field).map(Cow::Borrowed).ok_or_else(missing),
        Cow::Owned(Value::Object(mut map)) => map.remove(field).map(Cow::Owned).ok_or_else(missing),
        other => Err(ExpressionError::evaluation(format!(
            "cannot access '{field}' on {} at '{target}'",
            type_name(&other)
        ))),
    }
}

fn index_into<'s>(base: Cow<'s, Value>, key: &Value, target: &Expr) -> Result<Cow<'s, Value>, ExpressionError> {
    match key {
        Value::String(field) => member(base, field, target),
        Value::Number(n) => {
            let idx = n.as_i64().ok_or_else(|| {
                ExpressionError::evaluation(format!("index {n} into '{target}' is not an integer"))
            })?;
            let out_of_range = |len: usize| {
                ExpressionError::evaluation(format!(
                    "unresolved reference '{target}[{idx}]': index {idx} out of range for list of length {len}"
                ))
            };
            let position = |len: usize| -> Option<usize> {
                let resolved = if idx < 0 { len as i64 + idx } else { idx };
                (0..len as i64).contains(&resolved).then_some(resolved as usize)
            };
            match base {
                Cow::Borrowed(Value::Array(items)) => position(items.len())
                    .map(|i| Cow::Borrowed(&items[i]))
                    .ok_or_else(|| out_of_range(items.len())),
                Cow::Owned(Value::Array(mut items)) => {
                    let len = items.len();
                    position(len)
                        .map(|i| Cow::Owned(items.swap_remove(i)))
                        .ok_or_else(|| out_of_range(len))
                }
                other => Err(ExpressionError::evaluation(format!(
                    "cannot index {} at '{target}'",
                    type_name(&other)
                ))),
            }
        }
        other => Err(ExpressionError::evaluation(format!(
            "cannot index '{target}' with {}",
            type_name(other)
        ))),
    }
}

fn binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::And => {
            if !is_truthy(&*eval(lhs, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&*eval(rhs, scope)?)))
        }
        BinaryOp::Or => {
            if is_truthy(&*eval(lhs, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&*eval(rhs, scope)?)))
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let equal = values_equal(&*eval(lhs, scope)?, &*eval(rhs, scope)?);
            Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let l = eval(lhs, scope)?;
            let r = eval(rhs, scope)?;
            let ordering = compare(&l, &r)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
    }
}

/// Equality with numeric normalization (`1 == 1.0`).
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, ExpressionError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).ok_or_else(|| {
                ExpressionError::evaluation("cannot compare non-finite numbers")
            })
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ExpressionError::evaluation(format!(
            "cannot compare {} with {}",
            type_name(a),
            type_name(b)
        ))),
    }
}
