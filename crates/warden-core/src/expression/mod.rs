//! Expression evaluator for `${{ ... }}` references in action inputs.
//!
//! A template is literal text interleaved with interpolations. Each
//! interpolation is a narrow expression over these contexts:
//!
//! - `ACTIONS.<ref>.result` / `ACTIONS.<ref>.error` -- prior action results
//! - `TRIGGER` -- the trigger payload
//! - `ENV` -- workflow environment values
//! - `SECRETS.<name>` -- resolved secrets
//! - `VARS` -- workflow variables
//! - `INPUTS` -- arguments of a template action
//! - `var.<name>` -- the current loop item
//!
//! Parsing never touches the context, and evaluation never reads a clock or
//! random source, so the same template and scope always produce the same
//! value. Parse errors are scrubbed: they say where parsing stopped, never
//! which tokens would have been accepted.

mod eval;
mod functions;
mod lexer;
pub mod parser;

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use warden_types::result::{ActionResult, ErrorInfo};

pub use parser::{parse_expression, ContextRoot, Expr, ForEach};
pub(crate) use functions::type_name;

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Expression failures. Both kinds are non-retryable action failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    /// Malformed syntax.
    #[error("Failed to parse expression: {message}")]
    Parse { message: String },

    /// Valid syntax, but a reference did not resolve or types did not match.
    #[error("Failed to evaluate expression: {message}")]
    Evaluation { message: String },
}

impl ExpressionError {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "ParseError",
            Self::Evaluation { .. } => "EvaluationError",
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Borrowed view of everything an expression may reference.
///
/// Contexts left as `None` are unavailable; referencing them is an
/// evaluation error (except `TRIGGER`, which reads as `null`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'s> {
    pub actions: Option<&'s BTreeMap<String, ActionResult>>,
    pub trigger: Option<&'s Value>,
    pub env: Option<&'s Value>,
    pub secrets: Option<&'s BTreeMap<String, Value>>,
    pub vars: Option<&'s Value>,
    pub inputs: Option<&'s Value>,
    pub locals: Option<&'s BTreeMap<String, Value>>,
}

impl<'s> Scope<'s> {
    pub fn with_locals(mut self, locals: &'s BTreeMap<String, Value>) -> Self {
        self.locals = Some(locals);
        self
    }

    pub fn with_inputs(mut self, inputs: &'s Value) -> Self {
        self.inputs = Some(inputs);
        self
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Expr(Expr),
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    /// Split `source` into literal text and parsed interpolations.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let mut parts = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                parts.push(Part::Text(rest[..start].to_string()));
            }
            let body_start = start + OPEN.len();
            let body_len = find_close(&rest[body_start..]).ok_or_else(|| {
                ExpressionError::parse("unterminated '${{' interpolation")
            })?;
            let body = &rest[body_start..body_start + body_len];
            parts.push(Part::Expr(parse_expression(body)?));
            rest = &rest[body_start + body_len + CLOSE.len()..];
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }
        Ok(Self { parts })
    }

    /// Whether the template contains any interpolation.
    pub fn is_dynamic(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Expr(_)))
    }

    /// Evaluate the template.
    ///
    /// A template that is exactly one interpolation (ignoring surrounding
    /// whitespace) yields the referenced value with its type intact. Anything
    /// else yields a string with each interpolation stringified.
    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
        if let Some(expr) = self.single_expression() {
            return eval::eval(expr, scope).map(|v| v.into_owned());
        }
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Expr(expr) => out.push_str(&stringify(&*eval::eval(expr, scope)?)),
            }
        }
        Ok(Value::String(out))
    }

    /// Every `ACTIONS.<ref>` this template reads.
    pub fn action_refs(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        for part in &self.parts {
            if let Part::Expr(expr) = part {
                collect_action_refs(expr, &mut refs);
            }
        }
        refs
    }

    fn single_expression(&self) -> Option<&Expr> {
        let mut found = None;
        for part in &self.parts {
            match part {
                Part::Text(text) if text.trim().is_empty() => {}
                Part::Text(_) => return None,
                Part::Expr(expr) if found.is_none() => found = Some(expr),
                Part::Expr(_) => return None,
            }
        }
        found
    }
}

/// Find the `}}` that closes an interpolation, skipping quoted strings.
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => {
                i += 2;
                continue;
            }
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if bytes[i..].starts_with(CLOSE.as_bytes()) => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

fn collect_action_refs(expr: &Expr, refs: &mut BTreeSet<String>) {
    match expr {
        Expr::Member { target, field } => {
            if let Expr::Root(ContextRoot::Actions) = target.as_ref() {
                refs.insert(field.clone());
            } else {
                collect_action_refs(target, refs);
            }
        }
        Expr::Index { target, index } => {
            match (target.as_ref(), index.as_ref()) {
                (Expr::Root(ContextRoot::Actions), Expr::Literal(Value::String(r))) => {
                    refs.insert(r.clone());
                }
                _ => collect_action_refs(target, refs),
            }
            collect_action_refs(index, refs);
        }
        Expr::Not(inner) => collect_action_refs(inner, refs),
        Expr::Binary { lhs, rhs, .. } => {
            collect_action_refs(lhs, refs);
            collect_action_refs(rhs, refs);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_action_refs(arg, refs);
            }
        }
        Expr::Literal(_) | Expr::Root(_) => {}
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse and evaluate a template in one step.
pub fn evaluate(template: &str, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    Template::parse(template)?.evaluate(scope)
}

/// Evaluate a run-if condition to a boolean using truthiness.
pub fn evaluate_condition(condition: &str, scope: &Scope<'_>) -> Result<bool, ExpressionError> {
    Ok(is_truthy(&evaluate(condition, scope)?))
}

/// Resolve every string leaf of an argument tree. Object keys are literal.
pub fn resolve_args(args: &Value, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    match args {
        Value::String(s) if s.contains(OPEN) => evaluate(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_args(v, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_args(v, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Parse every template inside an argument tree, returning the action refs
/// they read. Used to validate definitions without evaluating anything.
pub fn check_args(args: &Value) -> Result<BTreeSet<String>, ExpressionError> {
    let mut refs = BTreeSet::new();
    walk_strings(args, &mut |s| {
        if s.contains(OPEN) {
            refs.extend(Template::parse(s)?.action_refs());
        }
        Ok(())
    })?;
    Ok(refs)
}

fn walk_strings(
    value: &Value,
    f: &mut impl FnMut(&str) -> Result<(), ExpressionError>,
) -> Result<(), ExpressionError> {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => items.iter().try_for_each(|v| walk_strings(v, f)),
        Value::Object(map) => map.values().try_for_each(|v| walk_strings(v, f)),
        _ => Ok(()),
    }
}

/// Parse a for-each spec of the form `${{ for var.<name> in <expr> }}`.
pub fn parse_for_each(spec: &str) -> Result<ForEach, ExpressionError> {
    let trimmed = spec.trim();
    let body = trimmed
        .strip_prefix(OPEN)
        .and_then(|s| s.strip_suffix(CLOSE))
        .ok_or_else(|| {
            ExpressionError::parse("loop spec must be a single '${{ for var.<name> in ... }}' interpolation")
        })?;
    parser::parse_for_each_header(body)
}

/// Action refs read by a for-each spec.
pub fn for_each_action_refs(header: &ForEach) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    collect_action_refs(&header.iterable, &mut refs);
    refs
}

/// Evaluate a loop header's iterable; it must be a list.
pub fn evaluate_iterable(header: &ForEach, scope: &Scope<'_>) -> Result<Vec<Value>, ExpressionError> {
    match eval::eval(&header.iterable, scope)?.into_owned() {
        Value::Array(items) => Ok(items),
        other => Err(ExpressionError::evaluation(format!(
            "loop expression '{}' must evaluate to a list, got {}",
            header.iterable,
            functions::type_name(&other)
        ))),
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Truthiness: null, false, 0, "", [] and {} are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a value for string interpolation.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
