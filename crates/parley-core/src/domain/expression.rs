//! Value resolution and conditions used by flow elements.
//!
//! A string that is exactly `$path` resolves to the bound value, a string
//! containing `{$path}` is interpolated. Paths are dotted (`$user.name`) and
//! look in the flow-local context first, then in the global context.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FaultKind, RuntimeFault};

lazy_static! {
    static ref VARIABLE_REF: Regex = Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)*)$").unwrap();
    static ref INTERPOLATION: Regex = Regex::new(r"\{\$([A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)*)\}").unwrap();
}

/// Variable bindings visible to an instruction
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    /// Flow-local bindings
    pub local: &'a Map<String, Value>,
    /// Cross-flow bindings
    pub global: &'a Map<String, Value>,
}

impl<'a> Scope<'a> {
    /// Create a scope over local and global bindings
    pub fn new(local: &'a Map<String, Value>, global: &'a Map<String, Value>) -> Self {
        Self { local, global }
    }

    /// Look up a dotted path
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        let mut current = self.local.get(root).or_else(|| self.global.get(root))?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

/// If a string is a bare variable reference, return its path
pub fn variable_path(value: &str) -> Option<&str> {
    VARIABLE_REF
        .captures(value)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

fn missing_variable(path: &str) -> RuntimeFault {
    RuntimeFault::new(
        FaultKind::MissingVariable,
        format!("Variable '${}' is not defined", path),
    )
}

/// Resolve variable references inside a value
pub fn resolve_value(value: &Value, scope: &Scope<'_>) -> Result<Value, RuntimeFault> {
    match value {
        Value::String(text) => {
            if let Some(path) = variable_path(text) {
                return scope.lookup(path).ok_or_else(|| missing_variable(path));
            }
            if text.contains("{$") {
                return interpolate(text, scope).map(Value::String);
            }
            Ok(value.clone())
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_map(map, scope).map(Value::Object),
        _ => Ok(value.clone()),
    }
}

/// Resolve every value of an argument map
pub fn resolve_map(
    map: &Map<String, Value>,
    scope: &Scope<'_>,
) -> Result<Map<String, Value>, RuntimeFault> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, scope)?)))
        .collect()
}

fn interpolate(text: &str, scope: &Scope<'_>) -> Result<String, RuntimeFault> {
    let mut missing = None;
    let result = INTERPOLATION.replace_all(text, |captures: &Captures<'_>| {
        let path = &captures[1];
        match scope.lookup(path) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => {
                missing.get_or_insert_with(|| path.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(path) => Err(missing_variable(&path)),
        None => Ok(result.into_owned()),
    }
}

/// JSON truthiness
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Condition guarding `if` and `while`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The resolved value is truthy
    Truthy(Value),
    /// Both resolved values are equal
    Equals(Value, Value),
    /// The resolved values differ
    NotEquals(Value, Value),
    /// The variable is bound
    Defined(String),
    /// Negation
    Not(Box<Condition>),
    /// All conditions hold
    And(Vec<Condition>),
    /// At least one condition holds
    Or(Vec<Condition>),
}

impl Condition {
    /// Evaluate against a scope
    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<bool, RuntimeFault> {
        Ok(match self {
            Condition::Truthy(value) => is_truthy(&resolve_value(value, scope)?),
            Condition::Equals(left, right) => {
                resolve_value(left, scope)? == resolve_value(right, scope)?
            }
            Condition::NotEquals(left, right) => {
                resolve_value(left, scope)? != resolve_value(right, scope)?
            }
            Condition::Defined(name) => {
                let path = name.strip_prefix('$').unwrap_or(name);
                scope.lookup(path).is_some()
            }
            Condition::Not(inner) => !inner.evaluate(scope)?,
            Condition::And(conditions) => {
                for condition in conditions {
                    if !condition.evaluate(scope)? {
                        return Ok(false);
                    }
                }
                true
            }
            Condition::Or(conditions) => {
                for condition in conditions {
                    if condition.evaluate(scope)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }
}
