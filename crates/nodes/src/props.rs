//! Typed accessors over a node's schemaless `properties` map.
//!
//! String properties are templates: they are evaluated as expressions
//! against the run data, and fall back to the literal text when evaluation
//! fails or yields null. Everything else is passed through untouched.

use serde_json::{Map, Value};

use crate::{Evaluator, HandlerError, TaskNode};

/// Resolve one property value against `data`.
pub fn resolve(value: &Value, data: &Map<String, Value>, evaluator: &dyn Evaluator) -> Value {
    match value {
        Value::String(text) => match evaluator.evaluate(text, data) {
            Ok(Value::Null) | Err(_) => value.clone(),
            Ok(resolved) => resolved,
        },
        other => other.clone(),
    }
}

/// Resolved string property, or `default` when absent.
pub fn string(
    node: &TaskNode,
    key: &str,
    default: &str,
    data: &Map<String, Value>,
    evaluator: &dyn Evaluator,
) -> String {
    match node.properties.get(key) {
        Some(raw) => match resolve(raw, data, evaluator) {
            Value::String(s) => s,
            Value::Null => default.to_owned(),
            other => other.to_string(),
        },
        None => default.to_owned(),
    }
}

/// Raw (unresolved) string property; empty strings count as absent.
pub fn raw_str<'a>(node: &'a TaskNode, key: &str) -> Option<&'a str> {
    node.properties
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

pub fn flag(node: &TaskNode, key: &str) -> bool {
    match node.properties.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Integer property given either as a number or as a numeric
/// string. `Ok(None)` when absent or empty.
pub fn integer(node: &TaskNode, key: &str) -> Result<Option<i64>, HandlerError> {
    match node.properties.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| HandlerError::invalid(format!("'{key}' is not an integer: {n}"))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| HandlerError::invalid(format!("'{key}' is not an integer: {e}"))),
        Some(other) => Err(HandlerError::invalid(format!(
            "'{key}' must be a number, got {other}"
        ))),
    }
}

/// String list property (e.g. `resultKeys`).
pub fn string_list(node: &TaskNode, key: &str) -> Option<Vec<String>> {
    let items = node.properties.get(key)?.as_array()?;
    items
        .iter()
        .map(|v| v.as_str().map(str::to_owned))
        .collect()
}

/// A list of `{ "key": ..., "value": ... }` pairs, with each value resolved
/// against `data`. Missing property yields an empty map.
pub fn key_values(
    node: &TaskNode,
    key: &str,
    data: &Map<String, Value>,
    evaluator: &dyn Evaluator,
) -> Result<Map<String, Value>, HandlerError> {
    let Some(raw) = node.properties.get(key) else {
        return Ok(Map::new());
    };
    let entries = raw.as_array().ok_or_else(|| {
        HandlerError::invalid(format!("'{key}' must be a list of key/value pairs"))
    })?;

    let mut out = Map::new();
    for entry in entries {
        let name = entry
            .get("key")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| HandlerError::invalid(format!("entry in '{key}' has no key")))?;
        let value = entry.get("value").unwrap_or(&Value::Null);
        out.insert(name.to_owned(), resolve(value, data, evaluator));
    }
    Ok(out)
}
