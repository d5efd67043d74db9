//! Expression evaluation for edge guards and templated node properties.
//!
//! The engine only depends on the [`Evaluator`] trait. The default
//! implementation is backed by JEXL (`jexl-eval`); nothing is cached, every
//! call parses the expression again against the current data.

use serde_json::{Map, Value};

use crate::ExprError;

pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expression: &str, env: &Map<String, Value>) -> Result<Value, ExprError>;
}

/// JEXL-backed evaluator. Identifiers resolve against the run data, so an
/// edge guarded by `count > 2` reads `Data["count"]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JexlEvaluator;

impl Evaluator for JexlEvaluator {
    fn evaluate(&self, expression: &str, env: &Map<String, Value>) -> Result<Value, ExprError> {
        jexl_eval::Evaluator::new()
            .eval_in_context(expression, env)
            .map_err(|e| ExprError::new(expression, e.to_string()))
    }
}

/// Truthiness used for edge guards.
///
/// `bool` as is; strings are true for `"1"` or a case-insensitive `"true"`;
/// numbers are true when non-zero; null is false; anything else is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn evaluates_comparisons() {
        let out = JexlEvaluator.evaluate("1 > 2", &Map::new()).expect("valid");
        assert_eq!(out, json!(false));
    }

    #[test]
    fn resolves_identifiers_from_data() {
        let data = env(json!({ "count": 5, "user": { "name": "ada" } }));
        assert!(is_truthy(&JexlEvaluator.evaluate("count > 2", &data).expect("valid")));
        assert_eq!(
            JexlEvaluator.evaluate("user.name", &data).expect("valid"),
            json!("ada")
        );
    }

    #[test]
    fn syntax_errors_carry_the_expression() {
        let err = JexlEvaluator
            .evaluate("1 >", &Map::new())
            .expect_err("incomplete expression");
        assert_eq!(err.expression, "1 >");
    }

    #[test]
    fn truthiness_rules() {
        assert!(is_truthy(&json!(true)));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!("TRUE")));
        assert!(is_truthy(&json!("1")));
        assert!(!is_truthy(&json!("yes")));
        assert!(!is_truthy(&json!("0")));
        assert!(is_truthy(&json!(3)));
        assert!(is_truthy(&json!(-0.5)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&Value::Null));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }
}
