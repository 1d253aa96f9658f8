use crate::execution::{Condition, ConditionOperator};
use crate::runtime::ExecutionError;
use crate::types::{Facts, Host};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Pure predicate evaluation for `when` lists; shared by real and check runs
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// All conditions must hold; an empty list always applies
    pub fn evaluate_conditions(
        conditions: &[Condition],
        context: &ConditionContext,
    ) -> Result<bool, ExecutionError> {
        for condition in conditions {
            if !Self::evaluate_condition(condition, context)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn evaluate_condition(
        condition: &Condition,
        context: &ConditionContext,
    ) -> Result<bool, ExecutionError> {
        let expected = &condition.value;
        let Some(actual) = context.lookup(&condition.variable) else {
            // Undefined variables only satisfy the negative operators
            return Ok(matches!(
                condition.operator,
                ConditionOperator::NotExists | ConditionOperator::NotEquals
            ));
        };

        match condition.operator {
            ConditionOperator::Exists => Ok(!actual.is_null()),
            ConditionOperator::NotExists => Ok(actual.is_null()),
            ConditionOperator::Equals => Ok(loosely_equal(actual, expected)),
            ConditionOperator::NotEquals => Ok(!loosely_equal(actual, expected)),
            ConditionOperator::Contains => contains(actual, expected),
            ConditionOperator::StartsWith => Ok(as_text(actual).starts_with(&as_text(expected))),
            ConditionOperator::EndsWith => Ok(as_text(actual).ends_with(&as_text(expected))),
            ConditionOperator::GreaterThan => {
                compare_numeric(actual, expected, ">").map(Ordering::is_gt)
            }
            ConditionOperator::LessThan => {
                compare_numeric(actual, expected, "<").map(Ordering::is_lt)
            }
        }
    }
}

/// Same JSON type compares structurally, mixed types compare as text
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(_), Value::String(_))
        | (Value::Number(_), Value::Number(_))
        | (Value::Bool(_), Value::Bool(_))
        | (Value::Null, Value::Null) => a == b,
        _ => as_text(a) == as_text(b),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, ExecutionError> {
    match (haystack, needle) {
        (Value::String(text), Value::String(part)) => Ok(text.contains(part.as_str())),
        (Value::Array(items), needle) => Ok(items.iter().any(|item| loosely_equal(item, needle))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => Err(ExecutionError::ConditionFailed {
            condition: format!(
                "{} cannot contain {}",
                type_name(haystack),
                type_name(needle)
            ),
        }),
    }
}

/// Numbers, or strings holding numbers such as `os_version: "22.04"`
fn compare_numeric(a: &Value, b: &Value, operator: &str) -> Result<Ordering, ExecutionError> {
    let as_number = |value: &Value| match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    as_number(a)
        .zip(as_number(b))
        .and_then(|(a, b)| a.partial_cmp(&b))
        .ok_or_else(|| ExecutionError::ConditionFailed {
            condition: format!("cannot compare {} {operator} {}", type_name(a), type_name(b)),
        })
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null => "null",
    }
}

/// Facts and host variables a `when` list is evaluated against.
/// Host variables shadow facts of the same name.
pub struct ConditionContext {
    pub facts: HashMap<String, Value>,
    pub variables: HashMap<String, Value>,
}

impl ConditionContext {
    pub fn new(facts: HashMap<String, Value>, variables: HashMap<String, Value>) -> Self {
        Self { facts, variables }
    }

    /// `a.b.c` walks into nested objects; variables are searched before facts
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let root = parts.next()?;
        let mut value = self.variables.get(root).or_else(|| self.facts.get(root))?;
        for part in parts {
            value = value.as_object()?.get(part)?;
        }
        Some(value)
    }

    pub fn for_host(facts: &Facts, host: &Host) -> Self {
        Self::new(
            facts.to_variables(),
            host.variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
