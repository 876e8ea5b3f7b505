//! Validation check handler.
//!
//! Conditions are evaluated after template resolution, so `value` is usually
//! a reference such as `"{{ steps.show.result.data.parsed.version }}"`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::StepScope;
use crate::error::StepError;
use crate::registry::{ParamKind, ParamSchema, StepHandler};
use crate::result::StepResult;

/// Comparison operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equality check.
    #[default]
    Eq,
    /// Inequality check.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Gte,
    /// Less than or equal.
    Lte,
    /// String or array contains.
    Contains,
    /// Regex match.
    Matches,
    /// Value is truthy.
    Truthy,
    /// Value is falsy.
    Falsy,
    /// Value is in list.
    In,
    /// Value is not in list.
    NotIn,
}

/// One condition of a check step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Value under test.
    #[serde(default)]
    pub value: serde_json::Value,

    #[serde(default)]
    pub op: Operator,

    /// Value to compare against.
    #[serde(default)]
    pub expected: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct CheckConfig {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    message: Option<String>,
}

/// Evaluates conditions; every condition must hold.
#[derive(Debug, Default)]
pub struct CheckHandler;

impl CheckHandler {
    /// Evaluate a single condition.
    pub fn evaluate(condition: &Condition) -> Result<bool, StepError> {
        let left = &condition.value;
        let right = &condition.expected;

        match condition.op {
            Operator::Eq => Ok(loosely_equal(left, right)),
            Operator::Ne => Ok(!loosely_equal(left, right)),
            Operator::Gt => compare_numeric(left, right, |a, b| a > b),
            Operator::Lt => compare_numeric(left, right, |a, b| a < b),
            Operator::Gte => compare_numeric(left, right, |a, b| a >= b),
            Operator::Lte => compare_numeric(left, right, |a, b| a <= b),
            Operator::Contains => match left {
                serde_json::Value::String(s) => Ok(s.contains(&value_to_string(right))),
                serde_json::Value::Array(arr) => Ok(arr.iter().any(|v| loosely_equal(v, right))),
                serde_json::Value::Object(obj) => Ok(obj.contains_key(&value_to_string(right))),
                _ => Ok(false),
            },
            Operator::Matches => {
                let pattern = right
                    .as_str()
                    .ok_or_else(|| StepError::Check("'matches' expects a string pattern".to_string()))?;
                let re = regex::Regex::new(pattern)
                    .map_err(|e| StepError::Check(format!("Invalid regex: {}", e)))?;
                Ok(re.is_match(&value_to_string(left)))
            }
            Operator::Truthy => Ok(is_truthy(left)),
            Operator::Falsy => Ok(!is_truthy(left)),
            Operator::In => match right {
                serde_json::Value::Array(arr) => Ok(arr.iter().any(|v| loosely_equal(v, left))),
                _ => Err(StepError::Check("'in' expects a list".to_string())),
            },
            Operator::NotIn => match right {
                serde_json::Value::Array(arr) => Ok(!arr.iter().any(|v| loosely_equal(v, left))),
                _ => Err(StepError::Check("'not_in' expects a list".to_string())),
            },
        }
    }
}

#[async_trait]
impl StepHandler for CheckHandler {
    fn name(&self) -> &'static str {
        "check"
    }

    fn description(&self) -> &'static str {
        "Validate values from the execution context"
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("conditions", ParamKind::Array, "List of {value, op, expected}")
            .optional("message", ParamKind::String, "Message reported on failure")
    }

    async fn execute(
        &self,
        params: &serde_json::Value,
        _scope: &mut StepScope,
    ) -> Result<StepResult, StepError> {
        let config: CheckConfig = serde_json::from_value(params.clone())
            .map_err(|e| StepError::InvalidParams(format!("Invalid check params: {}", e)))?;
        if config.conditions.is_empty() {
            return Err(StepError::InvalidParams(
                "check step needs at least one condition".to_string(),
            ));
        }

        let mut outcomes = Vec::with_capacity(config.conditions.len());
        for condition in &config.conditions {
            outcomes.push(Self::evaluate(condition)?);
        }

        let data = serde_json::json!({ "results": outcomes });
        match outcomes.iter().position(|held| !held) {
            None => Ok(StepResult::success(
                format!("{} condition(s) held", outcomes.len()),
                data,
            )),
            Some(index) => {
                let c = &config.conditions[index];
                let message = config.message.unwrap_or_else(|| {
                    format!(
                        "Condition {} failed: {} {:?} {}",
                        index, c.value, c.op, c.expected
                    )
                });
                Ok(StepResult::failed(message, data))
            }
        }
    }
}

/// Equality that treats numbers and numeric strings alike.
fn loosely_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    if a == b {
        return true;
    }
    match (value_to_f64(a), value_to_f64(b)) {
        (Some(x), Some(y)) if a.is_number() || b.is_number() => x == y,
        _ => false,
    }
}

fn compare_numeric<F>(
    left: &serde_json::Value,
    right: &serde_json::Value,
    cmp: F,
) -> Result<bool, StepError>
where
    F: Fn(f64, f64) -> bool,
{
    let l = value_to_f64(left)
        .ok_or_else(|| StepError::Check(format!("{} is not numeric", left)))?;
    let r = value_to_f64(right)
        .ok_or_else(|| StepError::Check(format!("{} is not numeric", right)))?;
    Ok(cmp(l, r))
}

fn value_to_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => {
            !s.is_empty() && !matches!(s.to_lowercase().as_str(), "false" | "0" | "no" | "off")
        }
        serde_json::Value::Array(arr) => !arr.is_empty(),
        serde_json::Value::Object(obj) => !obj.is_empty(),
    }
}
