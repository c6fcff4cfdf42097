//! Condition evaluation for `if` steps.
//!
//! Compares a resolved value against an expected value under one of six
//! operators. Equality works on trimmed string forms; ordering coerces the
//! expected value into the actual value's type before comparing.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::value::{parse_datetime, Value};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// `==`
    #[serde(rename = "==")]
    Eq,
    /// `!=`
    #[serde(rename = "!=")]
    Ne,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    Gte,
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    Lte,
}

impl FromStr for Operator {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Gte),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Lte),
            other => Err(EngineError::UnsupportedOperator(other.to_string())),
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        };
        write!(f, "{}", symbol)
    }
}

/// Type-aware condition evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Create a new condition evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `actual <operator> expected`.
    ///
    /// A null `actual` is `false` before the operator is even looked at.
    pub fn evaluate(&self, actual: &Value, operator: &str, expected: &Value) -> EngineResult<bool> {
        if actual.is_null() {
            return Ok(false);
        }

        let operator: Operator = operator.parse()?;
        self.evaluate_op(actual, operator, expected)
    }

    /// Evaluate with an already parsed operator.
    pub fn evaluate_op(&self, actual: &Value, operator: Operator, expected: &Value) -> EngineResult<bool> {
        if actual.is_null() {
            return Ok(false);
        }

        let result = match operator {
            Operator::Eq => string_form(actual) == string_form(expected),
            Operator::Ne => string_form(actual) != string_form(expected),
            Operator::Gt => compare(actual, expected)? == Ordering::Greater,
            Operator::Gte => compare(actual, expected)? != Ordering::Less,
            Operator::Lt => compare(actual, expected)? == Ordering::Less,
            Operator::Lte => compare(actual, expected)? != Ordering::Greater,
        };

        Ok(result)
    }
}

fn string_form(value: &Value) -> String {
    value.to_string().trim().to_string()
}

fn compare(actual: &Value, expected: &Value) -> EngineResult<Ordering> {
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a.partial_cmp(&b).ok_or_else(|| {
            EngineError::NotComparable(format!("cannot order {} and {}", a, b))
        });
    }

    match actual {
        Value::Null | Value::List(_) | Value::Record(_) => {
            return Err(EngineError::NotComparable(format!(
                "{} values have no ordering",
                actual.type_name()
            )));
        }
        _ => {}
    }
    if expected.is_null() {
        return Err(EngineError::NotComparable(
            "cannot order against null".to_string(),
        ));
    }

    let coerced = coerce_to(expected, actual).unwrap_or_else(|| expected.clone());
    native_cmp(actual, &coerced)
}

/// Convert `expected` into the type of `like`, if a conversion exists.
///
/// Numeric pairs never get here; `compare` orders them first.
fn coerce_to(expected: &Value, like: &Value) -> Option<Value> {
    match like {
        Value::String(_) => Some(Value::String(expected.to_string())),
        Value::Int(_) => match expected {
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Value::Int)
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(Value::Float))
            }
            Value::Bool(b) => Some(Value::Int(i64::from(*b))),
            _ => None,
        },
        Value::Float(_) => match expected {
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::Float),
            Value::Bool(b) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),
            _ => None,
        },
        Value::Bool(_) => match expected {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Int(i) => Some(Value::Bool(*i != 0)),
            _ => None,
        },
        Value::DateTime(_) => match expected {
            Value::DateTime(dt) => Some(Value::DateTime(*dt)),
            Value::String(s) => parse_datetime(s).map(Value::DateTime),
            _ => None,
        },
        _ => None,
    }
}

fn native_cmp(actual: &Value, expected: &Value) -> EngineResult<Ordering> {
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a.partial_cmp(&b).ok_or_else(|| {
            EngineError::NotComparable(format!("cannot order {} and {}", a, b))
        });
    }

    match (actual, expected) {
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Ok(a.as_str().cmp(b.as_str())),
        (Value::DateTime(a), Value::DateTime(b)) => Ok(a.cmp(b)),
        _ => Err(EngineError::TypeMismatch(format!(
            "cannot order {} against {}",
            actual.type_name(),
            expected.type_name()
        ))),
    }
}
