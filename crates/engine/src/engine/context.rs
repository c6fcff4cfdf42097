//! Variable context for a single rule run.
//!
//! Holds every variable a rule reads or writes, plus the reserved keys the
//! interpreter maintains. A fresh context is built for each rule run and
//! dropped when the run completes.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::value::{FromValue, Value};

/// Pass/fail flag of the run.
pub const STATUS: &str = "Status";
/// Human-readable reason attached to the result.
pub const REASON: &str = "Reason";
/// Set by `break`, cleared by the enclosing loop.
pub const BREAK_SIGNAL: &str = "BreakSignal";
/// Set by `continue`, cleared by the enclosing loop.
pub const CONTINUE_SIGNAL: &str = "ContinueSignal";

/// Segment that yields the length of a list during path resolution.
const COUNT_SEGMENT: &str = "Count";

/// Outcome of a rule run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuleOutcome {
    /// Whether the subject qualifies for its next state.
    pub status: bool,
    /// Reason reported by the rule (may be empty).
    pub reason: String,
}

/// Named-variable store with dotted-path resolution.
#[derive(Debug, Clone)]
pub struct VariableContext {
    variables: HashMap<String, Value>,
}

impl Default for VariableContext {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableContext {
    /// Create a context seeded with the reserved keys.
    pub fn new() -> Self {
        let mut variables = HashMap::new();
        variables.insert(STATUS.to_string(), Value::Bool(false));
        variables.insert(REASON.to_string(), Value::String(String::new()));
        variables.insert(BREAK_SIGNAL.to_string(), Value::Bool(false));
        variables.insert(CONTINUE_SIGNAL.to_string(), Value::Bool(false));
        Self { variables }
    }

    /// Set a variable, overwriting any previous value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> EngineResult<()> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidName(name.to_string()));
        }
        self.variables.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Get a variable that must exist.
    pub fn get(&self, name: &str) -> EngineResult<&Value> {
        self.variables
            .get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    /// Get a variable viewed as `T`; `None` when absent or of another shape.
    pub fn try_get<T: FromValue>(&self, name: &str) -> Option<T> {
        self.variables.get(name).and_then(T::from_value)
    }

    /// Whether a variable is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Resolve a dotted path. Any break in the chain yields null.
    pub fn resolve_path(&self, path: &str) -> Value {
        let path = path.trim();
        let path = path.strip_prefix('@').unwrap_or(path);
        if path.is_empty() {
            return Value::Null;
        }

        let mut segments = path.split('.');
        let mut current = match segments.next().and_then(|root| self.variables.get(root)) {
            Some(value) => value,
            None => return Value::Null,
        };

        for segment in segments {
            match current {
                Value::Record(fields) => match fields.get(segment) {
                    Some(next) => current = next,
                    None => return Value::Null,
                },
                Value::List(items) if segment == COUNT_SEGMENT => {
                    return Value::Int(items.len() as i64);
                }
                Value::List(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    Some(next) => current = next,
                    None => return Value::Null,
                },
                _ => return Value::Null,
            }
        }

        current.clone()
    }

    /// `@path` strings resolve through the context; anything else is a literal.
    pub fn evaluate_value(&self, input: &Value) -> Value {
        match input {
            Value::String(s) if s.starts_with('@') => self.resolve_path(&s[1..]),
            other => other.clone(),
        }
    }

    /// Read and clear a boolean signal flag.
    pub fn take_signal(&mut self, name: &str) -> bool {
        let raised = self.try_get::<bool>(name).unwrap_or(false);
        if raised {
            self.variables.insert(name.to_string(), Value::Bool(false));
        }
        raised
    }

    /// Current `Status`/`Reason` as a rule outcome.
    ///
    /// A non-boolean `Status` counts as passed only when its string form is
    /// `true`; a missing `Reason` is empty.
    pub fn outcome(&self) -> RuleOutcome {
        let status = match self.variables.get(STATUS) {
            Some(Value::Bool(b)) => *b,
            Some(other) => other.to_string().trim().eq_ignore_ascii_case("true"),
            None => false,
        };
        let reason = self
            .variables
            .get(REASON)
            .map(|v| v.to_string())
            .unwrap_or_default();

        RuleOutcome { status, reason }
    }
}
