//! Workflow states and subjects.

use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// Ordered, finite set of workflow states. The last one is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStates {
    states: Vec<String>,
}

impl WorkflowStates {
    /// Build the enumeration. Must be non-empty, without blanks or duplicates.
    pub fn new<I, S>(states: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for state in states {
            let state = state.into().trim().to_string();
            if state.is_empty() {
                return Err(EngineError::Config("Empty workflow state name".to_string()));
            }
            if list.contains(&state) {
                return Err(EngineError::Config(format!(
                    "Duplicate workflow state: {}",
                    state
                )));
            }
            list.push(state);
        }

        if list.is_empty() {
            return Err(EngineError::Config(
                "At least one workflow state is required".to_string(),
            ));
        }

        Ok(Self { states: list })
    }

    /// Whether `state` is the last one.
    pub fn is_terminal(&self, state: &str) -> EngineResult<bool> {
        let idx = self.index_of(state)?;
        Ok(idx + 1 == self.states.len())
    }

    /// Immediate successor, `None` for the terminal state.
    pub fn successor(&self, state: &str) -> EngineResult<Option<&str>> {
        let idx = self.index_of(state)?;
        Ok(self.states.get(idx + 1).map(String::as_str))
    }

    pub fn terminal(&self) -> &str {
        // non-empty by construction
        self.states.last().map(String::as_str).unwrap_or_default()
    }

    fn index_of(&self, state: &str) -> EngineResult<usize> {
        self.states
            .iter()
            .position(|s| s == state)
            .ok_or_else(|| EngineError::UnknownState(state.to_string()))
    }
}

impl Default for WorkflowStates {
    fn default() -> Self {
        Self {
            states: vec!["A".to_string(), "B".to_string(), "Final".to_string()],
        }
    }
}

/// Entity being advanced through the workflow.
///
/// Keeps the raw record so that fields the engine does not know about are
/// written back untouched on commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub id: String,
    current_state: String,
    state_field: String,
    record: serde_json::Map<String, serde_json::Value>,
}

impl Subject {
    /// Build a subject from a stored record.
    pub fn from_record(
        record: &serde_json::Value,
        id_field: &str,
        state_field: &str,
    ) -> EngineResult<Self> {
        let fields = record
            .as_object()
            .ok_or_else(|| EngineError::Store("Subject record must be an object".to_string()))?;

        let id = match fields.get(id_field) {
            Some(serde_json::Value::Null) | None => {
                return Err(EngineError::Store(format!(
                    "Subject record has no '{}' field",
                    id_field
                )))
            }
            Some(raw) => Value::from_json(raw).to_string(),
        };

        let current_state = match fields.get(state_field) {
            Some(serde_json::Value::String(state)) => state.trim().to_string(),
            _ => {
                return Err(EngineError::Store(format!(
                    "Subject '{}' has no string '{}' field",
                    id, state_field
                )))
            }
        };

        Ok(Self {
            id,
            current_state,
            state_field: state_field.to_string(),
            record: fields.clone(),
        })
    }

    pub fn state(&self) -> &str {
        &self.current_state
    }

    /// Move to `state`, keeping the record in sync.
    pub fn set_state(&mut self, state: &str) {
        self.current_state = state.to_string();
        self.record.insert(
            self.state_field.clone(),
            serde_json::Value::String(state.to_string()),
        );
    }

    /// Record view placed in the variable context.
    pub fn project(&self) -> Value {
        Value::project(&serde_json::Value::Object(self.record.clone()))
    }

    pub fn to_record(&self) -> serde_json::Value {
        serde_json::Value::Object(self.record.clone())
    }
}
