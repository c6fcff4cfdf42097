//! Error types for the Stateflow engine.
//!
//! Every error here is fatal to the rule run that raised it. Expected
//! outcomes (a false condition, a null field, a state without a rule file)
//! are modeled as ordinary control flow and never surface as errors.

use thiserror::Error;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Variable name is empty or whitespace.
    #[error("Invalid variable name: '{0}'")]
    InvalidName(String),

    /// Required variable is absent from the context.
    #[error("Variable not found: {0}")]
    NotFound(String),

    /// Operand has the wrong type for the operation.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Operand provides no ordering.
    #[error("Value is not comparable: {0}")]
    NotComparable(String),

    /// Condition operator outside the supported set.
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// Duration unit outside days/months/years.
    #[error("Unsupported duration unit: {0}")]
    UnsupportedUnit(String),

    /// Step action outside the supported set.
    #[error("Step '{step}': unknown action '{action}'")]
    UnknownAction { step: String, action: String },

    /// Entity kind not known to the store.
    #[error("Entity '{0}' not found in store")]
    EntityNotFound(String),

    /// Rule document has no step with id `start`.
    #[error("Rule '{0}' has no 'start' step")]
    MissingStart(String),

    /// A step id was reached that the program does not define.
    #[error("Rule '{program}': step '{step}' is referenced but not defined")]
    DanglingReference { program: String, step: String },

    /// Subject carries a state outside the declared enumeration.
    #[error("Unknown workflow state: {0}")]
    UnknownState(String),

    /// Malformed rule document or data file.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Entity store or subject repository failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}
