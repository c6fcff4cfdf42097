//! Stateflow Engine
//!
//! Advances entities through an ordered set of workflow states. Each state
//! owns a rule: a small JSON-defined program of steps (fetch, assign, branch,
//! loop, compute durations, log, stop) that decides whether an entity may
//! move on to the next state.
//!
//! The engine reaches the outside world only through the seams in [`store`]
//! and the [`logging::ProcessLog`] collaborator.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod rules;
pub mod store;
pub mod value;

pub use config::{EngineConfig, FailurePolicy};
pub use engine::{
    BatchReport, HaltKind, RuleOutcome, StepInterpreter, Subject, SubjectOutcome,
    VariableContext, WorkflowEngine, WorkflowStates,
};
pub use error::{EngineError, EngineResult};
pub use logging::{BufferedLog, LogLevel, LogSource, ProcessLog, TracingLog};
pub use rules::{parse_rule, parse_rule_file, parse_rule_yaml, RuleProgram};
pub use store::{
    EntityStore, EqualityFilter, FileRuleSource, MemoryEntityStore, MemoryRuleSource,
    MemorySubjectRepository, RuleSource, SubjectRepository,
};
pub use value::Value;
