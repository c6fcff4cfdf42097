//! Rule execution and workflow engine.
//!
//! - **Context**: per-run variable store with path resolution
//! - **Evaluator**: type-aware condition comparisons
//! - **Interpreter**: walks a rule program step by step
//! - **State**: workflow states and subjects
//! - **Orchestrator**: advances subjects through the workflow

pub mod context;
pub mod evaluator;
pub mod interpreter;
pub mod orchestrator;
pub mod state;

pub use context::{RuleOutcome, VariableContext};
pub use evaluator::{ConditionEvaluator, Operator};
pub use interpreter::{ControlSignal, StepInterpreter};
pub use orchestrator::{BatchReport, HaltKind, SubjectOutcome, WorkflowEngine};
pub use state::{Subject, WorkflowStates};
