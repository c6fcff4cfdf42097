//! Collaborator seams.
//!
//! The interpreter and the workflow engine reach persistence only through
//! these traits:
//! - [`EntityStore`]: equality-filtered lookups by entity kind
//! - [`SubjectRepository`]: loads subjects and receives the end-of-batch commit
//! - [`RuleSource`]: maps a workflow state to its rule program

pub mod memory;
pub mod rules;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::state::Subject;
use crate::error::EngineResult;
use crate::rules::RuleProgram;
use crate::value::Value;

pub use memory::{MemoryEntityStore, MemorySubjectRepository};
pub use rules::{FileRuleSource, MemoryRuleSource};

/// Conjunction of field equality constraints.
pub type EqualityFilter = BTreeMap<String, Value>;

/// Read access to entities by kind.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Single match, or null when nothing matches.
    async fn fetch_one(&self, kind: &str, filter: &EqualityFilter) -> EngineResult<Value>;

    /// All matches, possibly none.
    async fn fetch_list(&self, kind: &str, filter: &EqualityFilter) -> EngineResult<Vec<Value>>;
}

/// Source and sink of the subjects of a batch.
#[async_trait]
pub trait SubjectRepository: Send + Sync {
    async fn load_subjects(&self) -> EngineResult<Vec<Subject>>;

    /// Persist every subject mutation of the batch at once.
    async fn commit(&self, subjects: &[Subject]) -> EngineResult<()>;
}

/// Rule program per workflow state.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// `None` when the state has no rule.
    async fn load(&self, state: &str) -> EngineResult<Option<Arc<RuleProgram>>>;
}
