//! Rule sources.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::EngineResult;
use crate::rules::{parse_rule_file, RuleProgram};
use crate::store::RuleSource;

/// Reads one rule document per state from a directory.
///
/// The file name comes from a pattern such as `Rule-{state}.json`. A missing
/// file means the state has no rule.
#[derive(Debug, Clone)]
pub struct FileRuleSource {
    dir: PathBuf,
    pattern: String,
}

impl FileRuleSource {
    pub fn new(dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            pattern: pattern.into(),
        }
    }

    /// Path of the rule document for `state`.
    pub fn path_for(&self, state: &str) -> PathBuf {
        self.dir.join(self.pattern.replace("{state}", state))
    }
}

#[async_trait]
impl RuleSource for FileRuleSource {
    async fn load(&self, state: &str) -> EngineResult<Option<Arc<RuleProgram>>> {
        let path = self.path_for(state);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(state, path = %path.display(), "No rule file for state");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let program = parse_rule_file(&path, &contents)?;
        tracing::debug!(state, program = %program.name, "Loaded rule");
        Ok(Some(Arc::new(program)))
    }
}

/// Rule programs registered in memory, keyed by state.
#[derive(Debug, Default)]
pub struct MemoryRuleSource {
    programs: HashMap<String, Arc<RuleProgram>>,
    lookups: AtomicUsize,
}

impl MemoryRuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the program for a state.
    pub fn insert(&mut self, state: impl Into<String>, program: RuleProgram) {
        self.programs.insert(state.into(), Arc::new(program));
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, state: impl Into<String>, program: RuleProgram) -> Self {
        self.insert(state, program);
        self
    }

    /// Number of `load` calls so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuleSource for MemoryRuleSource {
    async fn load(&self, state: &str) -> EngineResult<Option<Arc<RuleProgram>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.programs.get(state).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::rules::parse_rule;

    const RULE: &str = r#"{"name": "Rule-A", "steps": [{"id": "start", "action": "stop", "status": true}]}"#;

    #[tokio::test]
    async fn test_file_source_loads_by_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Rule-A.json"), RULE).unwrap();

        let source = FileRuleSource::new(dir.path(), "Rule-{state}.json");
        let program = source.load("A").await.unwrap().unwrap();
        assert_eq!(program.name, "Rule-A");

        assert!(source.load("B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_source_yaml_and_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("A.yaml"),
            "steps:\n  - id: start\n    action: stop\n    status: true\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("B.yaml"), "steps:\n  - id: other\n    action: break\n").unwrap();

        let source = FileRuleSource::new(dir.path(), "{state}.yaml");
        let program = source.load("A").await.unwrap().unwrap();
        assert_eq!(program.name, "A");

        let err = source.load("B").await.unwrap_err();
        assert!(matches!(err, EngineError::MissingStart(_)));
    }

    #[tokio::test]
    async fn test_memory_source_counts_lookups() {
        let source = MemoryRuleSource::new().with("A", parse_rule(RULE).unwrap());
        assert!(source.load("A").await.unwrap().is_some());
        assert!(source.load("B").await.unwrap().is_none());
        assert_eq!(source.lookups(), 2);
    }
}
