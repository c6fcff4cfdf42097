//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// What the engine does when a subject's rule run fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// First error aborts the batch; nothing is committed.
    #[default]
    FailFast,
    /// Record the error on the subject, keep its state and carry on.
    Isolate,
}

impl std::str::FromStr for FailurePolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "isolate" => Ok(Self::Isolate),
            other => Err(EngineError::Config(format!(
                "Unknown failure policy '{}'. Expected fail_fast or isolate",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::Isolate => write!(f, "isolate"),
        }
    }
}

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `STATEFLOW_`:
/// - `STATEFLOW_RULES_DIR`: Directory holding rule documents (default: "rules")
/// - `STATEFLOW_RULE_FILE_PATTERN`: File name per state (default: "Rule-{state}.json")
/// - `STATEFLOW_STATES`: Comma-separated ordered states (default: "A,B,Final")
/// - `STATEFLOW_SUBJECT_KIND`: Entity kind of subjects (default: "People")
/// - `STATEFLOW_SUBJECT_KEY`: Context variable holding the subject (default: "subject")
/// - `STATEFLOW_ID_FIELD`: Subject identifier field (default: "Id")
/// - `STATEFLOW_STATE_FIELD`: Subject state field (default: "CurrentState")
/// - `STATEFLOW_FAILURE_POLICY`: `fail_fast` or `isolate` (default: "fail_fast")
/// - `STATEFLOW_LOG_DIR`: Directory for saved run logs (default: "logs")
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,

    #[serde(default = "default_rule_file_pattern")]
    pub rule_file_pattern: String,

    #[serde(default = "default_states")]
    pub states: Vec<String>,

    #[serde(default = "default_subject_kind")]
    pub subject_kind: String,

    #[serde(default = "default_subject_key")]
    pub subject_key: String,

    #[serde(default = "default_id_field")]
    pub id_field: String,

    #[serde(default = "default_state_field")]
    pub state_field: String,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from("rules")
}

fn default_rule_file_pattern() -> String {
    "Rule-{state}.json".to_string()
}

fn default_states() -> Vec<String> {
    vec!["A".to_string(), "B".to_string(), "Final".to_string()]
}

fn default_subject_kind() -> String {
    "People".to_string()
}

fn default_subject_key() -> String {
    "subject".to_string()
}

fn default_id_field() -> String {
    "Id".to_string()
}

fn default_state_field() -> String {
    "CurrentState".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `STATEFLOW_`.
    pub fn from_env() -> EngineResult<Self> {
        let config = envy::prefixed("STATEFLOW_").from_env::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from explicit key/value pairs (keys carry the prefix).
    pub fn from_pairs<I>(pairs: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed("STATEFLOW_").from_iter::<_, EngineConfig>(pairs)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that deserialization alone cannot.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.rule_file_pattern.contains("{state}") {
            return Err(EngineError::Config(format!(
                "Rule file pattern '{}' must contain '{{state}}'",
                self.rule_file_pattern
            )));
        }
        if self.subject_key.trim().is_empty() {
            return Err(EngineError::Config(
                "Subject key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Rule file name for a state.
    pub fn rule_file_name(&self, state: &str) -> String {
        self.rule_file_pattern.replace("{state}", state)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules_dir: default_rules_dir(),
            rule_file_pattern: default_rule_file_pattern(),
            states: default_states(),
            subject_kind: default_subject_kind(),
            subject_key: default_subject_key(),
            id_field: default_id_field(),
            state_field: default_state_field(),
            failure_policy: FailurePolicy::default(),
            log_dir: default_log_dir(),
        }
    }
}
