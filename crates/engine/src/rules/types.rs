//! Rule document types.
//!
//! A rule is a named graph of steps keyed by id:
//! - every step carries an `action` tag and an optional `next` pointer
//! - `if` steps branch into `then`/`else` lists of step ids
//! - `foreach` steps run `body` step ids per list item
//! - execution starts at the step with id `start`

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};

/// Id of the entry step of every rule.
pub const START_STEP: &str = "start";

/// Action tags a step may carry.
pub const KNOWN_ACTIONS: &[&str] = &[
    "fetch",
    "fetchList",
    "assign",
    "calculateDuration",
    "if",
    "foreach",
    "break",
    "continue",
    "stop",
    "log",
];

// ============================================================================
// Action payloads
// ============================================================================

/// Entity lookup used by `fetch` and `fetchList`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchSpec {
    /// Entity kind to query.
    pub entity: String,

    /// Field equality constraints. Values starting with `@` are resolved
    /// against the context.
    #[serde(default)]
    pub filter: BTreeMap<String, serde_json::Value>,

    /// Variable receiving the result.
    #[serde(rename = "storeAs")]
    pub store_as: String,
}

/// Condition of an `if` step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Path of the actual value.
    pub field: String,

    /// Comparison operator, checked when the step runs.
    pub operator: String,

    /// Expected value (literal or `@path`).
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Step action with its payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action")]
pub enum Action {
    /// Fetch a single entity (or null).
    #[serde(rename = "fetch")]
    Fetch(FetchSpec),

    /// Fetch a list of entities.
    #[serde(rename = "fetchList")]
    FetchList(FetchSpec),

    /// Set a variable.
    #[serde(rename = "assign")]
    Assign {
        variable: String,
        #[serde(default)]
        value: serde_json::Value,
    },

    /// Difference between two date-times.
    #[serde(rename = "calculateDuration")]
    CalculateDuration {
        #[serde(rename = "startDate")]
        start_date: String,
        #[serde(rename = "endDate")]
        end_date: String,
        #[serde(default)]
        unit: Option<String>,
        #[serde(rename = "storeAs")]
        store_as: String,
    },

    /// Conditional dispatch into sub-chains.
    #[serde(rename = "if")]
    If {
        condition: Condition,
        #[serde(default)]
        then: Vec<String>,
        #[serde(default)]
        r#else: Vec<String>,
    },

    /// Loop over a list.
    #[serde(rename = "foreach")]
    Foreach {
        source: String,
        var: String,
        #[serde(default)]
        body: Vec<String>,
    },

    /// Leave the innermost loop.
    #[serde(rename = "break")]
    Break,

    /// Skip to the next loop item.
    #[serde(rename = "continue")]
    Continue,

    /// Set the outcome and end the run.
    #[serde(rename = "stop")]
    Stop {
        #[serde(default, deserialize_with = "lenient_bool")]
        status: bool,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Emit a message through the process log.
    #[serde(rename = "log")]
    Log {
        message: String,
        #[serde(default)]
        level: Option<String>,
    },
}

impl Action {
    /// Action tag as written in rule documents.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Fetch(_) => "fetch",
            Action::FetchList(_) => "fetchList",
            Action::Assign { .. } => "assign",
            Action::CalculateDuration { .. } => "calculateDuration",
            Action::If { .. } => "if",
            Action::Foreach { .. } => "foreach",
            Action::Break => "break",
            Action::Continue => "continue",
            Action::Stop { .. } => "stop",
            Action::Log { .. } => "log",
        }
    }

    /// Step ids this action dispatches into (branches and loop bodies).
    pub fn referenced_ids(&self) -> Vec<&str> {
        match self {
            Action::If { then, r#else, .. } => then
                .iter()
                .chain(r#else.iter())
                .map(String::as_str)
                .collect(),
            Action::Foreach { body, .. } => body.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Steps and programs
// ============================================================================

/// One instruction of a rule program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Unique id within the program.
    pub id: String,

    /// Step that follows this one in its chain.
    #[serde(default)]
    pub next: Option<String>,

    /// Action and payload.
    #[serde(flatten)]
    pub action: Action,
}

/// A parsed rule: named, indexed step graph entered at `start`.
#[derive(Debug, Clone)]
pub struct RuleProgram {
    pub name: String,
    steps: HashMap<String, Step>,
    order: Vec<String>,
}

impl RuleProgram {
    /// Build a program from steps in document order.
    ///
    /// Fails on duplicate ids and when no `start` step exists.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> EngineResult<Self> {
        let name = name.into();
        let mut index = HashMap::with_capacity(steps.len());
        let mut order = Vec::with_capacity(steps.len());

        for step in steps {
            if index.contains_key(&step.id) {
                return Err(EngineError::Parse(format!(
                    "Rule '{}': duplicate step id '{}'",
                    name, step.id
                )));
            }
            order.push(step.id.clone());
            index.insert(step.id.clone(), step);
        }

        if !index.contains_key(START_STEP) {
            return Err(EngineError::MissingStart(name));
        }

        Ok(Self {
            name,
            steps: index,
            order,
        })
    }

    /// Look up a step that is about to run.
    pub fn step(&self, id: &str) -> EngineResult<&Step> {
        self.steps
            .get(id)
            .ok_or_else(|| EngineError::DanglingReference {
                program: self.name.clone(),
                step: id.to_string(),
            })
    }

    /// Steps in document order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(|id| self.steps.get(id))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Ids referenced by `next`, `then`, `else` or `body` that no step defines.
    ///
    /// Returns `(referencing step, missing id)` pairs. Execution only fails
    /// when a missing id is actually reached; this is a lint.
    pub fn dangling_references(&self) -> Vec<(String, String)> {
        let mut dangling = Vec::new();
        for step in self.steps() {
            let targets = step
                .next
                .as_deref()
                .into_iter()
                .chain(step.action.referenced_ids());
            for target in targets {
                if !self.steps.contains_key(target) {
                    dangling.push((step.id.clone(), target.to_string()));
                }
            }
        }
        dangling
    }
}

/// Unit of a `calculateDuration` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationUnit {
    #[default]
    Days,
    Months,
    Years,
}

impl FromStr for DurationUnit {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "days" => Ok(Self::Days),
            "months" => Ok(Self::Months),
            "years" => Ok(Self::Years),
            _ => Err(EngineError::UnsupportedUnit(s.to_string())),
        }
    }
}

/// Accepts `true`, `"true"` (any case) and numbers; null reads as false.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(false),
        Some(Raw::Bool(b)) => Ok(b),
        Some(Raw::Int(i)) => Ok(i != 0),
        Some(Raw::Float(f)) => Ok(f != 0.0),
        Some(Raw::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(serde::de::Error::custom(format!(
                "'{}' is not a valid status",
                text
            ))),
        },
    }
}
