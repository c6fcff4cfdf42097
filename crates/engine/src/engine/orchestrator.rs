//! Workflow engine.
//!
//! Advances subjects through the ordered workflow states by:
//! - Loading the rule program of the subject's current state
//! - Running it against a fresh context seeded with the subject
//! - Moving to the successor state while rules pass
//!
//! Subjects are processed one after another and the repository receives a
//! single commit once the whole batch is done.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{EngineConfig, FailurePolicy};
use crate::error::EngineResult;
use crate::logging::{LogLevel, LogSource, ProcessLog};
use crate::store::{EntityStore, RuleSource, SubjectRepository};

use super::context::VariableContext;
use super::interpreter::StepInterpreter;
use super::state::{Subject, WorkflowStates};

/// Why a subject stopped moving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltKind {
    /// Reached the terminal state.
    Terminal,
    /// The current state has no rule.
    NoRule,
    /// The rule did not pass.
    Rejected { reason: String },
    /// The rule passed but the state has no successor.
    NoSuccessor,
    /// The rule run failed (only recorded under the `isolate` policy).
    Failed { error: String },
}

/// Per-subject result of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectOutcome {
    pub subject_id: String,
    pub initial_state: String,
    pub final_state: String,
    pub halt: HaltKind,
    pub transitions: usize,
}

/// Result of a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<SubjectOutcome>,
}

impl BatchReport {
    /// Subjects that moved at least once.
    pub fn advanced(&self) -> usize {
        self.outcomes.iter().filter(|o| o.transitions > 0).count()
    }

    /// Subjects whose run failed.
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.halt, HaltKind::Failed { .. }))
            .count()
    }

    /// Outcomes grouped by final state.
    pub fn by_final_state(&self) -> BTreeMap<&str, Vec<&SubjectOutcome>> {
        let mut groups: BTreeMap<&str, Vec<&SubjectOutcome>> = BTreeMap::new();
        for outcome in &self.outcomes {
            groups
                .entry(outcome.final_state.as_str())
                .or_default()
                .push(outcome);
        }
        groups
    }
}

/// Drives subjects through the workflow.
pub struct WorkflowEngine {
    interpreter: StepInterpreter,
    rules: Arc<dyn RuleSource>,
    log: Arc<dyn ProcessLog>,
    states: WorkflowStates,
    subject_key: String,
    policy: FailurePolicy,
}

impl WorkflowEngine {
    /// Create an engine with the default subject key and the fail-fast policy.
    pub fn new(
        store: Arc<dyn EntityStore>,
        rules: Arc<dyn RuleSource>,
        log: Arc<dyn ProcessLog>,
        states: WorkflowStates,
    ) -> Self {
        Self {
            interpreter: StepInterpreter::new(store, log.clone()),
            rules,
            log,
            states,
            subject_key: "subject".to_string(),
            policy: FailurePolicy::default(),
        }
    }

    /// Create an engine from configuration.
    pub fn from_config(
        config: &EngineConfig,
        store: Arc<dyn EntityStore>,
        rules: Arc<dyn RuleSource>,
        log: Arc<dyn ProcessLog>,
    ) -> EngineResult<Self> {
        let states = WorkflowStates::new(config.states.iter().cloned())?;
        Ok(Self::new(store, rules, log, states)
            .with_subject_key(&config.subject_key)
            .with_failure_policy(config.failure_policy))
    }

    /// Context variable the subject is bound to.
    pub fn with_subject_key(mut self, key: &str) -> Self {
        self.subject_key = key.to_string();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn states(&self) -> &WorkflowStates {
        &self.states
    }

    /// Advance one subject as far as its rules allow.
    pub async fn advance(&self, subject: &mut Subject) -> EngineResult<SubjectOutcome> {
        let initial_state = subject.state().to_string();
        let mut transitions = 0;
        let halt = self.advance_tracked(subject, &mut transitions).await?;

        Ok(SubjectOutcome {
            subject_id: subject.id.clone(),
            initial_state,
            final_state: subject.state().to_string(),
            halt,
            transitions,
        })
    }

    async fn advance_tracked(
        &self,
        subject: &mut Subject,
        transitions: &mut usize,
    ) -> EngineResult<HaltKind> {
        loop {
            let state = subject.state().to_string();

            if self.states.is_terminal(&state)? {
                self.log(
                    &format!("Subject {} reached final state. Exiting workflow loop.", subject.id),
                    LogLevel::Info,
                );
                return Ok(HaltKind::Terminal);
            }

            let Some(program) = self.rules.load(&state).await? else {
                self.log(
                    &format!(
                        "No rule for state {}. Exiting workflow for subject {}.",
                        state, subject.id
                    ),
                    LogLevel::Warn,
                );
                return Ok(HaltKind::NoRule);
            };

            self.log(
                &format!(
                    "Executing rule '{}' for subject {} at state {}",
                    program.name, subject.id, state
                ),
                LogLevel::Info,
            );

            let mut ctx = VariableContext::new();
            ctx.set(&self.subject_key, subject.project())?;
            let outcome = self.interpreter.execute(&program, &mut ctx).await?;

            self.log(
                &format!(
                    "Rule result for subject {}: Status={}, Reason='{}', CurrentState={}",
                    subject.id, outcome.status, outcome.reason, state
                ),
                LogLevel::Debug,
            );

            if !outcome.status {
                self.log(
                    &format!(
                        "Rule failed for subject {} at state {} with reason: {}. Exiting workflow loop.",
                        subject.id, state, outcome.reason
                    ),
                    LogLevel::Info,
                );
                return Ok(HaltKind::Rejected {
                    reason: outcome.reason,
                });
            }

            match self.states.successor(&state)? {
                Some(next) => {
                    tracing::info!(subject = %subject.id, from = %state, to = next, "Transition");
                    self.log(
                        &format!(
                            "Transitioning subject {} from state {} to {}",
                            subject.id, state, next
                        ),
                        LogLevel::Success,
                    );
                    subject.set_state(next);
                    *transitions += 1;
                }
                None => {
                    self.log(
                        &format!(
                            "No next state found for subject {}. Final state reached.",
                            subject.id
                        ),
                        LogLevel::Info,
                    );
                    return Ok(HaltKind::NoSuccessor);
                }
            }
        }
    }

    /// Advance every subject in order, honoring the failure policy.
    pub async fn run(&self, subjects: &mut [Subject]) -> EngineResult<BatchReport> {
        let mut report = BatchReport::default();

        for subject in subjects.iter_mut() {
            self.log(
                &format!(
                    "Starting workflow for subject {}, initial state: {}",
                    subject.id,
                    subject.state()
                ),
                LogLevel::Info,
            );

            let initial_state = subject.state().to_string();
            let mut transitions = 0;
            match self.advance_tracked(subject, &mut transitions).await {
                Ok(halt) => report.outcomes.push(SubjectOutcome {
                    subject_id: subject.id.clone(),
                    initial_state,
                    final_state: subject.state().to_string(),
                    halt,
                    transitions,
                }),
                Err(e) => {
                    self.log(
                        &format!(
                            "Rule execution failed for subject {} at state {}: {}",
                            subject.id,
                            subject.state(),
                            e
                        ),
                        LogLevel::Error,
                    );
                    match self.policy {
                        FailurePolicy::FailFast => return Err(e),
                        FailurePolicy::Isolate => report.outcomes.push(SubjectOutcome {
                            subject_id: subject.id.clone(),
                            initial_state,
                            final_state: subject.state().to_string(),
                            halt: HaltKind::Failed {
                                error: e.to_string(),
                            },
                            transitions,
                        }),
                    }
                }
            }
        }

        Ok(report)
    }

    /// Load subjects, run the batch and commit once at the end.
    ///
    /// Nothing is committed when the batch aborts.
    pub async fn run_repository(&self, repository: &dyn SubjectRepository) -> EngineResult<BatchReport> {
        let mut subjects = repository.load_subjects().await?;
        tracing::info!(subjects = subjects.len(), policy = %self.policy, "Workflow batch started");

        let report = self.run(&mut subjects).await?;
        repository.commit(&subjects).await?;

        self.log(
            "Workflow engine run completed and changes saved.",
            LogLevel::Success,
        );
        Ok(report)
    }

    fn log(&self, message: &str, level: LogLevel) {
        self.log.log(message, LogSource::Engine, level);
    }
}
