//! Step interpreter.
//!
//! Walks a [`RuleProgram`] from its `start` step, following `next` pointers.
//! `if` branches and `foreach` bodies run each listed id as a full sub-chain,
//! so a branch may continue into any part of the step graph through its own
//! `next` pointers. A [`ControlSignal`] ends the chain that raised it. `break`
//! and `continue` also leave their flag set for the enclosing loop, which
//! checks it after each body id; only `stop` crosses an `if`.

use chrono::{Datelike, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::engine::context::{
    RuleOutcome, VariableContext, BREAK_SIGNAL, CONTINUE_SIGNAL, REASON, STATUS,
};
use crate::engine::evaluator::ConditionEvaluator;
use crate::error::{EngineError, EngineResult};
use crate::logging::{LogLevel, LogSource, ProcessLog};
use crate::rules::{Action, Condition, DurationUnit, FetchSpec, RuleProgram, Step, START_STEP};
use crate::store::{EntityStore, EqualityFilter};
use crate::value::Value;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reason recorded by a `stop` step that does not give one.
pub const DEFAULT_STOP_REASON: &str = "Stopped by rule";

static PATH_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_.]+)").expect("path reference pattern is valid"));

/// How a step or chain finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Carry on with the next step.
    Proceed,
    /// Leave the innermost loop.
    Break,
    /// Skip the rest of the current loop item.
    Continue,
    /// End the whole run.
    Stop,
}

/// Executes rule programs against a variable context.
pub struct StepInterpreter {
    store: Arc<dyn EntityStore>,
    log: Arc<dyn ProcessLog>,
    evaluator: ConditionEvaluator,
}

impl StepInterpreter {
    pub fn new(store: Arc<dyn EntityStore>, log: Arc<dyn ProcessLog>) -> Self {
        Self {
            store,
            log,
            evaluator: ConditionEvaluator::new(),
        }
    }

    /// Run `program` to completion and report the final `Status`/`Reason`.
    pub async fn execute(
        &self,
        program: &RuleProgram,
        ctx: &mut VariableContext,
    ) -> EngineResult<RuleOutcome> {
        tracing::debug!(program = %program.name, "Rule run started");

        let signal = self.run_chain(program, START_STEP, ctx).await?;
        let break_raised = ctx.take_signal(BREAK_SIGNAL);
        let continue_raised = ctx.take_signal(CONTINUE_SIGNAL);
        let escaped = match signal {
            ControlSignal::Break => Some("break"),
            ControlSignal::Continue => Some("continue"),
            _ if break_raised => Some("break"),
            _ if continue_raised => Some("continue"),
            _ => None,
        };
        if let Some(keyword) = escaped {
            tracing::warn!(program = %program.name, keyword, "Loop signal outside of any loop");
            self.log.log(
                &format!("Rule '{}': '{}' outside of a loop", program.name, keyword),
                LogSource::Engine,
                LogLevel::Warn,
            );
        }

        let outcome = ctx.outcome();
        tracing::debug!(
            program = %program.name,
            status = outcome.status,
            reason = %outcome.reason,
            "Rule run finished"
        );
        Ok(outcome)
    }

    /// Run the chain starting at `start` until a step has no `next` or a
    /// non-proceed signal comes back.
    pub fn run_chain<'a>(
        &'a self,
        program: &'a RuleProgram,
        start: &'a str,
        ctx: &'a mut VariableContext,
    ) -> BoxFuture<'a, EngineResult<ControlSignal>> {
        Box::pin(async move {
            let mut cursor = Some(start);
            while let Some(id) = cursor {
                let step = program.step(id)?;
                match self.execute_step(program, step, ctx).await? {
                    ControlSignal::Proceed => cursor = step.next.as_deref(),
                    signal => return Ok(signal),
                }
            }
            Ok(ControlSignal::Proceed)
        })
    }

    async fn execute_step(
        &self,
        program: &RuleProgram,
        step: &Step,
        ctx: &mut VariableContext,
    ) -> EngineResult<ControlSignal> {
        tracing::debug!(
            program = %program.name,
            step = %step.id,
            action = step.action.name(),
            "Executing step"
        );

        let result = match &step.action {
            Action::Fetch(spec) => self.fetch_one(spec, ctx).await,
            Action::FetchList(spec) => self.fetch_list(spec, ctx).await,
            Action::Assign { variable, value } => assign(variable, value, ctx),
            Action::CalculateDuration {
                start_date,
                end_date,
                unit,
                store_as,
            } => calculate_duration(start_date, end_date, unit.as_deref(), store_as, ctx),
            Action::If {
                condition,
                then,
                r#else,
            } => self.run_if(program, condition, then, r#else, ctx).await,
            Action::Foreach { source, var, body } => {
                self.run_foreach(program, source, var, body, ctx).await
            }
            Action::Break => {
                ctx.set(BREAK_SIGNAL, true)?;
                Ok(ControlSignal::Break)
            }
            Action::Continue => {
                ctx.set(CONTINUE_SIGNAL, true)?;
                Ok(ControlSignal::Continue)
            }
            Action::Stop { status, reason } => {
                let reason = reason.as_deref().unwrap_or(DEFAULT_STOP_REASON);
                ctx.set(STATUS, *status)?;
                ctx.set(REASON, reason)?;
                Ok(ControlSignal::Stop)
            }
            Action::Log { message, level } => {
                let level = level
                    .as_deref()
                    .map(LogLevel::parse_lenient)
                    .unwrap_or_default();
                self.log
                    .log(&substitute_paths(message, ctx), LogSource::Rule, level);
                Ok(ControlSignal::Proceed)
            }
        };

        match &result {
            Ok(signal) => tracing::debug!(
                program = %program.name,
                step = %step.id,
                signal = ?signal,
                "Step completed"
            ),
            Err(e) => tracing::debug!(
                program = %program.name,
                step = %step.id,
                error = %e,
                "Step failed"
            ),
        }
        result
    }

    async fn fetch_one(&self, spec: &FetchSpec, ctx: &mut VariableContext) -> EngineResult<ControlSignal> {
        let filter = build_filter(spec, ctx);
        let entity = self.store.fetch_one(&spec.entity, &filter).await?;
        ctx.set(&spec.store_as, entity)?;
        Ok(ControlSignal::Proceed)
    }

    async fn fetch_list(&self, spec: &FetchSpec, ctx: &mut VariableContext) -> EngineResult<ControlSignal> {
        let filter = build_filter(spec, ctx);
        let entities = self.store.fetch_list(&spec.entity, &filter).await?;
        ctx.set(&spec.store_as, Value::List(entities))?;
        Ok(ControlSignal::Proceed)
    }

    async fn run_if(
        &self,
        program: &RuleProgram,
        condition: &Condition,
        then: &[String],
        otherwise: &[String],
        ctx: &mut VariableContext,
    ) -> EngineResult<ControlSignal> {
        let actual = ctx.resolve_path(&condition.field);
        let expected = ctx.evaluate_value(&Value::from_json(&condition.value));
        let matched = self
            .evaluator
            .evaluate(&actual, &condition.operator, &expected)?;

        let branch = if matched { then } else { otherwise };
        for id in branch {
            // break/continue end only their sub-chain; the flag stays set
            if self.run_chain(program, id, ctx).await? == ControlSignal::Stop {
                return Ok(ControlSignal::Stop);
            }
        }
        Ok(ControlSignal::Proceed)
    }

    async fn run_foreach(
        &self,
        program: &RuleProgram,
        source: &str,
        var: &str,
        body: &[String],
        ctx: &mut VariableContext,
    ) -> EngineResult<ControlSignal> {
        let items = match ctx.resolve_path(source) {
            Value::List(items) => items,
            other => {
                tracing::debug!(source, found = other.type_name(), "foreach source is not a list");
                return Ok(ControlSignal::Proceed);
            }
        };

        'items: for item in items {
            ctx.set(var, item)?;
            for id in body {
                let signal = self.run_chain(program, id, ctx).await?;
                let break_raised = ctx.take_signal(BREAK_SIGNAL);
                let continue_raised = ctx.take_signal(CONTINUE_SIGNAL);

                match signal {
                    ControlSignal::Stop => return Ok(ControlSignal::Stop),
                    ControlSignal::Break => break 'items,
                    ControlSignal::Continue => continue 'items,
                    ControlSignal::Proceed if break_raised => break 'items,
                    ControlSignal::Proceed if continue_raised => continue 'items,
                    ControlSignal::Proceed => {}
                }
            }
        }

        Ok(ControlSignal::Proceed)
    }
}

fn build_filter(spec: &FetchSpec, ctx: &VariableContext) -> EqualityFilter {
    spec.filter
        .iter()
        .map(|(field, raw)| (field.clone(), ctx.evaluate_value(&Value::from_json(raw))))
        .collect()
}

fn assign(
    variable: &str,
    raw: &serde_json::Value,
    ctx: &mut VariableContext,
) -> EngineResult<ControlSignal> {
    let literal = Value::from_json(raw);
    let value = match &literal {
        Value::String(s) if s.starts_with('@') => ctx.evaluate_value(&literal),
        Value::String(s) if s.contains('.') => ctx.resolve_path(s),
        _ => literal,
    };
    ctx.set(variable, value)?;
    Ok(ControlSignal::Proceed)
}

fn calculate_duration(
    start_path: &str,
    end_path: &str,
    unit: Option<&str>,
    store_as: &str,
    ctx: &mut VariableContext,
) -> EngineResult<ControlSignal> {
    let start = ctx.resolve_path(start_path);
    let end = ctx.resolve_path(end_path);
    let (Value::DateTime(start), Value::DateTime(end)) = (&start, &end) else {
        return Err(EngineError::TypeMismatch(format!(
            "calculateDuration needs date-times, got {} at '{}' and {} at '{}'",
            start.type_name(),
            start_path,
            end.type_name(),
            end_path
        )));
    };

    let unit = match unit {
        Some(unit) => unit.parse::<DurationUnit>()?,
        None => DurationUnit::default(),
    };

    ctx.set(store_as, duration_between(*start, *end, unit))?;
    Ok(ControlSignal::Proceed)
}

/// Whole units elapsed from `start` to `end`.
pub fn duration_between(start: NaiveDateTime, end: NaiveDateTime, unit: DurationUnit) -> i64 {
    match unit {
        DurationUnit::Days => (end - start).num_days(),
        DurationUnit::Months => {
            let months = i64::from(end.year() - start.year()) * 12
                + i64::from(end.month()) - i64::from(start.month());
            if end.day() < start.day() {
                months - 1
            } else {
                months
            }
        }
        DurationUnit::Years => {
            let years = i64::from(end.year() - start.year());
            if (end.month(), end.day()) < (start.month(), start.day()) {
                years - 1
            } else {
                years
            }
        }
    }
}

/// Replace `@dotted.path` references with their string form.
///
/// Unresolved paths render as `null`; trailing dots stay in the text.
fn substitute_paths(message: &str, ctx: &VariableContext) -> String {
    PATH_REFERENCE
        .replace_all(message, |caps: &Captures| {
            let raw = &caps[1];
            let path = raw.trim_end_matches('.');
            let trailing = &raw[path.len()..];
            let rendered = match ctx.resolve_path(path) {
                Value::Null => "null".to_string(),
                value => value.to_string(),
            };
            format!("{}{}", rendered, trailing)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::BufferedLog;
    use crate::rules::parse_rule;
    use crate::store::MemoryEntityStore;
    use chrono::NaiveDate;
    use serde_json::json;

    fn program(steps: serde_json::Value) -> RuleProgram {
        parse_rule(&json!({"name": "test", "steps": steps}).to_string()).unwrap()
    }

    fn interpreter() -> (StepInterpreter, Arc<BufferedLog>) {
        let store = MemoryEntityStore::from_json(json!({
            "People": [{"Id": 1, "Name": "Ana", "CurrentState": "A"}],
            "WorkHistories": [
                {"Id": 10, "PersonId": 1, "StartDate": "2015-01-01", "EndDate": "2022-12-31"},
                {"Id": 11, "PersonId": 1, "StartDate": "2023-02-01", "EndDate": null}
            ],
            "Employers": [{"Id": 5, "Name": "Acme"}]
        }))
        .unwrap();
        let log = Arc::new(BufferedLog::default());
        (StepInterpreter::new(Arc::new(store), log.clone()), log)
    }

    fn subject_context() -> VariableContext {
        let mut ctx = VariableContext::new();
        ctx.set(
            "subject",
            Value::project(&json!({"Id": 1, "Name": "Ana", "Age": 34, "CurrentState": "A"})),
        )
        .unwrap();
        ctx
    }

    fn rule_lines(log: &BufferedLog) -> Vec<String> {
        log.lines()
            .into_iter()
            .filter(|l| l.contains("[RULE]"))
            .map(|l| l.split("] ").last().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_calculate_duration_units() {
        let (interp, _) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "fetch", "entity": "WorkHistories",
             "filter": {"Id": 10}, "storeAs": "job", "next": "years"},
            {"id": "years", "action": "calculateDuration", "startDate": "job.StartDate",
             "endDate": "job.EndDate", "unit": "Years", "storeAs": "years", "next": "months"},
            {"id": "months", "action": "calculateDuration", "startDate": "job.StartDate",
             "endDate": "job.EndDate", "unit": "months", "storeAs": "months", "next": "days"},
            {"id": "days", "action": "calculateDuration", "startDate": "job.StartDate",
             "endDate": "job.EndDate", "storeAs": "days"}
        ]));

        let mut ctx = subject_context();
        interp.execute(&rule, &mut ctx).await.unwrap();
        assert_eq!(ctx.get("years").unwrap(), &Value::Int(7));
        assert_eq!(ctx.get("months").unwrap(), &Value::Int(95));
        assert_eq!(ctx.get("days").unwrap(), &Value::Int(2921));
    }

    #[test]
    fn test_duration_adjusts_for_partial_periods() {
        let at = |y, m, d| {
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        };
        assert_eq!(duration_between(at(2020, 3, 15), at(2021, 3, 14), DurationUnit::Years), 0);
        assert_eq!(duration_between(at(2020, 3, 15), at(2021, 3, 15), DurationUnit::Years), 1);
        assert_eq!(duration_between(at(2020, 1, 31), at(2020, 2, 29), DurationUnit::Months), 0);
        assert_eq!(duration_between(at(2020, 1, 31), at(2020, 3, 1), DurationUnit::Months), 1);
    }

    #[tokio::test]
    async fn test_calculate_duration_errors() {
        let (interp, _) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "calculateDuration", "startDate": "subject.Name",
             "endDate": "subject.Name", "storeAs": "d"}
        ]));
        let err = interp.execute(&rule, &mut subject_context()).await.unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch(_)));

        let rule = program(json!([
            {"id": "start", "action": "fetch", "entity": "WorkHistories",
             "filter": {"Id": 10}, "storeAs": "job", "next": "calc"},
            {"id": "calc", "action": "calculateDuration", "startDate": "job.StartDate",
             "endDate": "job.EndDate", "unit": "weeks", "storeAs": "d"}
        ]));
        let err = interp.execute(&rule, &mut subject_context()).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedUnit(_)));
    }

    #[tokio::test]
    async fn test_if_dispatch_resumes_at_next() {
        let (interp, log) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "if",
             "condition": {"field": "subject.Age", "operator": ">=", "value": "@limit"},
             "then": ["A"], "else": ["B"], "next": "C"},
            {"id": "A", "action": "log", "message": "took A"},
            {"id": "B", "action": "log", "message": "took B"},
            {"id": "C", "action": "log", "message": "at C"}
        ]));

        let mut ctx = subject_context();
        ctx.set("limit", 18).unwrap();
        interp.execute(&rule, &mut ctx).await.unwrap();

        let mut ctx = subject_context();
        ctx.set("limit", 65).unwrap();
        interp.execute(&rule, &mut ctx).await.unwrap();

        assert_eq!(rule_lines(&log), vec!["took A", "at C", "took B", "at C"]);
    }

    #[tokio::test]
    async fn test_branch_runs_full_sub_chain() {
        let (interp, log) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "if",
             "condition": {"field": "subject.Name", "operator": "==", "value": "Ana"},
             "then": ["first"], "next": "last"},
            {"id": "first", "action": "log", "message": "first", "next": "second"},
            {"id": "second", "action": "log", "message": "second"},
            {"id": "last", "action": "log", "message": "last"}
        ]));

        interp.execute(&rule, &mut subject_context()).await.unwrap();
        assert_eq!(rule_lines(&log), vec!["first", "second", "last"]);
    }

    #[tokio::test]
    async fn test_foreach_continue_and_break() {
        let (interp, log) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "foreach", "source": "numbers", "var": "n",
             "body": ["skip_two", "stop_at_four", "record"], "next": "done"},
            {"id": "skip_two", "action": "if",
             "condition": {"field": "n", "operator": "==", "value": 2}, "then": ["skip"]},
            {"id": "skip", "action": "continue"},
            {"id": "stop_at_four", "action": "if",
             "condition": {"field": "n", "operator": "==", "value": 4}, "then": ["halt"]},
            {"id": "halt", "action": "break"},
            {"id": "record", "action": "log", "message": "Visited @n"},
            {"id": "done", "action": "stop", "status": true, "reason": "looped"}
        ]));

        let mut ctx = subject_context();
        ctx.set("numbers", Value::List((1..=5).map(Value::Int).collect()))
            .unwrap();
        let outcome = interp.execute(&rule, &mut ctx).await.unwrap();

        assert_eq!(rule_lines(&log), vec!["Visited 1", "Visited 3"]);
        assert!(outcome.status);
        assert_eq!(outcome.reason, "looped");
        assert_eq!(ctx.try_get::<bool>(BREAK_SIGNAL), Some(false));
        assert_eq!(ctx.try_get::<bool>(CONTINUE_SIGNAL), Some(false));
    }

    #[tokio::test]
    async fn test_foreach_non_list_is_noop() {
        let (interp, log) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "foreach", "source": "subject.Name", "var": "x",
             "body": ["body"], "next": "after"},
            {"id": "body", "action": "log", "message": "inside"},
            {"id": "after", "action": "log", "message": "after"}
        ]));

        interp.execute(&rule, &mut subject_context()).await.unwrap();
        assert_eq!(rule_lines(&log), vec!["after"]);
    }

    #[tokio::test]
    async fn test_fetch_list_and_count() {
        let (interp, _) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "fetchList", "entity": "workhistories",
             "filter": {"PersonId": "@subject.Id"}, "storeAs": "jobs", "next": "check"},
            {"id": "check", "action": "if",
             "condition": {"field": "jobs.Count", "operator": ">", "value": 1},
             "then": ["pass"], "else": ["fail"]},
            {"id": "pass", "action": "stop", "status": true, "reason": "enough jobs"},
            {"id": "fail", "action": "stop"}
        ]));

        let outcome = interp.execute(&rule, &mut subject_context()).await.unwrap();
        assert_eq!(
            outcome,
            RuleOutcome {
                status: true,
                reason: "enough jobs".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_missing_entity_stores_null() {
        let (interp, _) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "fetch", "entity": "Employers",
             "filter": {"Id": 99}, "storeAs": "employer", "next": "check"},
            {"id": "check", "action": "if",
             "condition": {"field": "employer.Name", "operator": "!=", "value": "x"},
             "then": ["yes"], "else": ["no"]},
            {"id": "yes", "action": "stop", "status": true},
            {"id": "no", "action": "stop", "status": false, "reason": "no employer"}
        ]));

        let mut ctx = subject_context();
        let outcome = interp.execute(&rule, &mut ctx).await.unwrap();
        assert!(ctx.get("employer").unwrap().is_null());
        assert_eq!(outcome.reason, "no employer");
    }

    #[tokio::test]
    async fn test_unknown_entity_kind_fails() {
        let (interp, _) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "fetchList", "entity": "Announcements", "storeAs": "a"}
        ]));
        let err = interp.execute(&rule, &mut subject_context()).await.unwrap_err();
        assert!(matches!(err, EngineError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn test_stop_default_reason() {
        let (interp, log) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "stop", "next": "never"},
            {"id": "never", "action": "log", "message": "unreachable"}
        ]));
        let outcome = interp.execute(&rule, &mut subject_context()).await.unwrap();
        assert!(!outcome.status);
        assert_eq!(outcome.reason, DEFAULT_STOP_REASON);
        assert!(rule_lines(&log).is_empty());
    }

    #[tokio::test]
    async fn test_completion_returns_last_assignment() {
        let (interp, _) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "assign", "variable": "Status", "value": true, "next": "why"},
            {"id": "why", "action": "assign", "variable": "Reason", "value": "@subject.Name", "next": "copy"},
            {"id": "copy", "action": "assign", "variable": "name", "value": "subject.Name", "next": "literal"},
            {"id": "literal", "action": "assign", "variable": "label", "value": "plain"}
        ]));

        let mut ctx = subject_context();
        let outcome = interp.execute(&rule, &mut ctx).await.unwrap();
        assert_eq!(
            outcome,
            RuleOutcome {
                status: true,
                reason: "Ana".to_string()
            }
        );
        assert_eq!(ctx.get("name").unwrap(), &Value::from("Ana"));
        assert_eq!(ctx.get("label").unwrap(), &Value::from("plain"));
    }

    #[tokio::test]
    async fn test_dangling_reference_only_when_reached() {
        let (interp, _) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "if",
             "condition": {"field": "subject.Age", "operator": ">", "value": "@threshold"},
             "then": ["ok"], "else": ["missing"]},
            {"id": "ok", "action": "stop", "status": true}
        ]));

        let mut ctx = subject_context();
        ctx.set("threshold", 30).unwrap();
        assert!(interp.execute(&rule, &mut ctx).await.unwrap().status);

        let mut ctx = subject_context();
        ctx.set("threshold", 40).unwrap();
        let err = interp.execute(&rule, &mut ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::DanglingReference { step, .. } if step == "missing"));
    }

    #[tokio::test]
    async fn test_condition_errors_surface() {
        let (interp, _) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "if",
             "condition": {"field": "subject.Age", "operator": "=~", "value": 1}}
        ]));
        let err = interp.execute(&rule, &mut subject_context()).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedOperator(_)));

        // null field never reaches the operator check
        let rule = program(json!([
            {"id": "start", "action": "if",
             "condition": {"field": "subject.Missing", "operator": "=~", "value": 1},
             "else": ["done"]},
            {"id": "done", "action": "stop", "reason": "no field"}
        ]));
        let outcome = interp.execute(&rule, &mut subject_context()).await.unwrap();
        assert_eq!(outcome.reason, "no field");
    }

    #[tokio::test]
    async fn test_escaped_break_ends_run_with_warning() {
        let (interp, log) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "assign", "variable": "Status", "value": true, "next": "brk"},
            {"id": "brk", "action": "break", "next": "after"},
            {"id": "after", "action": "assign", "variable": "Status", "value": false}
        ]));

        let mut ctx = subject_context();
        let outcome = interp.execute(&rule, &mut ctx).await.unwrap();
        assert!(outcome.status);
        assert!(log
            .lines()
            .iter()
            .any(|l| l.contains("[ENGINE] [WARN]") && l.contains("'break' outside of a loop")));
        assert_eq!(ctx.try_get::<bool>(BREAK_SIGNAL), Some(false));
    }

    #[tokio::test]
    async fn test_break_in_branch_resumes_at_if_next() {
        let (interp, log) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "if",
             "condition": {"field": "subject.Name", "operator": "==", "value": "Ana"},
             "then": ["brk", "also"], "next": "after"},
            {"id": "brk", "action": "break", "next": "skipped"},
            {"id": "skipped", "action": "log", "message": "skipped"},
            {"id": "also", "action": "log", "message": "second branch id"},
            {"id": "after", "action": "assign", "variable": "Status", "value": true}
        ]));

        let mut ctx = subject_context();
        let outcome = interp.execute(&rule, &mut ctx).await.unwrap();
        assert!(outcome.status);
        assert_eq!(rule_lines(&log), vec!["second branch id"]);
        assert!(log
            .lines()
            .iter()
            .any(|l| l.contains("[ENGINE] [WARN]") && l.contains("'break' outside of a loop")));
        assert_eq!(ctx.try_get::<bool>(BREAK_SIGNAL), Some(false));
    }

    #[tokio::test]
    async fn test_break_in_branch_finishes_body_id_then_leaves_loop() {
        let (interp, log) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "foreach", "source": "numbers", "var": "n",
             "body": ["check", "record"], "next": "done"},
            {"id": "check", "action": "if",
             "condition": {"field": "n", "operator": "==", "value": 2},
             "then": ["halt"], "next": "trail"},
            {"id": "halt", "action": "break"},
            {"id": "trail", "action": "log", "message": "checked @n"},
            {"id": "record", "action": "log", "message": "Visited @n"},
            {"id": "done", "action": "log", "message": "done"}
        ]));

        let mut ctx = subject_context();
        ctx.set("numbers", Value::List((1..=3).map(Value::Int).collect()))
            .unwrap();
        interp.execute(&rule, &mut ctx).await.unwrap();

        assert_eq!(
            rule_lines(&log),
            vec!["checked 1", "Visited 1", "checked 2", "done"]
        );
        assert_eq!(ctx.try_get::<bool>(BREAK_SIGNAL), Some(false));
    }

    #[tokio::test]
    async fn test_stop_in_branch_ends_run() {
        let (interp, log) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "if",
             "condition": {"field": "subject.Age", "operator": "<", "value": 40},
             "then": ["reject", "never"], "next": "never"},
            {"id": "reject", "action": "stop", "reason": "Too young"},
            {"id": "never", "action": "log", "message": "unreachable"}
        ]));

        let outcome = interp.execute(&rule, &mut subject_context()).await.unwrap();
        assert!(!outcome.status);
        assert_eq!(outcome.reason, "Too young");
        assert!(rule_lines(&log).is_empty());
    }

    #[tokio::test]
    async fn test_log_substitution_and_level() {
        let (interp, log) = interpreter();
        let rule = program(json!([
            {"id": "start", "action": "log", "level": "warn",
             "message": "Hello @subject.Name. Employer: @subject.Employer.Name, age @subject.Age"}
        ]));
        interp.execute(&rule, &mut subject_context()).await.unwrap();

        let lines = log.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("[RULE] [WARN] Hello Ana. Employer: null, age 34"));
    }
}
