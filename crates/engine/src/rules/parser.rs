//! Rule document parser.
//!
//! Parses JSON (or YAML) rule documents into [`RuleProgram`]s.
//! Validates:
//! - `steps` is a list of objects with a non-empty string `id`
//! - every `action` is one of the supported tags
//! - step ids are unique
//! - a `start` step exists

use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::rules::types::{RuleProgram, Step, KNOWN_ACTIONS};

/// Parse a JSON rule document.
pub fn parse_rule(json: &str) -> EngineResult<RuleProgram> {
    let document: serde_json::Value = serde_json::from_str(json)?;
    parse_rule_value(document, None)
}

/// Parse a YAML rule document.
pub fn parse_rule_yaml(yaml: &str) -> EngineResult<RuleProgram> {
    let document: serde_json::Value = serde_yaml::from_str(yaml)?;
    parse_rule_value(document, None)
}

/// Parse rule file contents, picking the format from the file extension.
///
/// A document without a `name` is named after the file stem.
pub fn parse_rule_file(path: &Path, contents: &str) -> EngineResult<RuleProgram> {
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let document: serde_json::Value = if is_yaml {
        serde_yaml::from_str(contents)?
    } else {
        serde_json::from_str(contents)?
    };

    let stem = path.file_stem().and_then(|s| s.to_str());
    parse_rule_value(document, stem)
}

/// Parse an already-decoded rule document.
pub fn parse_rule_value(
    document: serde_json::Value,
    fallback_name: Option<&str>,
) -> EngineResult<RuleProgram> {
    let serde_json::Value::Object(mut root) = document else {
        return Err(EngineError::Parse(
            "Rule document must be an object".to_string(),
        ));
    };

    let name = match root.remove("name") {
        Some(serde_json::Value::String(name)) if !name.trim().is_empty() => name,
        Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) | None => {
            fallback_name.unwrap_or("rule").to_string()
        }
        Some(other) => {
            return Err(EngineError::Parse(format!(
                "Rule name must be a string, got {}",
                other
            )))
        }
    };

    let raw_steps = match root.remove("steps") {
        Some(serde_json::Value::Array(steps)) => steps,
        Some(_) => {
            return Err(EngineError::Parse(format!(
                "Rule '{}': 'steps' must be a list",
                name
            )))
        }
        None => {
            return Err(EngineError::Parse(format!(
                "Rule '{}': missing 'steps'",
                name
            )))
        }
    };

    let steps = raw_steps
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| parse_step(&name, idx, raw))
        .collect::<EngineResult<Vec<_>>>()?;

    let program = RuleProgram::new(name, steps)?;
    tracing::debug!(program = %program.name, steps = program.len(), "Parsed rule");
    Ok(program)
}

fn parse_step(rule: &str, idx: usize, raw: serde_json::Value) -> EngineResult<Step> {
    let fallback = format!("steps[{}]", idx);

    let id = match raw.get("id") {
        Some(serde_json::Value::String(id)) if !id.trim().is_empty() => id.clone(),
        _ => {
            return Err(EngineError::Parse(format!(
                "Rule '{}': {} has no string 'id'",
                rule, fallback
            )))
        }
    };

    let action = raw
        .get("action")
        .and_then(|a| a.as_str())
        .ok_or_else(|| {
            EngineError::Parse(format!("Rule '{}': step '{}' has no 'action'", rule, id))
        })?;

    if !KNOWN_ACTIONS.contains(&action) {
        return Err(EngineError::UnknownAction {
            step: id,
            action: action.to_string(),
        });
    }

    serde_json::from_value(raw)
        .map_err(|e| EngineError::Parse(format!("Rule '{}': step '{}': {}", rule, id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::Action;

    #[test]
    fn test_parse_rule_json() {
        let json = r#"{
            "name": "Rule-A",
            "steps": [
                {"id": "start", "action": "assign", "variable": "Status", "value": true, "next": "done"},
                {"id": "done", "action": "stop", "status": true, "reason": "ok"}
            ]
        }"#;

        let program = parse_rule(json).unwrap();
        assert_eq!(program.name, "Rule-A");
        assert_eq!(program.len(), 2);
        let ids: Vec<_> = program.steps().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["start", "done"]);
    }

    #[test]
    fn test_parse_rule_yaml() {
        let yaml = r#"
name: Rule-B
steps:
  - id: start
    action: log
    message: "Checking @subject.Name"
    level: debug
"#;

        let program = parse_rule_yaml(yaml).unwrap();
        let start = program.step("start").unwrap();
        assert!(matches!(&start.action, Action::Log { level: Some(l), .. } if l == "debug"));
    }

    #[test]
    fn test_unknown_action_at_parse_time() {
        let json = r#"{"name": "r", "steps": [{"id": "start", "action": "sleep"}]}"#;
        let err = parse_rule(json).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownAction { step, action } if step == "start" && action == "sleep"
        ));
    }

    #[test]
    fn test_missing_start() {
        let json = r#"{"name": "r", "steps": [{"id": "first", "action": "break"}]}"#;
        assert!(matches!(
            parse_rule(json).unwrap_err(),
            EngineError::MissingStart(_)
        ));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(parse_rule("[]").unwrap_err(), EngineError::Parse(_)));
        assert!(matches!(
            parse_rule(r#"{"name": "r"}"#).unwrap_err(),
            EngineError::Parse(_)
        ));
        assert!(matches!(
            parse_rule(r#"{"steps": [{"action": "break"}]}"#).unwrap_err(),
            EngineError::Parse(_)
        ));
        // payload missing a required field
        assert!(matches!(
            parse_rule(r#"{"steps": [{"id": "start", "action": "assign"}]}"#).unwrap_err(),
            EngineError::Parse(_)
        ));
        assert!(matches!(parse_rule("{").unwrap_err(), EngineError::Json(_)));
    }

    #[test]
    fn test_parse_rule_file_names_from_stem() {
        let json = r#"{"steps": [{"id": "start", "action": "stop", "status": true}]}"#;
        let program = parse_rule_file(Path::new("rules/Rule-A.json"), json).unwrap();
        assert_eq!(program.name, "Rule-A");

        let yaml = "steps:\n  - id: start\n    action: break\n";
        let program = parse_rule_file(Path::new("rules/Rule-B.YML"), yaml).unwrap();
        assert_eq!(program.name, "Rule-B");
    }
}
