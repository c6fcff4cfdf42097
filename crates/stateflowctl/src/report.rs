//! Console rendering of batch results.

use std::collections::BTreeMap;
use std::fmt::Write;

use stateflow_engine::{BatchReport, HaltKind, Value};

/// Field shown next to the id when a subject record has it.
const NAME_FIELD: &str = "Name";

/// Subjects grouped by state, in workflow order, drawn as a small tree.
pub fn render_by_state(
    records: &[serde_json::Value],
    id_field: &str,
    state_field: &str,
    state_order: &[String],
) -> String {
    let mut groups: BTreeMap<String, Vec<&serde_json::Value>> = BTreeMap::new();
    for record in records {
        let state = record
            .get(state_field)
            .map(|s| Value::from_json(s).to_string())
            .unwrap_or_default();
        groups.entry(state).or_default().push(record);
    }

    let mut ordered: Vec<(String, Vec<&serde_json::Value>)> = Vec::new();
    for state in state_order {
        if let Some(members) = groups.remove(state) {
            ordered.push((state.clone(), members));
        }
    }
    ordered.extend(groups);

    let mut out = String::new();
    for (state, members) in ordered {
        let _ = writeln!(out, "State: {} - Subjects count: {}", state, members.len());
        for (idx, record) in members.iter().enumerate() {
            let prefix = if idx + 1 == members.len() { "└─" } else { "├─" };
            let id = record
                .get(id_field)
                .map(|id| Value::from_json(id).to_string())
                .unwrap_or_default();
            match record.get(NAME_FIELD).and_then(|n| n.as_str()) {
                Some(name) => {
                    let _ = writeln!(out, "  {} Id: {}, Name: {}", prefix, id, name);
                }
                None => {
                    let _ = writeln!(out, "  {} Id: {}", prefix, id);
                }
            }
        }
    }
    out
}

/// One-line totals plus a line per rejected or failed subject.
pub fn render_summary(report: &BatchReport) -> String {
    let mut out = format!(
        "Processed {} subjects: {} advanced, {} failed\n",
        report.outcomes.len(),
        report.advanced(),
        report.failed()
    );

    for outcome in &report.outcomes {
        match &outcome.halt {
            HaltKind::Rejected { reason } if !reason.is_empty() => {
                let _ = writeln!(
                    out,
                    "  - subject {} held at {}: {}",
                    outcome.subject_id, outcome.final_state, reason
                );
            }
            HaltKind::Failed { error } => {
                let _ = writeln!(
                    out,
                    "  ! subject {} failed at {}: {}",
                    outcome.subject_id, outcome.final_state, error
                );
            }
            _ => {}
        }
    }
    out
}
