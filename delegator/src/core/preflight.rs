//! Phase preflight: every task must state its metadata and reference real contracts.
//!
//! Runs before any session is spawned. Empty lists are fine (`(Files: none)`),
//! absent fields are not.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::contract::ContractIndex;
use crate::core::types::{PhaseInfo, Task};

static TODO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^TD-[A-Z0-9._-]+$").expect("todo id regex"));

/// Phase-wide defaults applied to tasks that omit a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseDefaults {
    /// `Some(vec![])` is an explicit "no skills"; `None` means not provided.
    pub skills: Option<Vec<String>>,
    pub agent: Option<String>,
}

impl PhaseDefaults {
    /// Skills a task runs with: its own declaration, else the phase default.
    pub fn effective_skills(&self, task: &Task) -> Option<Vec<String>> {
        task.skills.clone().or_else(|| self.skills.clone())
    }

    pub fn effective_agent(&self, task: &Task) -> Option<String> {
        task.agent.clone().or_else(|| self.agent.clone())
    }
}

/// Validate every actionable task of `phase`.
///
/// Returns a list of stable error messages (empty on success).
pub fn validate_phase_preflight(
    phase: &PhaseInfo,
    contracts: &ContractIndex,
    defaults: &PhaseDefaults,
) -> Vec<String> {
    let mut errors = Vec::new();
    let tasks: Vec<&Task> = phase.actionable_tasks().collect();
    if tasks.is_empty() {
        errors.push(format!(
            "phase {}: no actionable tasks",
            phase.number
        ));
        return errors;
    }

    for task in tasks {
        let id = &task.id;
        if defaults.effective_agent(task).is_none() {
            errors.push(format!(
                "task {id}: no (Agent: ..) declared and no default agent configured"
            ));
        }
        if defaults.effective_skills(task).is_none() {
            errors.push(format!(
                "task {id}: missing (Skills: ..) and no phase default skills given"
            ));
        }
        for (field, value) in [
            ("Contracts", &task.contracts),
            ("Files", &task.files),
            ("TODO-IDs", &task.todo_ids),
        ] {
            if value.is_none() {
                errors.push(format!(
                    "task {id}: missing ({field}: ..) metadata; state 'none' if empty"
                ));
            }
        }

        for todo_id in task.declared_todo_ids() {
            if !TODO_ID_RE.is_match(todo_id) {
                errors.push(format!(
                    "task {id}: TODO-ID '{todo_id}' must match TD-[A-Z0-9._-]+"
                ));
            }
        }

        if let Err(missing) = contracts.resolve(task.declared_contracts()) {
            errors.extend(missing.into_iter().map(|msg| format!("task {id}: {msg}")));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::todo::{TodoItem, extract_phase, parse_todo_entries};
    use crate::test_support::todo_items;

    const PLAN: &str = "## File Contracts\n\n#### C-1: First\n- Files: src/a.ts\n";

    fn phase(lines: &[&str]) -> PhaseInfo {
        let items: Vec<TodoItem> = todo_items(lines);
        extract_phase(&parse_todo_entries(&items), 1)
            .expect("phase")
            .phase
    }

    #[test]
    fn complete_metadata_passes() {
        let phase = phase(&[
            "[P1] === PHASE 1: Setup (Sequential) ===",
            "[P1.1] Build (Agent: dev) (Skills: none) (Contracts: C-1) (Files: src/a.ts) (TODO-IDs: TD-A1)",
        ]);
        let errors = validate_phase_preflight(
            &phase,
            &ContractIndex::parse(PLAN),
            &PhaseDefaults::default(),
        );
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn absent_fields_are_violations() {
        let phase = phase(&[
            "[P1] === PHASE 1: Setup (Sequential) ===",
            "[P1.1] Build (Files: src/a.ts)",
        ]);
        let errors = validate_phase_preflight(
            &phase,
            &ContractIndex::default(),
            &PhaseDefaults::default(),
        );
        assert_eq!(
            errors,
            vec![
                "task 1.1: no (Agent: ..) declared and no default agent configured".to_string(),
                "task 1.1: missing (Skills: ..) and no phase default skills given".to_string(),
                "task 1.1: missing (Contracts: ..) metadata; state 'none' if empty".to_string(),
                "task 1.1: missing (TODO-IDs: ..) metadata; state 'none' if empty".to_string(),
            ]
        );
    }

    #[test]
    fn phase_defaults_fill_agent_and_skills() {
        let phase = phase(&[
            "[P1] === PHASE 1: Setup (Parallel) ===",
            "[P1.1] Build (Contracts: none) (Files: none) (TODO-IDs: none)",
        ]);
        let defaults = PhaseDefaults {
            skills: Some(Vec::new()),
            agent: Some("dev".to_string()),
        };
        let errors = validate_phase_preflight(&phase, &ContractIndex::default(), &defaults);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn unknown_contracts_and_bad_todo_ids_are_reported() {
        let phase = phase(&[
            "[P1] === PHASE 1: Setup (Parallel) ===",
            "[P1.1] Build (Agent: dev) (Skills: none) (Contracts: C-1, C-9) (Files: none) (TODO-IDs: todo-1)",
        ]);
        let errors = validate_phase_preflight(
            &phase,
            &ContractIndex::parse(PLAN),
            &PhaseDefaults::default(),
        );
        assert_eq!(
            errors,
            vec![
                "task 1.1: TODO-ID 'todo-1' must match TD-[A-Z0-9._-]+".to_string(),
                "task 1.1: unknown contract reference 'C-9'".to_string(),
            ]
        );
    }

    #[test]
    fn phase_without_actionable_tasks_is_rejected() {
        let phase = phase(&["[P1] === PHASE 1: Setup (Parallel) ==="]);
        let errors = validate_phase_preflight(
            &phase,
            &ContractIndex::default(),
            &PhaseDefaults::default(),
        );
        assert_eq!(errors, vec!["phase 1: no actionable tasks".to_string()]);
    }
}
