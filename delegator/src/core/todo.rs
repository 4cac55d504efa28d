//! Todo-list encoding of phases and tasks.
//!
//! Lines are parsed once at the boundary into [`TodoEntry`] variants:
//!
//! ```text
//! [P1] === PHASE 1: Setup (Parallel) ===
//! [P1.1] Create the schema (Agent: backend) (Skills: db) (Files: src/db.ts) (Contracts: none) (TODO-IDs: none)
//! ```
//!
//! An optional routing marker token may precede the bracketed coordinate.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::{ExecutionMode, PhaseInfo, Task, TaskStatus};

static COORDINATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?P<marker>[^\[\s]\S*)\s+)?\[P(?P<phase>\d+)(?:\.(?P<task>\d+))?\]\s*(?P<rest>.*)$")
        .expect("coordinate regex")
});

static MODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\((parallel|sequential)\)").expect("mode regex"));

static PHASE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^phase\s+\d+\s*[:\-]?\s*").expect("phase prefix regex"));

static METADATA_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\(\s*(agent|skills|contracts|files|todo-ids)\s*:")
        .expect("metadata key regex")
});

/// Status of an item in the external todo store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl From<TodoStatus> for TaskStatus {
    fn from(status: TodoStatus) -> Self {
        match status {
            TodoStatus::Pending => TaskStatus::Pending,
            TodoStatus::InProgress => TaskStatus::InProgress,
            TodoStatus::Completed => TaskStatus::Success,
            TodoStatus::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// One raw entry of the todo store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    #[serde(default = "default_todo_status")]
    pub status: TodoStatus,
}

fn default_todo_status() -> TodoStatus {
    TodoStatus::Pending
}

/// Metadata suffixes parsed from a task line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskMetadata {
    pub agent: Option<String>,
    pub skills: Option<Vec<String>>,
    pub contracts: Option<Vec<String>>,
    pub files: Option<Vec<String>>,
    pub todo_ids: Option<Vec<String>>,
}

/// A typed todo line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TodoEntry {
    PhaseHeader {
        phase: u32,
        title: String,
        mode: Option<ExecutionMode>,
    },
    Task {
        phase: u32,
        index: u32,
        marker: Option<String>,
        description: String,
        instruction: String,
        metadata: TaskMetadata,
        status: TaskStatus,
    },
}

/// Parse one todo line; lines without a phase coordinate yield `None`.
pub fn parse_todo_line(content: &str, status: TodoStatus) -> Option<TodoEntry> {
    let caps = COORDINATE_RE.captures(content)?;
    let phase: u32 = caps.name("phase")?.as_str().parse().ok()?;
    let rest = caps.name("rest").map(|m| m.as_str().trim()).unwrap_or_default();

    let Some(task) = caps.name("task") else {
        return Some(TodoEntry::PhaseHeader {
            phase,
            title: phase_title(rest),
            mode: MODE_RE
                .captures(rest)
                .map(|mode| match mode[1].to_ascii_lowercase().as_str() {
                    "parallel" => ExecutionMode::Parallel,
                    _ => ExecutionMode::Sequential,
                }),
        });
    };
    let index: u32 = task.as_str().parse().ok()?;

    let fields = metadata_fields(rest);
    let mut metadata = TaskMetadata::default();
    for field in &fields {
        let value = field.value;
        match field.key.as_str() {
            "agent" => {
                metadata.agent = Some(value.to_string())
                    .filter(|agent| !agent.is_empty() && !is_none_literal(agent));
            }
            "skills" => metadata.skills = Some(parse_list(value)),
            "contracts" => metadata.contracts = Some(parse_list(value)),
            "files" => metadata.files = Some(parse_list(value)),
            "todo-ids" => metadata.todo_ids = Some(parse_list(value)),
            _ => {}
        }
    }

    let mut description = String::new();
    let mut cursor = 0;
    for field in &fields {
        description.push_str(&rest[cursor..field.span.start]);
        description.push(' ');
        cursor = field.span.end;
    }
    description.push_str(&rest[cursor..]);
    let description = description.split_whitespace().collect::<Vec<_>>().join(" ");

    Some(TodoEntry::Task {
        phase,
        index,
        marker: caps.name("marker").map(|m| m.as_str().to_string()),
        description,
        instruction: rest.to_string(),
        metadata,
        status: status.into(),
    })
}

/// One `(Key: value)` suffix of a task line.
struct MetadataField<'a> {
    span: Range<usize>,
    key: String,
    value: &'a str,
}

/// Find metadata suffixes, matching parentheses so values such as
/// `app/(auth)/page.tsx` stay whole. An unclosed field runs to the end of the line.
fn metadata_fields(text: &str) -> Vec<MetadataField<'_>> {
    let mut fields = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('(') {
        let start = pos + offset;
        let Some(key) = METADATA_KEY_RE.captures(&text[start..]) else {
            pos = start + 1;
            continue;
        };
        let value_start = start + key[0].len();
        let mut value_end = text.len();
        let mut depth = 1usize;
        for (idx, ch) in text[value_start..].char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        value_end = value_start + idx;
                        break;
                    }
                }
                _ => {}
            }
        }
        let end = (value_end + 1).min(text.len());
        fields.push(MetadataField {
            span: start..end,
            key: key[1].to_ascii_lowercase(),
            value: text[value_start..value_end].trim(),
        });
        pos = end;
    }
    fields
}

/// Parse every item of a todo list, dropping lines that carry no coordinate.
pub fn parse_todo_entries(items: &[TodoItem]) -> Vec<TodoEntry> {
    items
        .iter()
        .filter_map(|item| parse_todo_line(&item.content, item.status))
        .collect()
}

/// Result of extracting one phase from a todo list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseExtraction {
    pub phase: PhaseInfo,
    /// Structural problems found while extracting (duplicates, missing mode).
    pub issues: Vec<String>,
}

/// Build the [`PhaseInfo`] for `number` from parsed entries.
///
/// Returns `None` when the todo list has neither a header nor tasks for the
/// phase. A header without an execution mode defaults to sequential and is
/// reported as an issue. Tasks are ordered by their task index.
pub fn extract_phase(entries: &[TodoEntry], number: u32) -> Option<PhaseExtraction> {
    let mut header: Option<(String, Option<ExecutionMode>)> = None;
    let mut tasks: Vec<(u32, Task)> = Vec::new();
    let mut seen: HashMap<u32, usize> = HashMap::new();
    let mut issues = Vec::new();

    for entry in entries {
        match entry {
            TodoEntry::PhaseHeader { phase, title, mode } if *phase == number => {
                if header.is_some() {
                    issues.push(format!("phase {number}: duplicate phase header '{title}'"));
                    continue;
                }
                header = Some((title.clone(), *mode));
            }
            TodoEntry::Task {
                phase,
                index,
                description,
                instruction,
                metadata,
                status,
                ..
            } if *phase == number => {
                let count = seen.entry(*index).or_insert(0);
                *count += 1;
                if *count > 1 {
                    issues.push(format!("task {number}.{index}: duplicate task coordinate"));
                    continue;
                }
                tasks.push((
                    *index,
                    Task {
                        id: format!("{number}.{index}"),
                        description: description.clone(),
                        agent: metadata.agent.clone(),
                        instruction: instruction.clone(),
                        skills: metadata.skills.clone(),
                        contracts: metadata.contracts.clone(),
                        files: metadata.files.clone(),
                        todo_ids: metadata.todo_ids.clone(),
                        status: *status,
                    },
                ));
            }
            _ => {}
        }
    }

    if header.is_none() && tasks.is_empty() {
        return None;
    }

    let (title, mode) = match header {
        Some((title, Some(mode))) => (title, mode),
        Some((title, None)) => {
            issues.push(format!(
                "phase {number}: header does not declare (Parallel) or (Sequential)"
            ));
            (title, ExecutionMode::Sequential)
        }
        None => {
            issues.push(format!("phase {number}: missing phase header"));
            (format!("Phase {number}"), ExecutionMode::Sequential)
        }
    };

    tasks.sort_by_key(|(index, _)| *index);
    Some(PhaseExtraction {
        phase: PhaseInfo {
            number,
            title,
            mode,
            tasks: tasks.into_iter().map(|(_, task)| task).collect(),
        },
        issues,
    })
}

/// Split a comma-separated metadata value; `none`/`n/a`/`null` is an explicit empty list.
pub fn parse_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if is_none_literal(trimmed) {
        return Vec::new();
    }
    trimmed
        .split(',')
        .map(|item| item.trim().trim_matches('`').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_none_literal(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "none" | "n/a" | "null"
    )
}

fn phase_title(rest: &str) -> String {
    let without_mode = MODE_RE.replace_all(rest, "");
    let stripped = without_mode.trim().trim_matches('=').trim();
    PHASE_PREFIX_RE.replace(stripped, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(content: &str) -> TodoItem {
        TodoItem {
            id: None,
            content: content.to_string(),
            status: TodoStatus::Pending,
        }
    }

    #[test]
    fn parallel_header_with_two_tasks() {
        let items = vec![
            item("[P1] === PHASE 1: Setup (Parallel) ==="),
            item("[P1.1] Create schema (Agent: backend) (Files: src/db.ts)"),
            item("[P1.2] Create page (Agent: frontend) (Files: src/page.tsx)"),
            item("[P2] === PHASE 2: Wire (Sequential) ==="),
            item("[P2.1] Connect (Agent: backend)"),
        ];
        let extraction = extract_phase(&parse_todo_entries(&items), 1).expect("phase");
        assert!(extraction.issues.is_empty());
        let phase = extraction.phase;
        assert_eq!(phase.title, "Setup");
        assert_eq!(phase.mode, ExecutionMode::Parallel);
        assert_eq!(phase.tasks.len(), 2);
        assert_eq!(phase.tasks[0].id, "1.1");
        assert_eq!(phase.tasks[1].agent.as_deref(), Some("frontend"));
    }

    #[test]
    fn metadata_none_is_explicit_empty_list() {
        let entry = parse_todo_line(
            "[P1.1] Do it (Agent: backend) (Skills: none) (Contracts: N/A) (Files: src/a.ts, `src/b.ts`) (TODO-IDs: TD-1)",
            TodoStatus::Pending,
        )
        .expect("entry");
        let TodoEntry::Task {
            description,
            metadata,
            ..
        } = entry
        else {
            panic!("expected task");
        };
        assert_eq!(description, "Do it");
        assert_eq!(metadata.skills, Some(Vec::new()));
        assert_eq!(metadata.contracts, Some(Vec::new()));
        assert_eq!(
            metadata.files,
            Some(vec!["src/a.ts".to_string(), "src/b.ts".to_string()])
        );
        assert_eq!(metadata.todo_ids, Some(vec!["TD-1".to_string()]));
    }

    #[test]
    fn parenthesized_paths_stay_whole() {
        let entry = parse_todo_line(
            "[P2.1] Login page (see notes) (Agent: frontend) (Files: app/(auth)/login/page.tsx, app/(auth)/layout.tsx) (Contracts: none",
            TodoStatus::Pending,
        )
        .expect("entry");
        let TodoEntry::Task {
            description,
            metadata,
            ..
        } = entry
        else {
            panic!("expected task");
        };
        assert_eq!(description, "Login page (see notes)");
        assert_eq!(metadata.agent.as_deref(), Some("frontend"));
        assert_eq!(
            metadata.files,
            Some(vec![
                "app/(auth)/login/page.tsx".to_string(),
                "app/(auth)/layout.tsx".to_string()
            ])
        );
        assert_eq!(metadata.contracts, Some(Vec::new()));
    }

    #[test]
    fn absent_metadata_stays_none() {
        let entry = parse_todo_line("[P3.2] Plain task", TodoStatus::Completed).expect("entry");
        let TodoEntry::Task {
            metadata, status, ..
        } = entry
        else {
            panic!("expected task");
        };
        assert_eq!(metadata, TaskMetadata::default());
        assert_eq!(status, TaskStatus::Success);
    }

    #[test]
    fn routing_marker_is_captured() {
        let entry = parse_todo_line("@orchestrator [P1.1] Task", TodoStatus::Pending).expect("entry");
        let TodoEntry::Task { marker, .. } = entry else {
            panic!("expected task");
        };
        assert_eq!(marker.as_deref(), Some("@orchestrator"));
    }

    #[test]
    fn lines_without_coordinates_are_ignored() {
        assert_eq!(parse_todo_line("Write docs", TodoStatus::Pending), None);
    }

    #[test]
    fn tasks_are_ordered_by_index_and_duplicates_reported() {
        let items = vec![
            item("[P1] PHASE 1: Build (Sequential)"),
            item("[P1.2] second"),
            item("[P1.1] first"),
            item("[P1.1] again"),
        ];
        let extraction = extract_phase(&parse_todo_entries(&items), 1).expect("phase");
        let ids: Vec<&str> = extraction.phase.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1.1", "1.2"]);
        assert_eq!(extraction.phase.tasks[0].description, "first");
        assert_eq!(
            extraction.issues,
            vec!["task 1.1: duplicate task coordinate".to_string()]
        );
    }

    #[test]
    fn header_without_mode_defaults_sequential_with_issue() {
        let items = vec![item("[P4] PHASE 4: Cleanup"), item("[P4.1] tidy")];
        let extraction = extract_phase(&parse_todo_entries(&items), 4).expect("phase");
        assert_eq!(extraction.phase.mode, ExecutionMode::Sequential);
        assert_eq!(extraction.issues.len(), 1);
    }

    #[test]
    fn missing_phase_is_none() {
        let items = vec![item("[P1] PHASE 1: Setup (Parallel)")];
        assert!(extract_phase(&parse_todo_entries(&items), 9).is_none());
    }
}
