//! Loading the external todo list.
//!
//! Two encodings are accepted:
//! - a JSON array of `{ "id"?, "content", "status"? }` items
//! - a markdown checklist (`- [ ]` pending, `- [x]` completed, `- [-]` cancelled,
//!   `- [~]` in progress); bare lines are pending items

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::core::todo::{TodoItem, TodoStatus};

static CHECKBOX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]|\d+\.)\s+\[( |x|X|-|~)\]\s*(.*)$").expect("checkbox regex")
});

/// Read and parse a todo list file.
pub fn load_todo_items(path: &Path) -> Result<Vec<TodoItem>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let items = parse_todo_document(&contents)
        .with_context(|| format!("parse todo list {}", path.display()))?;
    debug!(path = %path.display(), items = items.len(), "loaded todo list");
    Ok(items)
}

/// Parse todo list text in either encoding.
pub fn parse_todo_document(contents: &str) -> Result<Vec<TodoItem>> {
    let looks_like_json = contents
        .trim_start()
        .strip_prefix('[')
        .map(str::trim_start)
        .is_some_and(|rest| rest.starts_with('{') || rest.starts_with(']'));
    if looks_like_json {
        let items: Vec<TodoItem> = serde_json::from_str(contents).context("parse json todo list")?;
        return Ok(items);
    }
    Ok(parse_markdown_checklist(contents))
}

fn parse_markdown_checklist(contents: &str) -> Vec<TodoItem> {
    contents
        .lines()
        .filter_map(|line| {
            if let Some(caps) = CHECKBOX_RE.captures(line) {
                let status = match &caps[1] {
                    "x" | "X" => TodoStatus::Completed,
                    "-" => TodoStatus::Cancelled,
                    "~" => TodoStatus::InProgress,
                    _ => TodoStatus::Pending,
                };
                return Some(TodoItem {
                    id: None,
                    content: caps[2].trim().to_string(),
                    status,
                });
            }
            let bare = line.trim();
            if bare.is_empty() || bare.starts_with('#') {
                return None;
            }
            Some(TodoItem {
                id: None,
                content: bare.to_string(),
                status: TodoStatus::Pending,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_items() {
        let json = r#"[
            {"id": "t1", "content": "[P1] === PHASE 1: Setup (Parallel) ===", "status": "pending"},
            {"content": "[P1.1] Build", "status": "completed"},
            {"content": "[P1.2] Test"}
        ]"#;
        let items = parse_todo_document(json).expect("parse");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id.as_deref(), Some("t1"));
        assert_eq!(items[1].status, TodoStatus::Completed);
        assert_eq!(items[2].status, TodoStatus::Pending);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_todo_document(r#"[{"content": 3}]"#).is_err());
    }

    #[test]
    fn parses_markdown_checklist() {
        let md = "# Todos\n\n[P1] === PHASE 1: Setup (Sequential) ===\n- [x] [P1.1] Build\n- [ ] [P1.2] Test\n* [-] [P1.3] Dropped\n1. [~] [P1.4] Running\n";
        let items = parse_todo_document(md).expect("parse");
        let view: Vec<(&str, TodoStatus)> = items
            .iter()
            .map(|item| (item.content.as_str(), item.status))
            .collect();
        assert_eq!(
            view,
            vec![
                ("[P1] === PHASE 1: Setup (Sequential) ===", TodoStatus::Pending),
                ("[P1.1] Build", TodoStatus::Completed),
                ("[P1.2] Test", TodoStatus::Pending),
                ("[P1.3] Dropped", TodoStatus::Cancelled),
                ("[P1.4] Running", TodoStatus::InProgress),
            ]
        );
    }

    #[test]
    fn loads_from_disk_with_context() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_todo_items(&temp.path().join("missing.md")).expect_err("missing");
        assert!(err.to_string().contains("missing.md"));
    }
}
