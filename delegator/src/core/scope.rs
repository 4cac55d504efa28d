//! Which files a task touched, and whether they stay inside its declared scope.
//!
//! Touched files are the union of paths named by write-style tool calls in the
//! session log and the before/after working-tree change set.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::session::{SessionMessage, ToolState};
use crate::core::types::{ValidationFailure, ValidationKind};

/// Tool names whose calls modify files.
const WRITE_TOOLS: &[&str] = &[
    "write",
    "edit",
    "multiedit",
    "patch",
    "apply_patch",
    "create",
    "str_replace",
];

const PATH_KEYS: &[&str] = &["filePath", "file_path", "path", "filename", "file"];

const PATCH_HEADERS: &[&str] = &[
    "*** Add File:",
    "*** Update File:",
    "*** Delete File:",
    "*** Move to:",
];

/// Changed working-tree paths at one point in time, with a content hash per path.
///
/// A `None` hash marks a path that is reported changed but absent on disk (deleted).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitChangeSnapshot {
    pub entries: BTreeMap<String, Option<String>>,
}

impl GitChangeSnapshot {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<String>)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(path, hash)| (path.into(), hash))
                .collect(),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Paths whose change state differs between `before` and `self`.
    ///
    /// Covers newly changed paths, paths already dirty before whose content
    /// changed again, and paths that went back to clean.
    pub fn changed_since(&self, before: &GitChangeSnapshot) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (path, hash) in &self.entries {
            match before.entries.get(path) {
                Some(previous) if previous == hash => {}
                _ => {
                    changed.insert(path.clone());
                }
            }
        }
        for path in before.entries.keys() {
            if !self.entries.contains_key(path) {
                changed.insert(path.clone());
            }
        }
        changed
    }
}

/// Normalize a tool-reported path to a workspace-relative, `/`-separated form.
pub fn normalize_path(raw: &str, root: Option<&Path>) -> String {
    let mut path = raw.trim().trim_matches(|c: char| c == '"' || c == '\'').replace('\\', "/");
    if let Some(root) = root {
        let root = root.to_string_lossy().replace('\\', "/");
        let root = root.trim_end_matches('/');
        if !root.is_empty()
            && let Some(rest) = path.strip_prefix(root)
            && rest.starts_with('/')
        {
            path = rest.trim_start_matches('/').to_string();
        }
    }
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path
}

/// Paths written by tool calls in `messages`; failed calls are ignored.
pub fn touched_files_from_messages(
    messages: &[SessionMessage],
    root: Option<&Path>,
) -> BTreeSet<String> {
    let mut touched = BTreeSet::new();
    for message in messages {
        for (tool, input, state, _) in message.tool_calls() {
            if state == ToolState::Error || !is_write_tool(tool) {
                continue;
            }
            for raw in paths_from_input(input) {
                let path = normalize_path(&raw, root);
                if !path.is_empty() {
                    touched.insert(path);
                }
            }
        }
    }
    touched
}

fn is_write_tool(tool: &str) -> bool {
    let name = tool.rsplit(['.', ':', '/']).next().unwrap_or(tool);
    WRITE_TOOLS
        .iter()
        .any(|candidate| name.eq_ignore_ascii_case(candidate))
}

fn paths_from_input(input: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    for key in PATH_KEYS {
        if let Some(path) = input.get(key).and_then(Value::as_str) {
            paths.push(path.to_string());
        }
    }
    if let Some(edits) = input.get("edits").and_then(Value::as_array) {
        for edit in edits {
            paths.extend(paths_from_input(edit));
        }
    }
    for key in ["patch", "patchText", "input"] {
        if let Some(patch) = input.get(key).and_then(Value::as_str) {
            paths.extend(paths_from_patch(patch));
        }
    }
    paths
}

fn paths_from_patch(patch: &str) -> Vec<String> {
    patch
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            PATCH_HEADERS
                .iter()
                .find_map(|header| line.strip_prefix(header))
                .or_else(|| line.strip_prefix("+++ b/"))
                .map(|path| path.trim().to_string())
        })
        .filter(|path| !path.is_empty() && path != "/dev/null")
        .collect()
}

/// True when `path` falls under the declared scope `entry`.
///
/// Matches exactly, by path suffix on a `/` boundary, or by directory prefix for
/// entries ending in `/`.
pub fn matches_scope(path: &str, entry: &str) -> bool {
    let entry = normalize_path(entry, None);
    if entry.is_empty() {
        return false;
    }
    if let Some(dir) = entry.strip_suffix('/') {
        return path.starts_with(&entry) || path.contains(&format!("/{dir}/"));
    }
    path == entry
        || path.ends_with(&format!("/{entry}"))
        || entry.ends_with(&format!("/{path}"))
}

/// Flag every touched file not covered by `declared`.
pub fn check_scope(
    touched: &BTreeSet<String>,
    declared: &[String],
    ignore_prefixes: &[String],
) -> Vec<ValidationFailure> {
    let declared_label = if declared.is_empty() {
        "none".to_string()
    } else {
        declared.join(", ")
    };
    touched
        .iter()
        .filter(|path| {
            !ignore_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
        })
        .filter(|path| !declared.iter().any(|entry| matches_scope(path, entry)))
        .map(|path| {
            ValidationFailure::new(
                ValidationKind::Scope,
                format!("out of scope (declared files: {declared_label})"),
            )
            .at(path, None)
        })
        .collect()
}
