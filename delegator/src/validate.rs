//! Post-success validation: decide whether a task that signalled done is accepted.
//!
//! Runs file scope first, then each contract's acceptance block, then anchor
//! resolution and frontend conformance over the task's files.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::core::anchors::find_unresolved_anchors;
use crate::core::contract::{Acceptance, Contract, PatternCheck};
use crate::core::frontend::{check_frontend_batch, is_frontend_file};
use crate::core::scope::{check_scope, matches_scope, normalize_path};
use crate::core::types::{Task, ValidationFailure, ValidationKind};
use crate::io::config::DelegatorConfig;

/// Everything needed to validate one finished task.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    pub root: &'a Path,
    pub task: &'a Task,
    pub contracts: &'a [&'a Contract],
    /// Relative paths the task touched (tool calls plus working-tree diff).
    pub touched: &'a BTreeSet<String>,
    pub config: &'a DelegatorConfig,
}

/// Run every check; an empty result means the task is accepted.
#[instrument(skip_all, fields(task_id = %input.task.id))]
pub fn validate_task(input: &ValidationInput<'_>) -> Vec<ValidationFailure> {
    let mut failures = Vec::new();
    let task = input.task;

    if let Some(declared) = &task.files {
        failures.extend(check_scope(
            input.touched,
            declared,
            &input.config.scope.ignore_prefixes,
        ));
    }

    for contract in input.contracts {
        if let Some(acceptance) = &contract.acceptance {
            failures.extend(check_acceptance(input.root, &contract.id, acceptance));
        }
    }

    let files = task_files(input);

    let anchor_ids = anchor_ids(task, input.contracts);
    if !anchor_ids.is_empty() {
        for path in &files {
            if let Some(content) = read_workspace_file(input.root, path) {
                failures.extend(find_unresolved_anchors(path, &content, &anchor_ids));
            }
        }
    }

    let wants_frontend = input.contracts.iter().any(|contract| {
        contract
            .acceptance
            .as_ref()
            .is_some_and(|acceptance| acceptance.frontend_conformance)
    });
    if wants_frontend {
        let extensions = &input.config.frontend.extensions;
        let sources: Vec<(&str, String)> = files
            .iter()
            .filter(|path| is_frontend_file(path, extensions))
            .filter_map(|path| {
                read_workspace_file(input.root, path).map(|content| (path.as_str(), content))
            })
            .collect();
        failures.extend(check_frontend_batch(
            sources.iter().map(|(path, content)| (*path, content.as_str())),
        ));
    }

    debug!(failures = failures.len(), "task validated");
    failures
}

/// Required files, required patterns and forbidden patterns of one contract.
pub fn check_acceptance(root: &Path, contract_id: &str, acceptance: &Acceptance) -> Vec<ValidationFailure> {
    let mut failures = Vec::new();

    for file in &acceptance.required_files_exist {
        if !workspace_path(root, file).is_some_and(|path| path.exists()) {
            failures.push(
                ValidationFailure::new(
                    ValidationKind::Contract,
                    format!("required file does not exist (contract {contract_id})"),
                )
                .at(file, None),
            );
        }
    }

    for check in &acceptance.required_patterns {
        let Some(regex) = compile(contract_id, check, &mut failures) else {
            continue;
        };
        match read_workspace_file(root, &check.file) {
            None => failures.push(
                ValidationFailure::new(
                    ValidationKind::Contract,
                    format!(
                        "required pattern `{}` cannot match: file not found (contract {contract_id})",
                        check.regex
                    ),
                )
                .at(&check.file, None),
            ),
            Some(content) if !regex.is_match(&content) => failures.push(
                ValidationFailure::new(
                    ValidationKind::Contract,
                    format!(
                        "missing required pattern `{}`{} (contract {contract_id})",
                        check.regex,
                        describe(check)
                    ),
                )
                .at(&check.file, None),
            ),
            Some(_) => {}
        }
    }

    for check in &acceptance.forbidden_patterns {
        let Some(regex) = compile(contract_id, check, &mut failures) else {
            continue;
        };
        let Some(content) = read_workspace_file(root, &check.file) else {
            continue;
        };
        if let Some(found) = regex.find(&content) {
            let line = content[..found.start()].matches('\n').count() + 1;
            failures.push(
                ValidationFailure::new(
                    ValidationKind::Contract,
                    format!(
                        "forbidden pattern `{}` matched{} (contract {contract_id})",
                        check.regex,
                        describe(check)
                    ),
                )
                .at(&check.file, Some(line)),
            );
        }
    }

    failures
}

fn compile(contract_id: &str, check: &PatternCheck, failures: &mut Vec<ValidationFailure>) -> Option<Regex> {
    match Regex::new(&check.regex) {
        Ok(regex) => Some(regex),
        Err(err) => {
            failures.push(
                ValidationFailure::new(
                    ValidationKind::Contract,
                    format!("invalid regex `{}` (contract {contract_id}): {err}", check.regex),
                )
                .at(&check.file, None),
            );
            None
        }
    }
}

fn describe(check: &PatternCheck) -> String {
    check
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

/// Anchor ids to check: the task's own ids, plus ids of contracts that require
/// resolution. A task whose contracts all opt out checks nothing.
fn anchor_ids(task: &Task, contracts: &[&Contract]) -> Vec<String> {
    let requiring: Vec<&&Contract> = contracts
        .iter()
        .filter(|contract| contract.requires_anchor_resolution())
        .collect();
    if !contracts.is_empty() && requiring.is_empty() {
        return Vec::new();
    }
    let mut ids: BTreeSet<String> = task.declared_todo_ids().iter().cloned().collect();
    for contract in requiring {
        ids.extend(contract.todo_ids.iter().cloned());
    }
    ids.into_iter().collect()
}

/// Declared plain files, contract files and touched in-scope files, sorted.
fn task_files(input: &ValidationInput<'_>) -> BTreeSet<String> {
    let mut files: BTreeSet<String> = BTreeSet::new();
    let declared = input.task.declared_files();
    files.extend(
        declared
            .iter()
            .chain(input.contracts.iter().flat_map(|c| c.files.iter()))
            .filter(|entry| !entry.ends_with('/'))
            .cloned(),
    );
    files.extend(
        input
            .touched
            .iter()
            .filter(|path| {
                input.task.files.is_none() || declared.iter().any(|entry| matches_scope(path, entry))
            })
            .cloned(),
    );
    files
}

/// Resolve a contract path under `root`; paths that leave the workspace yield `None`.
fn workspace_path(root: &Path, raw: &str) -> Option<PathBuf> {
    let relative = normalize_path(raw, Some(root));
    let inside = Path::new(&relative)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if !inside || relative.is_empty() {
        warn!(path = raw, "contract path outside the workspace ignored");
        return None;
    }
    Some(root.join(relative))
}

fn read_workspace_file(root: &Path, relative: &str) -> Option<String> {
    let path = workspace_path(root, relative)?;
    if !path.is_file() {
        return None;
    }
    fs::read_to_string(&path).ok()
}
