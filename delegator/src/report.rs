//! Phase report: per-task outcomes, aggregate counts and retry guidance.

use std::fmt::Write as _;

use serde::Serialize;

use crate::core::types::{ExecutionMode, ValidationFailure};
use crate::delegate::DelegateArgs;
use crate::retry::AttemptRecord;

/// How a task ended from the orchestrator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResultKind {
    Passed,
    /// The session signalled done but the work was rejected.
    ValidationFailed,
    /// The session never finished.
    ExecutionFailed,
    /// Attempts exhausted on retryable outcomes.
    Escalated,
    Cancelled,
    /// A sequential phase stopped before this task.
    NotAttempted,
}

impl TaskResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskResultKind::Passed => "passed",
            TaskResultKind::ValidationFailed => "validation_failed",
            TaskResultKind::ExecutionFailed => "execution_failed",
            TaskResultKind::Escalated => "escalated",
            TaskResultKind::Cancelled => "cancelled",
            TaskResultKind::NotAttempted => "not_attempted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub kind: TaskResultKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ValidationFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ready-to-reuse delegation call for anything that did not pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_invocation: Option<DelegateArgs>,
}

impl TaskResult {
    pub fn passed(&self) -> bool {
        self.kind == TaskResultKind::Passed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: u32,
    pub title: String,
    pub mode: ExecutionMode,
    pub tasks: Vec<TaskResult>,
    pub passed: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

impl PhaseReport {
    pub fn new(phase: u32, title: String, mode: ExecutionMode, tasks: Vec<TaskResult>) -> Self {
        let passed = tasks.iter().filter(|t| t.passed()).count();
        let not_attempted = tasks
            .iter()
            .filter(|t| t.kind == TaskResultKind::NotAttempted)
            .count();
        Self {
            phase,
            title,
            mode,
            failed: tasks.len() - passed - not_attempted,
            passed,
            not_attempted,
            tasks,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.not_attempted == 0
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskResult> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# Phase {}: {} ({})\n",
            self.phase,
            self.title,
            self.mode.as_str()
        );
        let _ = writeln!(
            out,
            "{} passed, {} failed, {} not attempted\n",
            self.passed, self.failed, self.not_attempted
        );

        for task in &self.tasks {
            let _ = writeln!(
                out,
                "## {} {}: {}",
                marker(task.kind),
                task.task_id,
                task.description
            );
            let _ = writeln!(out, "- result: {}", task.kind.as_str());
            if let Some(agent) = &task.agent {
                let _ = writeln!(out, "- agent: {agent}");
            }
            if let Some(session) = &task.session_id {
                let _ = writeln!(out, "- session: {session}");
            }
            if !task.attempts.is_empty() {
                let outcomes: Vec<String> = task
                    .attempts
                    .iter()
                    .map(|a| match &a.model {
                        Some(model) => format!("{} ({model})", a.outcome.label()),
                        None => a.outcome.label().to_string(),
                    })
                    .collect();
                let _ = writeln!(out, "- attempts: {}", outcomes.join(" -> "));
            }
            if let Some(error) = &task.error {
                let _ = writeln!(out, "- error: {error}");
            }
            if !task.failures.is_empty() {
                let _ = writeln!(out, "- failed checks:");
                for failure in &task.failures {
                    let _ = writeln!(out, "  - {}", failure.render());
                }
            }
            if let Some(retry) = &task.retry_invocation {
                let json = serde_json::to_string_pretty(retry).unwrap_or_default();
                let _ = writeln!(out, "- retry with:\n\n```json\n{json}\n```");
            }
            out.push('\n');
        }
        out.trim_end().to_string() + "\n"
    }
}

fn marker(kind: TaskResultKind) -> &'static str {
    match kind {
        TaskResultKind::Passed => "[x]",
        TaskResultKind::NotAttempted => "[ ]",
        _ => "[!]",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AttemptClass, PollOutcome, ValidationKind};
    use crate::delegate::Verbosity;

    fn result(id: &str, kind: TaskResultKind) -> TaskResult {
        TaskResult {
            task_id: id.to_string(),
            description: format!("task {id}"),
            agent: Some("dev".to_string()),
            kind,
            session_id: None,
            attempts: Vec::new(),
            payload: None,
            failures: Vec::new(),
            error: None,
            retry_invocation: None,
        }
    }

    #[test]
    fn counts_split_failed_from_not_attempted() {
        let report = PhaseReport::new(
            2,
            "Build".to_string(),
            ExecutionMode::Sequential,
            vec![
                result("2.1", TaskResultKind::Passed),
                result("2.2", TaskResultKind::ValidationFailed),
                result("2.3", TaskResultKind::NotAttempted),
            ],
        );
        assert_eq!((report.passed, report.failed, report.not_attempted), (1, 1, 1));
        assert!(!report.is_success());
    }

    #[test]
    fn markdown_includes_session_checks_and_retry_call() {
        let mut failed = result("1.1", TaskResultKind::ValidationFailed);
        failed.session_id = Some("ses-7".to_string());
        failed.attempts.push(AttemptRecord {
            attempt: 1,
            session_id: "ses-7".to_string(),
            model: None,
            outcome: PollOutcome::SignalDone {
                payload: "done".to_string(),
            },
            class: AttemptClass::Success,
            elapsed_ms: 1200,
        });
        failed.failures.push(
            ValidationFailure::new(ValidationKind::Scope, "out of scope (declared files: src/a.ts)")
                .at("src/b.ts", None),
        );
        failed.retry_invocation = Some(DelegateArgs {
            description: "task 1.1".to_string(),
            prompt: "fix it".to_string(),
            agent: None,
            resume_session_id: Some("ses-7".to_string()),
            background: Some(false),
            skills: Some(None),
            verbosity: Verbosity::Summary,
        });
        let report = PhaseReport::new(1, "Setup".to_string(), ExecutionMode::Parallel, vec![failed]);

        let markdown = report.render_markdown();
        assert!(markdown.starts_with("# Phase 1: Setup (parallel)\n"));
        assert!(markdown.contains("## [!] 1.1: task 1.1"));
        assert!(markdown.contains("- session: ses-7"));
        assert!(markdown.contains("- attempts: signal_done"));
        assert!(markdown.contains("  - src/b.ts: out of scope (declared files: src/a.ts)"));
        assert!(markdown.contains("\"resume_session_id\": \"ses-7\""));
    }
}
