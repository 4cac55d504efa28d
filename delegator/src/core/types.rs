//! Shared deterministic types for delegation and phase execution.
//!
//! These types define stable contracts between the poller, the retry controller,
//! the phase orchestrator and the validators. They carry no I/O handles.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task owned by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal tasks are skipped when a phase is (re)executed.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Concurrency mode declared on a phase header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
        }
    }
}

/// An atomic unit of delegated work.
///
/// Metadata lists use `Option<Vec<_>>`: `None` means the field was never
/// declared, `Some(vec![])` means it was declared explicitly as "none".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Coordinate within the phase, e.g. `1.2`.
    pub id: String,
    /// Human-readable description with metadata suffixes removed.
    pub description: String,
    pub agent: Option<String>,
    /// Full instruction text handed to the agent.
    pub instruction: String,
    pub skills: Option<Vec<String>>,
    pub contracts: Option<Vec<String>>,
    pub files: Option<Vec<String>>,
    pub todo_ids: Option<Vec<String>>,
    pub status: TaskStatus,
}

impl Task {
    pub fn declared_files(&self) -> &[String] {
        self.files.as_deref().unwrap_or_default()
    }

    pub fn declared_contracts(&self) -> &[String] {
        self.contracts.as_deref().unwrap_or_default()
    }

    pub fn declared_todo_ids(&self) -> &[String] {
        self.todo_ids.as_deref().unwrap_or_default()
    }
}

/// A named, ordered batch of tasks executed under one concurrency mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseInfo {
    pub number: u32,
    pub title: String,
    pub mode: ExecutionMode,
    pub tasks: Vec<Task>,
}

impl PhaseInfo {
    /// Tasks that still need to run.
    pub fn actionable_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|task| !task.status.is_terminal())
    }
}

/// Why the error-loop heuristic fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopReason {
    /// The same text appeared several times in a row.
    Repeated,
    /// Every recent text looked like an error report.
    AllErrors,
}

/// Terminal classification of one observed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    SignalDone { payload: String },
    CheckpointIdle,
    NoProgressTimeout,
    ErrorLoop { reason: LoopReason, samples: Vec<String> },
    Aborted,
    MaxWait,
}

impl PollOutcome {
    /// Stable snake_case label used in reports and by `classify_label`.
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::SignalDone { .. } => "signal_done",
            PollOutcome::CheckpointIdle => "checkpoint_idle",
            PollOutcome::NoProgressTimeout => "no_progress_timeout",
            PollOutcome::ErrorLoop { .. } => "error_loop",
            PollOutcome::Aborted => "aborted",
            PollOutcome::MaxWait => "max_wait",
        }
    }
}

/// What the retry controller should do with a poll outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptClass {
    Success,
    RetryableFailure,
    TerminalFailure,
    Cancelled,
}

impl AttemptClass {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptClass::Success => "success",
            AttemptClass::RetryableFailure => "retryable_failure",
            AttemptClass::TerminalFailure => "terminal_failure",
            AttemptClass::Cancelled => "cancelled",
        }
    }
}

/// Which validation stage rejected a task that finished at the session level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Scope,
    Contract,
    Anchor,
    Frontend,
}

/// A single failed post-success check, qualified by file and line where known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub kind: ValidationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn at(mut self, file: &str, line: Option<usize>) -> Self {
        self.file = Some(file.to_string());
        self.line = line;
        self
    }

    /// `file:line: message`, omitting whichever location parts are unknown.
    pub fn render(&self) -> String {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{file}:{line}: {}", self.message),
            (Some(file), None) => format!("{file}: {}", self.message),
            _ => self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_skipped() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }

    #[test]
    fn validation_failure_renders_location() {
        let failure = ValidationFailure::new(ValidationKind::Anchor, "unresolved TD-1")
            .at("src/a.ts", Some(4));
        assert_eq!(failure.render(), "src/a.ts:4: unresolved TD-1");
        let bare = ValidationFailure::new(ValidationKind::Scope, "oops");
        assert_eq!(bare.render(), "oops");
    }

    #[test]
    fn poll_outcome_serializes_with_tag() {
        let json = serde_json::to_value(PollOutcome::SignalDone {
            payload: "ok".to_string(),
        })
        .expect("serialize");
        assert_eq!(json["outcome"], "signal_done");
        assert_eq!(json["payload"], "ok");
    }
}
