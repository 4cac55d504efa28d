//! Phase orchestrator: run a todo-list phase in parallel or sequentially.
//!
//! A phase is rejected before any session spawns when the phase is missing,
//! the plan's contracts are malformed, or a task's metadata is incomplete.
//! Accepted phases launch each task through the retry controller and validate
//! every task that signals done.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::contract::{Contract, ContractIndex};
use crate::core::preflight::{PhaseDefaults, validate_phase_preflight};
use crate::core::scope::{GitChangeSnapshot, matches_scope, touched_files_from_messages};
use crate::core::session::SessionMessage;
use crate::core::todo::{TodoItem, extract_phase, parse_todo_entries};
use crate::core::types::{ExecutionMode, PhaseInfo, Task, ValidationFailure};
use crate::delegate::{CONTINUE_PROMPT, DelegateArgs};
use crate::io::config::{DelegatorConfig, DelegatorPaths};
use crate::io::git::DiffProvider;
use crate::io::host::SessionHost;
use crate::io::report_log::write_phase_report;
use crate::io::skills::SkillLibrary;
use crate::launcher::{LaunchSpec, TaskLauncher};
use crate::poller::PollConfig;
use crate::report::{PhaseReport, TaskResult, TaskResultKind};
use crate::retry::{AttemptRunner, Resolution, RetryPolicy};
use crate::validate::{ValidationInput, validate_task};

/// Rejections raised before any session is spawned.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("phase {phase} not found in the todo list")]
    PhaseNotFound { phase: u32 },
    #[error("phase {phase} has no actionable tasks")]
    NotActionable { phase: u32 },
    #[error("plan contracts are invalid:\n- {}", .issues.join("\n- "))]
    ContractIssues { issues: Vec<String> },
    #[error("phase preflight failed:\n- {}", .violations.join("\n- "))]
    Preflight { violations: Vec<String> },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Phase-execution call: a phase number plus optional default skills.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseRequest {
    pub phase: u32,
    /// `Some(vec![])` is an explicit "no skills" for every task that omits them.
    pub default_skills: Option<Vec<String>>,
}

/// A phase that passed preflight.
#[derive(Debug, Clone)]
pub struct PreparedPhase {
    pub phase: PhaseInfo,
    pub defaults: PhaseDefaults,
}

/// Extract the phase and run every pre-spawn check.
pub fn prepare_phase(
    items: &[TodoItem],
    contracts: &ContractIndex,
    request: &PhaseRequest,
    config: &DelegatorConfig,
) -> Result<PreparedPhase, PhaseError> {
    let number = request.phase;
    let extraction = extract_phase(&parse_todo_entries(items), number)
        .ok_or(PhaseError::PhaseNotFound { phase: number })?;

    if !contracts.issues.is_empty() {
        warn!(phase = number, issues = contracts.issues.len(), "contract issues block phase");
        return Err(PhaseError::ContractIssues {
            issues: contracts.issues.clone(),
        });
    }
    if extraction.phase.actionable_tasks().next().is_none() {
        return Err(PhaseError::NotActionable { phase: number });
    }

    let defaults = PhaseDefaults {
        skills: request.default_skills.clone(),
        agent: config.default_agent.clone(),
    };
    let mut violations = extraction.issues;
    violations.extend(validate_phase_preflight(&extraction.phase, contracts, &defaults));
    if !violations.is_empty() {
        warn!(phase = number, violations = violations.len(), "phase preflight rejected");
        return Err(PhaseError::Preflight { violations });
    }

    Ok(PreparedPhase {
        phase: extraction.phase,
        defaults,
    })
}

/// Everything resolved for one task before launch.
#[derive(Debug, Clone)]
struct TaskPlan {
    task: Task,
    agent: String,
    skills: Vec<String>,
    contracts: Vec<Contract>,
    spec: LaunchSpec,
}

/// Runs phases against one host and working tree.
pub struct PhaseRunner {
    pub host: Arc<dyn SessionHost>,
    pub diff: Arc<dyn DiffProvider>,
    pub config: DelegatorConfig,
    pub root: PathBuf,
    pub parent_session_id: Option<String>,
    pub cancel: CancellationToken,
}

impl PhaseRunner {
    /// Prepare and execute `request.phase`.
    pub async fn run_phase(
        &self,
        items: &[TodoItem],
        contracts: &ContractIndex,
        request: &PhaseRequest,
    ) -> Result<PhaseReport, PhaseError> {
        let prepared = prepare_phase(items, contracts, request, &self.config)?;
        self.execute(&prepared, contracts).await
    }

    #[instrument(skip_all, fields(phase = prepared.phase.number, mode = prepared.phase.mode.as_str()))]
    pub async fn execute(
        &self,
        prepared: &PreparedPhase,
        contracts: &ContractIndex,
    ) -> Result<PhaseReport, PhaseError> {
        let phase = &prepared.phase;
        let plans = self.plan_tasks(prepared, contracts)?;
        let runner = AttemptRunner {
            launcher: TaskLauncher::new(self.host.clone(), self.parent_session_id.clone()),
            poll: PollConfig::new(&self.config.poll, &self.config.error_loop)?,
            policy: RetryPolicy::from_config(&self.config),
            cancel: self.cancel.clone(),
        };
        info!(tasks = plans.len(), "executing phase");

        let results = match phase.mode {
            ExecutionMode::Parallel => self.run_parallel(&runner, plans).await,
            ExecutionMode::Sequential => self.run_sequential(&runner, plans).await,
        };
        let report = PhaseReport::new(phase.number, phase.title.clone(), phase.mode, results);
        info!(
            passed = report.passed,
            failed = report.failed,
            not_attempted = report.not_attempted,
            "phase finished"
        );
        let reports_dir = DelegatorPaths::new(&self.root).reports_dir;
        match write_phase_report(&reports_dir, &report, Utc::now()) {
            Ok(paths) => info!(path = %paths.markdown_path.display(), "phase report written"),
            Err(err) => warn!(err = %format!("{err:#}"), "failed to write phase report"),
        }
        Ok(report)
    }

    fn plan_tasks(
        &self,
        prepared: &PreparedPhase,
        contracts: &ContractIndex,
    ) -> Result<Vec<TaskPlan>, PhaseError> {
        let skills = SkillLibrary::new(self.config.skills_dir.clone());
        let mut plans = Vec::new();
        for task in prepared.phase.actionable_tasks() {
            let (Some(agent), Some(task_skills)) = (
                prepared.defaults.effective_agent(task),
                prepared.defaults.effective_skills(task),
            ) else {
                return Err(PhaseError::Preflight {
                    violations: vec![format!("task {}: agent or skills unresolved", task.id)],
                });
            };
            let resolved = contracts
                .resolve(task.declared_contracts())
                .map_err(|violations| PhaseError::Preflight { violations })?;
            let spec = LaunchSpec::for_task(task, &agent, &resolved, &skills, &task_skills)?;
            plans.push(TaskPlan {
                task: task.clone(),
                agent,
                skills: task_skills,
                contracts: resolved.into_iter().cloned().collect(),
                spec,
            });
        }
        Ok(plans)
    }

    /// Launch every task, then await them together. Each task's snapshot is
    /// taken right before its own launch.
    async fn run_parallel(&self, runner: &AttemptRunner, plans: Vec<TaskPlan>) -> Vec<TaskResult> {
        let sibling_scopes: Vec<(String, Vec<String>)> = plans
            .iter()
            .map(|plan| (plan.task.id.clone(), plan.task.declared_files().to_vec()))
            .collect();

        let mut launched = Vec::new();
        for plan in plans {
            if self.cancel.is_cancelled() {
                launched.push((plan, None, Err(None)));
                continue;
            }
            let before = self.snapshot().await;
            let launch = runner.launcher.launch(&plan.spec, None).await.map_err(Some);
            launched.push((plan, before, launch));
        }

        let futures = launched.into_iter().map(|(plan, before, launch)| {
            let others: Vec<String> = sibling_scopes
                .iter()
                .filter(|(id, _)| *id != plan.task.id)
                .flat_map(|(_, files)| files.iter().cloned())
                .collect();
            async move {
                match launch {
                    Ok(session_id) => {
                        self.finish_task(runner, plan, before, session_id, &others)
                            .await
                    }
                    Err(Some(err)) => failed_to_launch(&plan, &err),
                    Err(None) => cancelled_before_launch(&plan),
                }
            }
        });
        join_all(futures).await
    }

    /// One task at a time; the first task that does not pass stops the phase.
    async fn run_sequential(&self, runner: &AttemptRunner, plans: Vec<TaskPlan>) -> Vec<TaskResult> {
        let mut results = Vec::new();
        let mut stopped_by: Option<String> = None;
        for plan in plans {
            if let Some(blocker) = &stopped_by {
                results.push(not_attempted(&plan, blocker));
                continue;
            }
            if self.cancel.is_cancelled() {
                results.push(cancelled_before_launch(&plan));
                stopped_by = Some(plan.task.id.clone());
                continue;
            }
            let before = self.snapshot().await;
            let result = match runner.launcher.launch(&plan.spec, None).await {
                Ok(session_id) => self.finish_task(runner, plan, before, session_id, &[]).await,
                Err(err) => failed_to_launch(&plan, &err),
            };
            if !result.passed() {
                warn!(task_id = %result.task_id, kind = result.kind.as_str(), "sequential phase stopped");
                stopped_by = Some(result.task_id.clone());
            }
            results.push(result);
        }
        results
    }

    #[instrument(skip_all, fields(task_id = %plan.task.id, session_id = %first_session))]
    async fn finish_task(
        &self,
        runner: &AttemptRunner,
        plan: TaskPlan,
        before: Option<GitChangeSnapshot>,
        first_session: String,
        sibling_files: &[String],
    ) -> TaskResult {
        let outcome = match runner.run(&plan.spec, Some(first_session.clone())).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut result = base_result(&plan, TaskResultKind::ExecutionFailed);
                result.session_id = Some(first_session);
                result.error = Some(format!("{err:#}"));
                result.retry_invocation = Some(fresh_retry(&plan));
                return result;
            }
        };

        let mut result = base_result(&plan, TaskResultKind::Passed);
        result.session_id = outcome.session_id.clone();
        result.attempts = outcome.attempts;

        match outcome.resolution {
            Resolution::Success { payload } => {
                let touched = self
                    .touched_files(&outcome.messages, before, sibling_files)
                    .await;
                let contracts: Vec<&Contract> = plan.contracts.iter().collect();
                let failures = validate_task(&ValidationInput {
                    root: &self.root,
                    task: &plan.task,
                    contracts: &contracts,
                    touched: &touched,
                    config: &self.config,
                });
                result.payload = Some(payload);
                if !failures.is_empty() {
                    warn!(failures = failures.len(), "task rejected by validation");
                    result.kind = TaskResultKind::ValidationFailed;
                    result.retry_invocation = result
                        .session_id
                        .as_deref()
                        .map(|session| fix_retry(&plan, session, &failures));
                    result.failures = failures;
                }
            }
            Resolution::Cancelled => {
                result.kind = TaskResultKind::Cancelled;
                result.retry_invocation = Some(fresh_retry(&plan));
            }
            Resolution::Failed { reason } => {
                result.kind = TaskResultKind::ExecutionFailed;
                result.error = Some(reason);
                result.retry_invocation = Some(fresh_retry(&plan));
            }
            Resolution::Escalated { session_id, reason } => {
                result.kind = TaskResultKind::Escalated;
                result.error = Some(reason);
                result.retry_invocation = Some(resume_retry(&plan, &session_id));
            }
        }
        result
    }

    /// Tool-call paths plus the working-tree change set since `before`.
    ///
    /// In a parallel phase, diff paths inside a sibling's declared scope are
    /// left to that sibling; tool calls are always attributed.
    async fn touched_files(
        &self,
        messages: &[SessionMessage],
        before: Option<GitChangeSnapshot>,
        sibling_files: &[String],
    ) -> BTreeSet<String> {
        let mut touched = touched_files_from_messages(messages, Some(&self.root));
        if let Some(before) = before
            && let Some(after) = self.snapshot().await
        {
            touched.extend(after.changed_since(&before).into_iter().filter(|path| {
                !sibling_files.iter().any(|entry| matches_scope(path, entry))
            }));
        }
        touched
    }

    async fn snapshot(&self) -> Option<GitChangeSnapshot> {
        let diff = self.diff.clone();
        match tokio::task::spawn_blocking(move || diff.snapshot()).await {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(err)) => {
                warn!(err = %format!("{err:#}"), "change snapshot unavailable; using tool calls only");
                None
            }
            Err(err) => {
                warn!(err = %err, "change snapshot task failed");
                None
            }
        }
    }
}

fn base_result(plan: &TaskPlan, kind: TaskResultKind) -> TaskResult {
    TaskResult {
        task_id: plan.task.id.clone(),
        description: plan.task.description.clone(),
        agent: Some(plan.agent.clone()),
        kind,
        session_id: None,
        attempts: Vec::new(),
        payload: None,
        failures: Vec::new(),
        error: None,
        retry_invocation: None,
    }
}

fn failed_to_launch(plan: &TaskPlan, err: &anyhow::Error) -> TaskResult {
    warn!(task_id = %plan.task.id, err = %format!("{err:#}"), "task launch failed");
    let mut result = base_result(plan, TaskResultKind::ExecutionFailed);
    result.error = Some(format!("launch failed: {err:#}"));
    result.retry_invocation = Some(fresh_retry(plan));
    result
}

fn cancelled_before_launch(plan: &TaskPlan) -> TaskResult {
    let mut result = base_result(plan, TaskResultKind::Cancelled);
    result.error = Some("cancelled before launch".to_string());
    result.retry_invocation = Some(fresh_retry(plan));
    result
}

fn not_attempted(plan: &TaskPlan, blocker: &str) -> TaskResult {
    let mut result = base_result(plan, TaskResultKind::NotAttempted);
    result.error = Some(format!("not attempted: task {blocker} did not pass"));
    result.retry_invocation = Some(fresh_retry(plan));
    result
}

fn retry_description(plan: &TaskPlan) -> String {
    format!("{}: {}", plan.task.id, plan.task.description)
}

/// The raw task line goes back in as the prompt; delegation renders it again.
fn fresh_retry(plan: &TaskPlan) -> DelegateArgs {
    DelegateArgs::fresh(
        retry_description(plan),
        plan.task.instruction.clone(),
        &plan.agent,
        plan.skills.clone(),
    )
}

fn resume_retry(plan: &TaskPlan, session_id: &str) -> DelegateArgs {
    DelegateArgs::resume(retry_description(plan), session_id, CONTINUE_PROMPT)
}

fn fix_retry(plan: &TaskPlan, session_id: &str, failures: &[ValidationFailure]) -> DelegateArgs {
    let checks: Vec<String> = failures
        .iter()
        .map(|failure| format!("- {}", failure.render()))
        .collect();
    let mut args = resume_retry(plan, session_id);
    args.prompt = format!(
        "Your work on task {} was rejected by these checks:\n{}\n\nFix every item without \
         touching files outside the task's scope, then call the `signal_done` tool again.",
        plan.task.id,
        checks.join("\n")
    );
    args
}
