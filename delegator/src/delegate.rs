//! Single delegation call: start one task for an agent (or resume a session)
//! in the background or to completion.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::core::session::SessionMessage;
use crate::core::types::{Task, TaskStatus};
use crate::io::config::DelegatorConfig;
use crate::io::host::SessionHost;
use crate::io::skills::SkillLibrary;
use crate::launcher::{LaunchSpec, TaskLauncher};
use crate::poller::PollConfig;
use crate::retry::{AttemptRecord, AttemptRunner, Resolution, RetryPolicy};

/// How much of a finished task's output is returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Truncated to the configured token budget.
    #[default]
    Summary,
    Full,
}

/// Arguments of one delegation call.
///
/// `agent` and `resume_session_id` are mutually exclusive. `background` has no
/// default. `skills` must be stated: a list, or an explicit `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateArgs {
    pub description: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    #[serde(default)]
    pub background: Option<bool>,
    #[serde(
        default,
        deserialize_with = "deserialize_stated",
        skip_serializing_if = "Option::is_none"
    )]
    pub skills: Option<Option<Vec<String>>>,
    #[serde(default)]
    pub verbosity: Verbosity,
}

/// Prompt sent when resuming a session that stopped before signalling done.
pub const CONTINUE_PROMPT: &str = "Continue the task where you left off. Call the `signal_done` \
                                   tool with your result when it is complete.";

fn deserialize_stated<'de, D>(deserializer: D) -> Result<Option<Option<Vec<String>>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<String>>::deserialize(deserializer).map(Some)
}

/// Checked form of [`DelegateArgs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateRequest {
    pub target: DelegateTarget,
    pub background: bool,
    pub skills: Vec<String>,
    pub verbosity: Verbosity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateTarget {
    Agent(String),
    Resume(String),
}

impl DelegateArgs {
    /// Foreground delegation of `prompt` to `agent` in a new session.
    pub fn fresh(description: String, prompt: String, agent: &str, skills: Vec<String>) -> Self {
        Self {
            description,
            prompt,
            agent: Some(agent.to_string()),
            resume_session_id: None,
            background: Some(false),
            skills: Some(Some(skills)),
            verbosity: Verbosity::Summary,
        }
    }

    /// Foreground follow-up `prompt` into an existing session.
    pub fn resume(description: String, session_id: &str, prompt: &str) -> Self {
        Self {
            description,
            prompt: prompt.to_string(),
            agent: None,
            resume_session_id: Some(session_id.to_string()),
            background: Some(false),
            skills: Some(None),
            verbosity: Verbosity::Summary,
        }
    }

    pub fn validate(&self) -> Result<DelegateRequest> {
        if self.description.trim().is_empty() {
            bail!("description: must not be empty");
        }
        if self.prompt.trim().is_empty() {
            bail!("prompt: must not be empty");
        }
        let agent = self.agent.as_deref().map(str::trim).filter(|a| !a.is_empty());
        let resume = self
            .resume_session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let target = match (agent, resume) {
            (Some(_), Some(_)) => {
                bail!("agent / resume_session_id: set exactly one, not both")
            }
            (None, None) => bail!("agent / resume_session_id: one of them is required"),
            (Some(agent), None) => DelegateTarget::Agent(agent.to_string()),
            (None, Some(session)) => DelegateTarget::Resume(session.to_string()),
        };
        let background = self
            .background
            .ok_or_else(|| anyhow!("background: must be stated explicitly (true or false)"))?;
        let skills = self
            .skills
            .clone()
            .ok_or_else(|| anyhow!("skills: must be a list or an explicit null"))?
            .unwrap_or_default();
        Ok(DelegateRequest {
            target,
            background,
            skills,
            verbosity: self.verbosity,
        })
    }
}

/// Final result of a delegated task.
#[derive(Debug, Clone)]
pub struct DelegateResult {
    pub resolution: Resolution,
    pub session_id: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    /// Result payload, or the last assistant output when the task did not finish.
    pub output: String,
    pub truncated: bool,
    /// Why the task did not succeed.
    pub error: Option<String>,
    /// Ready-to-send follow-up call; `None` on success.
    pub retry_invocation: Option<DelegateArgs>,
}

pub enum DelegateOutcome {
    /// Started; the handle resolves when the task does.
    Background {
        session_id: String,
        handle: JoinHandle<Result<DelegateResult>>,
    },
    Completed(DelegateResult),
}

/// Delegation entry point bound to one host and configuration.
#[derive(Clone)]
pub struct Delegator {
    runner: AttemptRunner,
    skills: SkillLibrary,
    summary_char_budget: usize,
}

impl Delegator {
    pub fn new(
        host: Arc<dyn SessionHost>,
        config: &DelegatorConfig,
        parent_session_id: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            runner: AttemptRunner {
                launcher: TaskLauncher::new(host, parent_session_id),
                poll: PollConfig::new(&config.poll, &config.error_loop)?,
                policy: RetryPolicy::from_config(config),
                cancel,
            },
            skills: SkillLibrary::new(config.skills_dir.clone()),
            summary_char_budget: config.output.summary_token_budget.saturating_mul(4),
        })
    }

    #[instrument(skip_all, fields(description = %args.description))]
    pub async fn delegate(&self, args: &DelegateArgs) -> Result<DelegateOutcome> {
        let request = args.validate()?;
        let spec = self.launch_spec(args, &request)?;
        let session_id = self.runner.launcher.launch(&spec, None).await?;

        if request.background {
            info!(session_id = %session_id, "delegated in background");
            let this = self.clone();
            let first = session_id.clone();
            let args = args.clone();
            let handle = tokio::spawn(async move { this.complete(&spec, first, &args).await });
            return Ok(DelegateOutcome::Background { session_id, handle });
        }

        let result = self.complete(&spec, session_id, args).await?;
        Ok(DelegateOutcome::Completed(result))
    }

    fn launch_spec(&self, args: &DelegateArgs, request: &DelegateRequest) -> Result<LaunchSpec> {
        match &request.target {
            DelegateTarget::Agent(agent) => {
                let task = Task {
                    id: "delegate".to_string(),
                    description: args.description.trim().to_string(),
                    agent: Some(agent.clone()),
                    instruction: args.prompt.clone(),
                    skills: Some(request.skills.clone()),
                    contracts: None,
                    files: None,
                    todo_ids: None,
                    status: TaskStatus::Pending,
                };
                LaunchSpec::for_task(&task, agent, &[], &self.skills, &request.skills)
            }
            DelegateTarget::Resume(session_id) => Ok(LaunchSpec {
                title: args.description.trim().to_string(),
                prompt: args.prompt.clone(),
                agent: None,
                resume_session_id: Some(session_id.clone()),
            }),
        }
    }

    async fn complete(
        &self,
        spec: &LaunchSpec,
        first_session: String,
        args: &DelegateArgs,
    ) -> Result<DelegateResult> {
        let outcome = self.runner.run(spec, Some(first_session)).await?;
        let raw = match &outcome.resolution {
            Resolution::Success { payload } => payload.clone(),
            _ => last_assistant_output(&outcome.messages),
        };
        let (output, truncated) = match args.verbosity {
            Verbosity::Full => (raw, false),
            Verbosity::Summary => truncate_chars(&raw, self.summary_char_budget),
        };
        let (error, retry_invocation) = follow_up(&outcome.resolution, args);
        Ok(DelegateResult {
            resolution: outcome.resolution,
            session_id: outcome.session_id,
            attempts: outcome.attempts,
            output,
            truncated,
            error,
            retry_invocation,
        })
    }
}

/// Failure detail and retry call for a finished delegation.
///
/// An escalated session is resumed where it stopped; a failed or cancelled
/// call is repeated as originally issued, in the foreground.
fn follow_up(resolution: &Resolution, args: &DelegateArgs) -> (Option<String>, Option<DelegateArgs>) {
    let again = || DelegateArgs {
        background: Some(false),
        ..args.clone()
    };
    match resolution {
        Resolution::Success { .. } => (None, None),
        Resolution::Escalated { session_id, reason } => {
            let mut resume = DelegateArgs::resume(args.description.clone(), session_id, CONTINUE_PROMPT);
            resume.verbosity = args.verbosity;
            (Some(reason.clone()), Some(resume))
        }
        Resolution::Failed { reason } => (Some(reason.clone()), Some(again())),
        Resolution::Cancelled => (Some("cancelled".to_string()), Some(again())),
    }
}

fn last_assistant_output(messages: &[SessionMessage]) -> String {
    messages
        .iter()
        .rev()
        .filter(|m| m.is_assistant())
        .map(SessionMessage::text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// Cut `text` to `budget` chars, marking the cut.
pub fn truncate_chars(text: &str, budget: usize) -> (String, bool) {
    let total = text.chars().count();
    if total <= budget {
        return (text.to_string(), false);
    }
    let kept: String = text.chars().take(budget).collect();
    (
        format!(
            "{}\n[truncated {} chars; request verbosity=full for everything]",
            kept.trim_end(),
            total - budget
        ),
        true,
    )
}
