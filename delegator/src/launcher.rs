//! Task launcher: open a child session and start a task in it.
//!
//! Launching never waits for the task. Callers either hand the session id
//! back immediately (background) or drive it through the retry controller.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::contract::Contract;
use crate::core::types::Task;
use crate::io::host::{PromptRequest, SessionHost, SessionRequest};
use crate::io::prompt::{PromptInputs, build_task_prompt};
use crate::io::skills::{LoadedSkills, SkillLibrary};

/// What to start: one task attempt's prompt and identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub title: String,
    pub prompt: String,
    /// `None` only when resuming an existing session.
    pub agent: Option<String>,
    /// Existing session to continue instead of opening a new one.
    pub resume_session_id: Option<String>,
}

impl LaunchSpec {
    /// Build the spec for a task: renders the prompt with its contracts and skill bodies.
    pub fn for_task(
        task: &Task,
        agent: &str,
        contracts: &[&Contract],
        skills: &SkillLibrary,
        skill_names: &[String],
    ) -> Result<Self> {
        let loaded: LoadedSkills = skills
            .load(skill_names)
            .with_context(|| format!("load skills for task {}", task.id))?;
        let prompt = build_task_prompt(&PromptInputs {
            task,
            contracts,
            skills: &loaded,
        })
        .with_context(|| format!("render prompt for task {}", task.id))?;
        Ok(Self {
            title: format!("{}: {}", task.id, task.description),
            prompt,
            agent: Some(agent.to_string()),
            resume_session_id: None,
        })
    }
}

/// Starts sessions on the host, scoped under a parent session.
#[derive(Clone)]
pub struct TaskLauncher {
    host: Arc<dyn SessionHost>,
    parent_session_id: Option<String>,
}

impl TaskLauncher {
    pub fn new(host: Arc<dyn SessionHost>, parent_session_id: Option<String>) -> Self {
        Self {
            host,
            parent_session_id,
        }
    }

    pub fn host(&self) -> &dyn SessionHost {
        self.host.as_ref()
    }

    /// Start one attempt and return its session id.
    ///
    /// A resume spec sends into the existing session; otherwise a fresh
    /// session is created, so retries never reuse a session.
    #[instrument(skip_all, fields(title = %spec.title, agent = ?spec.agent, model = ?model))]
    pub async fn launch(&self, spec: &LaunchSpec, model: Option<&str>) -> Result<String> {
        let session_id = match &spec.resume_session_id {
            Some(existing) => existing.clone(),
            None => self
                .host
                .create_session(&SessionRequest {
                    parent_session_id: self.parent_session_id.clone(),
                    title: spec.title.clone(),
                })
                .await
                .with_context(|| format!("create session for '{}'", spec.title))?,
        };
        self.host
            .send_prompt(
                &session_id,
                &PromptRequest {
                    agent: spec.agent.clone(),
                    model: model.map(str::to_string),
                    text: spec.prompt.clone(),
                },
            )
            .await
            .with_context(|| format!("send prompt to session {session_id}"))?;
        info!(session_id = %session_id, "task launched");
        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeHost, SessionScript, task};

    #[tokio::test]
    async fn launch_creates_scoped_session_and_sends_prompt() {
        let host = FakeHost::new();
        host.push_script("", SessionScript::new());
        let launcher = TaskLauncher::new(Arc::new(host.clone()), Some("parent-1".to_string()));
        let spec = LaunchSpec::for_task(
            &task("1.1", "Build it"),
            "dev",
            &[],
            &SkillLibrary::default(),
            &[],
        )
        .expect("spec");

        let session_id = launcher.launch(&spec, Some("fallback-x")).await.expect("launch");

        let created = host.created_sessions();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].parent_session_id.as_deref(), Some("parent-1"));
        assert_eq!(created[0].title, "1.1: Build it");
        let prompts = host.prompts();
        assert_eq!(prompts[0].0, session_id);
        assert_eq!(prompts[0].1.agent.as_deref(), Some("dev"));
        assert_eq!(prompts[0].1.model.as_deref(), Some("fallback-x"));
        assert!(prompts[0].1.text.contains("signal_done"));
    }

    #[tokio::test]
    async fn resume_reuses_the_named_session() {
        let host = FakeHost::new();
        host.push_script("", SessionScript::new());
        let existing = host.start_session("earlier").await;
        let launcher = TaskLauncher::new(Arc::new(host.clone()), None);
        let spec = LaunchSpec {
            title: "follow-up".to_string(),
            prompt: "continue".to_string(),
            agent: None,
            resume_session_id: Some(existing.clone()),
        };
        let session_id = launcher.launch(&spec, None).await.expect("launch");
        assert_eq!(session_id, existing);
        assert_eq!(host.created_sessions().len(), 1);
        assert_eq!(host.prompts().len(), 2);
    }
}
