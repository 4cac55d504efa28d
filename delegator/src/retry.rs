//! Retry/fallback controller around one task.
//!
//! Retryable outcomes re-run the task in a new session on the agent's
//! configured fallback model. A missing fallback fails the task; the agent is
//! never swapped for a different one. Exhausting the attempt cap escalates.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::classify::classify;
use crate::core::session::SessionMessage;
use crate::core::types::{AttemptClass, PollOutcome};
use crate::io::config::DelegatorConfig;
use crate::launcher::{LaunchSpec, TaskLauncher};
use crate::poller::{PollConfig, poll_session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first.
    pub max_attempts: u32,
    pub delay: Duration,
    pub fallback_models: BTreeMap<String, String>,
}

impl RetryPolicy {
    pub fn from_config(config: &DelegatorConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts.max(1),
            delay: Duration::from_millis(config.retry.delay_ms),
            fallback_models: config.fallback_models.clone(),
        }
    }

    pub fn fallback_for(&self, agent: &str) -> Option<&str> {
        self.fallback_models.get(agent).map(String::as_str)
    }
}

/// One attempt as observed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub outcome: PollOutcome,
    pub class: AttemptClass,
    pub elapsed_ms: u64,
}

/// How a task's attempts ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    Success { payload: String },
    Cancelled,
    Failed { reason: String },
    /// Attempts exhausted on retryable outcomes; needs manual follow-up.
    Escalated { session_id: String, reason: String },
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Success { .. } => "success",
            Resolution::Cancelled => "cancelled",
            Resolution::Failed { .. } => "failed",
            Resolution::Escalated { .. } => "escalated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub resolution: Resolution,
    pub attempts: Vec<AttemptRecord>,
    /// Session of the last attempt, if any was started.
    pub session_id: Option<String>,
    /// Message log of the last attempt.
    pub messages: Vec<SessionMessage>,
}

/// Everything the controller needs besides the task itself.
#[derive(Clone)]
pub struct AttemptRunner {
    pub launcher: TaskLauncher,
    pub poll: PollConfig,
    pub policy: RetryPolicy,
    pub cancel: CancellationToken,
}

impl AttemptRunner {
    /// Run `spec` to a resolution.
    ///
    /// `first_session` is an already-launched first attempt (parallel phases
    /// launch every task before polling any of them).
    #[instrument(skip_all, fields(title = %spec.title))]
    pub async fn run(&self, spec: &LaunchSpec, first_session: Option<String>) -> Result<RetryOutcome> {
        let mut attempts = Vec::new();
        let mut model: Option<String> = None;
        let mut pending_first = first_session;
        let mut attempt: u32 = 1;

        loop {
            let session_id = match pending_first.take() {
                Some(id) => id,
                None => self.launcher.launch(spec, model.as_deref()).await?,
            };

            let report = poll_session(
                self.launcher.host(),
                &session_id,
                &self.poll,
                &self.cancel,
            )
            .await;
            let class = classify(&report.outcome);
            attempts.push(AttemptRecord {
                attempt,
                session_id: session_id.clone(),
                model: model.clone(),
                outcome: report.outcome.clone(),
                class,
                elapsed_ms: report.elapsed.as_millis() as u64,
            });

            let finish = |resolution: Resolution, attempts: Vec<AttemptRecord>| {
                info!(
                    session_id = %session_id,
                    attempts = attempts.len(),
                    resolution = resolution.label(),
                    "task resolved"
                );
                RetryOutcome {
                    resolution,
                    attempts,
                    session_id: Some(session_id.clone()),
                    messages: report.messages.clone(),
                }
            };

            match class {
                AttemptClass::Success => {
                    let payload = match &report.outcome {
                        PollOutcome::SignalDone { payload } => payload.clone(),
                        _ => String::new(),
                    };
                    return Ok(finish(Resolution::Success { payload }, attempts));
                }
                AttemptClass::Cancelled => return Ok(finish(Resolution::Cancelled, attempts)),
                AttemptClass::TerminalFailure => {
                    let reason = describe_terminal(&report.outcome);
                    return Ok(finish(Resolution::Failed { reason }, attempts));
                }
                AttemptClass::RetryableFailure => {}
            }

            let label = report.outcome.label();
            if attempt >= self.policy.max_attempts {
                warn!(session_id = %session_id, attempt, outcome = label, "attempts exhausted, escalating");
                let reason = format!(
                    "{label} after {attempt} attempt(s); session {session_id} needs manual follow-up"
                );
                return Ok(finish(
                    Resolution::Escalated {
                        session_id: session_id.clone(),
                        reason,
                    },
                    attempts,
                ));
            }

            let Some(agent) = spec.agent.as_deref() else {
                let reason = format!("{label} on resumed session {session_id}; no fallback applies");
                return Ok(finish(Resolution::Failed { reason }, attempts));
            };
            let Some(fallback) = self.policy.fallback_for(agent) else {
                warn!(agent, outcome = label, "no fallback model configured");
                let reason =
                    format!("{label}; no fallback model configured for agent '{agent}'");
                return Ok(finish(Resolution::Failed { reason }, attempts));
            };

            warn!(
                session_id = %session_id,
                attempt,
                agent,
                fallback,
                outcome = label,
                "retrying with fallback model"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Ok(finish(Resolution::Cancelled, attempts));
                }
                _ = sleep(self.policy.delay) => {}
            }
            model = Some(fallback.to_string());
            attempt += 1;
        }
    }
}

fn describe_terminal(outcome: &PollOutcome) -> String {
    match outcome {
        PollOutcome::ErrorLoop { reason, samples } => {
            let last = samples.last().map(String::as_str).unwrap_or_default();
            format!("error_loop ({reason:?}): {last}")
        }
        other => format!("terminal outcome {}", other.label()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::session::SessionStatus;
    use crate::core::types::LoopReason;
    use crate::test_support::{FakeHost, SessionScript, assistant_text};

    fn runner(host: &FakeHost, fallbacks: &[(&str, &str)], max_attempts: u32) -> AttemptRunner {
        let mut cfg = DelegatorConfig::default();
        cfg.retry.max_attempts = max_attempts;
        for (agent, model) in fallbacks {
            cfg.fallback_models
                .insert(agent.to_string(), model.to_string());
        }
        AttemptRunner {
            launcher: TaskLauncher::new(Arc::new(host.clone()), None),
            poll: PollConfig::new(&cfg.poll, &cfg.error_loop).expect("poll"),
            policy: RetryPolicy::from_config(&cfg),
            cancel: CancellationToken::new(),
        }
    }

    fn spec(agent: Option<&str>) -> LaunchSpec {
        LaunchSpec {
            title: "1.1: Build".to_string(),
            prompt: "build it".to_string(),
            agent: agent.map(str::to_string),
            resume_session_id: None,
        }
    }

    fn stalls() -> SessionScript {
        SessionScript::new().status_at(Duration::ZERO, SessionStatus::Busy)
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_uses_fallback_model_in_a_new_session() {
        let host = FakeHost::new();
        host.push_script("", stalls());
        host.push_script("", SessionScript::completes_after(Duration::from_secs(5), "done"));
        let outcome = runner(&host, &[("ui", "backup-model")], 2)
            .run(&spec(Some("ui")), None)
            .await
            .expect("run");

        assert_eq!(
            outcome.resolution,
            Resolution::Success {
                payload: "done".to_string()
            }
        );
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].outcome, PollOutcome::NoProgressTimeout);
        assert_eq!(outcome.attempts[1].model.as_deref(), Some("backup-model"));
        assert_ne!(outcome.attempts[0].session_id, outcome.attempts[1].session_id);

        let prompts = host.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1].1.agent.as_deref(), Some("ui"));
        assert_eq!(prompts[1].1.model.as_deref(), Some("backup-model"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_fallback_fails_without_switching_agent() {
        let host = FakeHost::new();
        host.push_script("", stalls());
        let outcome = runner(&host, &[("other", "m")], 3)
            .run(&spec(Some("ui")), None)
            .await
            .expect("run");
        match &outcome.resolution {
            Resolution::Failed { reason } => {
                assert!(reason.contains("no fallback model configured for agent 'ui'"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(host.created_sessions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_escalates_with_session_id() {
        let host = FakeHost::new();
        host.push_script("", stalls());
        host.push_script("", stalls());
        let outcome = runner(&host, &[("ui", "backup-model")], 2)
            .run(&spec(Some("ui")), None)
            .await
            .expect("run");
        let last_session = outcome.attempts[1].session_id.clone();
        match &outcome.resolution {
            Resolution::Escalated { session_id, reason } => {
                assert_eq!(session_id, &last_session);
                assert!(reason.contains("manual follow-up"));
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn error_loop_is_never_retried() {
        let host = FakeHost::new();
        let mut script = SessionScript::new().status_at(Duration::ZERO, SessionStatus::Busy);
        for idx in 0..3u64 {
            script = script.message_at(
                Duration::from_secs(idx + 1),
                assistant_text(&format!("a{idx}"), "Error: module not found"),
            );
        }
        host.push_script("", script);
        let outcome = runner(&host, &[("ui", "backup-model")], 3)
            .run(&spec(Some("ui")), None)
            .await
            .expect("run");
        assert!(matches!(outcome.resolution, Resolution::Failed { .. }));
        assert!(matches!(
            outcome.attempts[0].outcome,
            PollOutcome::ErrorLoop {
                reason: LoopReason::Repeated,
                ..
            }
        ));
        assert_eq!(host.created_sessions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_session_has_no_fallback() {
        let host = FakeHost::new();
        host.push_script("", stalls());
        let existing = host.start_session("earlier").await;
        let mut spec = spec(None);
        spec.resume_session_id = Some(existing);
        let outcome = runner(&host, &[("ui", "backup-model")], 2)
            .run(&spec, None)
            .await
            .expect("run");
        match outcome.resolution {
            Resolution::Failed { reason } => assert!(reason.contains("no fallback applies")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_not_retried() {
        let host = FakeHost::new();
        host.push_script("", stalls());
        let runner = runner(&host, &[("ui", "backup-model")], 3);
        runner.cancel.cancel();
        let outcome = runner.run(&spec(Some("ui")), None).await.expect("run");
        assert_eq!(outcome.resolution, Resolution::Cancelled);
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn prelaunched_first_session_is_polled_not_relaunched() {
        let host = FakeHost::new();
        host.push_script("", SessionScript::completes_after(Duration::from_secs(1), "ok"));
        let first = host.start_session("1.1: Build").await;
        let outcome = runner(&host, &[], 2)
            .run(&spec(Some("ui")), Some(first.clone()))
            .await
            .expect("run");
        assert_eq!(outcome.session_id.as_deref(), Some(first.as_str()));
        assert_eq!(host.created_sessions().len(), 1);
    }
}
