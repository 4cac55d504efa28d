//! Reliability poller: watch one session until it reaches a terminal outcome.
//!
//! Each cycle fetches status and messages, then checks in order:
//! 1. `signal_done` in the log (wins over everything, including cancellation)
//! 2. no progress: no new message and no incremental output for the timeout
//! 3. checkpoint: first crossing of the deadline while idle (fires once)
//! 4. error loop: rate-limited scan while the session is not idle
//! 5. absolute ceiling
//!
//! The only suspension point is the interval sleep, which wakes early on
//! cancellation.

use std::time::Duration;

use anyhow::Result;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::session::{SessionMessage, SessionStatus};
use crate::core::signals::{
    ErrorLoopDetector, ErrorLoopSettings, OutputMark, find_signal_done,
};
use crate::core::types::PollOutcome;
use crate::io::config::PollSettings;
use crate::io::host::SessionHost;

/// Timing and heuristics for one poll loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub no_progress_timeout: Duration,
    pub checkpoint: Duration,
    pub error_loop_check: Duration,
    pub max_wait: Duration,
    detector: ErrorLoopDetector,
}

impl PollConfig {
    pub fn new(poll: &PollSettings, error_loop: &ErrorLoopSettings) -> Result<Self> {
        Ok(Self {
            interval: poll.interval(),
            no_progress_timeout: poll.no_progress_timeout(),
            checkpoint: poll.checkpoint(),
            error_loop_check: poll.error_loop_check(),
            max_wait: poll.max_wait(),
            detector: ErrorLoopDetector::new(error_loop.clone())?,
        })
    }
}

/// Terminal outcome plus the log observed up to that point.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub outcome: PollOutcome,
    pub messages: Vec<SessionMessage>,
    pub elapsed: Duration,
}

/// Poll `session_id` until a terminal outcome.
///
/// Host errors are logged and treated as "no data this cycle"; the absolute
/// ceiling bounds the loop regardless.
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn poll_session(
    host: &dyn SessionHost,
    session_id: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> PollReport {
    let start = Instant::now();
    let mut messages: Vec<SessionMessage> = Vec::new();
    let mut last_mark: Option<OutputMark> = None;
    let mut last_change = start;
    let mut checkpoint_fired = false;
    let mut last_loop_check = start;

    let finish = |outcome: PollOutcome, messages: Vec<SessionMessage>| {
        let elapsed = start.elapsed();
        info!(
            outcome = outcome.label(),
            elapsed_ms = elapsed.as_millis() as u64,
            messages = messages.len(),
            "poll finished"
        );
        PollReport {
            outcome,
            messages,
            elapsed,
        }
    };

    loop {
        if cancel.is_cancelled() {
            refresh_messages(host, session_id, &mut messages).await;
            let outcome = match find_signal_done(&messages) {
                Some(payload) => PollOutcome::SignalDone { payload },
                None => PollOutcome::Aborted,
            };
            return finish(outcome, messages);
        }

        let status = match host.session_status(session_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(err = %err, "session status unavailable");
                None
            }
        };
        refresh_messages(host, session_id, &mut messages).await;

        if let Some(payload) = find_signal_done(&messages) {
            return finish(PollOutcome::SignalDone { payload }, messages);
        }

        let now = Instant::now();
        let elapsed = now.duration_since(start);
        debug!(
            status = ?status,
            messages = messages.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "poll cycle"
        );

        let mark = OutputMark::of(&messages);
        if last_mark == Some(mark) {
            if now.duration_since(last_change) >= config.no_progress_timeout {
                return finish(PollOutcome::NoProgressTimeout, messages);
            }
        } else {
            last_mark = Some(mark);
            last_change = now;
        }

        if !checkpoint_fired && elapsed >= config.checkpoint {
            checkpoint_fired = true;
            if matches!(status, None | Some(SessionStatus::Idle)) {
                return finish(PollOutcome::CheckpointIdle, messages);
            }
        }

        if status != Some(SessionStatus::Idle)
            && now.duration_since(last_loop_check) >= config.error_loop_check
        {
            last_loop_check = now;
            let detection = config.detector.detect(&messages);
            if let Some(reason) = detection.reason
                && detection.detected
            {
                warn!(reason = ?reason, samples = detection.samples.len(), "error loop detected");
                return finish(
                    PollOutcome::ErrorLoop {
                        reason,
                        samples: detection.samples,
                    },
                    messages,
                );
            }
        }

        if elapsed >= config.max_wait {
            return finish(PollOutcome::MaxWait, messages);
        }

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = sleep(config.interval) => {}
        }
    }
}

async fn refresh_messages(
    host: &dyn SessionHost,
    session_id: &str,
    messages: &mut Vec<SessionMessage>,
) {
    match host.session_messages(session_id).await {
        Ok(latest) => *messages = latest,
        Err(err) => warn!(err = %err, "session messages unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::LoopReason;
    use crate::io::config::DelegatorConfig;
    use crate::test_support::{FakeHost, SessionScript, assistant_text};

    fn config() -> PollConfig {
        let cfg = DelegatorConfig::default();
        PollConfig::new(&cfg.poll, &cfg.error_loop).expect("poll config")
    }

    async fn start(host: &FakeHost, script: SessionScript) -> String {
        host.push_script("", script);
        host.start_session("task").await
    }

    #[tokio::test(start_paused = true)]
    async fn signal_done_returns_payload() {
        let host = FakeHost::new();
        let id = start(&host, SessionScript::completes_after(Duration::from_secs(10), "all good")).await;
        let report = poll_session(&host, &id, &config(), &CancellationToken::new()).await;
        assert_eq!(
            report.outcome,
            PollOutcome::SignalDone {
                payload: "all good".to_string()
            }
        );
        assert!(report.elapsed >= Duration::from_secs(10));
        assert!(!report.messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn signal_done_wins_over_cancellation() {
        let host = FakeHost::new();
        let id = start(&host, SessionScript::completes_after(Duration::ZERO, "raced")).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = poll_session(&host, &id, &config(), &cancel).await;
        assert_eq!(
            report.outcome,
            PollOutcome::SignalDone {
                payload: "raced".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_without_signal_aborts() {
        let host = FakeHost::new();
        let id = start(&host, SessionScript::new().status_at(Duration::ZERO, SessionStatus::Busy)).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let report = poll_session(&host, &id, &config(), &cancel).await;
        assert_eq!(report.outcome, PollOutcome::Aborted);
        assert!(report.elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_hits_no_progress_timeout() {
        let host = FakeHost::new();
        let id = start(&host, SessionScript::new().status_at(Duration::ZERO, SessionStatus::Busy)).await;
        let report = poll_session(&host, &id, &config(), &CancellationToken::new()).await;
        assert_eq!(report.outcome, PollOutcome::NoProgressTimeout);
        assert!(report.elapsed >= Duration::from_secs(180));
        assert!(report.elapsed < Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn recently_active_idle_session_hits_checkpoint() {
        let host = FakeHost::new();
        let script = SessionScript::new()
            .message_at(Duration::from_secs(1), assistant_text("a1", "I looked at the code"))
            .message_at(Duration::from_secs(150), assistant_text("a2", "Done, I think"))
            .status_at(Duration::from_secs(151), SessionStatus::Idle);
        let id = start(&host, script).await;
        let report = poll_session(&host, &id, &config(), &CancellationToken::new()).await;
        assert_eq!(report.outcome, PollOutcome::CheckpointIdle);
        assert!(report.elapsed >= Duration::from_secs(300));
        assert_eq!(report.messages.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn static_idle_session_without_output_hits_checkpoint() {
        let host = FakeHost::new();
        let script = SessionScript::new().status_at(Duration::ZERO, SessionStatus::Idle);
        let id = start(&host, script).await;
        let mut config = config();
        config.no_progress_timeout = Duration::from_secs(400);
        let report = poll_session(&host, &id, &config, &CancellationToken::new()).await;
        assert_eq!(report.outcome, PollOutcome::CheckpointIdle);
        assert!(report.elapsed >= Duration::from_secs(300));
        assert!(report.elapsed < Duration::from_secs(310));
    }

    #[tokio::test(start_paused = true)]
    async fn early_output_does_not_suspend_the_no_progress_timeout() {
        let host = FakeHost::new();
        let script = SessionScript::new()
            .status_at(Duration::ZERO, SessionStatus::Busy)
            .message_at(Duration::from_secs(1), assistant_text("a1", "Starting on it"));
        let id = start(&host, script).await;
        let report = poll_session(&host, &id, &config(), &CancellationToken::new()).await;
        assert_eq!(report.outcome, PollOutcome::NoProgressTimeout);
        assert!(report.elapsed >= Duration::from_secs(180));
        assert!(report.elapsed < Duration::from_secs(200));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_session_past_checkpoint_runs_to_max_wait() {
        let host = FakeHost::new();
        let mut script = SessionScript::new().status_at(Duration::ZERO, SessionStatus::Busy);
        for (idx, at) in [1, 150, 300, 450].into_iter().enumerate() {
            script = script.message_at(
                Duration::from_secs(at),
                assistant_text(&format!("a{idx}"), &format!("finished step {idx}")),
            );
        }
        let id = start(&host, script).await;
        let report = poll_session(&host, &id, &config(), &CancellationToken::new()).await;
        assert_eq!(report.outcome, PollOutcome::MaxWait);
        assert!(report.elapsed >= Duration::from_secs(600));
        assert_eq!(report.messages.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_output_is_an_error_loop() {
        let host = FakeHost::new();
        let mut script = SessionScript::new().status_at(Duration::ZERO, SessionStatus::Busy);
        for idx in 0..4 {
            script = script.message_at(
                Duration::from_secs(10 + idx * 5),
                assistant_text(&format!("a{idx}"), "Retrying npm install now"),
            );
        }
        let id = start(&host, script).await;
        let report = poll_session(&host, &id, &config(), &CancellationToken::new()).await;
        match report.outcome {
            PollOutcome::ErrorLoop { reason, samples } => {
                assert_eq!(reason, LoopReason::Repeated);
                assert!(samples.len() >= 3);
            }
            other => panic!("expected error loop, got {other:?}"),
        }
        assert!(report.elapsed >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn host_errors_do_not_abort_the_loop() {
        let host = FakeHost::new();
        host.fail_queries(true);
        let id = start(&host, SessionScript::completes_after(Duration::from_secs(30), "late")).await;
        let cancel = CancellationToken::new();
        let recover = {
            let host = host.clone();
            async move {
                sleep(Duration::from_secs(20)).await;
                host.fail_queries(false);
            }
        };
        let cfg = config();
        let (report, ()) = tokio::join!(poll_session(&host, &id, &cfg, &cancel), recover);
        assert_eq!(
            report.outcome,
            PollOutcome::SignalDone {
                payload: "late".to_string()
            }
        );
    }
}
