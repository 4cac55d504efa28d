//! The single outcome-to-class table shared by every call site.
//!
//! Delegation, the retry controller and phase execution all go through
//! [`classify`], so `checkpoint_idle` (and every other outcome) is treated the
//! same way everywhere.

use crate::core::types::{AttemptClass, LoopReason, PollOutcome};

/// Map a poll outcome to what the caller should do next.
///
/// - `signal_done` => success
/// - `aborted` => cancelled (never retried)
/// - `checkpoint_idle`, `no_progress_timeout`, `max_wait` => retryable
/// - `error_loop` => terminal (a loop will likely recur)
pub fn classify(outcome: &PollOutcome) -> AttemptClass {
    match outcome {
        PollOutcome::SignalDone { .. } => AttemptClass::Success,
        PollOutcome::Aborted => AttemptClass::Cancelled,
        PollOutcome::CheckpointIdle | PollOutcome::NoProgressTimeout | PollOutcome::MaxWait => {
            AttemptClass::RetryableFailure
        }
        PollOutcome::ErrorLoop { .. } => AttemptClass::TerminalFailure,
    }
}

/// Label form of [`classify`] for the CLI; unknown labels are terminal failures.
pub fn classify_label(label: &str) -> AttemptClass {
    let outcome = match label.trim() {
        "signal_done" => PollOutcome::SignalDone {
            payload: String::new(),
        },
        "checkpoint_idle" => PollOutcome::CheckpointIdle,
        "no_progress_timeout" => PollOutcome::NoProgressTimeout,
        "error_loop" => PollOutcome::ErrorLoop {
            reason: LoopReason::Repeated,
            samples: Vec::new(),
        },
        "aborted" => PollOutcome::Aborted,
        "max_wait" => PollOutcome::MaxWait,
        _ => return AttemptClass::TerminalFailure,
    };
    classify(&outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_outcome_has_exactly_one_class() {
        let cases = [
            (
                PollOutcome::SignalDone {
                    payload: "ok".to_string(),
                },
                AttemptClass::Success,
            ),
            (PollOutcome::CheckpointIdle, AttemptClass::RetryableFailure),
            (PollOutcome::NoProgressTimeout, AttemptClass::RetryableFailure),
            (PollOutcome::MaxWait, AttemptClass::RetryableFailure),
            (
                PollOutcome::ErrorLoop {
                    reason: LoopReason::Repeated,
                    samples: Vec::new(),
                },
                AttemptClass::TerminalFailure,
            ),
            (PollOutcome::Aborted, AttemptClass::Cancelled),
        ];
        for (outcome, expected) in cases {
            assert_eq!(classify(&outcome), expected, "{}", outcome.label());
            assert_eq!(classify_label(outcome.label()), expected);
        }
    }

    #[test]
    fn unknown_labels_are_terminal() {
        assert_eq!(classify_label("weird"), AttemptClass::TerminalFailure);
        assert_eq!(classify_label(""), AttemptClass::TerminalFailure);
    }
}
