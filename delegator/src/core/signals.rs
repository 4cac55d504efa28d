//! Stateless observation primitives over a session's message log.
//!
//! - [`find_signal_done`]: terminal "done" payload, searched from the end.
//! - [`OutputMark`]: fingerprint of the log, compared between polls to spot progress.
//! - [`ErrorLoopDetector`]: repeated-text / all-errors heuristic over recent
//!   assistant texts.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::core::session::{SessionMessage, ToolState};
use crate::core::types::LoopReason;

/// Tool name a session calls to report completion.
pub const SIGNAL_DONE_TOOL: &str = "signal_done";

/// Return the result payload of the most recent `signal_done` call, if any.
///
/// The payload is taken from the call's `result` input, falling back to the
/// tool output once the call completed. Blank payloads do not count.
pub fn find_signal_done(messages: &[SessionMessage]) -> Option<String> {
    for message in messages.iter().rev() {
        let calls: Vec<_> = message.tool_calls().collect();
        for (tool, input, state, output) in calls.into_iter().rev() {
            if tool != SIGNAL_DONE_TOOL || state == ToolState::Error {
                continue;
            }
            let from_input = input
                .get("result")
                .and_then(|value| value.as_str())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(payload) = from_input {
                return Some(payload.to_string());
            }
            if state == ToolState::Completed
                && let Some(payload) = output.map(str::trim).filter(|value| !value.is_empty())
            {
                return Some(payload.to_string());
            }
        }
    }
    None
}

/// Size of a message log: message count plus the assistant output inside it.
///
/// Two marks differ when a message arrives, assistant text grows in place, or a
/// tool call completes. Equal marks between polls mean no incremental output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputMark {
    pub messages: usize,
    pub text_chars: usize,
    pub completed_tools: usize,
}

impl OutputMark {
    pub fn of(messages: &[SessionMessage]) -> Self {
        let mut mark = OutputMark {
            messages: messages.len(),
            ..OutputMark::default()
        };
        for message in messages.iter().filter(|m| m.is_assistant()) {
            mark.text_chars += message.text().chars().count();
            mark.completed_tools += message
                .tool_calls()
                .filter(|(_, _, state, _)| *state == ToolState::Completed)
                .count();
        }
        mark
    }
}

/// Plain texts of the last `window` assistant messages, oldest first.
///
/// Messages without text are skipped and do not consume the window.
pub fn recent_assistant_texts(messages: &[SessionMessage], window: usize) -> Vec<String> {
    let mut texts: Vec<String> = messages
        .iter()
        .rev()
        .filter(|m| m.is_assistant())
        .map(SessionMessage::text)
        .filter(|text| !text.is_empty())
        .take(window)
        .collect();
    texts.reverse();
    texts
}

/// Tunables for the error-loop heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorLoopSettings {
    /// Number of recent assistant texts inspected.
    pub window: usize,
    /// Identical (or error-flavoured) texts needed to flag a loop.
    pub repeat_threshold: usize,
    /// Texts shorter than this never count as repeats.
    pub min_text_len: usize,
    /// Case-insensitive keywords marking a text as an error report.
    pub keywords: Vec<String>,
}

impl Default for ErrorLoopSettings {
    fn default() -> Self {
        Self {
            window: 10,
            repeat_threshold: 3,
            min_text_len: 8,
            keywords: [
                "error",
                "failed",
                "failure",
                "exception",
                "cannot",
                "unable to",
                "traceback",
                "panic",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

/// Result of one error-loop scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLoopDetection {
    pub detected: bool,
    pub reason: Option<LoopReason>,
    /// The offending texts when detected.
    pub samples: Vec<String>,
}

impl ErrorLoopDetection {
    fn clear() -> Self {
        Self {
            detected: false,
            reason: None,
            samples: Vec::new(),
        }
    }
}

/// Compiled form of [`ErrorLoopSettings`].
#[derive(Debug, Clone)]
pub struct ErrorLoopDetector {
    settings: ErrorLoopSettings,
    keywords: Regex,
}

impl ErrorLoopDetector {
    pub fn new(settings: ErrorLoopSettings) -> anyhow::Result<Self> {
        let alternatives = settings
            .keywords
            .iter()
            .map(|keyword| regex::escape(keyword.trim()))
            .filter(|keyword| !keyword.is_empty())
            .collect::<Vec<_>>();
        if alternatives.is_empty() {
            anyhow::bail!("error loop keywords must be non-empty");
        }
        let keywords = RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
            .case_insensitive(true)
            .build()?;
        Ok(Self { settings, keywords })
    }

    /// Scan the recent assistant texts of `messages` for a loop.
    pub fn detect(&self, messages: &[SessionMessage]) -> ErrorLoopDetection {
        let texts = recent_assistant_texts(messages, self.settings.window);
        self.detect_texts(&texts)
    }

    /// Scan already-extracted texts (oldest first).
    pub fn detect_texts(&self, texts: &[String]) -> ErrorLoopDetection {
        let threshold = self.settings.repeat_threshold.max(2);
        if texts.len() < threshold {
            return ErrorLoopDetection::clear();
        }

        let mut run_start = 0;
        for idx in 1..=texts.len() {
            let run_continues = idx < texts.len() && texts[idx] == texts[run_start];
            if run_continues {
                continue;
            }
            let run_len = idx - run_start;
            if run_len >= threshold && texts[run_start].chars().count() >= self.settings.min_text_len
            {
                return ErrorLoopDetection {
                    detected: true,
                    reason: Some(LoopReason::Repeated),
                    samples: texts[run_start..idx].to_vec(),
                };
            }
            run_start = idx;
        }

        let tail = &texts[texts.len() - threshold..];
        if tail.iter().all(|text| self.keywords.is_match(text)) {
            return ErrorLoopDetection {
                detected: true,
                reason: Some(LoopReason::AllErrors),
                samples: tail.to_vec(),
            };
        }

        ErrorLoopDetection::clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::MessagePart;
    use crate::test_support::{assistant_text, signal_done_message, tool_message, user_text};
    use serde_json::json;

    fn detector() -> ErrorLoopDetector {
        ErrorLoopDetector::new(ErrorLoopSettings::default()).expect("detector")
    }

    #[test]
    fn signal_done_found_from_the_end() {
        let messages = vec![
            user_text("u1", "do it"),
            signal_done_message("a1", "first"),
            assistant_text("a2", "more work"),
            signal_done_message("a3", "second"),
        ];
        assert_eq!(find_signal_done(&messages), Some("second".to_string()));
    }

    #[test]
    fn signal_done_without_payload_is_ignored() {
        let messages = vec![tool_message(
            "a1",
            SIGNAL_DONE_TOOL,
            json!({"result": "   "}),
            ToolState::Running,
        )];
        assert_eq!(find_signal_done(&messages), None);
    }

    #[test]
    fn signal_done_falls_back_to_completed_output() {
        let mut message = tool_message("a1", SIGNAL_DONE_TOOL, json!({}), ToolState::Completed);
        if let MessagePart::Tool { output, .. } = &mut message.parts[0] {
            *output = Some("from output".to_string());
        }
        assert_eq!(
            find_signal_done(&[message]),
            Some("from output".to_string())
        );
    }

    #[test]
    fn output_mark_moves_with_in_place_output() {
        let running = [tool_message("a1", "bash", json!({}), ToolState::Running)];
        let completed = [tool_message("a1", "bash", json!({}), ToolState::Completed)];
        assert_eq!(OutputMark::of(&running).messages, OutputMark::of(&completed).messages);
        assert_ne!(OutputMark::of(&running), OutputMark::of(&completed));

        assert_ne!(
            OutputMark::of(&[assistant_text("a1", "work")]),
            OutputMark::of(&[assistant_text("a1", "working")])
        );
        assert_eq!(OutputMark::of(&[user_text("u1", "hello")]).text_chars, 0);
    }

    #[test]
    fn repeated_texts_are_detected() {
        let messages = vec![
            assistant_text("a1", "starting the build"),
            assistant_text("a2", "Retrying the same command"),
            assistant_text("a3", "Retrying the same command"),
            assistant_text("a4", "Retrying the same command"),
        ];
        let detection = detector().detect(&messages);
        assert!(detection.detected);
        assert_eq!(detection.reason, Some(LoopReason::Repeated));
        assert_eq!(detection.samples.len(), 3);
        assert!(
            detection
                .samples
                .iter()
                .all(|text| text == "Retrying the same command")
        );
    }

    #[test]
    fn trivial_repeats_do_not_count() {
        let texts = vec!["ok".to_string(), "ok".to_string(), "ok".to_string()];
        assert!(!detector().detect_texts(&texts).detected);
    }

    #[test]
    fn uniform_error_texts_are_detected() {
        let texts = vec![
            "Build failed with 3 errors".to_string(),
            "TypeError: cannot read property".to_string(),
            "Unable to locate module".to_string(),
        ];
        let detection = detector().detect_texts(&texts);
        assert!(detection.detected);
        assert_eq!(detection.reason, Some(LoopReason::AllErrors));
    }

    #[test]
    fn mixed_texts_are_not_a_loop() {
        let texts = vec![
            "Build failed".to_string(),
            "Fixed the import".to_string(),
            "Error in test".to_string(),
        ];
        assert!(!detector().detect_texts(&texts).detected);
    }

    #[test]
    fn window_limits_inspected_texts() {
        let settings = ErrorLoopSettings {
            window: 2,
            ..ErrorLoopSettings::default()
        };
        let detector = ErrorLoopDetector::new(settings).expect("detector");
        let messages = vec![
            assistant_text("a1", "same text again"),
            assistant_text("a2", "same text again"),
            assistant_text("a3", "same text again"),
        ];
        assert!(!detector.detect(&messages).detected);
    }

    #[test]
    fn empty_keywords_are_rejected() {
        let settings = ErrorLoopSettings {
            keywords: vec!["  ".to_string()],
            ..ErrorLoopSettings::default()
        };
        assert!(ErrorLoopDetector::new(settings).is_err());
    }
}
