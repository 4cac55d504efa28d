//! Boundary to the platform hosting agent sessions.
//!
//! A session is a handle plus an append-only message log. Everything the
//! engine knows about it comes through these four calls, so the poller,
//! retry controller and orchestrator run unchanged against an in-memory fake.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::session::{SessionMessage, SessionStatus};

/// Request to open a child session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Coordinating session the new one is scoped under.
    pub parent_session_id: Option<String>,
    pub title: String,
}

/// Prompt sent into a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    /// Agent identity; `None` keeps the session's current agent (resume).
    pub agent: Option<String>,
    /// Model override, set when a fallback model is in use.
    pub model: Option<String>,
    pub text: String,
}

#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Create a session and return its id.
    async fn create_session(&self, request: &SessionRequest) -> Result<String>;

    /// Start work in a session without waiting for it to finish.
    async fn send_prompt(&self, session_id: &str, prompt: &PromptRequest) -> Result<()>;

    /// Current status; `None` when the host reports nothing for the session.
    async fn session_status(&self, session_id: &str) -> Result<Option<SessionStatus>>;

    /// Full message log, oldest first.
    async fn session_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>>;
}
