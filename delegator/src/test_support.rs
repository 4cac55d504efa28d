//! Test-only helpers: a scripted in-memory session host, a filesystem-backed
//! diff provider, throwaway workspaces and message/task builders.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::core::scope::GitChangeSnapshot;
use crate::core::session::{MessagePart, MessageRole, SessionMessage, SessionStatus, ToolState};
use crate::core::signals::SIGNAL_DONE_TOOL;
use crate::core::todo::{TodoItem, TodoStatus};
use crate::core::types::{Task, TaskStatus};
use crate::io::git::{DiffProvider, hash_file};
use crate::io::host::{PromptRequest, SessionHost, SessionRequest};

/// Timeline of one fake session, relative to its first prompt.
#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    statuses: Vec<(Duration, SessionStatus)>,
    messages: Vec<(Duration, SessionMessage)>,
    writes: Vec<(Duration, String, String)>,
}

impl SessionScript {
    /// No status and no messages: a session that never does anything.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_at(mut self, at: Duration, status: SessionStatus) -> Self {
        self.statuses.push((at, status));
        self
    }

    pub fn message_at(mut self, at: Duration, message: SessionMessage) -> Self {
        self.messages.push((at, message));
        self
    }

    /// Write a workspace file directly, leaving no tool call in the log.
    pub fn write_at(mut self, at: Duration, path: &str, content: &str) -> Self {
        self.writes.push((at, path.to_string(), content.to_string()));
        self
    }

    /// Write a workspace file through a completed `write` tool call.
    pub fn edit_at(self, at: Duration, path: &str, content: &str) -> Self {
        let id = format!("edit-{}", self.messages.len());
        self.write_at(at, path, content).message_at(
            at,
            tool_message(
                &id,
                "write",
                json!({"filePath": path, "content": content}),
                ToolState::Completed,
            ),
        )
    }

    /// Busy from the start, then `signal_done` with `payload` and idle at `after`.
    pub fn completes_after(after: Duration, payload: &str) -> Self {
        Self::new()
            .status_at(Duration::ZERO, SessionStatus::Busy)
            .message_at(after, signal_done_message("done", payload))
            .status_at(after, SessionStatus::Idle)
    }
}

#[derive(Debug)]
struct FakeSession {
    script: SessionScript,
    started: Option<Instant>,
    prompts: Vec<(Duration, SessionMessage)>,
    applied_writes: Vec<bool>,
}

#[derive(Debug, Default)]
struct HostState {
    next_id: u32,
    scripts: BTreeMap<String, VecDeque<SessionScript>>,
    sessions: BTreeMap<String, FakeSession>,
    created: Vec<SessionRequest>,
    prompts: Vec<(String, PromptRequest)>,
    fail_queries: bool,
}

/// In-memory [`SessionHost`] driven by [`SessionScript`]s on the tokio clock.
///
/// Scripts are queued under a title prefix (`""` is the fallback queue); a new
/// session takes the next script of the longest matching prefix.
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
    workspace: Option<PathBuf>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply scripted file writes under `root`.
    pub fn with_workspace(root: &Path) -> Self {
        Self {
            state: Arc::default(),
            workspace: Some(root.to_path_buf()),
        }
    }

    pub fn push_script(&self, title_prefix: &str, script: SessionScript) {
        self.lock()
            .scripts
            .entry(title_prefix.to_string())
            .or_default()
            .push_back(script);
    }

    /// Make status and message queries fail until turned off.
    pub fn fail_queries(&self, fail: bool) {
        self.lock().fail_queries = fail;
    }

    /// Create a session and send it an initial prompt.
    pub async fn start_session(&self, title: &str) -> String {
        let id = self
            .create_session(&SessionRequest {
                parent_session_id: None,
                title: title.to_string(),
            })
            .await
            .expect("create fake session");
        self.send_prompt(
            &id,
            &PromptRequest {
                agent: None,
                model: None,
                text: "start".to_string(),
            },
        )
        .await
        .expect("start fake session");
        id
    }

    pub fn created_sessions(&self) -> Vec<SessionRequest> {
        self.lock().created.clone()
    }

    pub fn prompts(&self) -> Vec<(String, PromptRequest)> {
        self.lock().prompts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().expect("fake host lock")
    }

    fn elapsed(session: &FakeSession) -> Option<Duration> {
        session.started.map(|started| Instant::now().duration_since(started))
    }

    fn apply_writes(&self, session: &mut FakeSession, elapsed: Duration) -> Result<()> {
        let Some(root) = &self.workspace else {
            return Ok(());
        };
        for (idx, (at, path, content)) in session.script.writes.iter().enumerate() {
            if *at > elapsed || session.applied_writes[idx] {
                continue;
            }
            let full = root.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&full, content).with_context(|| format!("write {}", full.display()))?;
            session.applied_writes[idx] = true;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionHost for FakeHost {
    async fn create_session(&self, request: &SessionRequest) -> Result<String> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("ses-{}", state.next_id);

        let key = state
            .scripts
            .iter()
            .filter(|(prefix, queue)| {
                !prefix.is_empty() && !queue.is_empty() && request.title.starts_with(prefix.as_str())
            })
            .map(|(prefix, _)| prefix.clone())
            .max_by_key(String::len)
            .unwrap_or_default();
        let script = state
            .scripts
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();

        let writes = script.writes.len();
        state.sessions.insert(
            id.clone(),
            FakeSession {
                script,
                started: None,
                prompts: Vec::new(),
                applied_writes: vec![false; writes],
            },
        );
        state.created.push(request.clone());
        Ok(id)
    }

    async fn send_prompt(&self, session_id: &str, prompt: &PromptRequest) -> Result<()> {
        let mut state = self.lock();
        state
            .prompts
            .push((session_id.to_string(), prompt.clone()));
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session {session_id}"))?;
        let started = *session.started.get_or_insert_with(Instant::now);
        let offset = Instant::now().duration_since(started);
        let id = format!("u{}", session.prompts.len() + 1);
        session.prompts.push((offset, user_text(&id, &prompt.text)));
        Ok(())
    }

    async fn session_status(&self, session_id: &str) -> Result<Option<SessionStatus>> {
        let mut state = self.lock();
        if state.fail_queries {
            bail!("host unavailable");
        }
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session {session_id}"))?;
        let Some(elapsed) = Self::elapsed(session) else {
            return Ok(None);
        };
        self.apply_writes(session, elapsed)?;
        let mut due: Vec<&(Duration, SessionStatus)> = session
            .script
            .statuses
            .iter()
            .filter(|(at, _)| *at <= elapsed)
            .collect();
        due.sort_by_key(|(at, _)| *at);
        Ok(due.last().map(|(_, status)| *status))
    }

    async fn session_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let mut state = self.lock();
        if state.fail_queries {
            bail!("host unavailable");
        }
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session {session_id}"))?;
        let Some(elapsed) = Self::elapsed(session) else {
            return Ok(Vec::new());
        };
        self.apply_writes(session, elapsed)?;
        let mut visible: Vec<&(Duration, SessionMessage)> = session
            .prompts
            .iter()
            .chain(session.script.messages.iter())
            .filter(|(at, _)| *at <= elapsed)
            .collect();
        visible.sort_by_key(|(at, _)| *at);
        Ok(visible.into_iter().map(|(_, message)| message.clone()).collect())
    }
}

/// [`DiffProvider`] that hashes every file under a directory (except `.git`).
#[derive(Debug, Clone)]
pub struct FakeDiffProvider {
    root: PathBuf,
}

impl FakeDiffProvider {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn walk(&self, dir: &Path, snapshot: &mut GitChangeSnapshot) -> Result<()> {
        for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
            let path = entry?.path();
            if path.file_name().is_some_and(|name| name == ".git") {
                continue;
            }
            if path.is_dir() {
                self.walk(&path, snapshot)?;
                continue;
            }
            let relative = path
                .strip_prefix(&self.root)
                .map_err(|err| anyhow!("{}: {err}", path.display()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            snapshot.entries.insert(relative, hash_file(&path)?);
        }
        Ok(())
    }
}

impl DiffProvider for FakeDiffProvider {
    fn snapshot(&self) -> Result<GitChangeSnapshot> {
        let mut snapshot = GitChangeSnapshot::default();
        self.walk(&self.root, &mut snapshot)?;
        Ok(snapshot)
    }
}

/// Throwaway workspace directory.
pub struct TestWorkspace {
    dir: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create temp workspace")?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read(&self, relative: &str) -> Result<String> {
        let path = self.dir.path().join(relative);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

pub fn assistant_text(id: &str, text: &str) -> SessionMessage {
    SessionMessage {
        id: id.to_string(),
        role: MessageRole::Assistant,
        parts: vec![MessagePart::Text {
            text: text.to_string(),
        }],
    }
}

pub fn user_text(id: &str, text: &str) -> SessionMessage {
    SessionMessage {
        id: id.to_string(),
        role: MessageRole::User,
        parts: vec![MessagePart::Text {
            text: text.to_string(),
        }],
    }
}

/// Assistant message holding a single tool call.
pub fn tool_message(id: &str, tool: &str, input: Value, state: ToolState) -> SessionMessage {
    SessionMessage {
        id: id.to_string(),
        role: MessageRole::Assistant,
        parts: vec![MessagePart::Tool {
            tool: tool.to_string(),
            input,
            state,
            output: None,
        }],
    }
}

pub fn signal_done_message(id: &str, payload: &str) -> SessionMessage {
    tool_message(
        id,
        SIGNAL_DONE_TOOL,
        json!({ "result": payload }),
        ToolState::Completed,
    )
}

/// Pending task with agent `dev` and every metadata list declared empty.
pub fn task(id: &str, description: &str) -> Task {
    Task {
        id: id.to_string(),
        description: description.to_string(),
        agent: Some("dev".to_string()),
        instruction: description.to_string(),
        skills: Some(Vec::new()),
        contracts: Some(Vec::new()),
        files: Some(Vec::new()),
        todo_ids: Some(Vec::new()),
        status: TaskStatus::Pending,
    }
}

/// Pending todo items, one per line.
pub fn todo_items(lines: &[&str]) -> Vec<TodoItem> {
    lines
        .iter()
        .map(|line| TodoItem {
            id: None,
            content: line.to_string(),
            status: TodoStatus::Pending,
        })
        .collect()
}

/// Initialize a git repository with one commit.
pub fn init_git_repo(root: &Path) {
    let run = |args: &[&str]| {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .status()
            .expect("run git");
        assert!(status.success(), "git {}", args.join(" "));
    };
    run(&["init"]);
    run(&["config", "user.email", "test@example.com"]);
    run(&["config", "user.name", "test"]);
    fs::write(root.join("README.md"), "hi\n").expect("write");
    run(&["add", "README.md"]);
    run(&["commit", "-m", "init"]);
}
