//! Git adapter for change detection.
//!
//! Tasks may edit files without a recorded tool call, so each task takes a
//! working-tree snapshot before launch and diffs it after completion. The
//! [`DiffProvider`] trait keeps that side effect injectable.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::core::scope::GitChangeSnapshot;
use crate::io::process::run_command_with_timeout;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);
const GIT_OUTPUT_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True when the working directory is inside a git work tree.
    pub fn is_repo(&self) -> bool {
        self.run_capture(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    /// Get status entries (staged, unstaged, untracked) in porcelain format.
    #[instrument(skip_all)]
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        debug!(entries = entries.len(), "git status");
        Ok(entries)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, GIT_TIMEOUT, GIT_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        output.ensure_success(&format!("git {}", args.join(" ")))?;
        Ok(output.stdout_lossy())
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: unquote(path.trim()),
        });
    }
    if line.len() < 4 || !line.is_char_boundary(3) {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once(" -> ") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry {
        code,
        path: unquote(&path),
    })
}

fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}

/// Captures the working-tree change set at a point in time.
pub trait DiffProvider: Send + Sync {
    fn snapshot(&self) -> Result<GitChangeSnapshot>;
}

/// [`DiffProvider`] backed by `git status` plus SHA-256 content hashes.
#[derive(Debug, Clone)]
pub struct GitDiffProvider {
    git: Git,
}

impl GitDiffProvider {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            git: Git::new(workdir),
        }
    }
}

impl DiffProvider for GitDiffProvider {
    #[instrument(skip_all, fields(workdir = %self.git.workdir().display()))]
    fn snapshot(&self) -> Result<GitChangeSnapshot> {
        let entries = self.git.status_porcelain()?;
        let mut snapshot = GitChangeSnapshot::default();
        for entry in entries {
            let hash = hash_file(&self.git.workdir().join(&entry.path))?;
            snapshot.entries.insert(entry.path, hash);
        }
        Ok(snapshot)
    }
}

/// Hex SHA-256 of a file's bytes; `None` when the file does not exist.
pub fn hash_file(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(Some(hex::encode(Sha256::digest(&bytes))))
}
