//! Delegator configuration stored under `.delegator/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::signals::ErrorLoopSettings;

/// Canonical paths within `.delegator/` for a project root.
#[derive(Debug, Clone)]
pub struct DelegatorPaths {
    pub root: PathBuf,
    pub delegator_dir: PathBuf,
    pub config_path: PathBuf,
    pub reports_dir: PathBuf,
}

impl DelegatorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let delegator_dir = root.join(".delegator");
        Self {
            root: root.clone(),
            config_path: delegator_dir.join("config.toml"),
            reports_dir: delegator_dir.join("reports"),
            delegator_dir,
        }
    }
}

/// Delegator configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DelegatorConfig {
    /// Agent used when a task line carries no `(Agent: ..)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,

    /// Directory holding `<name>/SKILL.md` or `<name>.md` skill files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills_dir: Option<PathBuf>,

    pub poll: PollSettings,
    pub error_loop: ErrorLoopSettings,
    pub retry: RetrySettings,

    /// Agent name => fallback model id.
    pub fallback_models: BTreeMap<String, String>,

    pub output: OutputSettings,
    pub frontend: FrontendSettings,
    pub scope: ScopeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub no_progress_timeout_secs: u64,
    pub checkpoint_secs: u64,
    pub error_loop_check_secs: u64,
    pub max_wait_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            no_progress_timeout_secs: 3 * 60,
            checkpoint_secs: 5 * 60,
            error_loop_check_secs: 2 * 60,
            max_wait_secs: 10 * 60,
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn no_progress_timeout(&self) -> Duration {
        Duration::from_secs(self.no_progress_timeout_secs)
    }

    pub fn checkpoint(&self) -> Duration {
        Duration::from_secs(self.checkpoint_secs)
    }

    pub fn error_loop_check(&self) -> Duration {
        Duration::from_secs(self.error_loop_check_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per task, including the first.
    pub max_attempts: u32,
    /// Fixed delay before a fallback retry.
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputSettings {
    /// Budget for `summary` verbosity; one token is counted as four chars.
    pub summary_token_budget: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            summary_token_budget: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FrontendSettings {
    pub extensions: Vec<String>,
}

impl Default for FrontendSettings {
    fn default() -> Self {
        Self {
            extensions: ["tsx", "jsx", "vue", "svelte", "html", "astro"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScopeSettings {
    /// Touched paths under these prefixes never count against a task's scope.
    pub ignore_prefixes: Vec<String>,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            ignore_prefixes: vec![".delegator/".to_string()],
        }
    }
}

impl Default for DelegatorConfig {
    fn default() -> Self {
        Self {
            default_agent: None,
            skills_dir: None,
            poll: PollSettings::default(),
            error_loop: ErrorLoopSettings::default(),
            retry: RetrySettings::default(),
            fallback_models: BTreeMap::new(),
            output: OutputSettings::default(),
            frontend: FrontendSettings::default(),
            scope: ScopeSettings::default(),
        }
    }
}

impl DelegatorConfig {
    pub fn validate(&self) -> Result<()> {
        let poll = &self.poll;
        for (name, value) in [
            ("poll.interval_ms", poll.interval_ms),
            ("poll.no_progress_timeout_secs", poll.no_progress_timeout_secs),
            ("poll.checkpoint_secs", poll.checkpoint_secs),
            ("poll.error_loop_check_secs", poll.error_loop_check_secs),
            ("poll.max_wait_secs", poll.max_wait_secs),
        ] {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if poll.checkpoint_secs > poll.max_wait_secs {
            return Err(anyhow!(
                "poll.checkpoint_secs ({}) must not exceed poll.max_wait_secs ({})",
                poll.checkpoint_secs,
                poll.max_wait_secs
            ));
        }

        let error_loop = &self.error_loop;
        if error_loop.repeat_threshold < 2 {
            return Err(anyhow!("error_loop.repeat_threshold must be >= 2"));
        }
        if error_loop.window < error_loop.repeat_threshold {
            return Err(anyhow!(
                "error_loop.window ({}) must be >= error_loop.repeat_threshold ({})",
                error_loop.window,
                error_loop.repeat_threshold
            ));
        }
        if error_loop.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(anyhow!("error_loop.keywords must be a non-empty array"));
        }

        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if let Some((agent, _)) = self
            .fallback_models
            .iter()
            .find(|(_, model)| model.trim().is_empty())
        {
            return Err(anyhow!("fallback_models.{agent} must not be blank"));
        }
        if self.output.summary_token_budget == 0 {
            return Err(anyhow!("output.summary_token_budget must be > 0"));
        }
        if let Some(agent) = &self.default_agent
            && agent.trim().is_empty()
        {
            return Err(anyhow!("default_agent must not be blank"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DelegatorConfig::default()`.
pub fn load_config(path: &Path) -> Result<DelegatorConfig> {
    if !path.exists() {
        let cfg = DelegatorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DelegatorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DelegatorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write a default config under `root`; refuses to overwrite unless `force`.
pub fn init_config(root: &Path, force: bool) -> Result<DelegatorPaths> {
    let paths = DelegatorPaths::new(root);
    if paths.config_path.exists() && !force {
        return Err(anyhow!(
            "delegator init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }
    write_config(&paths.config_path, &DelegatorConfig::default())?;
    Ok(paths)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DelegatorConfig::default());
        assert_eq!(cfg.poll.checkpoint(), Duration::from_secs(300));
        assert_eq!(cfg.poll.max_wait(), Duration::from_secs(600));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = DelegatorConfig {
            default_agent: Some("frontend-ui".to_string()),
            ..DelegatorConfig::default()
        };
        cfg.fallback_models
            .insert("frontend-ui".to_string(), "fallback-model-1".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert_eq!(
            loaded.fallback_models.get("frontend-ui").map(String::as_str),
            Some("fallback-model-1")
        );
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[poll]\ninterval_ms = 500\n\n[retry]\nmax_attempts = 3\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.poll.interval_ms, 500);
        assert_eq!(cfg.poll.max_wait_secs, 600);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.error_loop, ErrorLoopSettings::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = DelegatorConfig::default();
        cfg.poll.checkpoint_secs = 900;
        assert!(cfg.validate().is_err());

        let mut cfg = DelegatorConfig::default();
        cfg.error_loop.repeat_threshold = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = DelegatorConfig::default();
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = DelegatorConfig::default();
        cfg.fallback_models
            .insert("frontend-ui".to_string(), " ".to_string());
        let err = cfg.validate().expect_err("blank fallback");
        assert!(err.to_string().contains("fallback_models.frontend-ui"));
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_config(temp.path(), false).expect("init");
        assert!(paths.config_path.exists());
        assert!(init_config(temp.path(), false).is_err());
        init_config(temp.path(), true).expect("force init");
    }
}
