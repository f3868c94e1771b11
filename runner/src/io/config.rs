//! Runner configuration stored in `robot-runner.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::io::tools::CommandLimits;

/// Default config file name in the working directory.
pub const CONFIG_FILE: &str = "robot-runner.toml";

/// Runner configuration (TOML).
///
/// Missing tables and fields fall back to their defaults, so an empty file is
/// a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory for execution records.
    pub state_dir: PathBuf,
    pub run: RunConfig,
    pub assistant: AssistantConfig,
    pub tools: ToolsConfig,
    pub process: ProcessConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".robot"),
            run: RunConfig::default(),
            assistant: AssistantConfig::default(),
            tools: ToolsConfig::default(),
            process: ProcessConfig::default(),
        }
    }
}

/// Tunables for one execution's task loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum feedback replies sent after the first assistant turn.
    pub max_retries: u32,
    pub retry_on_validation_failure: bool,
    /// Keep running remaining tasks after one fails.
    pub continue_on_failure: bool,
    /// Minimum score for a task to count as complete.
    pub validation_threshold: f64,
    pub max_turns_per_task: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_on_validation_failure: true,
            continue_on_failure: false,
            validation_threshold: 0.6,
            max_turns_per_task: 10,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_turns_per_task == 0 {
            bail!("run.max_turns_per_task must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.validation_threshold) {
            bail!("run.validation_threshold must be within 0.0..=1.0");
        }
        Ok(())
    }

    /// Turn budget for one assistant task.
    pub fn effective_turns(&self) -> usize {
        if !self.retry_on_validation_failure {
            return 1;
        }
        let by_retries = self.max_retries.saturating_add(1);
        self.max_turns_per_task.min(by_retries).max(1) as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssistantConfig {
    /// Backend command; receives the request JSON on stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: vec!["robot-assistant".to_string()],
            timeout_secs: 300,
            output_limit_bytes: 200_000,
        }
    }
}

impl AssistantConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tool bridge command. Empty disables tool tasks.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 120,
            output_limit_bytes: 200_000,
        }
    }
}

impl ToolsConfig {
    pub fn limits(&self) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(self.timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessConfig {
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            output_limit_bytes: 200_000,
        }
    }
}

impl ProcessConfig {
    pub fn limits(&self) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(self.timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        self.run.validate()?;
        if self.assistant.command.first().is_none_or(|p| p.trim().is_empty()) {
            bail!("assistant.command must be a non-empty array");
        }
        if self.assistant.timeout_secs == 0 {
            bail!("assistant.timeout_secs must be > 0");
        }
        if self.assistant.output_limit_bytes == 0 {
            bail!("assistant.output_limit_bytes must be > 0");
        }
        if self.tools.command.first().is_some_and(|p| p.trim().is_empty()) {
            bail!("tools.command must not start with an empty program");
        }
        if self.tools.timeout_secs == 0 || self.process.timeout_secs == 0 {
            bail!("tools.timeout_secs and process.timeout_secs must be > 0");
        }
        if self.state_dir.as_os_str().is_empty() {
            bail!("state_dir must not be empty");
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    let cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        RunnerConfig::default()
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path has no file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = RunnerConfig::default();
        cfg.run.continue_on_failure = true;
        cfg.tools.command = vec!["mcp-bridge".to_string()];
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
        assert!(!temp.path().join("config.toml.tmp").exists());
    }

    #[test]
    fn partial_tables_keep_defaults() {
        let cfg: RunnerConfig = toml::from_str("[run]\nmax_turns_per_task = 4\n").expect("parse");
        assert_eq!(cfg.run.max_turns_per_task, 4);
        assert_eq!(cfg.run.max_retries, 3);
        assert_eq!(cfg.assistant.timeout_secs, 300);
    }

    #[test]
    fn validate_rejects_bad_run_settings() {
        let mut cfg = RunnerConfig::default();
        cfg.run.max_turns_per_task = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = RunnerConfig::default();
        cfg.run.validation_threshold = 1.5;
        assert!(cfg.validate().is_err());
        let mut cfg = RunnerConfig::default();
        cfg.assistant.command.clear();
        assert!(cfg.validate().is_err());
    }

    /// Retries cap the turn budget; disabling retries leaves a single turn.
    #[test]
    fn effective_turns_combines_retry_settings() {
        let mut run = RunConfig::default();
        assert_eq!(run.effective_turns(), 4);
        run.max_retries = 50;
        assert_eq!(run.effective_turns(), 10);
        run.retry_on_validation_failure = false;
        assert_eq!(run.effective_turns(), 1);
    }
}
