//! Configuration resolution for Arbor.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`$XDG_CONFIG_HOME/arbor/settings.json`)
//! 3. Project config (`<repo>/.arbor/settings.json`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Files are merged key by key, so a project file that only sets
//! `refresh.interval_secs` keeps every other global setting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::worktree::SortOrder;

const MAX_STATUS_CONCURRENCY: usize = 32;
const MIN_STATUS_CONCURRENCY: usize = 4;

/// Complete Arbor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub git: GitConfig,
    pub worktrees: WorktreeConfig,
    pub refresh: RefreshConfig,
    pub log_level: LogLevel,
    /// Write logs here while the TUI owns the terminal.
    pub debug_log: Option<PathBuf>,
}

/// Wrapper so the default level survives `#[serde(default)]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        Self("info".to_string())
    }
}

/// How git is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub binary: String,
    pub command_timeout_secs: u64,
    /// Parallel `git status` calls per reconciliation pass.
    pub status_concurrency: usize,
}

impl Default for GitConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZero::get);
        Self {
            binary: crate::runner::GIT_PROGRAM.to_string(),
            command_timeout_secs: 30,
            status_concurrency: (cpus * 2).clamp(MIN_STATUS_CONCURRENCY, MAX_STATUS_CONCURRENCY),
        }
    }
}

/// Where new worktrees go and how the list is presented.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorktreeConfig {
    /// Base directory; worktrees land in `<dir>/<repo-name>/<branch>`.
    pub dir: Option<PathBuf>,
    pub sort_by_active: bool,
    /// Rename the checked-out branch along with the directory.
    pub rename_branch: bool,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            dir: None,
            sort_by_active: true,
            rename_branch: true,
        }
    }
}

/// Background refresh triggers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshConfig {
    pub auto_refresh: bool,
    pub interval_secs: u64,
    pub watch_git_dir: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            interval_secs: 10,
            watch_git_dir: true,
        }
    }
}

impl Config {
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(if self.git.command_timeout_secs == 0 {
            1
        } else {
            self.git.command_timeout_secs
        })
    }

    pub fn status_concurrency(&self) -> usize {
        self.git.status_concurrency.clamp(1, MAX_STATUS_CONCURRENCY)
    }

    /// Auto-refresh period, `None` when disabled. Clamped to at least 1s.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh.auto_refresh && self.refresh.interval_secs > 0)
            .then(|| Duration::from_secs(self.refresh.interval_secs.max(1)))
    }

    pub const fn sort_order(&self) -> SortOrder {
        if self.worktrees.sort_by_active {
            SortOrder::ActiveFirst
        } else {
            SortOrder::Path
        }
    }

    /// Base directory for new worktrees, `~/.local/share/worktrees` by default.
    pub fn worktree_base_dir(&self) -> PathBuf {
        self.worktrees.dir.as_deref().map_or_else(
            || {
                dirs::home_dir()
                    .unwrap_or_default()
                    .join(".local")
                    .join("share")
                    .join("worktrees")
            },
            expand_home,
        )
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("arbor").join("settings.json"))
}

/// Project config file path inside a repository.
pub fn project_config_path(repo_dir: &Path) -> PathBuf {
    repo_dir.join(".arbor").join("settings.json")
}

/// Load configuration with hierarchical resolution from the real
/// environment.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    load_config_from(
        global_config_path().as_deref(),
        project_dir,
        |key| std::env::var(key).ok(),
    )
}

/// Load configuration from explicit sources.
pub fn load_config_from(
    global_path: Option<&Path>,
    project_dir: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(path) = global_path.filter(|p| p.exists()) {
        merge_values(&mut merged, load_config_file(path)?);
    }
    if let Some(dir) = project_dir {
        let path = project_config_path(dir);
        if path.exists() {
            merge_values(&mut merged, load_config_file(&path)?);
        }
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, env);
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_values(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(val) = env("ARBOR_GIT_BINARY") {
        config.git.binary = val;
    }
    if let Some(n) = env("ARBOR_COMMAND_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.git.command_timeout_secs = n;
    }
    if let Some(n) = env("ARBOR_STATUS_CONCURRENCY").and_then(|v| v.parse().ok()) {
        config.git.status_concurrency = n;
    }
    if let Some(val) = env("ARBOR_WORKTREE_DIR") {
        config.worktrees.dir = Some(PathBuf::from(val));
    }
    if let Some(n) = env("ARBOR_REFRESH_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.refresh.interval_secs = n;
    }
    if let Some(val) = env("ARBOR_LOG_LEVEL") {
        config.log_level = LogLevel(val);
    }
}
