use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{DEFAULT_COLS, DEFAULT_ROWS, MAX_CONCURRENT_SESSIONS};

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Shell for terminal sessions without an override; falls back to `$SHELL`
    pub default_shell: Option<String>,
    /// Initial pseudo-terminal size
    pub cols: u16,
    pub rows: u16,
    /// `TERM` exported to pseudo-terminal children
    pub term: String,
    pub max_sessions: usize,
    /// How long exit handling waits for output readers to drain
    pub drain_timeout_ms: u64,
    /// Write per-session JSONL I/O logs here when set
    pub session_log_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_shell: None,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            term: "xterm-256color".to_string(),
            max_sessions: MAX_CONCURRENT_SESSIONS,
            drain_timeout_ms: 2_000,
            session_log_dir: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: OrchestratorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `AGENTRUN_*` environment overrides
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(shell) = std::env::var("AGENTRUN_SHELL") {
            if !shell.trim().is_empty() {
                self.default_shell = Some(shell);
            }
        }
        if let Ok(max) = std::env::var("AGENTRUN_MAX_SESSIONS") {
            self.max_sessions = max
                .trim()
                .parse()
                .with_context(|| format!("Invalid AGENTRUN_MAX_SESSIONS: '{}'", max))?;
        }
        if let Ok(dir) = std::env::var("AGENTRUN_LOG_DIR") {
            if !dir.trim().is_empty() {
                self.session_log_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(self)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Shell used for a terminal session: explicit override, configured default, platform default
    pub fn resolve_shell(&self, requested: Option<&str>) -> String {
        requested
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.default_shell.clone())
            .unwrap_or_else(platform_default_shell)
    }
}

pub fn platform_default_shell() -> String {
    if cfg!(windows) {
        std::env::var("COMSPEC").unwrap_or_else(|_| "powershell.exe".to_string())
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| {
            if cfg!(target_os = "macos") {
                "/bin/zsh".to_string()
            } else {
                "/bin/bash".to_string()
            }
        })
    }
}
