//! Core types shared by the agentrun crates
//!
//! This crate holds the plain data exchanged between the process orchestrator
//! and the layers that drive it: spawn configuration, emitted events, registry
//! snapshots and the error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Constants
// ============================================================================

/// Separator placed before a one-shot prompt so it is always parsed as a positional value
pub const PROMPT_SEPARATOR: &str = "--";

/// Prefix for stderr text surfaced through `data` events
pub const STDERR_PREFIX: &str = "[stderr] ";

/// Exit code reported when the process gave none (killed by a signal, wait failure)
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Exit code synthesized when a one-shot command could not be started
pub const COMMAND_SPAWN_FAILURE_CODE: i32 = 1;

// ============================================================================
// Tool and transport types
// ============================================================================

/// What kind of tool a session runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToolType {
    /// A plain interactive shell
    Terminal,
    /// A named agent binary (claude, codex, gemini, ...)
    Agent(String),
}

impl ToolType {
    pub fn agent(name: impl Into<String>) -> Self {
        ToolType::Agent(name.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolType::Terminal)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ToolType::Terminal => "terminal",
            ToolType::Agent(name) => name,
        }
    }
}

impl From<&str> for ToolType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "terminal" | "shell" => ToolType::Terminal,
            _ => ToolType::Agent(s.to_string()),
        }
    }
}

impl From<String> for ToolType {
    fn from(s: String) -> Self {
        ToolType::from(s.as_str())
    }
}

impl From<ToolType> for String {
    fn from(tool: ToolType) -> Self {
        tool.as_str().to_string()
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a managed process is wired up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    /// Shell running inside a pseudo-terminal
    InteractiveTerminal,
    /// Agent binary with live output (pseudo-terminal or piped)
    InteractiveAgent,
    /// Agent invoked with a one-shot prompt; stdout is decoded after exit
    BatchAgent,
}

impl TransportMode {
    pub fn is_batch(&self) -> bool {
        matches!(self, TransportMode::BatchAgent)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::InteractiveTerminal => write!(f, "interactive-terminal"),
            TransportMode::InteractiveAgent => write!(f, "interactive-agent"),
            TransportMode::BatchAgent => write!(f, "batch-agent"),
        }
    }
}

// ============================================================================
// Spawn configuration
// ============================================================================

/// Everything needed to start one session
///
/// Built by the UI/agent-catalog layer. Agent-specific flags (model, resume,
/// working directory arguments) are already folded into `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    pub session_id: String,
    pub tool_type: ToolType,
    pub cwd: PathBuf,
    /// Executable path or name. Ignored for terminal sessions.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// The agent only works when attached to a real terminal
    #[serde(default)]
    pub requires_pty: bool,
    /// One-shot prompt; forces batch mode
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt: Option<String>,
    /// Shell override for terminal sessions
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub shell: Option<String>,
    /// Extra environment for the child
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub env: Vec<(String, String)>,
    /// Keep a batch run's stdin writable; by default it is closed at spawn
    #[serde(default)]
    pub keep_stdin_open: bool,
}

impl ProcessConfig {
    /// Config for a plain terminal session
    pub fn terminal(session_id: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            tool_type: ToolType::Terminal,
            cwd: cwd.into(),
            command: String::new(),
            args: Vec::new(),
            requires_pty: false,
            prompt: None,
            shell: None,
            env: Vec::new(),
            keep_stdin_open: false,
        }
    }

    /// Config for an agent binary
    pub fn agent(
        session_id: impl Into<String>,
        tool: impl Into<String>,
        command: impl Into<String>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            tool_type: ToolType::Agent(tool.into()),
            cwd: cwd.into(),
            command: command.into(),
            args: Vec::new(),
            requires_pty: false,
            prompt: None,
            shell: None,
            env: Vec::new(),
            keep_stdin_open: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn requiring_pty(mut self) -> Self {
        self.requires_pty = true;
        self
    }

    /// Let the caller feed a batch run through `write` and close it explicitly
    pub fn with_open_stdin(mut self) -> Self {
        self.keep_stdin_open = true;
        self
    }

    /// Transport the orchestrator will pick for this config
    ///
    /// A prompt always wins: it forces batch mode and disables terminal allocation.
    pub fn transport_mode(&self) -> TransportMode {
        if self.prompt.is_some() {
            TransportMode::BatchAgent
        } else if self.tool_type.is_terminal() {
            TransportMode::InteractiveTerminal
        } else {
            TransportMode::InteractiveAgent
        }
    }

    /// Whether the session gets a pseudo-terminal
    pub fn uses_pty(&self) -> bool {
        self.prompt.is_none() && (self.tool_type.is_terminal() || self.requires_pty)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events emitted by the orchestrator, in per-session production order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ProcessEvent {
    /// Output chunk, already filtered for interactive terminals
    Data { session_id: String, text: String },
    /// Error-stream text from a one-shot command
    Stderr { session_id: String, text: String },
    /// Backing process terminated
    Exit { session_id: String, code: i32 },
    /// Spawn or transport-level failure
    Error { session_id: String, message: String },
    /// Resumable identifier extracted from a batch response
    SessionId { session_id: String, captured_id: String },
    /// One-shot command finished
    CommandExit { session_id: String, code: i32 },
}

impl ProcessEvent {
    pub fn session_id(&self) -> &str {
        match self {
            ProcessEvent::Data { session_id, .. }
            | ProcessEvent::Stderr { session_id, .. }
            | ProcessEvent::Exit { session_id, .. }
            | ProcessEvent::Error { session_id, .. }
            | ProcessEvent::SessionId { session_id, .. }
            | ProcessEvent::CommandExit { session_id, .. } => session_id,
        }
    }

    /// Last event of a session or command run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessEvent::Exit { .. } | ProcessEvent::CommandExit { .. }
        )
    }

    pub fn data(session_id: &str, text: impl Into<String>) -> Self {
        ProcessEvent::Data {
            session_id: session_id.to_string(),
            text: text.into(),
        }
    }

    pub fn stderr(session_id: &str, text: impl Into<String>) -> Self {
        ProcessEvent::Stderr {
            session_id: session_id.to_string(),
            text: text.into(),
        }
    }

    pub fn exit(session_id: &str, code: i32) -> Self {
        ProcessEvent::Exit {
            session_id: session_id.to_string(),
            code,
        }
    }

    pub fn error(session_id: &str, message: impl Into<String>) -> Self {
        ProcessEvent::Error {
            session_id: session_id.to_string(),
            message: message.into(),
        }
    }

    pub fn captured_session(session_id: &str, captured_id: impl Into<String>) -> Self {
        ProcessEvent::SessionId {
            session_id: session_id.to_string(),
            captured_id: captured_id.into(),
        }
    }

    pub fn command_exit(session_id: &str, code: i32) -> Self {
        ProcessEvent::CommandExit {
            session_id: session_id.to_string(),
            code,
        }
    }
}

// ============================================================================
// Registry snapshots
// ============================================================================

/// Read-only view of a live registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub session_id: String,
    pub tool_type: ToolType,
    pub mode: TransportMode,
    pub cwd: PathBuf,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    /// Bytes accumulated so far by a batch run; zero otherwise
    pub buffered_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_command: Option<String>,
}

/// Successful spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub mode: TransportMode,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("session '{0}' is already running")]
    SessionExists(String),

    #[error("maximum concurrent sessions ({0}) reached")]
    SessionLimit(usize),

    #[error("failed to start session '{session_id}': {reason}")]
    Spawn { session_id: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tool_type_parses_terminal_aliases() {
        assert_eq!(ToolType::from("terminal"), ToolType::Terminal);
        assert_eq!(ToolType::from("Shell"), ToolType::Terminal);
        assert_eq!(ToolType::from("claude"), ToolType::agent("claude"));
    }

    #[test]
    fn prompt_forces_batch_and_disables_pty() {
        let config = ProcessConfig::agent("s1", "claude", "claude", "/tmp")
            .requiring_pty()
            .with_prompt("hello");
        assert_eq!(config.transport_mode(), TransportMode::BatchAgent);
        assert!(!config.uses_pty());

        let terminal = ProcessConfig::terminal("s2", "/tmp").with_prompt("ls");
        assert!(!terminal.uses_pty());
    }

    #[test]
    fn pty_selection() {
        assert!(ProcessConfig::terminal("t", "/tmp").uses_pty());
        assert!(ProcessConfig::agent("a", "codex", "codex", "/tmp")
            .requiring_pty()
            .uses_pty());
        assert!(!ProcessConfig::agent("a", "gemini", "gemini", "/tmp").uses_pty());
        assert_eq!(
            ProcessConfig::terminal("t", "/tmp").transport_mode(),
            TransportMode::InteractiveTerminal
        );
    }

    #[test]
    fn config_deserializes_from_ui_json() {
        let json = r#"{
            "sessionId": "abc",
            "toolType": "claude",
            "cwd": "/work",
            "command": "/usr/local/bin/claude",
            "args": ["--model", "sonnet"],
            "requiresPty": true
        }"#;
        let config: ProcessConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.session_id, "abc");
        assert_eq!(config.tool_type, ToolType::agent("claude"));
        assert_eq!(config.args, vec!["--model", "sonnet"]);
        assert!(config.requires_pty);
        assert_eq!(config.prompt, None);
        assert!(!config.keep_stdin_open);
    }

    #[test]
    fn open_stdin_is_opt_in() {
        let config = ProcessConfig::agent("b", "claude", "claude", "/tmp").with_prompt("hi");
        assert!(config.transport_mode().is_batch());
        assert!(!config.keep_stdin_open);
        assert!(config.with_open_stdin().keep_stdin_open);
    }

    #[test]
    fn events_serialize_with_kebab_tags() {
        let event = ProcessEvent::captured_session("s1", "abc123");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "session-id", "sessionId": "s1", "capturedId": "abc123"})
        );

        let exit = serde_json::to_value(ProcessEvent::command_exit("s1", 0)).unwrap();
        assert_eq!(exit["type"], "command-exit");
    }

    #[test]
    fn terminal_events() {
        assert!(ProcessEvent::exit("s", 0).is_terminal());
        assert!(ProcessEvent::command_exit("s", 1).is_terminal());
        assert!(!ProcessEvent::data("s", "x").is_terminal());
        assert_eq!(ProcessEvent::error("abc", "boom").session_id(), "abc");
    }
}
