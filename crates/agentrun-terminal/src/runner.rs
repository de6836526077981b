//! One-shot command execution
//!
//! Non-interactive shells skip the user's rc files, so aliases and PATH tweaks
//! would be missing. Shells with a well-known rc file source it first; the
//! rest run as login shells.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use agentrun_types::{ProcessEvent, COMMAND_SPAWN_FAILURE_CODE};

use super::events::EventSink;
use super::filter::strip_shell_integration;
use super::orchestrator::{drain_readers, pump_output};
use super::piped::exit_code;

/// Shell family, as far as command wrapping cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellKind {
    Zsh,
    Bash,
    Other(String),
}

impl ShellKind {
    /// Classify a shell by the file name of its path
    pub fn detect(shell: &str) -> Self {
        let name = Path::new(shell.trim())
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let name = name.strip_suffix(".exe").unwrap_or(&name).to_string();
        match name.as_str() {
            "zsh" => Self::Zsh,
            "bash" => Self::Bash,
            _ => Self::Other(name),
        }
    }

    pub fn rc_file(&self) -> Option<&'static str> {
        match self {
            Self::Zsh => Some("~/.zshrc"),
            Self::Bash => Some("~/.bashrc"),
            Self::Other(_) => None,
        }
    }
}

/// Program and arguments that actually get executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInvocation {
    pub program: String,
    pub args: Vec<String>,
}

/// Quote `value` as a single POSIX shell word
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Build the invocation that runs `command` under `shell`
#[cfg(not(windows))]
pub fn wrap_command(shell: &str, command: &str) -> ShellInvocation {
    let kind = ShellKind::detect(shell);
    let shell_word = shell_quote(shell.trim());
    let line = match kind.rc_file() {
        Some(rc) => {
            // Sourcing is best effort; a broken rc file must not fail the command
            let script = format!("source {} >/dev/null 2>&1\n{}", rc, command);
            format!("{} -c {}", shell_word, shell_quote(&script))
        }
        None => format!("{} -l -c {}", shell_word, shell_quote(command)),
    };
    ShellInvocation {
        program: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), line],
    }
}

#[cfg(windows)]
pub fn wrap_command(_shell: &str, command: &str) -> ShellInvocation {
    ShellInvocation {
        program: "cmd".to_string(),
        args: vec!["/C".to_string(), command.to_string()],
    }
}

/// Run `command` to completion, streaming `data`/`stderr` and ending with `command-exit`
pub(crate) async fn run_command(
    events: &EventSink,
    session_id: &str,
    command: &str,
    cwd: &Path,
    shell: &str,
    drain_timeout: Duration,
) -> i32 {
    let invocation = wrap_command(shell, command);
    log::debug!("[{}] running {:?}", session_id, invocation);

    let spawned = Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            log::warn!("[{}] failed to run command: {}", session_id, e);
            events.emit(ProcessEvent::error(
                session_id,
                format!("Failed to execute command: {}", e),
            ));
            events.emit(ProcessEvent::command_exit(session_id, COMMAND_SPAWN_FAILURE_CODE));
            return COMMAND_SPAWN_FAILURE_CODE;
        }
    };

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        let events = events.clone();
        let id = session_id.to_string();
        readers.push(tokio::spawn(pump_output(stdout, move |text| {
            let cleaned = strip_shell_integration(&text);
            if !cleaned.is_empty() {
                events.emit(ProcessEvent::data(&id, cleaned));
            }
        })));
    }
    if let Some(stderr) = child.stderr.take() {
        let events = events.clone();
        let id = session_id.to_string();
        readers.push(tokio::spawn(pump_output(stderr, move |text| {
            events.emit(ProcessEvent::stderr(&id, text));
        })));
    }

    let code = exit_code(child.wait().await);
    drain_readers(session_id, readers, drain_timeout).await;

    log::debug!("[{}] command finished with code {}", session_id, code);
    events.emit(ProcessEvent::command_exit(session_id, code));
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_shell_by_basename() {
        assert_eq!(ShellKind::detect("/bin/zsh"), ShellKind::Zsh);
        assert_eq!(ShellKind::detect("/usr/local/bin/bash"), ShellKind::Bash);
        assert_eq!(ShellKind::detect("bash"), ShellKind::Bash);
        assert_eq!(ShellKind::detect("/usr/bin/fish"), ShellKind::Other("fish".to_string()));
        assert_eq!(ShellKind::detect("/bin/sh").rc_file(), None);
    }

    #[test]
    fn quotes_embedded_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[cfg(unix)]
    #[test]
    fn zsh_sources_rc_file_first() {
        let invocation = wrap_command("/bin/zsh", "ll");
        assert_eq!(invocation.program, "/bin/sh");
        assert_eq!(
            invocation.args,
            vec![
                "-c".to_string(),
                "'/bin/zsh' -c 'source ~/.zshrc >/dev/null 2>&1\nll'".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn other_shells_run_as_login_shell() {
        let invocation = wrap_command("/usr/bin/fish", "echo 'hi'");
        assert_eq!(
            invocation.args[1],
            r"'/usr/bin/fish' -l -c 'echo '\''hi'\'''"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_output_and_reports_exit() {
        let (events, mut rx) = EventSink::channel();
        let code = run_command(
            &events,
            "cmd-1",
            "printf out; printf err >&2; exit 4",
            Path::new("/"),
            "/bin/sh",
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(code, 4);
        drop(events);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert!(received.contains(&ProcessEvent::data("cmd-1", "out")));
        assert!(received.contains(&ProcessEvent::stderr("cmd-1", "err")));
        assert_eq!(received.last(), Some(&ProcessEvent::command_exit("cmd-1", 4)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_cwd_is_a_spawn_failure() {
        let (events, mut rx) = EventSink::channel();
        let code = run_command(
            &events,
            "cmd-2",
            "true",
            Path::new("/definitely/not/here"),
            "/bin/sh",
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(code, 1);
        assert!(matches!(rx.recv().await, Some(ProcessEvent::Error { .. })));
        assert_eq!(rx.recv().await, Some(ProcessEvent::command_exit("cmd-2", 1)));
    }
}
