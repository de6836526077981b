//! Plain child processes with piped stdio
//!
//! The `tokio::process::Child` itself is owned by the exit-watcher task; the
//! registry only keeps the channels needed to feed stdin and request a kill.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use agentrun_types::UNKNOWN_EXIT_CODE;

/// Control side of a piped child, kept in the registry
#[derive(Debug)]
pub struct PipedHandle {
    pid: Option<u32>,
    stdin: Option<mpsc::UnboundedSender<Vec<u8>>>,
    kill: Option<oneshot::Sender<()>>,
}

/// Stream side of a piped child, consumed by the I/O tasks
#[derive(Debug)]
pub struct PipedProcess {
    pub child: Child,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// Channel ends wired into the I/O tasks
#[derive(Debug)]
pub struct PipedChannels {
    pub stdin_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pub kill_rx: oneshot::Receiver<()>,
}

/// Spawn `program` with all three stdio streams piped
pub fn spawn_piped(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &[(String, String)],
) -> std::io::Result<(PipedHandle, PipedProcess, PipedChannels)> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn()?;
    let pid = child.id();

    let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
    let (kill_tx, kill_rx) = oneshot::channel();

    let process = PipedProcess {
        stdin: child.stdin.take(),
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        child,
    };

    Ok((
        PipedHandle {
            pid,
            stdin: Some(stdin_tx),
            kill: Some(kill_tx),
        },
        process,
        PipedChannels { stdin_rx, kill_rx },
    ))
}

impl PipedHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue bytes for the child's stdin; false once stdin is closed
    pub fn write(&self, data: &[u8]) -> bool {
        match &self.stdin {
            Some(tx) => tx.send(data.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Close stdin so the child sees EOF
    pub fn close_input(&mut self) -> bool {
        self.stdin.take().is_some()
    }

    /// Deliver SIGINT to the child
    pub fn interrupt(&self) -> bool {
        match self.pid {
            Some(pid) => send_signal(pid, Signal::Interrupt),
            None => false,
        }
    }

    /// Ask the exit watcher to terminate the child
    pub fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            // The watcher is gone when the child already exited
            let _ = kill.send(());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let signo = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Terminate => libc::SIGTERM,
    };
    // SAFETY: kill(2) has no memory-safety preconditions
    unsafe { libc::kill(pid, signo) == 0 }
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, signal: Signal) -> bool {
    log::debug!("{:?} signal is not supported on this platform", signal);
    false
}

/// Terminate a child still owned by the caller
pub fn terminate_child(child: &mut Child) {
    let signalled = child
        .id()
        .is_some_and(|pid| send_signal(pid, Signal::Terminate));
    if !signalled {
        if let Err(e) = child.start_kill() {
            log::debug!("Failed to kill child: {}", e);
        }
    }
}

/// Exit code from a wait result
pub fn exit_code(status: std::io::Result<std::process::ExitStatus>) -> i32 {
    match status {
        Ok(status) => status.code().unwrap_or(UNKNOWN_EXIT_CODE),
        Err(e) => {
            log::warn!("Failed to wait for child: {}", e);
            UNKNOWN_EXIT_CODE
        }
    }
}

/// Append-only stdout accumulator for batch runs
#[derive(Debug, Clone, Default)]
pub struct BatchBuffer(Arc<Mutex<String>>);

impl BatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, text: &str) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push_str(text);
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the accumulated text, leaving the buffer empty
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_buffer_appends_and_takes() {
        let buffer = BatchBuffer::new();
        let shared = buffer.clone();
        shared.append("{\"result\":");
        shared.append("\"ok\"}");
        assert_eq!(buffer.len(), 15);
        assert_eq!(buffer.take(), "{\"result\":\"ok\"}");
        assert!(buffer.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn closed_stdin_rejects_writes() {
        let (mut handle, mut process, _channels) =
            spawn_piped("/bin/sh", &["-c".to_string(), "exit 0".to_string()], Path::new("/"), &[])
                .unwrap();
        assert!(handle.pid().is_some());
        assert!(handle.close_input());
        assert!(!handle.write(b"late"));
        assert!(!handle.close_input());
        assert_eq!(exit_code(process.child.wait().await), 0);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let result = spawn_piped("/definitely/not/here", &[], Path::new("/"), &[]);
        assert!(result.is_err());
    }
}
