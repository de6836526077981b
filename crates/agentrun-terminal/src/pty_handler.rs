use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use anyhow::{Result, Context};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use agentrun_types::UNKNOWN_EXIT_CODE;

/// Byte a terminal sends for Ctrl+C
pub const INTERRUPT_BYTE: u8 = 0x03;

/// What to run inside a pseudo-terminal
#[derive(Debug, Clone)]
pub struct PtyCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

/// Control side of a pseudo-terminal, kept in the registry
pub struct PtyHandle {
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    writer: PtyWriter,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

/// Output side of a pseudo-terminal, owned by the reader thread
pub struct PtyProcess {
    pub reader: Box<dyn Read + Send>,
    child: Box<dyn Child + Send + Sync>,
}

/// Shared handle to the pseudo-terminal input
#[derive(Clone)]
pub struct PtyWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle").field("pid", &self.pid).finish()
    }
}

/// Open a pseudo-terminal and spawn `command` on its slave side
pub fn spawn_pty(command: &PtyCommand) -> Result<(PtyHandle, PtyProcess)> {
    let pty_system = native_pty_system();

    // Create PTY with specified size
    let pty_pair = pty_system
        .openpty(PtySize {
            rows: command.rows,
            cols: command.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("Failed to open PTY")?;

    // Build command
    let mut cmd = CommandBuilder::new(&command.program);
    cmd.args(&command.args);
    cmd.cwd(&command.cwd);
    for (key, value) in &command.env {
        cmd.env(key, value);
    }

    // Spawn child process
    let child = pty_pair
        .slave
        .spawn_command(cmd)
        .with_context(|| format!("Failed to spawn '{}' in PTY", command.program))?;

    // Only the child keeps the slave open, so the reader sees EOF when it exits
    drop(pty_pair.slave);

    let master = pty_pair.master;
    let reader = master
        .try_clone_reader()
        .context("Failed to clone PTY reader")?;
    let writer = master
        .take_writer()
        .context("Failed to take PTY writer")?;

    let pid = child.process_id();
    let killer = child.clone_killer();

    Ok((
        PtyHandle {
            master: Arc::new(Mutex::new(master)),
            writer: PtyWriter(Arc::new(Mutex::new(writer))),
            killer,
            pid,
        },
        PtyProcess { reader, child },
    ))
}

impl PtyHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn writer(&self) -> PtyWriter {
        self.writer.clone()
    }

    /// Resize the PTY
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let master = self.master.lock().unwrap_or_else(|e| e.into_inner());
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")?;
        Ok(())
    }

    /// Kill the child process
    pub fn kill(&mut self) -> Result<()> {
        self.killer
            .kill()
            .context("Failed to kill PTY child process")?;
        Ok(())
    }
}

impl PtyWriter {
    /// Write data to PTY (send keys)
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.0.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(data)
            .context("Failed to write to PTY")?;
        writer.flush()
            .context("Failed to flush PTY writer")?;
        Ok(())
    }

    /// Send the interrupt control byte, as if the user pressed Ctrl+C
    pub fn interrupt(&self) -> Result<()> {
        self.write(&[INTERRUPT_BYTE])
    }
}

impl PtyProcess {
    /// Block until the child exits
    pub fn wait(&mut self) -> i32 {
        match self.child.wait() {
            Ok(status) => i32::try_from(status.exit_code()).unwrap_or(UNKNOWN_EXIT_CODE),
            Err(e) => {
                log::warn!("Failed to wait for PTY child: {}", e);
                UNKNOWN_EXIT_CODE
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> PtyCommand {
        PtyCommand {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: std::env::temp_dir(),
            env: vec![("TERM".to_string(), "dumb".to_string())],
            cols: 80,
            rows: 24,
        }
    }

    #[test]
    fn reads_output_and_exit_code() {
        let (handle, mut process) = spawn_pty(&sh("printf pty-ok; exit 3")).unwrap();
        assert!(handle.pid().is_some());

        let mut output = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match process.reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
            }
        }
        assert!(String::from_utf8_lossy(&output).contains("pty-ok"));
        assert_eq!(process.wait(), 3);
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let mut command = sh("true");
        command.program = "/definitely/not/here".to_string();
        assert!(spawn_pty(&command).is_err());
    }
}
