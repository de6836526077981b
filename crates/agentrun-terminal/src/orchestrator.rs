//! Process orchestrator
//!
//! Spawns and supervises the processes behind sessions. Each session runs either
//! inside a pseudo-terminal (shells, agents that need a real terminal) or as a
//! plain child with piped stdio (other agents, and every batch run with a
//! one-shot prompt). Output is delivered asynchronously on a single event channel;
//! the control operations never wait for process output.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use agentrun_types::{
    EntryInfo, OrchestratorError, ProcessConfig, ProcessEvent, Result, SpawnedProcess,
    PROMPT_SEPARATOR, STDERR_PREFIX,
};

use super::chunk::ChunkAssembler;
use super::config::OrchestratorConfig;
use super::decoder::batch_exit_events;
use super::events::EventSink;
use super::filter::filter_output;
use super::logger::SessionLogger;
use super::piped::{exit_code, spawn_piped, terminate_child, BatchBuffer, PipedChannels, PipedProcess};
use super::pty_handler::{spawn_pty, PtyCommand, PtyProcess, PtyWriter};
use super::registry::{Backing, ManagedProcess, ProcessRegistry};
use super::runner;

const READ_BUFFER_SIZE: usize = 8192;

/// Runs and controls the processes behind sessions
pub struct ProcessOrchestrator {
    config: OrchestratorConfig,
    registry: Arc<ProcessRegistry>,
    events: EventSink,
}

impl std::fmt::Debug for ProcessOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessOrchestrator")
            .field("sessions", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Everything a reader or watcher needs to report for one spawn instance
#[derive(Clone)]
struct SessionContext {
    session_id: String,
    instance: u64,
    registry: Arc<ProcessRegistry>,
    events: EventSink,
    logger: Option<Arc<SessionLogger>>,
}

impl SessionContext {
    /// Filter and emit one interactive chunk; empty results are dropped
    fn emit_interactive(&self, text: &str, plain_terminal: bool) {
        if text.is_empty() {
            return;
        }

        let last_command = if plain_terminal {
            self.registry.last_command(&self.session_id, self.instance)
        } else {
            None
        };

        let filtered = filter_output(text, last_command.as_deref(), plain_terminal);
        if filtered.echo_suppressed {
            if let Some(command) = &last_command {
                self.registry
                    .clear_last_command_if(&self.session_id, self.instance, command);
            }
        }

        if !filtered.text.is_empty() {
            self.emit_data(filtered.text);
        }
    }

    fn emit_data(&self, text: String) {
        if let Some(logger) = &self.logger {
            logger.log_output(&text);
        }
        self.events.emit(ProcessEvent::Data {
            session_id: self.session_id.clone(),
            text,
        });
    }

    fn emit_stderr(&self, text: &str) {
        if let Some(logger) = &self.logger {
            logger.log_stderr(text);
        }
        self.events
            .emit(ProcessEvent::data(&self.session_id, format!("{}{}", STDERR_PREFIX, text)));
    }

    /// Remove the entry (if it is still ours) and emit the closing events
    fn finish(&self, events: Vec<ProcessEvent>, code: i32) {
        self.registry.remove_instance(&self.session_id, self.instance);
        if let Some(logger) = &self.logger {
            logger.log_exit(code);
        }
        log::info!("[{}] process exited with code {}", self.session_id, code);
        self.events.emit_all(events);
    }
}

enum WriteTarget {
    Pty(PtyWriter),
    Piped(bool),
}

impl ProcessOrchestrator {
    /// Create an orchestrator and the receiver for its event stream
    pub fn new(config: OrchestratorConfig) -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (events, rx) = EventSink::channel();
        let orchestrator = Self {
            config,
            registry: Arc::new(ProcessRegistry::new()),
            events,
        };
        (orchestrator, rx)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start the process for a session
    ///
    /// The registry entry exists before this returns. On failure an `error`
    /// event is emitted and the registry is left untouched.
    pub async fn spawn(&self, config: ProcessConfig) -> Result<SpawnedProcess> {
        match self.try_spawn(&config) {
            Ok(spawned) => {
                log::info!(
                    "[{}] spawned {} ({}) pid={:?}",
                    config.session_id,
                    config.tool_type,
                    spawned.mode,
                    spawned.pid
                );
                Ok(spawned)
            }
            Err(e) => {
                log::warn!("[{}] {}", config.session_id, e);
                self.events
                    .emit(ProcessEvent::error(&config.session_id, e.to_string()));
                Err(e)
            }
        }
    }

    fn try_spawn(&self, config: &ProcessConfig) -> Result<SpawnedProcess> {
        // Early rejection before anything is started; `register` re-checks under the lock
        if self.registry.contains(&config.session_id) {
            return Err(OrchestratorError::SessionExists(config.session_id.clone()));
        }
        if self.registry.len() >= self.config.max_sessions {
            return Err(OrchestratorError::SessionLimit(self.config.max_sessions));
        }

        if config.uses_pty() {
            self.spawn_pty_session(config)
        } else {
            self.spawn_piped_session(config)
        }
    }

    fn spawn_pty_session(&self, config: &ProcessConfig) -> Result<SpawnedProcess> {
        let plain_terminal = config.tool_type.is_terminal();
        let (program, args) = if plain_terminal {
            let shell = self.config.resolve_shell(config.shell.as_deref());
            let args = interactive_shell_args();
            (shell, args)
        } else {
            (config.command.clone(), config.args.clone())
        };

        let mut env = vec![("TERM".to_string(), self.config.term.clone())];
        env.extend(config.env.iter().cloned());

        let command = PtyCommand {
            program,
            args,
            cwd: config.cwd.clone(),
            env,
            cols: self.config.cols,
            rows: self.config.rows,
        };
        let (handle, process) = spawn_pty(&command).map_err(|e| OrchestratorError::Spawn {
            session_id: config.session_id.clone(),
            reason: format!("{:#}", e),
        })?;

        let pid = handle.pid();
        let entry = self.new_entry(config, pid, Backing::Pty(handle));
        let mode = entry.mode();
        let ctx = self.context_for(&entry);
        self.register(entry)?;

        let thread_ctx = ctx.clone();
        let spawned = thread::Builder::new()
            .name(format!("pty-reader-{}", config.session_id))
            .spawn(move || run_pty_reader(thread_ctx, plain_terminal, process));
        if let Err(e) = spawned {
            if let Some(mut entry) = self.registry.remove_instance(&ctx.session_id, ctx.instance) {
                entry.terminate();
            }
            return Err(OrchestratorError::Io(e));
        }

        Ok(SpawnedProcess { pid, mode })
    }

    fn spawn_piped_session(&self, config: &ProcessConfig) -> Result<SpawnedProcess> {
        if config.command.trim().is_empty() {
            return Err(OrchestratorError::Spawn {
                session_id: config.session_id.clone(),
                reason: "no executable given".to_string(),
            });
        }

        let mut args = config.args.clone();
        if let Some(prompt) = &config.prompt {
            args.push(PROMPT_SEPARATOR.to_string());
            args.push(prompt.clone());
        }

        let (mut handle, process, channels) =
            spawn_piped(&config.command, &args, &config.cwd, &config.env).map_err(|e| {
                OrchestratorError::Spawn {
                    session_id: config.session_id.clone(),
                    reason: format!("{}: {}", config.command, e),
                }
            })?;

        let pid = handle.pid();
        let is_batch = config.transport_mode().is_batch();
        if is_batch && !config.keep_stdin_open {
            // Agents that read stdin when it is not a TTY would wait forever
            handle.close_input();
        }
        let batch = is_batch.then(BatchBuffer::new);
        let entry = self.new_entry(
            config,
            pid,
            Backing::Piped {
                child: handle,
                batch: batch.clone(),
            },
        );
        let mode = entry.mode();
        let ctx = self.context_for(&entry);
        self.register(entry)?;

        start_piped_tasks(ctx, process, channels, batch, self.config.drain_timeout());

        Ok(SpawnedProcess { pid, mode })
    }

    fn new_entry(&self, config: &ProcessConfig, pid: Option<u32>, backing: Backing) -> ManagedProcess {
        let logger = self.open_logger(&config.session_id);
        let entry = ManagedProcess {
            instance: self.registry.next_instance(),
            session_id: config.session_id.clone(),
            tool_type: config.tool_type.clone(),
            cwd: config.cwd.clone(),
            pid,
            started_at: Utc::now(),
            backing,
            last_command: None,
            logger,
        };
        if let Some(logger) = &entry.logger {
            logger.log_spawn(&entry.mode().to_string(), pid);
        }
        entry
    }

    fn context_for(&self, entry: &ManagedProcess) -> SessionContext {
        SessionContext {
            session_id: entry.session_id.clone(),
            instance: entry.instance,
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            logger: entry.logger.clone(),
        }
    }

    fn register(&self, entry: ManagedProcess) -> Result<()> {
        self.registry
            .insert(entry, self.config.max_sessions)
            .map_err(|(err, mut rejected)| {
                // Lost a race against another spawn
                rejected.terminate();
                err
            })
    }

    fn open_logger(&self, session_id: &str) -> Option<Arc<SessionLogger>> {
        let dir = self.config.session_log_dir.as_ref()?;
        match SessionLogger::new(session_id, dir) {
            Ok(logger) => Some(Arc::new(logger)),
            Err(e) => {
                log::warn!("[{}] session log disabled: {:#}", session_id, e);
                None
            }
        }
    }

    /// Send input to a session
    ///
    /// Terminal sessions get the raw bytes; a submitted line (text containing a
    /// newline) is remembered so its echo can be suppressed. Piped sessions get
    /// the bytes on stdin while it is open.
    pub fn write(&self, session_id: &str, text: &str) -> bool {
        let found = self.registry.with_entry(session_id, |entry| {
            let target = match &entry.backing {
                Backing::Pty(pty) => {
                    if is_submission(text) {
                        entry.last_command = Some(text.trim().to_string());
                    }
                    WriteTarget::Pty(pty.writer())
                }
                Backing::Piped { child, .. } => WriteTarget::Piped(child.write(text.as_bytes())),
            };
            (target, entry.logger.clone())
        });

        let Some((target, logger)) = found else {
            log::debug!("[{}] write to unknown session", session_id);
            return false;
        };

        let written = match target {
            WriteTarget::Pty(writer) => match writer.write(text.as_bytes()) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("[{}] {:#}", session_id, e);
                    false
                }
            },
            WriteTarget::Piped(queued) => queued,
        };

        if written {
            if let Some(logger) = logger {
                logger.log_input(text);
            }
        }
        written
    }

    /// Resize a pseudo-terminal session; false for anything else
    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) -> bool {
        if cols == 0 || rows == 0 {
            return false;
        }
        self.registry
            .with_entry(session_id, |entry| match &entry.backing {
                Backing::Pty(pty) => match pty.resize(cols, rows) {
                    Ok(()) => {
                        if let Some(logger) = &entry.logger {
                            logger.log_resize(cols, rows);
                        }
                        true
                    }
                    Err(e) => {
                        log::warn!("[{}] {:#}", session_id, e);
                        false
                    }
                },
                Backing::Piped { .. } => false,
            })
            .unwrap_or(false)
    }

    /// Ask a session to stop what it is doing, without tearing it down
    ///
    /// Pseudo-terminals receive the Ctrl+C byte; piped children receive SIGINT.
    pub fn interrupt(&self, session_id: &str) -> bool {
        let target = self.registry.with_entry(session_id, |entry| match &entry.backing {
            Backing::Pty(pty) => WriteTarget::Pty(pty.writer()),
            Backing::Piped { child, .. } => WriteTarget::Piped(child.interrupt()),
        });

        match target {
            Some(WriteTarget::Pty(writer)) => match writer.interrupt() {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("[{}] {:#}", session_id, e);
                    false
                }
            },
            Some(WriteTarget::Piped(delivered)) => delivered,
            None => false,
        }
    }

    /// Close a piped child's stdin
    pub fn close_input(&self, session_id: &str) -> bool {
        self.registry
            .with_entry(session_id, |entry| match &mut entry.backing {
                Backing::Piped { child, .. } => child.close_input(),
                Backing::Pty(_) => false,
            })
            .unwrap_or(false)
    }

    /// Terminate a session and drop its registry entry immediately
    ///
    /// Returns whether a live entry was found. The `exit` event still follows
    /// once the process is actually gone.
    pub fn kill(&self, session_id: &str) -> bool {
        match self.registry.remove(session_id) {
            Some(mut entry) => {
                log::info!("[{}] killing pid={:?}", session_id, entry.pid);
                entry.terminate();
                true
            }
            None => false,
        }
    }

    /// Kill every live session
    pub fn kill_all(&self) {
        for session_id in self.registry.keys() {
            // Entries may exit on their own while we iterate
            self.kill(&session_id);
        }
    }

    /// Snapshot of all live sessions
    pub fn list(&self) -> Vec<EntryInfo> {
        self.registry.snapshot()
    }

    pub fn get(&self, session_id: &str) -> Option<EntryInfo> {
        self.registry.get_info(session_id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Run a shell command to completion, streaming its output
    ///
    /// Not registered as a session. Emits `data`/`stderr` chunks and a final
    /// `command-exit`, and returns the exit code.
    pub async fn run_command(&self, session_id: &str, command: &str, cwd: &Path, shell: &str) -> i32 {
        runner::run_command(
            &self.events,
            session_id,
            command,
            cwd,
            shell,
            self.config.drain_timeout(),
        )
        .await
    }
}

impl Drop for ProcessOrchestrator {
    fn drop(&mut self) {
        self.kill_all();
    }
}

fn is_submission(text: &str) -> bool {
    text.contains(['\n', '\r']) && !text.trim().is_empty()
}

fn interactive_shell_args() -> Vec<String> {
    if cfg!(windows) {
        Vec::new()
    } else {
        vec!["-l".to_string()]
    }
}

/// Blocking reader loop for a pseudo-terminal; ends with the exit handling
fn run_pty_reader(ctx: SessionContext, plain_terminal: bool, mut process: PtyProcess) {
    let mut assembler = ChunkAssembler::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match process.reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                let text = assembler.push(&buffer[..n]);
                ctx.emit_interactive(&text, plain_terminal);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO once the child side is gone
                log::debug!("[{}] pty read ended: {}", ctx.session_id, e);
                break;
            }
        }
    }
    ctx.emit_interactive(&assembler.flush(), plain_terminal);

    let code = process.wait();
    ctx.finish(vec![ProcessEvent::exit(&ctx.session_id, code)], code);
}

fn start_piped_tasks(
    ctx: SessionContext,
    process: PipedProcess,
    channels: PipedChannels,
    batch: Option<BatchBuffer>,
    drain_timeout: Duration,
) {
    let PipedProcess {
        mut child,
        stdin,
        stdout,
        stderr,
    } = process;
    let PipedChannels {
        stdin_rx,
        mut kill_rx,
    } = channels;

    if let Some(stdin) = stdin {
        tokio::spawn(pump_stdin(ctx.clone(), stdin, stdin_rx));
    }

    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);

    if let Some(stdout) = stdout {
        let out_ctx = ctx.clone();
        let buffer = batch.clone();
        readers.push(tokio::spawn(pump_output(stdout, move |text| match &buffer {
            // Batch stdout is only looked at after exit
            Some(buffer) => buffer.append(&text),
            None => out_ctx.emit_data(text),
        })));
    }

    if let Some(stderr) = stderr {
        let err_ctx = ctx.clone();
        readers.push(tokio::spawn(pump_output(stderr, move |text| {
            err_ctx.emit_stderr(&text)
        })));
    }

    tokio::spawn(async move {
        let code = tokio::select! {
            status = child.wait() => exit_code(status),
            Ok(()) = &mut kill_rx => {
                terminate_child(&mut child);
                exit_code(child.wait().await)
            }
        };

        drain_readers(&ctx.session_id, readers, drain_timeout).await;

        let events = match batch {
            Some(buffer) => batch_exit_events(&ctx.session_id, &buffer.take(), code),
            None => vec![ProcessEvent::exit(&ctx.session_id, code)],
        };
        ctx.finish(events, code);
    });
}

/// Wait for output readers so nothing is emitted after `exit`
pub(crate) async fn drain_readers(session_id: &str, readers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            log::debug!("[{}] output still open after exit, dropping it", session_id);
            reader.abort();
        }
    }
}

/// Read a stream to EOF, handing complete text chunks to `on_text`
pub(crate) async fn pump_output<R>(mut reader: R, mut on_text: impl FnMut(String))
where
    R: AsyncRead + Unpin,
{
    let mut assembler = ChunkAssembler::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                let text = assembler.push(&buffer[..n]);
                if !text.is_empty() {
                    on_text(text);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("output stream read failed: {}", e);
                break;
            }
        }
    }
    let rest = assembler.flush();
    if !rest.is_empty() {
        on_text(rest);
    }
}

async fn pump_stdin(ctx: SessionContext, mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        let result = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = result {
            log::warn!("[{}] stdin write failed: {}", ctx.session_id, e);
            ctx.events.emit(ProcessEvent::error(
                &ctx.session_id,
                format!("stdin write failed: {}", e),
            ));
            break;
        }
    }
    // Dropping stdin here closes the pipe
}
