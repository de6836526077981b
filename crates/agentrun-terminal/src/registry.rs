//! In-memory table of live managed processes, keyed by session id

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use chrono::{DateTime, Utc};

use agentrun_types::{EntryInfo, OrchestratorError, ToolType, TransportMode};

use super::logger::SessionLogger;
use super::piped::{BatchBuffer, PipedHandle};
use super::pty_handler::PtyHandle;

/// Backing transport of an entry; exactly one kind, fixed at creation
#[derive(Debug)]
pub enum Backing {
    Pty(PtyHandle),
    Piped {
        child: PipedHandle,
        /// Present only for batch runs
        batch: Option<BatchBuffer>,
    },
}

/// One live session
#[derive(Debug)]
pub struct ManagedProcess {
    /// Distinguishes successive spawns that reuse a session id
    pub(crate) instance: u64,
    pub session_id: String,
    pub tool_type: ToolType,
    pub cwd: PathBuf,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub backing: Backing,
    /// Last text written, used for echo suppression in plain terminals
    pub last_command: Option<String>,
    pub(crate) logger: Option<Arc<SessionLogger>>,
}

impl ManagedProcess {
    pub fn mode(&self) -> TransportMode {
        match &self.backing {
            Backing::Pty(_) if self.tool_type.is_terminal() => TransportMode::InteractiveTerminal,
            Backing::Pty(_) => TransportMode::InteractiveAgent,
            Backing::Piped { batch: Some(_), .. } => TransportMode::BatchAgent,
            Backing::Piped { batch: None, .. } => TransportMode::InteractiveAgent,
        }
    }

    pub fn info(&self) -> EntryInfo {
        let buffered_bytes = match &self.backing {
            Backing::Piped { batch: Some(buffer), .. } => buffer.len(),
            _ => 0,
        };
        EntryInfo {
            session_id: self.session_id.clone(),
            tool_type: self.tool_type.clone(),
            mode: self.mode(),
            cwd: self.cwd.clone(),
            pid: self.pid,
            started_at: self.started_at,
            buffered_bytes,
            last_command: self.last_command.clone(),
        }
    }

    /// Terminate the backing transport
    pub(crate) fn terminate(&mut self) {
        match &mut self.backing {
            Backing::Pty(pty) => {
                if let Err(e) = pty.kill() {
                    log::debug!("[{}] {:#}", self.session_id, e);
                }
            }
            Backing::Piped { child, .. } => child.terminate(),
        }
    }
}

/// Registry of live sessions
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<String, ManagedProcess>>,
    next_instance: AtomicU64,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ManagedProcess>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn next_instance(&self) -> u64 {
        self.next_instance.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add an entry; a still-live entry with the same id is never overwritten
    /// and the table never grows past `max_sessions`
    ///
    /// On rejection the entry is handed back so the caller can tear it down.
    pub fn insert(
        &self,
        entry: ManagedProcess,
        max_sessions: usize,
    ) -> Result<(), (OrchestratorError, ManagedProcess)> {
        let mut entries = self.lock();
        if entries.contains_key(&entry.session_id) {
            let err = OrchestratorError::SessionExists(entry.session_id.clone());
            return Err((err, entry));
        }
        if entries.len() >= max_sessions {
            return Err((OrchestratorError::SessionLimit(max_sessions), entry));
        }
        entries.insert(entry.session_id.clone(), entry);
        Ok(())
    }

    pub fn remove(&self, session_id: &str) -> Option<ManagedProcess> {
        self.lock().remove(session_id)
    }

    /// Remove only if the stored entry is the given spawn instance
    pub fn remove_instance(&self, session_id: &str, instance: u64) -> Option<ManagedProcess> {
        let mut entries = self.lock();
        match entries.get(session_id) {
            Some(entry) if entry.instance == instance => entries.remove(session_id),
            _ => None,
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    pub fn with_entry<R>(&self, session_id: &str, f: impl FnOnce(&mut ManagedProcess) -> R) -> Option<R> {
        self.lock().get_mut(session_id).map(f)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<EntryInfo> {
        let mut infos: Vec<EntryInfo> = self.lock().values().map(ManagedProcess::info).collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.session_id.cmp(&b.session_id)));
        infos
    }

    pub fn get_info(&self, session_id: &str) -> Option<EntryInfo> {
        self.lock().get(session_id).map(ManagedProcess::info)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Last submitted command of a specific spawn instance
    pub(crate) fn last_command(&self, session_id: &str, instance: u64) -> Option<String> {
        self.lock()
            .get(session_id)
            .filter(|entry| entry.instance == instance)
            .and_then(|entry| entry.last_command.clone())
    }

    /// Forget the last command once its echo was consumed, unless a newer write replaced it
    pub(crate) fn clear_last_command_if(&self, session_id: &str, instance: u64, command: &str) {
        if let Some(entry) = self.lock().get_mut(session_id) {
            if entry.instance == instance && entry.last_command.as_deref() == Some(command) {
                entry.last_command = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piped::spawn_piped;
    use std::path::Path;

    const LIMIT: usize = 8;

    #[cfg(unix)]
    async fn piped_entry(registry: &ProcessRegistry, session_id: &str, batch: bool) -> ManagedProcess {
        let (child, _process, _channels) = spawn_piped(
            "/bin/sh",
            &["-c".to_string(), "exit 0".to_string()],
            Path::new("/"),
            &[],
        )
        .unwrap();
        ManagedProcess {
            instance: registry.next_instance(),
            session_id: session_id.to_string(),
            tool_type: ToolType::agent("claude"),
            cwd: PathBuf::from("/"),
            pid: child.pid(),
            started_at: Utc::now(),
            backing: Backing::Piped {
                child,
                batch: batch.then(BatchBuffer::new),
            },
            last_command: None,
            logger: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejects_live_duplicate() {
        let registry = ProcessRegistry::new();
        registry.insert(piped_entry(&registry, "a", true).await, LIMIT).unwrap();
        let dup = piped_entry(&registry, "a", false).await;
        let (err, returned) = registry.insert(dup, LIMIT).unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionExists(ref id) if id == "a"));
        assert_eq!(returned.mode(), TransportMode::InteractiveAgent);
        assert_eq!(registry.get_info("a").unwrap().mode, TransportMode::BatchAgent);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_instance_does_not_remove_newer_entry() {
        let registry = ProcessRegistry::new();
        let first = piped_entry(&registry, "a", false).await;
        let stale = first.instance;
        registry.insert(first, LIMIT).unwrap();
        registry.remove("a").unwrap();

        let second = piped_entry(&registry, "a", false).await;
        let current = second.instance;
        registry.insert(second, LIMIT).unwrap();

        assert!(registry.remove_instance("a", stale).is_none());
        assert!(registry.contains("a"));
        assert!(registry.remove_instance("a", current).is_some());
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clear_last_command_respects_newer_writes() {
        let registry = ProcessRegistry::new();
        let entry = piped_entry(&registry, "a", false).await;
        let instance = entry.instance;
        registry.insert(entry, LIMIT).unwrap();

        registry.with_entry("a", |e| e.last_command = Some("ls".to_string()));
        assert_eq!(registry.last_command("a", instance).as_deref(), Some("ls"));

        registry.with_entry("a", |e| e.last_command = Some("pwd".to_string()));
        registry.clear_last_command_if("a", instance, "ls");
        assert_eq!(registry.last_command("a", instance).as_deref(), Some("pwd"));

        registry.clear_last_command_if("a", instance, "pwd");
        assert_eq!(registry.last_command("a", instance), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn insert_enforces_session_limit() {
        let registry = ProcessRegistry::new();
        registry.insert(piped_entry(&registry, "a", false).await, 1).unwrap();

        let (err, _rejected) = registry
            .insert(piped_entry(&registry, "b", false).await, 1)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionLimit(1)));
        assert_eq!(registry.keys(), vec!["a".to_string()]);

        registry.remove("a").unwrap();
        registry.insert(piped_entry(&registry, "b", false).await, 1).unwrap();
    }

    #[test]
    fn empty_registry_queries() {
        let registry = ProcessRegistry::new();
        assert!(registry.keys().is_empty());
        assert!(registry.snapshot().is_empty());
        assert!(registry.get_info("missing").is_none());
        assert!(registry.remove("missing").is_none());
        assert_eq!(registry.with_entry("missing", |_| ()), None);
    }
}
