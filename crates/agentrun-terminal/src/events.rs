use tokio::sync::mpsc;

use agentrun_types::ProcessEvent;

/// Sending side of the orchestrator event stream
///
/// All sessions share one channel; per-session order is the order in which the
/// session's reader and watcher emit.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ProcessEvent) {
        if let Err(e) = self.tx.send(event) {
            log::trace!("[{}] event dropped, no receiver", e.0.session_id());
        }
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = ProcessEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}
