#![allow(dead_code)]

use std::collections::HashSet;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use agentrun_terminal::{OrchestratorConfig, ProcessConfig, ProcessEvent};

/// Common fixtures for orchestrator tests
pub struct TestFixtures {
    pub temp_dir: TempDir,
}

impl TestFixtures {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            drain_timeout_ms: 2_000,
            ..OrchestratorConfig::default()
        }
    }

    /// An "agent" that is really a shell script
    pub fn script_agent(&self, session_id: &str, script: &str) -> ProcessConfig {
        ProcessConfig::agent(session_id, "claude", "/bin/sh", self.temp_dir.path())
            .with_args(["-c", script, "sh"])
    }
}

/// Receive events until the session's `exit`, failing after a timeout
pub async fn collect_until_exit(rx: &mut UnboundedReceiver<ProcessEvent>, session_id: &str) -> Vec<ProcessEvent> {
    let collect = async {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = event.session_id() == session_id && matches!(event, ProcessEvent::Exit { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    };
    tokio::time::timeout(Duration::from_secs(15), collect)
        .await
        .expect("timed out waiting for exit event")
}

/// Receive events until every listed session has exited, in any order
pub async fn collect_until_all_exit(rx: &mut UnboundedReceiver<ProcessEvent>, session_ids: &[&str]) -> Vec<ProcessEvent> {
    let collect = async {
        let mut pending: HashSet<&str> = session_ids.iter().copied().collect();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            if let ProcessEvent::Exit { session_id, .. } = &event {
                pending.remove(session_id.as_str());
            }
            events.push(event);
            if pending.is_empty() {
                break;
            }
        }
        events
    };
    tokio::time::timeout(Duration::from_secs(15), collect)
        .await
        .expect("timed out waiting for exit events")
}

/// Receive events until the concatenated output of the session contains `needle`
pub async fn wait_for_output(rx: &mut UnboundedReceiver<ProcessEvent>, session_id: &str, needle: &str) -> String {
    let wait = async {
        let mut output = String::new();
        while let Some(event) = rx.recv().await {
            if let ProcessEvent::Data { session_id: id, text } = &event {
                if id == session_id {
                    assert!(!text.is_empty(), "empty data event for {}", session_id);
                    output.push_str(text);
                    if output.contains(needle) {
                        break;
                    }
                }
            }
        }
        output
    };
    tokio::time::timeout(Duration::from_secs(15), wait)
        .await
        .expect("timed out waiting for output")
}

/// Concatenated `data` text of one session
pub fn data_text(events: &[ProcessEvent], session_id: &str) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ProcessEvent::Data { session_id: id, text } if id == session_id => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
