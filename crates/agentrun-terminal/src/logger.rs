use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use anyhow::{Result, Context};
use chrono::Utc;
use serde_json::json;

/// Per-session JSONL log of process I/O and lifecycle events
#[derive(Debug)]
pub struct SessionLogger {
    session_id: String,
    path: PathBuf,
    log_file: Mutex<File>,
}

impl SessionLogger {
    /// Create a new session logger writing to `<log_dir>/session-<id>.log`
    pub fn new(session_id: &str, log_dir: &Path) -> Result<Self> {
        // Ensure log directory exists
        std::fs::create_dir_all(log_dir)
            .context("Failed to create log directory")?;

        let path = log_dir.join(format!("session-{}.log", sanitize(session_id)));

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to create log file")?;

        Ok(Self {
            session_id: session_id.to_string(),
            path,
            log_file: Mutex::new(log_file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log input written to the process
    pub fn log_input(&self, data: &str) {
        self.log_direction("in", data);
    }

    /// Log output surfaced to the caller
    pub fn log_output(&self, data: &str) {
        self.log_direction("out", data);
    }

    /// Log stderr output
    pub fn log_stderr(&self, data: &str) {
        self.log_direction("err", data);
    }

    pub fn log_spawn(&self, mode: &str, pid: Option<u32>) {
        self.write_entry(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "session_id": self.session_id,
            "event": "spawn",
            "mode": mode,
            "pid": pid,
        }));
    }

    /// Log resize event
    pub fn log_resize(&self, cols: u16, rows: u16) {
        self.write_entry(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "session_id": self.session_id,
            "event": "resize",
            "cols": cols,
            "rows": rows,
        }));
    }

    pub fn log_exit(&self, code: i32) {
        self.write_entry(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "session_id": self.session_id,
            "event": "exit",
            "code": code,
        }));
    }

    fn log_direction(&self, direction: &str, data: &str) {
        self.write_entry(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "session_id": self.session_id,
            "direction": direction,
            "data": data,
        }));
    }

    // Logging never affects the session itself
    fn write_entry(&self, entry: serde_json::Value) {
        if let Err(e) = self.try_write(&entry) {
            log::warn!("[{}] session log write failed: {:#}", self.session_id, e);
        }
    }

    fn try_write(&self, entry: &serde_json::Value) -> Result<()> {
        let mut file = self.log_file.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "{}", entry)
            .context("Failed to write to log file")?;
        file.flush()?;
        Ok(())
    }
}

fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_one_json_line_per_event() {
        let dir = TempDir::new().unwrap();
        let logger = SessionLogger::new("sess/1", dir.path()).unwrap();
        logger.log_spawn("batch-agent", Some(42));
        logger.log_input("ls\n");
        logger.log_output("file.txt");
        logger.log_exit(0);

        assert!(logger.path().ends_with("session-sess_1.log"));
        let content = std::fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["event"], "spawn");
        assert_eq!(lines[0]["pid"], 42);
        assert_eq!(lines[1]["direction"], "in");
        assert_eq!(lines[2]["data"], "file.txt");
        assert_eq!(lines[3]["code"], 0);
    }
}
