//! Multiplayer Audit Log
//!
//! Human-readable record of who did what, separate from `tracing`. Lines
//! are kept in memory and, when a path is configured, appended to a file.
//! Writing is best effort: failures are traced and otherwise ignored.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::debug;

/// In-memory lines kept before the oldest are dropped.
pub const MAX_MEMORY_LINES: usize = 1024;

/// Timestamped audit lines.
#[derive(Debug, Default)]
pub struct ServerLog {
    lines: Vec<String>,
    path: Option<PathBuf>,
}

impl ServerLog {
    /// Log that also appends to `path`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            lines: Vec::new(),
            path,
        }
    }

    /// Append a line stamped with the current time.
    pub fn append(&mut self, message: &str) {
        self.append_at(Utc::now(), message);
    }

    /// Append a line with an explicit timestamp.
    pub fn append_at(&mut self, at: DateTime<Utc>, message: &str) {
        let line = format!("[{}] {}", at.format("%Y/%m/%d %H:%M:%S"), message);

        if let Some(ref path) = self.path {
            let written = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut file| writeln!(file, "{line}"));
            if let Err(err) = written {
                debug!(path = %path.display(), %err, "server log write failed");
            }
        }

        if self.lines.len() >= MAX_MEMORY_LINES {
            self.lines.remove(0);
        }
        self.lines.push(line);
    }

    /// Lines currently held in memory, oldest first.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Last line written.
    pub fn last(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }
}
