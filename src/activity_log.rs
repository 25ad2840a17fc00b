//! Append-only activity log.
//!
//! One line per forwarded SMS or parsed reply. Nothing in the bridge reads
//! the file back; it exists for the operator.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Characters of message text kept in a log line.
pub const PREVIEW_CHARS: usize = 50;

/// Which pipeline produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// SMS forwarded to the destination mailbox.
    Forwarded,
    /// Email reply parsed for sending back as SMS.
    Reply,
}

/// A single activity log record.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub direction: Direction,
    /// Phone number on the other side of the exchange.
    pub counterparty: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(direction: Direction, counterparty: &str, message: &str) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            counterparty: counterparty.to_string(),
            message: message.to_string(),
        }
    }

    /// Render as a log line, without the trailing newline.
    pub fn render(&self) -> String {
        let ts = self.timestamp.format("%Y-%m-%d %H:%M:%S%.6f");
        let preview = preview(&self.message);
        match self.direction {
            Direction::Forwarded => format!(
                "{ts}: SMS forwarded - From: {}, Message: {preview}...",
                self.counterparty
            ),
            Direction::Reply => format!(
                "{ts}: Parsed reply - To: {}, Message: {preview}...",
                self.counterparty
            ),
        }
    }
}

/// First [`PREVIEW_CHARS`] characters of a message (UTF-8 safe).
pub fn preview(message: &str) -> String {
    message.chars().take(PREVIEW_CHARS).collect()
}

/// Append-only log file.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, creating the file if needed.
    pub fn append(&self, entry: &LogEntry) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", entry.render())
    }

    /// Append one entry; a write failure is only reported as a warning.
    pub fn record(&self, direction: Direction, counterparty: &str, message: &str) {
        let entry = LogEntry::new(direction, counterparty, message);
        if let Err(e) = self.append(&entry) {
            tracing::warn!(path = %self.path.display(), "Failed to write activity log: {e}");
        }
    }
}
