//! Error types for the SMS email bridge.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox (IMAP) errors. Every variant aborts the current scan.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IMAP login failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("IMAP command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IMAP connection closed by server")]
    Closed,

    #[error("Mailbox task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail submission errors.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Mail submission failed (exit status {status}): {diagnostic}")]
    Failed { status: i32, diagnostic: String },

    #[error("Mail submission timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Message(String),

    #[error("SMTP send failed: {0}")]
    Smtp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SubmitError {
    /// Whether the submission hit its time bound rather than failing outright.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
