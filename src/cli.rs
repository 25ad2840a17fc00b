//! Command-line surface: one subcommand per pipeline.
//!
//! Results go to stdout for the phone's automation app; diagnostics go
//! through `tracing` on stderr.

use std::io::Write;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::activity_log::ActivityLog;
use crate::channels::email::Forwarder;
use crate::channels::email_poller::{Inspection, ScanMode, Scanner};
use crate::channels::email_types::{OutboundSms, SmsReply};
use crate::channels::imap::ImapConnector;
use crate::config::BridgeConfig;
use crate::error::MailboxError;
use crate::setup;

/// Sample SMS sent by `test`.
pub const TEST_PHONE: &str = "+1234567890";
pub const TEST_NAME: &str = "Test Contact";
pub const TEST_MESSAGE: &str = "This is a test message";

#[derive(Debug, Parser)]
#[command(name = "sms-email-bridge", version, about = "Forward SMS to email and pick up email replies")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Write the msmtp account file.
    Setup,
    /// Forward one SMS to the destination mailbox.
    Send {
        /// Sender's phone number.
        phone: String,
        /// Contact name, or "Unknown".
        name: String,
        /// Message text; words are joined with single spaces.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        message: Vec<String>,
    },
    /// Look for one unread reply and print it.
    Check {
        /// Print only REPLY_FOUND lines.
        #[arg(value_parser = ["quiet"])]
        quiet: Option<String>,
    },
    /// Same as `check quiet`.
    Tasker,
    /// Show how the first matching email is parsed.
    Debug {
        /// Include emails that were already read.
        #[arg(value_parser = ["all"])]
        all: Option<String>,
    },
    /// Send a sample SMS through the outbound pipeline.
    Test,
}

impl Command {
    /// Whether stdout must carry nothing but results.
    pub fn quiet(&self) -> bool {
        matches!(self, Command::Check { quiet: Some(_) } | Command::Tasker)
    }
}

/// Run `command`, writing user-facing output to `out`.
///
/// Pipeline failures are reported on `out` and do not fail the call;
/// only a broken `out` does.
pub async fn run<W: Write>(command: Command, config: &BridgeConfig, out: &mut W) -> std::io::Result<()> {
    match command {
        Command::Setup => run_setup(config, out),
        Command::Send { phone, name, message } => {
            let sms = OutboundSms::new(&phone, Some(&name), &message.join(" "));
            send(config, &sms, out).await.map(|_| ())
        }
        Command::Check { quiet } => check(config, quiet.is_some(), out).await.map(|_| ()),
        Command::Tasker => check(config, true, out).await.map(|_| ()),
        Command::Debug { all } => {
            let mode = if all.is_some() { ScanMode::All } else { ScanMode::UnseenOnly };
            debug_mailbox(config, mode, out).await
        }
        Command::Test => {
            writeln!(out, "Testing email bridge...")?;
            let sms = OutboundSms::new(TEST_PHONE, Some(TEST_NAME), TEST_MESSAGE);
            if send(config, &sms, out).await? {
                writeln!(out, "Test email sent successfully!")
            } else {
                writeln!(out, "Test failed!")
            }
        }
    }
}

fn run_setup<W: Write>(config: &BridgeConfig, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "Setting up SMS Email Bridge...")?;
    let path = config.msmtp_config_path();
    match setup::write_msmtp_config(config, &path) {
        Ok(()) => writeln!(out, "Created msmtp config: {}", path.display())?,
        Err(e) => {
            error!(path = %path.display(), "Could not create msmtp config: {e}");
            writeln!(out, "Warning: Could not create msmtp config: {e}")?;
        }
    }
    writeln!(out, "Setup complete!")
}

/// Outbound pipeline once. Returns whether the email went out.
async fn send<W: Write>(config: &BridgeConfig, sms: &OutboundSms, out: &mut W) -> std::io::Result<bool> {
    writeln!(out, "Sending email for SMS from {}...", sms.phone_number)?;

    let forwarder = match Forwarder::from_config(config) {
        Ok(forwarder) => forwarder,
        Err(e) => {
            error!("Cannot build forwarder: {e}");
            writeln!(out, "Error sending email: {e}")?;
            return Ok(false);
        }
    };

    match forwarder.forward(sms).await {
        Ok(()) => {
            writeln!(out, "Email sent successfully to {}", forwarder.destination())?;
            Ok(true)
        }
        Err(e) if e.is_timeout() => {
            error!("Mail submission timed out: {e}");
            writeln!(out, "Email sending timed out")?;
            Ok(false)
        }
        Err(e) => {
            error!("Mail submission failed: {e}");
            writeln!(out, "Error sending email: {e}")?;
            Ok(false)
        }
    }
}

async fn check<W: Write>(config: &BridgeConfig, quiet: bool, out: &mut W) -> std::io::Result<Vec<SmsReply>> {
    if !quiet {
        writeln!(out, "Checking for email replies...")?;
    }

    match scan(config, ScanMode::UnseenOnly).await {
        Ok(replies) => {
            write_replies(&replies, quiet, out)?;
            Ok(replies)
        }
        Err(e) => {
            error!("Error checking emails: {e}");
            if !quiet {
                writeln!(out, "Error checking emails: {e}")?;
            }
            Ok(Vec::new())
        }
    }
}

/// `REPLY_FOUND` lines, plus human-readable detail unless `quiet`.
pub fn write_replies<W: Write>(replies: &[SmsReply], quiet: bool, out: &mut W) -> std::io::Result<()> {
    if replies.is_empty() {
        if !quiet {
            writeln!(out, "No unread SMS replies found")?;
        }
        return Ok(());
    }

    for reply in replies {
        writeln!(out, "{}", reply.reply_found_line())?;
        if !quiet {
            writeln!(out, "  -> To: {}", reply.phone_number)?;
            writeln!(out, "  -> Message: {}", reply.message_text)?;
        }
    }
    Ok(())
}

async fn debug_mailbox<W: Write>(config: &BridgeConfig, mode: ScanMode, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "Searching for emails with criteria: {}", mode.criteria())?;
    match inspect(config, mode).await {
        Ok(inspection) => write_inspection(&inspection, out),
        Err(e) => {
            error!("Debug error: {e}");
            writeln!(out, "Debug error: {e}")
        }
    }
}

/// Human-readable dump of an [`Inspection`].
pub fn write_inspection<W: Write>(inspection: &Inspection, out: &mut W) -> std::io::Result<()> {
    if inspection.match_count == 0 {
        return writeln!(out, "No emails found");
    }
    writeln!(out, "Found {} email(s)", inspection.match_count)?;

    let Some(report) = &inspection.first else {
        return writeln!(out, "First email could not be parsed");
    };

    writeln!(out)?;
    writeln!(out, "=== DEBUGGING MESSAGE {} ===", report.id)?;
    writeln!(out, "Successfully fetched email: {} bytes", report.size)?;
    writeln!(out, "Subject: {}", report.subject)?;
    writeln!(out, "Is multipart: {}", report.multipart)?;
    if report.multipart {
        writeln!(out, "Parts:")?;
        for (i, content_type) in report.content_types.iter().enumerate() {
            writeln!(out, "  Part {i}: {content_type}")?;
        }
    }
    match report.text_line_count {
        Some(count) => {
            writeln!(out, "Text content: {count} lines")?;
            for (i, line) in report.preview_lines.iter().enumerate() {
                writeln!(out, "  Line {i}: {line:?}")?;
            }
        }
        None => writeln!(out, "No text/plain content")?,
    }
    writeln!(
        out,
        "Phone number: {}",
        report.phone_number.as_deref().unwrap_or("(none)")
    )?;
    writeln!(out, "Extracted reply: {:?}", report.reply_text)?;
    writeln!(out, "========================")
}

fn scanner(config: &BridgeConfig) -> Scanner<ImapConnector> {
    Scanner::new(
        ImapConnector::from_config(config),
        ActivityLog::new(&config.log_file),
    )
}

async fn scan(config: &BridgeConfig, mode: ScanMode) -> Result<Vec<SmsReply>, MailboxError> {
    let scanner = scanner(config);
    info!(host = %config.imap_host, ?mode, "Scanning mailbox");
    tokio::task::spawn_blocking(move || scanner.scan(mode))
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))?
}

async fn inspect(config: &BridgeConfig, mode: ScanMode) -> Result<Inspection, MailboxError> {
    let scanner = scanner(config);
    tokio::task::spawn_blocking(move || scanner.inspect(mode))
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::channels::email_poller::MessageReport;

    fn config_with(home: &Path, extra: &[(&str, &str)]) -> BridgeConfig {
        let home = home.display().to_string();
        let mut vars: HashMap<String, String> = [
            ("SMS_BRIDGE_EMAIL_USER", "sms@example.com"),
            ("SMS_BRIDGE_EMAIL_PASSWORD", "pw"),
            ("SMS_BRIDGE_DESTINATION", "me@example.org"),
            // Nothing listens on port 1, so connecting fails fast.
            ("SMS_BRIDGE_IMAP_HOST", "127.0.0.1"),
            ("SMS_BRIDGE_IMAP_PORT", "1"),
            ("SMS_BRIDGE_HOME", home.as_str()),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        BridgeConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn send_joins_trailing_words() {
        let cli = Cli::try_parse_from([
            "sms-email-bridge",
            "send",
            "+14155551234",
            "Jane",
            "see",
            "you",
            "-soon",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Send {
                phone: "+14155551234".into(),
                name: "Jane".into(),
                message: vec!["see".into(), "you".into(), "-soon".into()],
            }
        );
    }

    #[test]
    fn send_requires_a_message() {
        assert!(Cli::try_parse_from(["sms-email-bridge", "send", "+14155551234", "Jane"]).is_err());
    }

    #[test]
    fn check_accepts_only_quiet() {
        let cli = Cli::try_parse_from(["sms-email-bridge", "check", "quiet"]).unwrap();
        assert!(cli.command.quiet());

        let cli = Cli::try_parse_from(["sms-email-bridge", "check"]).unwrap();
        assert!(!cli.command.quiet());

        assert!(Cli::try_parse_from(["sms-email-bridge", "check", "loud"]).is_err());
    }

    #[test]
    fn tasker_is_quiet() {
        let cli = Cli::try_parse_from(["sms-email-bridge", "tasker"]).unwrap();
        assert!(cli.command.quiet());
    }

    #[test]
    fn debug_takes_optional_all() {
        let cli = Cli::try_parse_from(["sms-email-bridge", "debug", "all"]).unwrap();
        assert_eq!(cli.command, Command::Debug { all: Some("all".into()) });
        assert!(Cli::try_parse_from(["sms-email-bridge", "debug", "everything"]).is_err());
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["sms-email-bridge", "frobnicate"]).is_err());
    }

    // ── Output ──────────────────────────────────────────────────────

    #[test]
    fn replies_quiet_prints_only_reply_lines() {
        let replies = vec![SmsReply::new("+14155551234", "Hi there\nSee you")];
        let mut buf = Vec::new();
        write_replies(&replies, true, &mut buf).unwrap();
        assert_eq!(output(buf), "REPLY_FOUND: +14155551234|||Hi there\\nSee you\n");
    }

    #[test]
    fn replies_verbose_adds_detail() {
        let replies = vec![SmsReply::new("+14155551234", "Hi there\nSee you")];
        let mut buf = Vec::new();
        write_replies(&replies, false, &mut buf).unwrap();
        assert_eq!(
            output(buf),
            "REPLY_FOUND: +14155551234|||Hi there\\nSee you\n\
             \x20 -> To: +14155551234\n\
             \x20 -> Message: Hi there\nSee you\n"
        );
    }

    #[test]
    fn no_replies_is_silent_when_quiet() {
        let mut buf = Vec::new();
        write_replies(&[], true, &mut buf).unwrap();
        assert!(buf.is_empty());

        let mut buf = Vec::new();
        write_replies(&[], false, &mut buf).unwrap();
        assert_eq!(output(buf), "No unread SMS replies found\n");
    }

    #[test]
    fn inspection_dump() {
        let inspection = Inspection {
            criteria: ScanMode::All.criteria(),
            match_count: 2,
            first: Some(MessageReport {
                id: "7".into(),
                size: 1234,
                subject: "Re: SMS from Jane (+14155551234)".into(),
                multipart: true,
                content_types: vec!["text/plain".into(), "text/html".into()],
                text_line_count: Some(3),
                preview_lines: vec!["Thanks!".into(), "".into(), "> old".into()],
                phone_number: Some("+14155551234".into()),
                reply_text: "Thanks!".into(),
            }),
        };
        let mut buf = Vec::new();
        write_inspection(&inspection, &mut buf).unwrap();
        let text = output(buf);

        assert!(text.starts_with("Found 2 email(s)\n"));
        assert!(text.contains("=== DEBUGGING MESSAGE 7 ==="));
        assert!(text.contains("Successfully fetched email: 1234 bytes"));
        assert!(text.contains("  Part 1: text/html"));
        assert!(text.contains("Text content: 3 lines"));
        assert!(text.contains("  Line 0: \"Thanks!\""));
        assert!(text.contains("Phone number: +14155551234"));
        assert!(text.contains("Extracted reply: \"Thanks!\""));
    }

    #[test]
    fn empty_inspection() {
        let inspection = Inspection {
            criteria: ScanMode::UnseenOnly.criteria(),
            match_count: 0,
            first: None,
        };
        let mut buf = Vec::new();
        write_inspection(&inspection, &mut buf).unwrap();
        assert_eq!(output(buf), "No emails found\n");
    }

    // ── Pipelines ───────────────────────────────────────────────────

    #[tokio::test]
    async fn setup_writes_msmtprc() {
        let tmp = TempDir::new().unwrap();
        let config = config_with(tmp.path(), &[]);
        let mut buf = Vec::new();

        run(Command::Setup, &config, &mut buf).await.unwrap();

        let text = output(buf);
        assert!(text.contains("Created msmtp config:"));
        assert!(text.ends_with("Setup complete!\n"));
        assert!(tmp.path().join(".msmtprc").exists());
    }

    #[tokio::test]
    async fn unreachable_mailbox_is_reported_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let config = config_with(tmp.path(), &[]);

        let mut buf = Vec::new();
        run(Command::Check { quiet: None }, &config, &mut buf).await.unwrap();
        assert!(output(buf).contains("Error checking emails:"));

        let mut buf = Vec::new();
        run(Command::Tasker, &config, &mut buf).await.unwrap();
        assert!(buf.is_empty());

        assert!(!config.log_file.exists());
    }

    #[cfg(unix)]
    fn fake_mta(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-msmtp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_sends_sample_message() {
        let tmp = TempDir::new().unwrap();
        let out_file = tmp.path().join("message");
        let mta = fake_mta(tmp.path(), &format!("cat > \"{}\"", out_file.display()));
        let config = config_with(tmp.path(), &[("SMS_BRIDGE_MTA", &mta)]);

        let mut buf = Vec::new();
        run(Command::Test, &config, &mut buf).await.unwrap();

        let text = output(buf);
        assert!(text.contains("Email sent successfully to me@example.org"));
        assert!(text.ends_with("Test email sent successfully!\n"));

        let message = std::fs::read_to_string(out_file).unwrap();
        assert!(message.contains("Subject: SMS from Test Contact (+1234567890)"));

        let log = std::fs::read_to_string(&config.log_file).unwrap();
        assert!(log.contains("SMS forwarded - From: +1234567890, Message: This is a test message..."));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_send_is_reported() {
        let tmp = TempDir::new().unwrap();
        let mta = fake_mta(tmp.path(), "echo 'account default not found' >&2\nexit 78");
        let config = config_with(tmp.path(), &[("SMS_BRIDGE_MTA", &mta)]);

        let mut buf = Vec::new();
        let command = Command::Send {
            phone: "+14155551234".into(),
            name: "Unknown".into(),
            message: vec!["hello".into()],
        };
        run(command, &config, &mut buf).await.unwrap();

        let text = output(buf);
        assert!(text.contains("Error sending email:"));
        assert!(text.contains("account default not found"));
        assert!(!config.log_file.exists());
    }
}
