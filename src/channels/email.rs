//! Outbound email: forward a received SMS to the destination mailbox.
//!
//! The message is composed with lettre's builder and handed to a
//! [`Submitter`]: by default the `msmtp` binary (message on stdin, one
//! recipient argument), or an SMTP relay via lettre.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use lettre::message::Mailbox as Address;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport as _};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::activity_log::{ActivityLog, Direction};
use crate::channels::email_types::OutboundSms;
use crate::config::{BridgeConfig, SMTPS_PORT, Transport};
use crate::error::SubmitError;

// ── Submitters ──────────────────────────────────────────────────────

/// Hands a finished RFC 5322 message to something that delivers it.
#[async_trait]
pub trait Submitter: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `message` to `to`. Must give up after its configured timeout.
    async fn submit(&self, from: &str, to: &str, message: &[u8]) -> Result<(), SubmitError>;
}

/// Pipes the message into a sendmail-compatible binary such as msmtp.
#[derive(Debug, Clone)]
pub struct ProcessSubmitter {
    program: PathBuf,
    timeout: Duration,
}

impl ProcessSubmitter {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Submitter for ProcessSubmitter {
    fn name(&self) -> &str {
        "process"
    }

    async fn submit(&self, _from: &str, to: &str, message: &[u8]) -> Result<(), SubmitError> {
        debug!(program = %self.program.display(), to, "Running mail submission program");

        let mut child = Command::new(&self.program)
            .arg(to)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SubmitError::Spawn {
                program: self.program.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| SubmitError::Spawn {
            program: self.program.display().to_string(),
            reason: "stdin was not captured".into(),
        })?;

        let run = async move {
            // A program that exits without reading its input closes the pipe;
            // its exit status carries the real outcome.
            if let Err(e) = stdin.write_all(message).await
                && e.kind() != ErrorKind::BrokenPipe
            {
                return Err(e);
            }
            drop(stdin);
            child.wait_with_output().await
        };

        // Dropping `run` on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => return Err(SubmitError::Timeout(self.timeout)),
        };

        if output.status.success() {
            return Ok(());
        }

        Err(SubmitError::Failed {
            status: output.status.code().unwrap_or(-1),
            diagnostic: diagnostic_text(&output.stdout, &output.stderr),
        })
    }
}

/// Submits directly to an SMTP server.
#[derive(Debug, Clone)]
pub struct SmtpSubmitter {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
    timeout: Duration,
}

impl SmtpSubmitter {
    pub fn new(host: &str, port: u16, username: &str, password: SecretString, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password,
            timeout,
        }
    }

    fn transport(&self) -> Result<SmtpTransport, SubmitError> {
        let builder = (if self.port == SMTPS_PORT {
            SmtpTransport::relay(&self.host)
        } else {
            SmtpTransport::starttls_relay(&self.host)
        })
        .map_err(|e| SubmitError::Smtp(format!("SMTP relay error: {e}")))?;

        let creds = Credentials::new(
            self.username.clone(),
            self.password.expose_secret().to_string(),
        );

        Ok(builder
            .port(self.port)
            .credentials(creds)
            .timeout(Some(self.timeout))
            .build())
    }
}

#[async_trait]
impl Submitter for SmtpSubmitter {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn submit(&self, from: &str, to: &str, message: &[u8]) -> Result<(), SubmitError> {
        let envelope = lettre::address::Envelope::new(
            Some(parse_address(from)?.email),
            vec![parse_address(to)?.email],
        )
        .map_err(|e| SubmitError::Message(e.to_string()))?;

        let transport = self.transport()?;
        let message = message.to_vec();
        let send = tokio::task::spawn_blocking(move || transport.send_raw(&envelope, &message));

        match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(Ok(_))) => Ok(()),
            Ok(Ok(Err(e))) => Err(SubmitError::Smtp(e.to_string())),
            Ok(Err(e)) => Err(SubmitError::Smtp(format!("SMTP task failed: {e}"))),
            Err(_) => Err(SubmitError::Timeout(self.timeout)),
        }
    }
}

/// Prefer stderr; fall back to stdout.
fn diagnostic_text(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    "no diagnostic output".to_string()
}

fn parse_address(raw: &str) -> Result<Address, SubmitError> {
    raw.parse().map_err(|e: lettre::address::AddressError| SubmitError::InvalidAddress {
        address: raw.to_string(),
        reason: e.to_string(),
    })
}

// ── Forwarder ───────────────────────────────────────────────────────

/// Turns an SMS into an email to the destination mailbox.
pub struct Forwarder {
    from: Address,
    destination: Address,
    submitter: Box<dyn Submitter>,
    log: ActivityLog,
}

impl Forwarder {
    pub fn new(
        from: &str,
        destination: &str,
        submitter: Box<dyn Submitter>,
        log: ActivityLog,
    ) -> Result<Self, SubmitError> {
        Ok(Self {
            from: parse_address(from)?,
            destination: parse_address(destination)?,
            submitter,
            log,
        })
    }

    /// Forwarder with the submitter selected by the config.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, SubmitError> {
        let submitter: Box<dyn Submitter> = match config.transport {
            Transport::Msmtp => Box::new(ProcessSubmitter::new(
                config.mta_program.clone(),
                config.submit_timeout,
            )),
            Transport::Smtp => Box::new(SmtpSubmitter::new(
                &config.smtp_host,
                config.smtp_port,
                &config.email_user,
                config.email_password.clone(),
                config.submit_timeout,
            )),
        };
        Self::new(
            &config.email_user,
            &config.destination,
            submitter,
            ActivityLog::new(&config.log_file),
        )
    }

    pub fn destination(&self) -> String {
        self.destination.to_string()
    }

    /// Full RFC 5322 message for `sms`, received at `received_at`.
    pub fn compose(&self, sms: &OutboundSms, received_at: DateTime<Local>) -> Result<Vec<u8>, SubmitError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(self.destination.clone())
            .subject(sms.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(sms.body(received_at))
            .map_err(|e| SubmitError::Message(e.to_string()))?;
        Ok(email.formatted())
    }

    /// Compose and submit. Logs the forward only once the submission succeeded.
    pub async fn forward(&self, sms: &OutboundSms) -> Result<(), SubmitError> {
        info!(phone = %sms.phone_number, via = self.submitter.name(), "Forwarding SMS by email");

        let message = self.compose(sms, Local::now())?;
        self.submitter
            .submit(
                &self.from.email.to_string(),
                &self.destination.email.to_string(),
                &message,
            )
            .await?;

        info!(to = %self.destination, "Email sent");
        self.log
            .record(Direction::Forwarded, &sms.phone_number, &sms.message_text);
        Ok(())
    }
}

#[cfg(test)]
#[path = "email_tests.rs"]
mod tests;
