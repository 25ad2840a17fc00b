//! Configuration types.
//!
//! Everything is read once from the environment by the binary and handed
//! to each component by value.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default IMAP port (implicit TLS).
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Default SMTP submission port (STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP port that speaks TLS from the first byte (no STARTTLS).
pub const SMTPS_PORT: u16 = 465;

/// Default bound on a single mail submission.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default mail transfer agent binary.
pub const DEFAULT_MTA: &str = "msmtp";

/// How outbound mail leaves the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Pipe the message into an external MTA binary (msmtp).
    Msmtp,
    /// Talk SMTP directly.
    Smtp,
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "msmtp" | "sendmail" => Ok(Self::Msmtp),
            "smtp" => Ok(Self::Smtp),
            other => Err(format!("unknown transport '{other}' (expected msmtp or smtp)")),
        }
    }
}

/// Bridge configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Account that sends the forwarded SMS and receives the replies.
    pub email_user: String,
    pub email_password: SecretString,
    /// Mailbox that forwarded SMS are delivered to.
    pub destination: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub home_dir: PathBuf,
    /// Append-only activity log.
    pub log_file: PathBuf,
    pub mta_program: PathBuf,
    pub submit_timeout: Duration,
    pub transport: Transport,
}

impl BridgeConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require =
            |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let email_user = require("SMS_BRIDGE_EMAIL_USER")?;
        let email_password = SecretString::from(require("SMS_BRIDGE_EMAIL_PASSWORD")?);
        let destination = require("SMS_BRIDGE_DESTINATION")?;
        let imap_host = require("SMS_BRIDGE_IMAP_HOST")?;

        let imap_port = parse_or("SMS_BRIDGE_IMAP_PORT", get("SMS_BRIDGE_IMAP_PORT"), DEFAULT_IMAP_PORT)?;
        let smtp_host = get("SMS_BRIDGE_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));
        let smtp_port = parse_or("SMS_BRIDGE_SMTP_PORT", get("SMS_BRIDGE_SMTP_PORT"), DEFAULT_SMTP_PORT)?;

        let home_dir = get("SMS_BRIDGE_HOME")
            .or_else(|| get("HOME"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let log_file = get("SMS_BRIDGE_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join("sms_bridge.log"));

        let mta_program = PathBuf::from(get("SMS_BRIDGE_MTA").unwrap_or_else(|| DEFAULT_MTA.into()));
        let submit_timeout = parse_or(
            "SMS_BRIDGE_SUBMIT_TIMEOUT_SECS",
            get("SMS_BRIDGE_SUBMIT_TIMEOUT_SECS"),
            DEFAULT_SUBMIT_TIMEOUT.as_secs(),
        )
        .map(Duration::from_secs)?;
        let transport = parse_or("SMS_BRIDGE_TRANSPORT", get("SMS_BRIDGE_TRANSPORT"), Transport::Msmtp)?;

        Ok(Self {
            email_user,
            email_password,
            destination,
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            home_dir,
            log_file,
            mta_program,
            submit_timeout,
            transport,
        })
    }

    /// Path of the msmtp account file written by `setup`.
    pub fn msmtp_config_path(&self) -> PathBuf {
        self.home_dir.join(".msmtprc")
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("SMS_BRIDGE_EMAIL_USER", "sms@example.com"),
        ("SMS_BRIDGE_EMAIL_PASSWORD", "hunter2"),
        ("SMS_BRIDGE_DESTINATION", "me@example.org"),
        ("SMS_BRIDGE_IMAP_HOST", "imap.example.com"),
        ("SMS_BRIDGE_HOME", "/data/home"),
    ];

    #[test]
    fn defaults_are_applied() {
        let config = BridgeConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.imap_port, 993);
        assert_eq!(config.smtp_host, "smtp.example.com");
        assert_eq!(config.smtp_port, 587);
        assert_eq!(config.log_file, PathBuf::from("/data/home/sms_bridge.log"));
        assert_eq!(config.mta_program, PathBuf::from("msmtp"));
        assert_eq!(config.submit_timeout, Duration::from_secs(30));
        assert_eq!(config.transport, Transport::Msmtp);
        assert_eq!(config.email_password.expose_secret(), "hunter2");
        assert_eq!(config.msmtp_config_path(), PathBuf::from("/data/home/.msmtprc"));
    }

    #[test]
    fn missing_required_var_is_named() {
        let err = BridgeConfig::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "SMS_BRIDGE_EMAIL_USER"));
    }

    #[test]
    fn blank_required_var_counts_as_missing() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .map(|&(k, v)| if k == "SMS_BRIDGE_DESTINATION" { (k, "   ") } else { (k, v) })
            .collect();
        let err = BridgeConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "SMS_BRIDGE_DESTINATION"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("SMS_BRIDGE_IMAP_PORT", "1993"),
            ("SMS_BRIDGE_SMTP_HOST", "mail.example.net"),
            ("SMS_BRIDGE_SUBMIT_TIMEOUT_SECS", "5"),
            ("SMS_BRIDGE_TRANSPORT", "SMTP"),
            ("SMS_BRIDGE_LOG_FILE", "/tmp/bridge.log"),
        ]);
        let config = BridgeConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.imap_port, 1993);
        assert_eq!(config.smtp_host, "mail.example.net");
        assert_eq!(config.submit_timeout, Duration::from_secs(5));
        assert_eq!(config.transport, Transport::Smtp);
        assert_eq!(config.log_file, PathBuf::from("/tmp/bridge.log"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SMS_BRIDGE_IMAP_PORT", "imaps"));
        let err = BridgeConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SMS_BRIDGE_IMAP_PORT"));
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SMS_BRIDGE_TRANSPORT", "pigeon"));
        assert!(BridgeConfig::from_lookup(lookup(&pairs)).is_err());
    }
}
