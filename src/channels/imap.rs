//! Minimal IMAP client: just the commands the reply scanner needs
//! (LOGIN, SELECT, SEARCH, FETCH, STORE, CLOSE, LOGOUT) over implicit TLS.
//!
//! The session is generic over its byte stream so it can run against a
//! scripted server in tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::MailboxError;

/// Socket connect/read/write timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest literal accepted from the server (a whole RFC 822 message).
const MAX_LITERAL_BYTES: usize = 50 * 1024 * 1024;

/// The mailbox operations the scanner relies on.
pub trait Mailbox {
    /// Message sequence numbers matching an IMAP search expression.
    fn search(&mut self, criteria: &str) -> Result<Vec<String>, MailboxError>;

    /// Full raw message.
    fn fetch_raw(&mut self, id: &str) -> Result<Vec<u8>, MailboxError>;

    /// Set the `\Seen` flag.
    fn mark_seen(&mut self, id: &str) -> Result<(), MailboxError>;

    /// Close the mailbox and log out.
    fn close(&mut self) -> Result<(), MailboxError>;
}

/// Opens authenticated sessions with INBOX selected.
pub trait MailboxConnector {
    type Session: Mailbox;

    fn connect(&self) -> Result<Self::Session, MailboxError>;
}

impl<F, M> MailboxConnector for F
where
    F: Fn() -> Result<M, MailboxError>,
    M: Mailbox,
{
    type Session = M;

    fn connect(&self) -> Result<M, MailboxError> {
        self()
    }
}

// ── TLS connector ───────────────────────────────────────────────────

/// TLS stream used for real servers.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Connects to the configured IMAP server over implicit TLS.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
}

impl ImapConnector {
    pub fn new(host: &str, port: u16, username: &str, password: SecretString) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            &config.imap_host,
            config.imap_port,
            &config.email_user,
            config.email_password.clone(),
        )
    }

    fn connect_tls(&self) -> Result<TlsStream, MailboxError> {
        let connect_err = |reason: String| MailboxError::Connect {
            host: self.host.clone(),
            port: self.port,
            reason,
        };

        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?
            .next()
            .ok_or_else(|| connect_err("host did not resolve".into()))?;

        let tcp = TcpStream::connect_timeout(&addr, IO_TIMEOUT).map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(self.host.clone())
            .map_err(|e| MailboxError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::Tls(e.to_string()))?;

        Ok(rustls::StreamOwned::new(conn, tcp))
    }
}

impl MailboxConnector for ImapConnector {
    type Session = ImapSession<TlsStream>;

    fn connect(&self) -> Result<Self::Session, MailboxError> {
        debug!(host = %self.host, port = self.port, "Connecting to IMAP server");
        let stream = self.connect_tls()?;
        ImapSession::open(stream, &self.username, self.password.expose_secret())
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// One server response line, with any `{N}` literals it carried.
#[derive(Debug, Default)]
struct ResponseLine {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// An authenticated IMAP session with INBOX selected.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    /// Read the greeting, log in, and select INBOX.
    pub fn open(stream: S, username: &str, password: &str) -> Result<Self, MailboxError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        };

        let greeting = session.read_line()?;
        let greeting_upper = greeting.text.to_ascii_uppercase();
        if !(greeting_upper.starts_with("* OK") || greeting_upper.starts_with("* PREAUTH")) {
            return Err(MailboxError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.text
            )));
        }

        session
            .command(&format!("LOGIN {} {}", quote(username), quote(password)))
            .map_err(|e| match e {
                MailboxError::Command { reason, .. } => MailboxError::AuthFailed {
                    user: username.to_string(),
                    reason,
                },
                other => other,
            })?;

        session.command("SELECT INBOX")?;
        Ok(session)
    }

    /// Send a tagged command and collect untagged lines until its completion.
    fn command(&mut self, cmd: &str) -> Result<Vec<ResponseLine>, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        writer.flush()?;

        let mut untagged = Vec::new();
        loop {
            let line = self.read_line()?;
            let status = line
                .text
                .strip_prefix(tag.as_str())
                .and_then(|rest| rest.strip_prefix(' '));

            if let Some(status) = status {
                if status.to_ascii_uppercase().starts_with("OK") {
                    return Ok(untagged);
                }
                return Err(MailboxError::Command {
                    // Never echo arguments: LOGIN carries the password.
                    command: cmd.split_whitespace().next().unwrap_or_default().to_string(),
                    reason: status.to_string(),
                });
            }

            untagged.push(line);
        }
    }

    /// Read one logical response line, pulling in literals byte-exact.
    fn read_line(&mut self) -> Result<ResponseLine, MailboxError> {
        let mut line = ResponseLine::default();
        loop {
            let mut buf = Vec::new();
            if self.stream.read_until(b'\n', &mut buf)? == 0 {
                return Err(MailboxError::Closed);
            }
            let chunk = String::from_utf8_lossy(&buf);
            let chunk = chunk.trim_end_matches(['\r', '\n']);
            line.text.push_str(chunk);

            let Some(len) = literal_len(chunk)? else {
                return Ok(line);
            };
            let mut literal = vec![0u8; len];
            self.stream.read_exact(&mut literal)?;
            line.literals.push(literal);
        }
    }
}

impl<S: Read + Write> Mailbox for ImapSession<S> {
    fn search(&mut self, criteria: &str) -> Result<Vec<String>, MailboxError> {
        let lines = self.command(&format!("SEARCH {criteria}"))?;
        let ids = lines
            .iter()
            .filter(|l| l.text.to_ascii_uppercase().starts_with("* SEARCH"))
            .flat_map(|l| l.text.split_whitespace().skip(2))
            .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
            .collect();
        Ok(ids)
    }

    fn fetch_raw(&mut self, id: &str) -> Result<Vec<u8>, MailboxError> {
        // PEEK leaves \Seen alone; only `mark_seen` may set it.
        let lines = self.command(&format!("FETCH {} BODY.PEEK[]", sequence_number(id)?))?;
        lines
            .into_iter()
            .filter(|l| l.text.to_ascii_uppercase().contains("FETCH"))
            .find_map(|l| l.literals.into_iter().next())
            .ok_or_else(|| MailboxError::Protocol(format!("no message body in FETCH {id} response")))
    }

    fn mark_seen(&mut self, id: &str) -> Result<(), MailboxError> {
        self.command(&format!("STORE {} +FLAGS (\\Seen)", sequence_number(id)?))?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), MailboxError> {
        let closed = self.command("CLOSE").map(|_| ());
        let logged_out = self.command("LOGOUT").map(|_| ());
        closed.and(logged_out)
    }
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Sequence numbers come from the server; refuse anything that is not one.
fn sequence_number(id: &str) -> Result<&str, MailboxError> {
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        Ok(id)
    } else {
        Err(MailboxError::Protocol(format!("invalid message id: {id}")))
    }
}

/// Size of the literal announced at the end of a line (`... {123}`).
fn literal_len(line: &str) -> Result<Option<usize>, MailboxError> {
    let Some(body) = line.strip_suffix('}') else {
        return Ok(None);
    };
    let Some(open) = body.rfind('{') else {
        return Ok(None);
    };
    let digits = &body[open + 1..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Ok(None);
    }
    let len: usize = digits
        .parse()
        .map_err(|_| MailboxError::Protocol(format!("bad literal size: {digits}")))?;
    if len > MAX_LITERAL_BYTES {
        return Err(MailboxError::Protocol(format!("literal too large: {len} bytes")));
    }
    Ok(Some(len))
}
