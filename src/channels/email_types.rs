//! Email-specific types: inbound/outbound SMS records, reply extraction,
//! phone number parsing.

use std::sync::LazyLock;

use chrono::{DateTime, Local};
use mail_parser::{MessageParser, MimeHeaders, PartType};
use regex::Regex;
use serde::Serialize;

/// Subject tag that marks a bridge email (and the replies to it).
pub const REPLY_TAG: &str = "SMS from";

/// Contact name the SMS app reports when the sender is not in the address book.
pub const UNKNOWN_CONTACT: &str = "Unknown";

/// Prefix of the machine-readable line printed for each reply.
pub const REPLY_FOUND_PREFIX: &str = "REPLY_FOUND: ";

/// Separator between phone number and message in a reply line.
pub const REPLY_FIELD_SEPARATOR: &str = "|||";

/// How many lines past a blank line are inspected to decide whether the
/// reply continues. Longer gaps end the reply.
pub const LOOKAHEAD_LINES: usize = 3;

/// Substrings (lowercase) that mark a signature or client footer.
const SIGNATURE_MARKERS: &[&str] = &["--", "___", "sent from", "get outlook"];

/// Header lines that clients sometimes paste into the body.
const HEADER_PREFIXES: &[&str] = &["From:", "To:", "Subject:", "Date:", "Return-Path:"];

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?[0-9]{10,15}").expect("phone pattern is valid"));

static EXCESS_NEWLINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("newline pattern is valid"));

// ── Records ─────────────────────────────────────────────────────────

/// A reply parsed out of the mailbox, ready to go back out as SMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsReply {
    pub phone_number: String,
    /// Reply text; may contain newlines.
    pub message_text: String,
}

impl SmsReply {
    pub fn new(phone_number: impl Into<String>, message_text: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            message_text: message_text.into(),
        }
    }

    /// Single-line form consumed by the phone's automation app:
    /// `REPLY_FOUND: {phone}|||{message}` with newlines written as `\n`.
    pub fn reply_found_line(&self) -> String {
        format!(
            "{REPLY_FOUND_PREFIX}{}{REPLY_FIELD_SEPARATOR}{}",
            self.phone_number,
            self.message_text.replace('\n', "\\n")
        )
    }
}

/// An SMS received on the device that should be forwarded by email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSms {
    pub phone_number: String,
    pub display_name: Option<String>,
    pub message_text: String,
}

impl OutboundSms {
    pub fn new(phone_number: &str, display_name: Option<&str>, message_text: &str) -> Self {
        Self {
            phone_number: phone_number.to_string(),
            display_name: display_name.map(str::to_string),
            message_text: message_text.to_string(),
        }
    }

    /// Contact name, unless missing or the "Unknown" placeholder.
    pub fn known_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && *n != UNKNOWN_CONTACT)
    }

    /// `SMS from {name} ({phone})`, or `SMS from {phone}` without a known name.
    pub fn subject(&self) -> String {
        match self.known_name() {
            Some(name) => format!("{REPLY_TAG} {name} ({})", self.phone_number),
            None => format!("{REPLY_TAG} {}", self.phone_number),
        }
    }

    /// Message text, receive time, and the reply instructions.
    pub fn body(&self, received_at: DateTime<Local>) -> String {
        format!(
            "{}\n\nTime: {}\n\n---\nReply to this email to send SMS back to {}\n",
            self.message_text,
            received_at.format("%Y-%m-%d %H:%M:%S%.6f"),
            self.phone_number
        )
    }
}

// ── Inbound email ───────────────────────────────────────────────────

/// A textual leaf part of an email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    /// Lowercase `type/subtype`.
    pub content_type: String,
    /// Decoded text.
    pub text: String,
}

/// The pieces of a fetched email the bridge looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundEmail {
    pub subject: String,
    pub multipart: bool,
    /// Decoded body of a single-part email; empty for multipart.
    pub body: String,
    /// Textual leaf parts in document order.
    pub parts: Vec<BodyPart>,
}

impl InboundEmail {
    /// Parse a raw RFC 822 message. `None` if it is not a message at all.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let subject = parsed.subject().unwrap_or_default().to_string();
        let multipart = parsed
            .parts
            .first()
            .is_some_and(|root| matches!(root.body, PartType::Multipart(_)));

        let parts: Vec<BodyPart> = parsed
            .parts
            .iter()
            .filter_map(|part| {
                let text = part.text_contents()?;
                Some(BodyPart {
                    content_type: content_type_of(part),
                    text: text.to_string(),
                })
            })
            .collect();

        let body = if multipart {
            String::new()
        } else {
            parts.first().map(|p| p.text.clone()).unwrap_or_default()
        };

        Some(Self {
            subject,
            multipart,
            body,
            parts,
        })
    }

    /// The text the reply is read from: the body of a single-part email,
    /// or the first `text/plain` part of a multipart one.
    pub fn plain_text(&self) -> Option<&str> {
        if self.multipart {
            self.parts
                .iter()
                .find(|p| p.content_type == "text/plain")
                .map(|p| p.text.as_str())
        } else {
            Some(self.body.as_str())
        }
    }

    /// Phone number from the subject line.
    pub fn phone_number(&self) -> Option<&str> {
        extract_phone(&self.subject)
    }

    /// Human-authored reply text, or empty.
    pub fn reply_text(&self) -> String {
        self.plain_text().map(extract_reply).unwrap_or_default()
    }
}

fn content_type_of(part: &mail_parser::MessagePart) -> String {
    match MimeHeaders::content_type(part) {
        Some(ct) => match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_lowercase(),
            None => ct.ctype().to_lowercase(),
        },
        // MIME default for parts without a Content-Type header.
        None if matches!(part.body, PartType::Html(_)) => "text/html".to_string(),
        None => "text/plain".to_string(),
    }
}

// ── Parsing helpers ─────────────────────────────────────────────────

/// First phone number (`+` optional, 10–15 digits) in a subject line.
pub fn extract_phone(subject: &str) -> Option<&str> {
    PHONE_RE.find(subject).map(|m| m.as_str())
}

/// Recover the reply a person typed from a plain-text email body.
///
/// Walks the lines top to bottom:
/// - leading blank lines are skipped;
/// - a `>` line or a line containing `wrote:` ends the reply (quoted history);
/// - a line containing `--`, `___`, `sent from` or `get outlook` ends it
///   (signature or client footer);
/// - pasted `From:`/`To:`/`Subject:`/`Date:`/`Return-Path:` lines are dropped;
/// - a line with letters starts the reply; after that, lines without
///   letters are kept too;
/// - a blank line inside the reply is kept only if one of the next
///   [`LOOKAHEAD_LINES`] lines has letters and is not quoted; otherwise
///   the reply ends there.
///
/// The result is trimmed and runs of blank lines are collapsed to one.
/// Pure: the same input always gives the same output.
pub fn extract_reply(body: &str) -> String {
    let lines: Vec<&str> = body.split('\n').collect();
    let mut kept: Vec<&str> = Vec::new();
    let mut started = false;

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();

        if !started && line.is_empty() {
            continue;
        }

        if is_quoted(line) || is_signature(line) {
            break;
        }

        if HEADER_PREFIXES.iter().any(|h| line.starts_with(h)) {
            continue;
        }

        if has_letters(line) {
            started = true;
            kept.push(line);
        } else if started {
            if !line.is_empty() {
                kept.push(line);
            } else if continues_after_blank(&lines[idx + 1..]) {
                kept.push("");
            } else {
                break;
            }
        }
    }

    if kept.is_empty() {
        return String::new();
    }

    let joined = kept.join("\n");
    EXCESS_NEWLINES_RE
        .replace_all(joined.trim(), "\n\n")
        .into_owned()
}

/// Start of quoted history.
fn is_quoted(line: &str) -> bool {
    line.starts_with('>') || line.to_lowercase().contains("wrote:")
}

fn is_signature(line: &str) -> bool {
    let lower = line.to_lowercase();
    SIGNATURE_MARKERS.iter().any(|m| lower.contains(m))
}

fn has_letters(line: &str) -> bool {
    line.chars().any(char::is_alphabetic)
}

/// Bounded peek past a blank line.
fn continues_after_blank(rest: &[&str]) -> bool {
    rest.iter().take(LOOKAHEAD_LINES).any(|l| {
        let l = l.trim();
        has_letters(l) && !is_quoted(l)
    })
}
