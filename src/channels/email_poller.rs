//! Reply scanner: one pass over the mailbox looking for replies to
//! forwarded SMS.
//!
//! A pass:
//! 1. Opens a session (login + SELECT INBOX)
//! 2. Searches for `SMS from` subjects, unseen only unless scanning all
//! 3. Fetches each candidate, reads the phone number from the subject and
//!    the reply text from the body
//! 4. In unseen-only mode, marks the first usable reply `\Seen` and stops
//! 5. Closes the session on every path

use tracing::{debug, info, warn};

use crate::activity_log::{ActivityLog, Direction};
use crate::channels::email_types::{InboundEmail, REPLY_TAG, SmsReply};
use crate::channels::imap::{Mailbox, MailboxConnector};
use crate::error::MailboxError;

/// Lines of the plain-text body shown by [`Scanner::inspect`].
const INSPECT_PREVIEW_LINES: usize = 5;

/// Which messages a scan considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Unread replies only; the processed one is marked read.
    UnseenOnly,
    /// Every reply, read or not; nothing is marked.
    All,
}

impl ScanMode {
    /// IMAP SEARCH expression for this mode.
    pub fn criteria(self) -> String {
        match self {
            Self::UnseenOnly => format!("UNSEEN SUBJECT \"{REPLY_TAG}\""),
            Self::All => format!("SUBJECT \"{REPLY_TAG}\""),
        }
    }
}

/// What `inspect` found about the first matching message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReport {
    pub id: String,
    pub size: usize,
    pub subject: String,
    pub multipart: bool,
    /// Content types of the textual parts, in order.
    pub content_types: Vec<String>,
    /// Line count of the text the reply is read from, if there is one.
    pub text_line_count: Option<usize>,
    /// First few trimmed lines of that text.
    pub preview_lines: Vec<String>,
    pub phone_number: Option<String>,
    pub reply_text: String,
}

/// Result of [`Scanner::inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub criteria: String,
    pub match_count: usize,
    /// `None` if nothing matched or the first match was not a parseable email.
    pub first: Option<MessageReport>,
}

/// Scans a mailbox for SMS replies.
pub struct Scanner<C> {
    connector: C,
    log: ActivityLog,
}

impl<C: MailboxConnector> Scanner<C> {
    pub fn new(connector: C, log: ActivityLog) -> Self {
        Self { connector, log }
    }

    /// Run one scan. No matches is `Ok(vec![])`; any mailbox failure
    /// aborts the pass and is returned as an error.
    pub fn scan(&self, mode: ScanMode) -> Result<Vec<SmsReply>, MailboxError> {
        let mut session = self.connector.connect()?;
        let result = self.scan_session(&mut session, mode);
        close_session(&mut session);
        result
    }

    fn scan_session(
        &self,
        session: &mut C::Session,
        mode: ScanMode,
    ) -> Result<Vec<SmsReply>, MailboxError> {
        let criteria = mode.criteria();
        debug!(criteria = %criteria, "Searching mailbox");

        let ids = session.search(&criteria)?;
        if ids.is_empty() {
            match mode {
                ScanMode::UnseenOnly => info!("No unread SMS replies found"),
                ScanMode::All => info!("No SMS emails found at all"),
            }
            return Ok(Vec::new());
        }

        info!("Found {} candidate email(s)", ids.len());

        let mut replies = Vec::new();
        for id in &ids {
            debug!(id = %id, "Processing message");

            let raw = session.fetch_raw(id)?;
            let Some(email) = InboundEmail::parse(&raw) else {
                debug!(id = %id, "Not a parseable email, skipping");
                continue;
            };

            let Some(phone) = email.phone_number() else {
                debug!(id = %id, subject = %email.subject, "Could not extract phone number");
                continue;
            };

            let text = email.reply_text();
            if text.is_empty() {
                debug!(id = %id, "Failed to extract reply text");
                continue;
            }

            let reply = SmsReply::new(phone, text);

            if mode == ScanMode::UnseenOnly {
                session.mark_seen(id)?;
            }

            self.log
                .record(Direction::Reply, &reply.phone_number, &reply.message_text);
            info!(id = %id, phone = %reply.phone_number, "Parsed reply");
            replies.push(reply);

            if mode == ScanMode::UnseenOnly {
                break;
            }
        }

        Ok(replies)
    }

    /// Describe how the first matching message parses. Never marks anything.
    pub fn inspect(&self, mode: ScanMode) -> Result<Inspection, MailboxError> {
        let mut session = self.connector.connect()?;
        let result = inspect_session(&mut session, mode);
        close_session(&mut session);
        result
    }
}

fn inspect_session<M: Mailbox>(session: &mut M, mode: ScanMode) -> Result<Inspection, MailboxError> {
    let criteria = mode.criteria();
    let ids = session.search(&criteria)?;

    let Some(id) = ids.first() else {
        return Ok(Inspection {
            criteria,
            match_count: 0,
            first: None,
        });
    };

    let raw = session.fetch_raw(id)?;
    let first = InboundEmail::parse(&raw).map(|email| {
        let text = email.plain_text();
        MessageReport {
            id: id.clone(),
            size: raw.len(),
            subject: email.subject.clone(),
            multipart: email.multipart,
            content_types: email.parts.iter().map(|p| p.content_type.clone()).collect(),
            text_line_count: text.map(|t| t.split('\n').count()),
            preview_lines: text
                .map(|t| {
                    t.split('\n')
                        .take(INSPECT_PREVIEW_LINES)
                        .map(|l| l.trim().to_string())
                        .collect()
                })
                .unwrap_or_default(),
            phone_number: email.phone_number().map(str::to_string),
            reply_text: email.reply_text(),
        }
    });

    Ok(Inspection {
        criteria,
        match_count: ids.len(),
        first,
    })
}

fn close_session<M: Mailbox>(session: &mut M) {
    if let Err(e) = session.close() {
        warn!("Failed to close mailbox session: {e}");
    }
}
