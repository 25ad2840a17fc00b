//! Mail channels: the IMAP mailbox, the reply scanner and outbound email.

pub mod email;
pub mod email_poller;
pub mod email_types;
pub mod imap;

pub use email::{Forwarder, ProcessSubmitter, SmtpSubmitter, Submitter};
pub use email_poller::{Inspection, MessageReport, ScanMode, Scanner};
pub use email_types::{InboundEmail, OutboundSms, SmsReply, extract_phone, extract_reply};
pub use imap::{ImapConnector, ImapSession, Mailbox, MailboxConnector};
