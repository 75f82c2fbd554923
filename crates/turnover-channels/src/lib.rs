//! # Turnover Channels
//! Mailbox and outbound email implementations of the core collaborator traits.
//!
//! ```text
//! IMAP (async-imap + mail-parser) ──► ImapMailSource ──► MailSource
//! Notifier ◄── EmailNotifier ◄── compose (text, HTML, iCalendar) ──► SMTP (lettre)
//! ```

pub mod compose;
pub mod email;

pub use email::{EmailNotifier, ImapMailSource};
