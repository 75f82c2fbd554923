//! Collaborator seams: the engine talks to mailboxes and notifiers only
//! through these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{AttemptRecord, Booking, CleanerContact, Email};

/// Which emails to fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailFilter {
    /// Sender address substrings; any match selects the email.
    pub sender_patterns: Vec<String>,
    /// Subject substrings; any match selects the email.
    pub subject_patterns: Vec<String>,
    pub unread_only: bool,
}

impl MailFilter {
    /// Case-insensitive match on sender or subject. Empty filters match all.
    pub fn matches(&self, from: &str, subject: &str) -> bool {
        if self.sender_patterns.is_empty() && self.subject_patterns.is_empty() {
            return true;
        }
        let from = from.to_lowercase();
        let subject = subject.to_lowercase();
        self.sender_patterns
            .iter()
            .any(|p| from.contains(&p.to_lowercase()))
            || self
                .subject_patterns
                .iter()
                .any(|p| subject.contains(&p.to_lowercase()))
    }
}

/// Source of booking emails (IMAP in production).
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch(&self, filter: &MailFilter) -> Result<Vec<Email>>;

    /// Flag an email as handled so the next run skips it.
    async fn mark_processed(&self, email_id: &str) -> Result<()>;
}

/// "Can you clean?" request with yes/no action links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerRequest {
    pub cleaner: CleanerContact,
    pub booking: Booking,
    pub property_name: String,
    pub address: String,
    pub cleaning_at: DateTime<Utc>,
    pub timezone: String,
    pub accept_url: String,
    pub decline_url: String,
    /// 1-based position in the escalation order.
    pub attempt: u32,
}

/// Calendar invitation for a confirmed cleaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarInvite {
    /// Stable event id so re-sends update instead of duplicating.
    pub uid: String,
    pub cleaner: CleanerContact,
    pub owner_name: String,
    pub owner_email: Option<String>,
    pub property_name: String,
    pub address: String,
    pub starts_at: DateTime<Utc>,
    pub duration_mins: u32,
    pub booking: Booking,
    pub notes: String,
}

/// Sent to the owner when nobody took the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExhaustedNotice {
    pub owner_name: String,
    pub owner_email: Option<String>,
    pub property_name: String,
    pub booking: Booking,
    pub cleaning_at: DateTime<Utc>,
    pub attempted: Vec<AttemptRecord>,
}

/// Outbound notifications. Fire-and-forget with an error result.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_cleaner(&self, request: &CleanerRequest) -> Result<()>;

    async fn send_calendar_invite(&self, invite: &CalendarInvite) -> Result<()>;

    async fn notify_owner_exhausted(&self, notice: &ExhaustedNotice) -> Result<()>;
}
