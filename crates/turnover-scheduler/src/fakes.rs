//! Recording collaborators for tests.

use async_trait::async_trait;
use std::sync::Mutex;
use turnover_core::traits::{CalendarInvite, CleanerRequest, ExhaustedNotice, MailFilter};
use turnover_core::{Email, MailSource, Notifier, Result, TurnoverError};

/// Records every notification; cleaners listed in `unreachable` fail.
#[derive(Default)]
pub struct RecordingNotifier {
    pub requests: Mutex<Vec<CleanerRequest>>,
    pub invites: Mutex<Vec<CalendarInvite>>,
    pub notices: Mutex<Vec<ExhaustedNotice>>,
    pub unreachable: Vec<String>,
    pub send_calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_cleaner(&self, request: &CleanerRequest) -> Result<()> {
        self.send_calls
            .lock()
            .unwrap()
            .push(request.cleaner.email.clone());
        if self.unreachable.contains(&request.cleaner.email) {
            return Err(TurnoverError::Channel("mailbox full".into()));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn send_calendar_invite(&self, invite: &CalendarInvite) -> Result<()> {
        self.invites.lock().unwrap().push(invite.clone());
        Ok(())
    }

    async fn notify_owner_exhausted(&self, notice: &ExhaustedNotice) -> Result<()> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

impl RecordingNotifier {
    /// Names of cleaners successfully asked, in order.
    pub fn asked(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.cleaner.name.clone())
            .collect()
    }

    /// Token embedded in the most recent request's action links.
    pub fn last_token(&self) -> String {
        let requests = self.requests.lock().unwrap();
        let url = &requests.last().unwrap().accept_url;
        let after = url.split("token=").nth(1).unwrap();
        after.split('&').next().unwrap().to_string()
    }
}

/// In-memory mailbox.
#[derive(Default)]
pub struct MemoryMailSource {
    pub emails: Mutex<Vec<Email>>,
    pub marked: Mutex<Vec<String>>,
    pub mark_failures: Mutex<u32>,
    pub mark_calls: Mutex<u32>,
}

impl MemoryMailSource {
    pub fn with(emails: Vec<Email>) -> Self {
        Self {
            emails: Mutex::new(emails),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MailSource for MemoryMailSource {
    async fn fetch(&self, filter: &MailFilter) -> Result<Vec<Email>> {
        Ok(self
            .emails
            .lock()
            .unwrap()
            .iter()
            .filter(|e| filter.matches(&e.from, &e.subject))
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, email_id: &str) -> Result<()> {
        *self.mark_calls.lock().unwrap() += 1;
        let mut failures = self.mark_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(TurnoverError::Channel("IMAP STORE timed out".into()));
        }
        self.marked.lock().unwrap().push(email_id.to_string());
        Ok(())
    }
}
