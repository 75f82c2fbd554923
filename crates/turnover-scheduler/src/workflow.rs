//! Coordination workflow: ranked cleaner escalation with suspend/resume.
//!
//! ## Architecture
//! ```text
//! start(booking, property)
//!   → claim open slot for booking (supersede stale run)    [BEGIN IMMEDIATE]
//!   → dispatch cursor cleaner: token + deadline, then send → Notifier
//!       └─ unreachable after retry budget → next cleaner
//!   → return                                               (no in-memory wait)
//!
//! respond(token, yes|no)            expire_overdue(now)
//!   ┌ consume token ─────────┐        ┌ consume active token as timed_out ┐
//!   └ move cursor / confirm ─┘        └ move cursor ──────────────────────┘
//!     one transaction                   one transaction
//!   → yes: invite                     → dispatch next, or Exhausted + owner notice
//!   → no:  dispatch next
//! ```
//!
//! Tokens are the linearization point: whoever consumes the active token owns
//! the next transition, and the consume commits together with the cursor
//! move. Sends happen after the commit; every committed step leaves a
//! deadline behind, so a send lost to a crash is redone by the sweep once
//! the dispatch grace runs out. Terminal rows refuse further updates in SQL.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use turnover_core::config::WorkflowConfig;
use turnover_core::traits::{CalendarInvite, CleanerRequest, ExhaustedNotice};
use turnover_core::{
    Assignment, AttemptOutcome, Booking, CleanerContact, Notifier, Property, Result, TurnoverError,
};

use crate::execution::{
    self, CallbackOutcome, CleanerResponse, ExecutionStatus, TokenRecord, WorkflowExecution,
};
use crate::persistence::TurnoverDb;
use crate::schedule::cleaning_moment;
use crate::store;

/// Result of one timeout sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub overdue: usize,
    pub advanced: usize,
    pub exhausted: usize,
    /// Interrupted runs whose accepted answer was only applied now.
    pub confirmed: usize,
    /// Answered while the sweep was running.
    pub skipped: usize,
    pub errors: Vec<String>,
}

enum Begin {
    Started { superseded: Option<String> },
    Running(Box<WorkflowExecution>),
}

/// What a committed transition leaves to do outside the transaction.
enum Next {
    Handled,
    Confirm(Box<WorkflowExecution>, CleanerContact),
    Dispatch(Box<WorkflowExecution>),
}

pub struct CoordinationWorkflow {
    db: Arc<TurnoverDb>,
    notifier: Arc<dyn Notifier>,
    config: WorkflowConfig,
    retry_backoff: Duration,
}

impl CoordinationWorkflow {
    pub fn new(db: Arc<TurnoverDb>, notifier: Arc<dyn Notifier>, config: WorkflowConfig) -> Self {
        Self {
            db,
            notifier,
            config,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Pause between send attempts (multiplied by the attempt number).
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Start coordinating a new or changed booking.
    ///
    /// An open execution for the same booking with identical data is returned
    /// as-is. One with different data is superseded: its tokens are revoked
    /// and a fresh execution starts from the first-ranked cleaner.
    pub async fn start(&self, booking: &Booking, property: &Property) -> Result<WorkflowExecution> {
        let check_out = booking.check_out.ok_or_else(|| {
            TurnoverError::InvalidBooking(format!(
                "{}: no check-out date, cannot schedule a cleaning",
                booking.key()
            ))
        })?;
        let cleaning_at = cleaning_moment(
            check_out,
            self.config.cleaning_time()?,
            &property.metadata.timezone,
        )?;
        let mut exec = WorkflowExecution::new(booking, property, cleaning_at);
        // Pending until the first send; the sweep picks it up if that never happens
        exec.deadline = Some(Utc::now() + self.config.dispatch_grace());

        let begun = self.db.immediate(|tx| {
            let mut superseded = None;
            if let Some(open) = execution::open_execution_for(tx, &exec.booking_key)? {
                if !open.booking.materially_differs(booking) {
                    return Ok(Begin::Running(Box::new(open)));
                }
                execution::revoke_tokens(tx, &open.id, "revoked")?;
                execution::mark_superseded(tx, &open.id)?;
                superseded = Some(open.id);
            }
            execution::insert_execution(tx, &exec)?;
            Ok(Begin::Started { superseded })
        })?;

        match begun {
            Begin::Running(open) => {
                tracing::info!(
                    "⏭️ {} already coordinating ({}, {})",
                    open.booking_key,
                    open.id,
                    open.status
                );
                return Ok(*open);
            }
            Begin::Started { superseded } => {
                if let Some(old) = superseded {
                    tracing::info!("🔁 {} changed; superseded execution {old}", exec.booking_key);
                }
                tracing::info!(
                    "🧹 Coordinating {} at {} ({} cleaners, cleaning {})",
                    exec.booking_key,
                    property.id,
                    property.cleaners.len(),
                    cleaning_at
                );
            }
        }

        self.dispatch(&mut exec).await?;
        Ok(exec)
    }

    /// Apply a cleaner's answer presented with its resumption token.
    ///
    /// Unknown tokens are an error. Consumed, revoked or stale tokens are an
    /// idempotent [`CallbackOutcome::AlreadyHandled`] and change nothing.
    pub async fn respond(&self, token: &str, response: CleanerResponse) -> Result<CallbackOutcome> {
        let label = match response {
            CleanerResponse::Yes => "accepted",
            CleanerResponse::No => "declined",
        };
        let grace = self.config.dispatch_grace();

        let next = self.db.immediate(|tx| {
            let record = execution::load_token(tx, token)?
                .ok_or_else(|| TurnoverError::UnknownToken(token.to_string()))?;
            if !execution::consume_token(tx, token, label)? {
                tracing::info!(
                    "🔁 Token for {} on execution {} already handled",
                    record.cleaner_email,
                    record.execution_id
                );
                return Ok(Next::Handled);
            }

            let exec = execution::load_execution(tx, &record.execution_id)?.ok_or_else(|| {
                TurnoverError::Storage(format!(
                    "token points at missing execution {}",
                    record.execution_id
                ))
            })?;
            if exec.status.is_terminal() || exec.cursor != record.cursor {
                tracing::info!(
                    "🔁 Stale token for {} ({}, cursor {} vs {})",
                    exec.booking_key,
                    exec.status,
                    record.cursor,
                    exec.cursor
                );
                return Ok(Next::Handled);
            }
            let cleaner = exec.active_cleaner().ok_or_else(|| {
                TurnoverError::Workflow(format!("{}: token cursor past cleaner list", exec.id))
            })?;

            match response {
                CleanerResponse::Yes => close_confirmed(tx, exec, cleaner),
                CleanerResponse::No => {
                    tracing::info!("👎 {} declined {}", cleaner.name, exec.booking_key);
                    close_turn(tx, exec, &cleaner, AttemptOutcome::Declined, grace)
                }
            }
        })?;

        self.follow_up(next).await
    }

    /// Advance every open execution whose deadline has passed: cleaners who
    /// did not answer in time, and runs whose send was interrupted.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let overdue = self
            .db
            .with_conn(|c| execution::overdue_executions(c, now))?;
        let mut report = SweepReport {
            overdue: overdue.len(),
            ..Default::default()
        };

        for exec in overdue {
            match self.expire_one(&exec.id, now).await {
                Ok(Some(CallbackOutcome::Exhausted)) => report.exhausted += 1,
                Ok(Some(CallbackOutcome::Confirmed)) => report.confirmed += 1,
                Ok(Some(CallbackOutcome::Advanced)) => report.advanced += 1,
                Ok(Some(CallbackOutcome::AlreadyHandled)) | Ok(None) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!("⚠️ Timeout handling failed for {}: {e}", exec.id);
                    report.errors.push(format!("{}: {e}", exec.booking_key));
                }
            }
        }

        if report.overdue > 0 {
            tracing::info!(
                "⏰ Sweep: {} overdue, {} advanced, {} exhausted",
                report.overdue,
                report.advanced,
                report.exhausted
            );
        }
        Ok(report)
    }

    async fn expire_one(&self, id: &str, now: DateTime<Utc>) -> Result<Option<CallbackOutcome>> {
        let grace = self.config.dispatch_grace();

        let next = self.db.immediate(|tx| {
            // Re-read under the write lock; a callback may have moved it
            let Some(exec) = execution::load_execution(tx, id)? else {
                return Ok(None);
            };
            if exec.status.is_terminal() || exec.deadline.is_none_or(|d| d > now) {
                return Ok(None);
            }
            let Some(cleaner) = exec.active_cleaner() else {
                return redispatch(tx, exec, grace);
            };

            match execution::latest_token(tx, &exec.id, exec.cursor)? {
                Some(token) if token.consumed_at.is_none() => {
                    execution::consume_token(tx, &token.token, "timed_out")?;
                    tracing::info!("⌛ {} did not answer for {}", cleaner.name, exec.booking_key);
                    close_turn(tx, exec, &cleaner, AttemptOutcome::TimedOut, grace).map(Some)
                }
                // The turn was closed but the run never moved on
                Some(token) => {
                    tracing::warn!(
                        "⚠️ {} stalled after {}'s answer ({}); resuming",
                        exec.id,
                        cleaner.name,
                        token.outcome.as_deref().unwrap_or("-")
                    );
                    let outcome = match token.outcome.as_deref() {
                        Some("accepted") => return close_confirmed(tx, exec, cleaner).map(Some),
                        Some("declined") => AttemptOutcome::Declined,
                        Some("unreachable") => AttemptOutcome::Unreachable,
                        _ => AttemptOutcome::TimedOut,
                    };
                    close_turn(tx, exec, &cleaner, outcome, grace).map(Some)
                }
                None => {
                    tracing::warn!("⚠️ {} never reached {}; asking again", exec.id, cleaner.name);
                    redispatch(tx, exec, grace)
                }
            }
        })?;

        match next {
            Some(next) => self.follow_up(next).await.map(Some),
            None => Ok(None),
        }
    }

    /// Side effects of a committed transition.
    async fn follow_up(&self, next: Next) -> Result<CallbackOutcome> {
        match next {
            Next::Handled => Ok(CallbackOutcome::AlreadyHandled),
            Next::Confirm(exec, cleaner) => {
                self.send_invite(&exec, &cleaner).await;
                tracing::info!(
                    "✅ {} confirmed {} ({})",
                    cleaner.name,
                    exec.booking_key,
                    exec.cleaning_at
                );
                Ok(CallbackOutcome::Confirmed)
            }
            Next::Dispatch(mut exec) => {
                self.dispatch(&mut exec).await?;
                Ok(advance_outcome(&exec))
            }
        }
    }

    /// Contact the cleaner at the cursor, skipping unreachable ones, until
    /// one is awaiting or the list runs out.
    async fn dispatch(&self, exec: &mut WorkflowExecution) -> Result<()> {
        loop {
            let Some(cleaner) = exec.active_cleaner() else {
                return self.exhaust(exec).await;
            };

            let token = TokenRecord {
                token: uuid::Uuid::new_v4().to_string(),
                execution_id: exec.id.clone(),
                cursor: exec.cursor,
                cleaner_email: cleaner.email.clone(),
                issued_at: Utc::now(),
                consumed_at: None,
                outcome: None,
            };
            exec.status = if exec.attempt_count == 0 {
                ExecutionStatus::AwaitingResponse
            } else {
                ExecutionStatus::Escalated
            };
            exec.deadline = Some(Utc::now() + self.config.response_timeout());

            // Token and waiting state land together, before anything is sent
            let issued = self.db.immediate(|tx| {
                if !execution::update_execution(tx, exec)? {
                    return Ok(false);
                }
                execution::insert_token(tx, &token)?;
                Ok(true)
            })?;
            if !issued {
                tracing::debug!("Execution {} finished while dispatching", exec.id);
                return Ok(());
            }

            let request = CleanerRequest {
                cleaner: cleaner.clone(),
                booking: exec.booking.clone(),
                property_name: exec.property.display_name().to_string(),
                address: exec.property.address.clone(),
                cleaning_at: exec.cleaning_at,
                timezone: exec.property.metadata.timezone.clone(),
                accept_url: self.action_url(&token.token, "yes"),
                decline_url: self.action_url(&token.token, "no"),
                attempt: exec.cursor + 1,
            };

            match self
                .send_with_retries("cleaner request", || self.notifier.notify_cleaner(&request))
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        "📨 Asked {} (rank {}) to clean {}, attempt {}",
                        cleaner.name,
                        cleaner.rank,
                        exec.booking_key,
                        exec.cursor + 1
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("⚠️ {} unreachable for {}: {e}", cleaner.name, exec.booking_key);
                    let grace = self.config.dispatch_grace();
                    let closed = self.db.immediate(|tx| {
                        // The cleaner may have answered anyway; that answer owns the execution
                        if !execution::consume_token(tx, &token.token, "unreachable")? {
                            return Ok(false);
                        }
                        exec.record_attempt(&cleaner, AttemptOutcome::Unreachable);
                        exec.deadline = Some(Utc::now() + grace);
                        execution::update_execution(tx, exec)
                    })?;
                    if !closed {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn send_invite(&self, exec: &WorkflowExecution, cleaner: &CleanerContact) {
        let property = &exec.property;
        let invite = CalendarInvite {
            uid: format!("{}@turnover", exec.id),
            cleaner: cleaner.clone(),
            owner_name: property.metadata.owner_name.clone(),
            owner_email: property.metadata.owner_email.clone(),
            property_name: property.display_name().to_string(),
            address: property.address.clone(),
            starts_at: exec.cleaning_at,
            duration_mins: property
                .metadata
                .cleaning_duration_mins
                .unwrap_or(self.config.cleaning_duration_mins),
            booking: exec.booking.clone(),
            notes: invite_notes(property, &exec.booking),
        };
        if let Err(e) = self
            .send_with_retries("calendar invite", || self.notifier.send_calendar_invite(&invite))
            .await
        {
            tracing::warn!("⚠️ Invite to {} not delivered: {e}", cleaner.email);
        }
    }

    /// Terminal: nobody left. The owner hears about it exactly once, because
    /// only one caller can move the row into a terminal state.
    async fn exhaust(&self, exec: &mut WorkflowExecution) -> Result<()> {
        exec.status = ExecutionStatus::Exhausted;
        exec.deadline = None;
        if !self.db.with_conn(|c| execution::update_execution(c, exec))? {
            return Ok(());
        }
        tracing::warn!(
            "🚫 No cleaner available for {} ({} tried)",
            exec.booking_key,
            exec.attempts.len()
        );

        let notice = ExhaustedNotice {
            owner_name: exec.property.metadata.owner_name.clone(),
            owner_email: exec.property.metadata.owner_email.clone(),
            property_name: exec.property.display_name().to_string(),
            booking: exec.booking.clone(),
            cleaning_at: exec.cleaning_at,
            attempted: exec.attempts.clone(),
        };
        if let Err(e) = self
            .send_with_retries("owner notice", || self.notifier.notify_owner_exhausted(&notice))
            .await
        {
            tracing::error!("❌ Owner of {} not told about {}: {e}", notice.property_name, exec.booking_key);
        }
        Ok(())
    }

    /// Bounded retries for idempotent sends.
    async fn send_with_retries<F, Fut>(&self, what: &str, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let budget = self.config.dispatch_retry_budget.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= budget => return Err(e),
                Err(e) => {
                    tracing::debug!("{what} failed (attempt {attempt}/{budget}): {e}");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    fn action_url(&self, token: &str, response: &str) -> String {
        format!(
            "{}/api/v1/respond?token={token}&response={response}",
            self.config.callback_base_url.trim_end_matches('/')
        )
    }

    // ─── Queries ──────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<Option<WorkflowExecution>> {
        self.db.with_conn(|c| execution::load_execution(c, id))
    }

    pub fn token(&self, token: &str) -> Result<Option<TokenRecord>> {
        self.db.with_conn(|c| execution::load_token(c, token))
    }

    /// Every execution for a booking, newest first.
    pub fn executions_for(&self, booking_key: &str) -> Result<Vec<WorkflowExecution>> {
        self.db
            .with_conn(|c| execution::executions_for(c, booking_key))
    }

    /// Whether a live or finished run was started for exactly this booking
    /// data. A run for older data, or none at all, means it still needs one.
    pub fn is_coordinated(&self, booking: &Booking) -> Result<bool> {
        Ok(self
            .executions_for(&booking.key())?
            .into_iter()
            .find(|e| e.status != ExecutionStatus::Superseded)
            .is_some_and(|e| !e.booking.materially_differs(booking)))
    }

    pub fn open_executions(&self) -> Result<Vec<WorkflowExecution>> {
        self.db.with_conn(execution::open_executions)
    }
}

/// Confirm the active cleaner and record the assignment, in the caller's
/// transaction.
fn close_confirmed(conn: &Connection, mut exec: WorkflowExecution, cleaner: CleanerContact) -> Result<Next> {
    exec.status = ExecutionStatus::Confirmed;
    exec.deadline = None;
    if !execution::update_execution(conn, &exec)? {
        return Ok(Next::Handled);
    }

    let assignment = Assignment {
        cleaner_name: cleaner.name.clone(),
        cleaner_email: cleaner.email.clone(),
        cleaner_phone: cleaner.phone.clone(),
        confirmed_at: Utc::now(),
        cleaning_at: exec.cleaning_at,
    };
    if !store::assign_confirmed(conn, &exec.booking, &assignment)? {
        tracing::warn!(
            "⚠️ {} changed before {} confirmed; assignment not recorded",
            exec.booking_key,
            cleaner.name
        );
    }
    Ok(Next::Confirm(Box::new(exec), cleaner))
}

/// Close the active cleaner's turn and move the cursor on. The next send
/// must follow within `grace` or the sweep redoes it.
fn close_turn(
    conn: &Connection,
    mut exec: WorkflowExecution,
    cleaner: &CleanerContact,
    outcome: AttemptOutcome,
    grace: chrono::Duration,
) -> Result<Next> {
    exec.record_attempt(cleaner, outcome);
    exec.deadline = Some(Utc::now() + grace);
    if !execution::update_execution(conn, &exec)? {
        return Ok(Next::Handled);
    }
    Ok(Next::Dispatch(Box::new(exec)))
}

/// Take over a run whose send was lost, so a concurrent sweep leaves it be.
fn redispatch(
    conn: &Connection,
    mut exec: WorkflowExecution,
    grace: chrono::Duration,
) -> Result<Option<Next>> {
    exec.deadline = Some(Utc::now() + grace);
    if !execution::update_execution(conn, &exec)? {
        return Ok(None);
    }
    Ok(Some(Next::Dispatch(Box::new(exec))))
}

fn advance_outcome(exec: &WorkflowExecution) -> CallbackOutcome {
    if exec.status == ExecutionStatus::Exhausted {
        CallbackOutcome::Exhausted
    } else {
        CallbackOutcome::Advanced
    }
}

fn invite_notes(property: &Property, booking: &Booking) -> String {
    let mut notes = vec![format!("Checkout of {} booking {}", booking.platform, booking.reference)];
    if !booking.guest_name.is_empty() {
        notes.push(format!("Guest: {} ({} guests)", booking.guest_name, booking.guests));
    }
    if !property.metadata.access_instructions.is_empty() {
        notes.push(format!("Access: {}", property.metadata.access_instructions));
    }
    if !property.metadata.special_instructions.is_empty() {
        notes.push(format!("Notes: {}", property.metadata.special_instructions));
    }
    notes.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingNotifier;
    use crate::store::BookingStore;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use turnover_core::PropertyMetadata;

    fn cleaner(name: &str, rank: u32) -> CleanerContact {
        CleanerContact {
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: "555-0100".into(),
            rank,
        }
    }

    fn property(cleaners: Vec<CleanerContact>) -> Property {
        Property {
            id: "loft".into(),
            platform_ids: BTreeMap::from([("airbnb".to_string(), "12345678".to_string())]),
            address: "1 Main St".into(),
            cleaners,
            metadata: PropertyMetadata {
                display_name: "Harbor Loft".into(),
                owner_name: "Olivia".into(),
                owner_email: Some("olivia@example.com".into()),
                timezone: "America/New_York".into(),
                access_instructions: "Lockbox 4321".into(),
                ..Default::default()
            },
        }
    }

    fn booking() -> Booking {
        Booking {
            platform: "airbnb".into(),
            reference: "HM123456789".into(),
            property_id: "12345678".into(),
            check_in: NaiveDate::from_ymd_opt(2026, 1, 15),
            check_out: NaiveDate::from_ymd_opt(2026, 1, 18),
            guest_name: "Jane Doe".into(),
            guests: 2,
            source_digest: String::new(),
        }
    }

    fn workflow_on(db: Arc<TurnoverDb>, notifier: Arc<RecordingNotifier>) -> CoordinationWorkflow {
        CoordinationWorkflow::new(db, notifier, WorkflowConfig::default())
            .with_retry_backoff(Duration::ZERO)
    }

    fn setup() -> (CoordinationWorkflow, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let db = Arc::new(TurnoverDb::open_in_memory().unwrap());
        (workflow_on(db, notifier.clone()), notifier)
    }

    #[tokio::test]
    async fn test_escalates_in_rank_order_then_exhausts() {
        let (workflow, notifier) = setup();
        let property = property(vec![cleaner("Bob", 2), cleaner("Alice", 1)]);
        let exec = workflow.start(&booking(), &property).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::AwaitingResponse);
        assert_eq!(notifier.asked(), vec!["Alice"]);

        let outcome = workflow
            .respond(&notifier.last_token(), CleanerResponse::No)
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Advanced);
        assert_eq!(notifier.asked(), vec!["Alice", "Bob"]);
        assert_eq!(
            workflow.get(&exec.id).unwrap().unwrap().status,
            ExecutionStatus::Escalated
        );

        let outcome = workflow
            .respond(&notifier.last_token(), CleanerResponse::No)
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Exhausted);

        let stored = workflow.get(&exec.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Exhausted);
        assert_eq!(stored.cursor, 2);
        assert_eq!(stored.attempt_count, 2);

        let notices = notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        let tried: Vec<_> = notices[0].attempted.iter().map(|a| a.cleaner_name.as_str()).collect();
        assert_eq!(tried, vec!["Alice", "Bob"]);
        assert!(notices[0].attempted.iter().all(|a| a.outcome == AttemptOutcome::Declined));
    }

    #[tokio::test]
    async fn test_confirm_sends_invite_and_records_assignment() {
        let (workflow, notifier) = setup();
        let property = property(vec![cleaner("Alice", 1), cleaner("Bob", 2)]);
        let store = BookingStore::new(workflow.db.clone());
        store.save(&booking()).unwrap();
        let exec = workflow.start(&booking(), &property).await.unwrap();
        let token = notifier.last_token();

        let outcome = workflow.respond(&token, CleanerResponse::Yes).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::Confirmed);

        let invites = notifier.invites.lock().unwrap().clone();
        assert_eq!(invites.len(), 1);
        assert_eq!(invites[0].cleaner.name, "Alice");
        assert_eq!(invites[0].owner_email.as_deref(), Some("olivia@example.com"));
        assert_eq!(invites[0].duration_mins, 180);
        // 11:00 in New York on checkout day
        assert_eq!(invites[0].starts_at.to_rfc3339(), "2026-01-18T16:00:00+00:00");
        assert!(invites[0].notes.contains("Lockbox 4321"));

        let stored = store.get_by_key(&exec.booking_key).unwrap().unwrap();
        let assignment = stored.assignment.unwrap();
        assert_eq!(assignment.cleaner_email, "alice@example.com");
        assert_eq!(assignment.cleaning_at, invites[0].starts_at);

        // Replays are acknowledged but change nothing
        assert_eq!(
            workflow.respond(&token, CleanerResponse::Yes).await.unwrap(),
            CallbackOutcome::AlreadyHandled
        );
        assert_eq!(
            workflow.respond(&token, CleanerResponse::No).await.unwrap(),
            CallbackOutcome::AlreadyHandled
        );
        assert_eq!(notifier.asked(), vec!["Alice"]);
        assert_eq!(
            workflow.get(&exec.id).unwrap().unwrap().status,
            ExecutionStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_unknown_token_is_rejected() {
        let (workflow, _) = setup();
        assert!(matches!(
            workflow.respond("not-a-token", CleanerResponse::Yes).await,
            Err(TurnoverError::UnknownToken(_))
        ));
    }

    #[tokio::test]
    async fn test_no_cleaners_exhausts_immediately() {
        let (workflow, notifier) = setup();
        let exec = workflow.start(&booking(), &property(vec![])).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Exhausted);
        assert!(notifier.asked().is_empty());
        assert_eq!(notifier.notices.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_cleaner_skipped_after_budget() {
        let notifier = Arc::new(RecordingNotifier {
            unreachable: vec!["alice@example.com".into()],
            ..Default::default()
        });
        let db = Arc::new(TurnoverDb::open_in_memory().unwrap());
        let workflow = workflow_on(db, notifier.clone());

        let property = property(vec![cleaner("Alice", 1), cleaner("Bob", 2)]);
        let exec = workflow.start(&booking(), &property).await.unwrap();

        let calls = notifier.send_calls.lock().unwrap().clone();
        assert_eq!(
            calls.iter().filter(|c| *c == "alice@example.com").count(),
            3
        );
        assert_eq!(notifier.asked(), vec!["Bob"]);
        assert_eq!(exec.status, ExecutionStatus::Escalated);
        assert_eq!(exec.attempts[0].outcome, AttemptOutcome::Unreachable);
    }

    #[tokio::test]
    async fn test_timeout_advances_and_revokes_old_token() {
        let (workflow, notifier) = setup();
        let property = property(vec![cleaner("Alice", 1), cleaner("Bob", 2)]);
        let exec = workflow.start(&booking(), &property).await.unwrap();
        let alice_token = notifier.last_token();

        // Nothing is due yet
        let report = workflow.expire_overdue(Utc::now()).await.unwrap();
        assert_eq!(report.overdue, 0);

        let later = Utc::now() + chrono::Duration::hours(25);
        let report = workflow.expire_overdue(later).await.unwrap();
        assert_eq!((report.overdue, report.advanced), (1, 1));
        assert_eq!(notifier.asked(), vec!["Alice", "Bob"]);

        // Alice answers late: acknowledged, no effect
        assert_eq!(
            workflow.respond(&alice_token, CleanerResponse::Yes).await.unwrap(),
            CallbackOutcome::AlreadyHandled
        );
        assert_eq!(
            workflow.token(&alice_token).unwrap().unwrap().outcome.as_deref(),
            Some("timed_out")
        );

        let report = workflow
            .expire_overdue(later + chrono::Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(report.exhausted, 1);
        let stored = workflow.get(&exec.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Exhausted);
        assert!(stored.attempts.iter().all(|a| a.outcome == AttemptOutcome::TimedOut));
        assert_eq!(notifier.notices.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_booking_does_not_start_twice() {
        let (workflow, notifier) = setup();
        let property = property(vec![cleaner("Alice", 1)]);
        let first = workflow.start(&booking(), &property).await.unwrap();
        let second = workflow.start(&booking(), &property).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(notifier.asked(), vec!["Alice"]);
        assert_eq!(workflow.open_executions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_changed_booking_supersedes_open_execution() {
        let (workflow, notifier) = setup();
        let property = property(vec![cleaner("Alice", 1), cleaner("Bob", 2)]);
        let first = workflow.start(&booking(), &property).await.unwrap();
        let old_token = notifier.last_token();

        let mut moved = booking();
        moved.check_out = NaiveDate::from_ymd_opt(2026, 1, 20);
        let second = workflow.start(&moved, &property).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(
            workflow.get(&first.id).unwrap().unwrap().status,
            ExecutionStatus::Superseded
        );
        assert_eq!(
            workflow.respond(&old_token, CleanerResponse::Yes).await.unwrap(),
            CallbackOutcome::AlreadyHandled
        );
        assert_eq!(notifier.asked(), vec!["Alice", "Alice"]);
        assert_eq!(workflow.executions_for(&first.booking_key).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_checkout_cannot_start() {
        let (workflow, _) = setup();
        let mut b = booking();
        b.check_out = None;
        assert!(matches!(
            workflow.start(&b, &property(vec![cleaner("Alice", 1)])).await,
            Err(TurnoverError::InvalidBooking(_))
        ));
        assert!(workflow.executions_for(&b.key()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resumes_after_restart() {
        let dir = std::env::temp_dir().join(format!("turnover-test-wf-{}", uuid::Uuid::new_v4()));
        let path = dir.join("turnover.db");
        let notifier = Arc::new(RecordingNotifier::default());
        let property = property(vec![cleaner("Alice", 1)]);

        let exec_id = {
            let db = Arc::new(TurnoverDb::open(&path).unwrap());
            let workflow = workflow_on(db, notifier.clone());
            workflow.start(&booking(), &property).await.unwrap().id
        };

        let db = Arc::new(TurnoverDb::open(&path).unwrap());
        let workflow = workflow_on(db, notifier.clone());
        assert_eq!(
            workflow
                .respond(&notifier.last_token(), CleanerResponse::Yes)
                .await
                .unwrap(),
            CallbackOutcome::Confirmed
        );
        assert_eq!(
            workflow.get(&exec_id).unwrap().unwrap().status,
            ExecutionStatus::Confirmed
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_sweep_resumes_run_stalled_after_decline() {
        let (workflow, notifier) = setup();
        let property = property(vec![cleaner("Alice", 1), cleaner("Bob", 2)]);
        let exec = workflow.start(&booking(), &property).await.unwrap();
        let alice_token = notifier.last_token();

        // Decline recorded, then the process died before the cursor moved
        workflow
            .db
            .with_conn(|c| execution::consume_token(c, &alice_token, "declined"))
            .unwrap();

        let report = workflow
            .expire_overdue(Utc::now() + chrono::Duration::days(2))
            .await
            .unwrap();
        assert_eq!((report.overdue, report.advanced, report.skipped), (1, 1, 0));
        assert_eq!(notifier.asked(), vec!["Alice", "Bob"]);
        let stored = workflow.get(&exec.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Escalated);
        assert_eq!(stored.cursor, 1);
        assert_eq!(stored.attempts[0].outcome, AttemptOutcome::Declined);

        let report = workflow
            .expire_overdue(Utc::now() + chrono::Duration::days(10))
            .await
            .unwrap();
        assert_eq!(report.exhausted, 1);
        assert_eq!(
            workflow.get(&exec.id).unwrap().unwrap().status,
            ExecutionStatus::Exhausted
        );
        assert_eq!(notifier.notices.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_applies_accept_left_unconfirmed() {
        let (workflow, notifier) = setup();
        let property = property(vec![cleaner("Alice", 1), cleaner("Bob", 2)]);
        let exec = workflow.start(&booking(), &property).await.unwrap();
        workflow
            .db
            .with_conn(|c| execution::consume_token(c, &notifier.last_token(), "accepted"))
            .unwrap();

        let report = workflow
            .expire_overdue(Utc::now() + chrono::Duration::days(2))
            .await
            .unwrap();
        assert_eq!(report.confirmed, 1);
        assert_eq!(
            workflow.get(&exec.id).unwrap().unwrap().status,
            ExecutionStatus::Confirmed
        );
        assert_eq!(notifier.invites.lock().unwrap()[0].cleaner.name, "Alice");
        assert_eq!(notifier.asked(), vec!["Alice"]);
        let stored = BookingStore::new(workflow.db.clone())
            .get_by_key(&exec.booking_key)
            .unwrap()
            .unwrap();
        assert_eq!(stored.assignment.unwrap().cleaner_name, "Alice");
    }

    #[tokio::test]
    async fn test_sweep_sends_first_request_lost_to_crash() {
        let (workflow, notifier) = setup();
        let property = property(vec![cleaner("Alice", 1)]);
        let cleaning_at = Utc::now() + chrono::Duration::days(5);

        // Row written, first send never happened
        let mut stuck = WorkflowExecution::new(&booking(), &property, cleaning_at);
        stuck.deadline = Some(Utc::now() + workflow.config.dispatch_grace());
        workflow
            .db
            .with_conn(|c| execution::insert_execution(c, &stuck))
            .unwrap();

        // A redelivered email finds it already running
        let running = workflow.start(&booking(), &property).await.unwrap();
        assert_eq!(running.id, stuck.id);
        assert_eq!(running.status, ExecutionStatus::Pending);

        // Within the grace period nothing happens
        let report = workflow.expire_overdue(Utc::now()).await.unwrap();
        assert_eq!(report.overdue, 0);

        let report = workflow
            .expire_overdue(Utc::now() + chrono::Duration::minutes(11))
            .await
            .unwrap();
        assert_eq!(report.advanced, 1);
        assert_eq!(notifier.asked(), vec!["Alice"]);
        let stored = workflow.get(&stuck.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::AwaitingResponse);
        assert_eq!(stored.cursor, 0);

        // The fresh request is answerable
        assert_eq!(
            workflow
                .respond(&notifier.last_token(), CleanerResponse::Yes)
                .await
                .unwrap(),
            CallbackOutcome::Confirmed
        );
    }

    #[tokio::test]
    async fn test_failed_response_leaves_token_usable() {
        let (workflow, _) = setup();
        let orphan = TokenRecord {
            token: "tok-orphan".into(),
            execution_id: "missing".into(),
            cursor: 0,
            cleaner_email: "alice@example.com".into(),
            issued_at: Utc::now(),
            consumed_at: None,
            outcome: None,
        };
        workflow
            .db
            .with_conn(|c| execution::insert_token(c, &orphan))
            .unwrap();

        assert!(matches!(
            workflow.respond("tok-orphan", CleanerResponse::No).await,
            Err(TurnoverError::Storage(_))
        ));
        // Rolled back with the rest of the transition
        let token = workflow.token("tok-orphan").unwrap().unwrap();
        assert!(token.consumed_at.is_none());
    }

    #[tokio::test]
    async fn test_is_coordinated_tracks_booking_data() {
        let (workflow, _) = setup();
        let property = property(vec![cleaner("Alice", 1)]);
        assert!(!workflow.is_coordinated(&booking()).unwrap());

        workflow.start(&booking(), &property).await.unwrap();
        assert!(workflow.is_coordinated(&booking()).unwrap());

        let mut moved = booking();
        moved.check_out = NaiveDate::from_ymd_opt(2026, 1, 20);
        assert!(!workflow.is_coordinated(&moved).unwrap());
    }
}
