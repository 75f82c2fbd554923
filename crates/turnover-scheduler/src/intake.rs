//! Intake pipeline: one pass over the mailbox.
//!
//! ```text
//! fetch(filter) → parse → claim → resolve property → start workflow → mark processed
//!                   │        │            │
//!                   │        │            └─ mismatch: report, leave email unprocessed
//!                   │        └─ unchanged + coordinated for this data: mark processed
//!                   └─ not a booking: skip with reason
//! ```
//!
//! One bad email never aborts the run; only a failing mailbox fetch does.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use turnover_core::traits::MailFilter;
use turnover_core::{Booking, Email, MailSource, PropertyResolver, Result, TurnoverConfig};
use turnover_parser::{BookingParser, ParseOutcome};

use crate::execution::WorkflowExecution;
use crate::store::{BookingStore, Claim};
use crate::workflow::CoordinationWorkflow;

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEmail {
    pub subject: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeFailure {
    pub subject: String,
    /// Booking key, when the email parsed.
    pub booking: Option<String>,
    pub error: String,
}

/// Outcome of one intake run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntakeReport {
    pub fetched: usize,
    pub bookings: usize,
    /// Executions started (or already running for identical data).
    pub coordinating: usize,
    pub unchanged: usize,
    pub skipped: Vec<SkippedEmail>,
    pub errors: Vec<IntakeFailure>,
}

impl IntakeReport {
    pub fn summary(&self) -> String {
        format!(
            "{} fetched, {} bookings, {} coordinating, {} unchanged, {} skipped, {} errors",
            self.fetched,
            self.bookings,
            self.coordinating,
            self.unchanged,
            self.skipped.len(),
            self.errors.len()
        )
    }
}

enum Coordination {
    Started(Box<WorkflowExecution>),
    Unchanged,
}

pub struct Intake {
    parser: BookingParser,
    store: BookingStore,
    resolver: Arc<PropertyResolver>,
    workflow: Arc<CoordinationWorkflow>,
    filter: MailFilter,
    retry_budget: u32,
}

impl Intake {
    pub fn new(
        parser: BookingParser,
        store: BookingStore,
        resolver: Arc<PropertyResolver>,
        workflow: Arc<CoordinationWorkflow>,
        filter: MailFilter,
    ) -> Self {
        let retry_budget = workflow.config().dispatch_retry_budget.max(1);
        Self {
            parser,
            store,
            resolver,
            workflow,
            filter,
            retry_budget,
        }
    }

    /// Wire the pipeline from configuration.
    pub fn from_config(
        config: &TurnoverConfig,
        store: BookingStore,
        workflow: Arc<CoordinationWorkflow>,
    ) -> Result<Self> {
        let parser = BookingParser::new()?.with_sender_domains(&config.platforms);
        let resolver = Arc::new(PropertyResolver::new(config.properties.clone()));
        let filter = MailFilter {
            sender_patterns: config.filters.sender_patterns.clone(),
            subject_patterns: config.filters.subject_patterns.clone(),
            unread_only: config.mail.unread_only,
        };
        Ok(Self::new(parser, store, resolver, workflow, filter))
    }

    pub async fn run(&self, source: &dyn MailSource) -> Result<IntakeReport> {
        let emails = source.fetch(&self.filter).await?;
        tracing::info!("📥 Intake: {} candidate emails", emails.len());

        let mut report = IntakeReport {
            fetched: emails.len(),
            ..Default::default()
        };

        for email in &emails {
            let booking = match self.parser.parse(email) {
                ParseOutcome::Booking(b) => b,
                ParseOutcome::NotABooking(reason) => {
                    report.skipped.push(SkippedEmail {
                        subject: email.subject.clone(),
                        reason: reason.to_string(),
                    });
                    continue;
                }
            };
            report.bookings += 1;

            match self.coordinate(&booking).await {
                Ok(coordination) => {
                    match coordination {
                        Coordination::Started(_) => report.coordinating += 1,
                        Coordination::Unchanged => report.unchanged += 1,
                    }
                    if let Err(e) = self.mark_processed(source, email).await {
                        report.errors.push(failure(email, Some(&booking), &e));
                    }
                }
                Err(e) => {
                    tracing::warn!("⚠️ {} not coordinated: {e}", booking.key());
                    report.errors.push(failure(email, Some(&booking), &e));
                }
            }
        }

        tracing::info!("📊 Intake done: {}", report.summary());
        Ok(report)
    }

    async fn coordinate(&self, booking: &Booking) -> Result<Coordination> {
        let key = booking.key();
        let claim = self.store.claim(booking)?;
        // Stored but not coordinated for this data: an earlier run failed
        // after its claim, so the claim alone can't say "nothing to do"
        if !claim.needs_coordination() && self.workflow.is_coordinated(booking)? {
            tracing::debug!("{key} unchanged");
            return Ok(Coordination::Unchanged);
        }
        if let Claim::Changed { previous, .. } = &claim {
            tracing::info!(
                "✏️ {key} changed (checkout {:?} → {:?}, guests {} → {})",
                previous.check_out,
                booking.check_out,
                previous.guests,
                booking.guests
            );
        }

        let property = self.resolver.resolve(&booking.platform, &booking.property_id)?;
        let exec = self.workflow.start(booking, &property).await?;
        Ok(Coordination::Started(Box::new(exec)))
    }

    /// Bounded retries; marking is idempotent.
    async fn mark_processed(&self, source: &dyn MailSource, email: &Email) -> Result<()> {
        let mut attempt = 1;
        loop {
            match source.mark_processed(&email.id).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.retry_budget => return Err(e),
                Err(e) => {
                    tracing::debug!("mark processed failed (attempt {attempt}): {e}");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn failure(email: &Email, booking: Option<&Booking>, error: &turnover_core::TurnoverError) -> IntakeFailure {
    IntakeFailure {
        subject: email.subject.clone(),
        booking: booking.map(Booking::key),
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryMailSource, RecordingNotifier};
    use crate::persistence::TurnoverDb;
    use turnover_core::config::WorkflowConfig;
    use turnover_core::{CleanerContact, Property, PropertyMetadata};

    const BODY: &str = "Reservation confirmed\n\
        Reservation Number: HM123456789\n\
        Listing: 12345678\n\
        Check-in: 01/15/2026\n\
        Check-out: 01/18/2026\n\
        2 guests\n";

    fn email(id: &str, body: &str) -> Email {
        Email {
            id: id.into(),
            ..Email::new(
                "automated@airbnb.com",
                "Reservation confirmed - Jane Doe arrives Jan 15",
                body,
            )
        }
    }

    fn marketing() -> Email {
        Email {
            id: "m1".into(),
            ..Email::new("news@airbnb.com", "Tips for hosts", "Earn more this season.")
        }
    }

    fn properties() -> Vec<Property> {
        vec![Property {
            id: "loft".into(),
            platform_ids: [("Airbnb".to_string(), "12345678".to_string())].into(),
            address: "1 Main St".into(),
            cleaners: vec![
                CleanerContact {
                    name: "Bob".into(),
                    email: "bob@example.com".into(),
                    phone: String::new(),
                    rank: 2,
                },
                CleanerContact {
                    name: "Alice".into(),
                    email: "alice@example.com".into(),
                    phone: String::new(),
                    rank: 1,
                },
            ],
            metadata: PropertyMetadata::default(),
        }]
    }

    fn intake(notifier: Arc<RecordingNotifier>) -> (Intake, Arc<CoordinationWorkflow>) {
        let db = Arc::new(TurnoverDb::open_in_memory().unwrap());
        let workflow = Arc::new(
            CoordinationWorkflow::new(db.clone(), notifier, WorkflowConfig::default())
                .with_retry_backoff(Duration::ZERO),
        );
        let intake = Intake::new(
            BookingParser::new().unwrap(),
            BookingStore::new(db),
            Arc::new(PropertyResolver::new(properties())),
            workflow.clone(),
            MailFilter {
                sender_patterns: vec!["airbnb.com".into()],
                subject_patterns: vec![],
                unread_only: true,
            },
        );
        (intake, workflow)
    }

    #[tokio::test]
    async fn test_booking_email_starts_coordination() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (intake, _) = intake(notifier.clone());
        let mailbox = MemoryMailSource::with(vec![email("e1", BODY), marketing()]);

        let report = intake.run(&mailbox).await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.bookings, 1);
        assert_eq!(report.coordinating, 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(notifier.asked(), vec!["Alice"]);
        // Non-bookings stay untouched in the mailbox
        assert_eq!(*mailbox.marked.lock().unwrap(), vec!["e1".to_string()]);
    }

    #[tokio::test]
    async fn test_rerun_is_unchanged() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (intake, _) = intake(notifier.clone());
        let mailbox = MemoryMailSource::with(vec![email("e1", BODY)]);

        intake.run(&mailbox).await.unwrap();
        let report = intake.run(&mailbox).await.unwrap();
        assert_eq!((report.coordinating, report.unchanged), (0, 1));
        assert_eq!(notifier.asked(), vec!["Alice"]);
    }

    #[tokio::test]
    async fn test_changed_booking_recoordinates() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (intake, workflow) = intake(notifier.clone());
        let mailbox = MemoryMailSource::with(vec![email("e1", BODY)]);
        intake.run(&mailbox).await.unwrap();

        let moved = BODY.replace("01/18/2026", "01/19/2026");
        let mailbox = MemoryMailSource::with(vec![email("e2", &moved)]);
        let report = intake.run(&mailbox).await.unwrap();
        assert_eq!(report.coordinating, 1);
        assert_eq!(workflow.executions_for("airbnb:HM123456789").unwrap().len(), 2);
        assert_eq!(workflow.open_executions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_property_reported_and_left_unprocessed() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (intake, _) = intake(notifier.clone());
        let body = BODY.replace("Listing: 12345678", "Listing: 99999999");
        let mailbox = MemoryMailSource::with(vec![email("e1", &body), email("e2", BODY)]);

        let report = intake.run(&mailbox).await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].error.contains("99999999"));
        assert!(report.errors[0].error.contains("loft"));
        // The other email still went through
        assert_eq!(report.coordinating, 1);
        assert_eq!(*mailbox.marked.lock().unwrap(), vec!["e2".to_string()]);

        // Same mismatch on the next run: still reported, not silently unchanged
        let mailbox = MemoryMailSource::with(vec![email("e1", &body)]);
        let report = intake.run(&mailbox).await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.unchanged, 0);
    }

    #[tokio::test]
    async fn test_mark_processed_retried() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (intake, _) = intake(notifier);
        let mailbox = MemoryMailSource::with(vec![email("e1", BODY)]);
        *mailbox.mark_failures.lock().unwrap() = 2;

        let report = intake.run(&mailbox).await.unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(*mailbox.mark_calls.lock().unwrap(), 3);

        // Budget exhausted: reported, run still completes
        let mailbox = MemoryMailSource::with(vec![email("e1", BODY)]);
        *mailbox.mark_failures.lock().unwrap() = 5;
        let report = intake.run(&mailbox).await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.unchanged, 1);
    }

    #[tokio::test]
    async fn test_failed_recoordination_is_reported_again() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (intake, workflow) = intake(notifier.clone());
        intake
            .run(&MemoryMailSource::with(vec![email("e1", BODY)]))
            .await
            .unwrap();

        // Same reservation, moved checkout on a listing nobody configured
        let moved = BODY
            .replace("Listing: 12345678", "Listing: 99999999")
            .replace("01/18/2026", "01/20/2026");
        let report = intake
            .run(&MemoryMailSource::with(vec![email("e2", &moved)]))
            .await
            .unwrap();
        assert_eq!((report.errors.len(), report.unchanged), (1, 0));

        // The claim already stored the new data; the retry must not pass as unchanged
        let mailbox = MemoryMailSource::with(vec![email("e2", &moved)]);
        let report = intake.run(&mailbox).await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.unchanged, 0);
        assert!(mailbox.marked.lock().unwrap().is_empty());

        // The old run keeps its data until the mismatch is fixed
        let open = workflow.open_executions().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].booking.check_out, chrono::NaiveDate::from_ymd_opt(2026, 1, 18));
    }
}
