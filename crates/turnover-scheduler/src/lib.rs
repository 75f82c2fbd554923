//! # Turnover Scheduler
//!
//! Booking store, cleaner coordination workflow and the intake pipeline.
//!
//! ## Design Principles
//! - SQLite persistence, one file, WAL mode: survives restarts
//! - No in-memory waits: a suspended workflow is a row plus a token
//! - Tokio timers only, for mailbox polling and the timeout sweep
//!
//! ## Architecture
//! ```text
//! Intake (tokio interval)
//!   ├── MailSource.fetch → BookingParser → BookingStore.claim
//!   └── New/Changed → PropertyResolver → CoordinationWorkflow.start
//!
//! CoordinationWorkflow
//!   ├── dispatch  → Notifier.notify_cleaner (yes/no links carry a token)
//!   ├── respond   ← gateway callback (token, yes|no)
//!   ├── sweep     ← tokio interval, deadlines in workflow_executions
//!   └── terminal  → calendar invite | owner notice
//! ```

pub mod engine;
pub mod execution;
pub mod intake;
pub mod persistence;
pub mod schedule;
pub mod store;
pub mod workflow;

#[cfg(test)]
mod fakes;

pub use engine::{spawn_intake, spawn_sweeper};
pub use execution::{
    CallbackOutcome, CleanerResponse, ExecutionStatus, TokenRecord, WorkflowExecution,
};
pub use intake::{Intake, IntakeFailure, IntakeReport, SkippedEmail};
pub use persistence::TurnoverDb;
pub use schedule::cleaning_moment;
pub use store::{BookingStore, Claim, StoredBooking};
pub use workflow::{CoordinationWorkflow, SweepReport};
