//! # Turnover Core
//!
//! Shared vocabulary for the booking intake and cleaner coordination engine.
//!
//! ## Architecture
//! ```text
//! MailSource ──► BookingParser ──► BookingStore.claim ──► PropertyResolver
//!                                                            │
//!                                 Notifier ◄── CoordinationWorkflow
//! ```
//!
//! Everything in this crate is I/O free: the concrete mailbox, SMTP sender
//! and SQLite store live in the channel and scheduler crates.

pub mod config;
pub mod error;
pub mod platform;
pub mod resolver;
pub mod traits;
pub mod types;

pub use config::TurnoverConfig;
pub use error::{Result, TurnoverError};
pub use resolver::PropertyResolver;
pub use traits::{MailSource, Notifier};
pub use types::{
    Assignment, AttemptOutcome, AttemptRecord, Booking, CleanerContact, Email, Property,
    PropertyMetadata,
};
