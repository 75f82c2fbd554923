//! # Turnover Parser
//!
//! Turns booking-confirmation emails from rental platforms into [`Booking`]s.
//!
//! ## Pipeline
//! ```text
//! Email
//!   → detect platform   (sender allow-list, then subject/body fingerprints)
//!   → content gate      (confirmation keyword AND check-in / code marker)
//!   → extract fields    (ordered named rules per platform, first hit wins)
//!   → required fields   (reference + property, else NotABooking)
//! ```
//!
//! Platform rule sets are plain data ([`PlatformProfile`]) so a new platform
//! is a new constructor, not new control flow.
//!
//! [`Booking`]: turnover_core::Booking

pub mod dates;
pub mod html;
pub mod parser;
pub mod platform;
pub mod rules;

pub use parser::{BookingParser, ParseOutcome, SkipReason};
pub use platform::{Field, PlatformProfile};
pub use rules::ExtractionRule;
