//! Booking parser: email in, [`ParseOutcome`] out.

use chrono::{Local, NaiveDate};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;
use turnover_core::platform::canonical_platform;
use turnover_core::{Booking, Email, Result};

use crate::dates::extract_dates;
use crate::html::html_to_text;
use crate::platform::{Field, PlatformProfile};
use crate::rules::first_match;

/// Why an email was not turned into a booking. Expected and non-fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("no known booking platform")]
    UnknownPlatform,
    #[error("{platform}: not a booking confirmation")]
    NotConfirmation { platform: String },
    #[error("{platform}: incomplete booking, missing {field}")]
    MissingField {
        platform: String,
        field: &'static str,
    },
    #[error("{platform}: {reason}")]
    Invalid { platform: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Booking(Booking),
    NotABooking(SkipReason),
}

impl ParseOutcome {
    pub fn booking(self) -> Option<Booking> {
        match self {
            Self::Booking(b) => Some(b),
            Self::NotABooking(_) => None,
        }
    }
}

static CONFIRMATION_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:reservation|booking|booked|confirmed|confirmation)\b")
        .expect("static regex")
});
static CHECK_IN_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcheck[\s-]?in\b").expect("static regex"));
static ADULTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})\s+adults?\b").expect("static regex"));
static CHILDREN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s+(?:children|child|kids?)\b").expect("static regex")
});
static GUESTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s+guests?\b|\bguests?[ \t]*:[ \t]*(\d{1,2})\b")
        .expect("static regex")
});

/// Words that mark a line as navigation or legal boilerplate, not a name.
const BOILERPLATE: &[&str] = &[
    "airbnb", "vrbo", "booking", "reservation", "confirmed", "confirmation", "check", "guest",
    "view", "help", "privacy", "terms", "unsubscribe", "itinerary", "message", "receipt",
    "payment", "http", "https", "www", "copyright", "contact", "support", "account", "download", "app",
    "manage", "policy", "cancel",
];
const CONNECTORS: &[&str] = &[
    "a", "an", "and", "at", "by", "in", "near", "of", "on", "the", "to", "with", "&",
];

/// Heuristic parser over an ordered set of platform profiles.
pub struct BookingParser {
    platforms: Vec<PlatformProfile>,
}

impl BookingParser {
    /// Parser with the built-in platforms.
    pub fn new() -> Result<Self> {
        Ok(Self::with_platforms(PlatformProfile::builtin()?))
    }

    pub fn with_platforms(platforms: Vec<PlatformProfile>) -> Self {
        Self { platforms }
    }

    /// Merge configured sender domains (`[platforms]` table) into the allow-list.
    pub fn with_sender_domains(mut self, extra: &BTreeMap<String, Vec<String>>) -> Self {
        for (platform, domains) in extra {
            let canonical = canonical_platform(platform);
            match self.platforms.iter_mut().find(|p| p.name == canonical) {
                Some(profile) => profile.add_sender_domains(domains),
                None => tracing::warn!(
                    "⚠️ Sender domains configured for unknown platform '{platform}'"
                ),
            }
        }
        self
    }

    pub fn platforms(&self) -> &[PlatformProfile] {
        &self.platforms
    }

    /// Parse against today's local date.
    pub fn parse(&self, email: &Email) -> ParseOutcome {
        self.parse_on(email, Local::now().date_naive())
    }

    /// Parse with an explicit "today" for year inference.
    pub fn parse_on(&self, email: &Email, today: NaiveDate) -> ParseOutcome {
        let outcome = self.try_parse(email, today);
        match &outcome {
            ParseOutcome::Booking(b) => tracing::info!(
                "📬 Parsed {} booking {} (property {}, {:?} → {:?})",
                b.platform,
                b.reference,
                b.property_id,
                b.check_in,
                b.check_out
            ),
            ParseOutcome::NotABooking(reason) => {
                tracing::info!("⏭️ Skipping '{}': {reason}", email.subject)
            }
        }
        outcome
    }

    fn try_parse(&self, email: &Email, today: NaiveDate) -> ParseOutcome {
        let body = email_text(email);
        let full = format!("{}\n{}", email.subject, body);

        // Step 1: platform
        let Some(profile) = self.detect_platform(&email.from, &full) else {
            return ParseOutcome::NotABooking(SkipReason::UnknownPlatform);
        };

        // Step 2: content gate
        let has_keyword = CONFIRMATION_WORD.is_match(&full);
        let has_marker = CHECK_IN_MARKER.is_match(&full) || profile.code_shape.matches(&full);
        if !(has_keyword && has_marker) {
            return ParseOutcome::NotABooking(SkipReason::NotConfirmation {
                platform: profile.name.clone(),
            });
        }

        // Step 3: fields
        let reference = first_match(&profile.reference_rules, &full)
            .map(|(_, v)| v)
            .unwrap_or_default();
        let property_id = first_match(&profile.listing_rules, &body)
            .map(|(_, v)| v)
            .or_else(|| property_name_line(&body))
            .unwrap_or_default();
        let dates = extract_dates(&body, today);
        let guest_name = first_match(&profile.guest_rules, &body)
            .or_else(|| first_match(&profile.subject_guest_rules, &email.subject))
            .map(|(_, v)| v)
            .unwrap_or_default();

        let booking = Booking {
            platform: profile.name.clone(),
            reference,
            property_id,
            check_in: dates.check_in,
            check_out: dates.check_out,
            guest_name,
            guests: guest_count(&body),
            source_digest: format!("{:x}", Sha256::digest(full.as_bytes())),
        };

        // Step 4: required fields
        if let Some(field) = profile
            .required
            .iter()
            .find(|f| !has_field(&booking, **f))
        {
            return ParseOutcome::NotABooking(SkipReason::MissingField {
                platform: profile.name.clone(),
                field: field.name(),
            });
        }
        if let Err(e) = booking.validate() {
            return ParseOutcome::NotABooking(SkipReason::Invalid {
                platform: profile.name.clone(),
                reason: e.to_string(),
            });
        }

        ParseOutcome::Booking(booking)
    }

    /// Sender allow-list first, then content fingerprints, in profile order.
    fn detect_platform(&self, from: &str, text: &str) -> Option<&PlatformProfile> {
        self.platforms
            .iter()
            .find(|p| p.matches_sender(from))
            .or_else(|| self.platforms.iter().find(|p| p.matches_content(text)))
    }
}

fn has_field(booking: &Booking, field: Field) -> bool {
    match field {
        Field::Reference => !booking.reference.is_empty(),
        Field::Property => !booking.property_id.is_empty(),
        Field::CheckIn => booking.check_in.is_some(),
        Field::CheckOut => booking.check_out.is_some(),
        Field::GuestName => !booking.guest_name.is_empty(),
    }
}

/// Plain-text body, falling back to the HTML part.
fn email_text(email: &Email) -> String {
    if email.body_text.trim().is_empty() {
        html_to_text(&email.body_html)
    } else {
        email.body_text.clone()
    }
}

/// Adults + children when both are labeled, else a generic guest count.
fn guest_count(text: &str) -> u32 {
    match (first_number(&ADULTS, text), first_number(&CHILDREN, text)) {
        (Some(adults), Some(children)) => adults + children,
        (adults, _) => first_number(&GUESTS, text).or(adults).unwrap_or(0),
    }
}

/// First participating capture group of the first match, as a number.
fn first_number(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text).and_then(|c| {
        c.iter()
            .skip(1)
            .flatten()
            .next()
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// Free-text property name: a standalone Title Case or UPPER CASE line of at
/// least 10 characters that is not boilerplate.
fn property_name_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| looks_like_property_name(line))
        .map(str::to_string)
}

fn looks_like_property_name(line: &str) -> bool {
    if line.chars().count() < 10 || line.contains(':') || line.ends_with(['?', '!', '.']) {
        return false;
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.len() > 12 || !line.chars().any(|c| c.is_alphabetic()) {
        return false;
    }
    let lower = line.to_lowercase();
    if lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| BOILERPLATE.contains(&w))
    {
        return false;
    }
    let upper = line
        .chars()
        .filter(|c| c.is_alphabetic())
        .all(|c| c.is_uppercase());
    let title = words.iter().all(|w| {
        CONNECTORS.contains(&w.to_lowercase().as_str())
            || w
                .chars()
                .find(|c| c.is_alphanumeric())
                .is_none_or(|c| c.is_uppercase() || c.is_ascii_digit())
    });
    upper || title
}
