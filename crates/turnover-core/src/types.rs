//! Domain data model: emails in, bookings and properties through the pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, TurnoverError};

/// A raw email handed over by the mail collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Email {
    /// Mailbox-local identity (IMAP UID), used for "mark processed".
    pub id: String,
    pub from: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    pub message_id: Option<String>,
}

impl Email {
    pub fn new(from: &str, subject: &str, body_text: &str) -> Self {
        Self {
            from: from.to_string(),
            subject: subject.to_string(),
            body_text: body_text.to_string(),
            ..Default::default()
        }
    }
}

/// A parsed booking. Identity is `(platform, reference)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Canonical platform name (`airbnb`, `vrbo`, `bookingcom`).
    pub platform: String,
    /// Platform confirmation code.
    pub reference: String,
    /// Platform-local listing id, or a property name when no id was found.
    pub property_id: String,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    #[serde(default)]
    pub guest_name: String,
    #[serde(default)]
    pub guests: u32,
    /// Hex SHA-256 of the parsed text. Audit only, never compared.
    #[serde(default)]
    pub source_digest: String,
}

impl Booking {
    /// Store key: `platform:reference` with unsafe characters substituted.
    pub fn key(&self) -> String {
        booking_key(&self.platform, &self.reference)
    }

    /// Check the invariants a booking must hold before it may be stored.
    pub fn validate(&self) -> Result<()> {
        if self.reference.trim().is_empty() {
            return Err(TurnoverError::InvalidBooking(format!(
                "{} booking without a reference",
                self.platform
            )));
        }
        if let (Some(check_in), Some(check_out)) = (self.check_in, self.check_out)
            && check_out < check_in
        {
            return Err(TurnoverError::InvalidBooking(format!(
                "{}: check-out {check_out} before check-in {check_in}",
                self.key()
            )));
        }
        Ok(())
    }

    /// Compare the fields that matter for cleaner coordination.
    pub fn materially_differs(&self, other: &Booking) -> bool {
        self.property_id != other.property_id
            || self.check_in != other.check_in
            || self.check_out != other.check_out
            || self.guests != other.guests
            || self.guest_name != other.guest_name
    }
}

/// Build a storage key. Path separators, whitespace and the key delimiter
/// inside a component are replaced with `_`.
pub fn booking_key(platform: &str, reference: &str) -> String {
    fn clean(s: &str) -> String {
        s.trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .collect()
    }
    format!("{}:{}", clean(platform), clean(reference))
}

/// A cleaner reachable for one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanerContact {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    /// Lower rank is asked first. Must be positive.
    pub rank: u32,
}

/// Descriptive property data used in notifications and invites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyMetadata {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub bedrooms: u32,
    #[serde(default)]
    pub bathrooms: u32,
    #[serde(default)]
    pub cleaning_duration_mins: Option<u32>,
    #[serde(default)]
    pub access_instructions: String,
    #[serde(default)]
    pub special_instructions: String,
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub owner_email: Option<String>,
    /// IANA zone name of the property.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".into()
}

impl Default for PropertyMetadata {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            bedrooms: 0,
            bathrooms: 0,
            cleaning_duration_mins: None,
            access_instructions: String::new(),
            special_instructions: String::new(),
            owner_name: String::new(),
            owner_email: None,
            timezone: default_timezone(),
        }
    }
}

/// A configured rental property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    /// Platform name → platform-local listing id.
    #[serde(default)]
    pub platform_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub cleaners: Vec<CleanerContact>,
    #[serde(default)]
    pub metadata: PropertyMetadata,
}

impl Property {
    /// Cleaners in contact order: ascending rank, ties keep list order.
    pub fn ranked_cleaners(&self) -> Vec<CleanerContact> {
        let mut cleaners = self.cleaners.clone();
        cleaners.sort_by_key(|c| c.rank);
        cleaners
    }

    pub fn display_name(&self) -> &str {
        if self.metadata.display_name.is_empty() {
            &self.id
        } else {
            &self.metadata.display_name
        }
    }
}

/// Confirmed cleaner assignment persisted next to the booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub cleaner_name: String,
    pub cleaner_email: String,
    pub cleaner_phone: String,
    pub confirmed_at: DateTime<Utc>,
    pub cleaning_at: DateTime<Utc>,
}

/// Why a cleaner did not take the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Declined,
    TimedOut,
    Unreachable,
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Declined => "declined",
            Self::TimedOut => "no response",
            Self::Unreachable => "could not be contacted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub cleaner_name: String,
    pub cleaner_email: String,
    pub outcome: AttemptOutcome,
}
