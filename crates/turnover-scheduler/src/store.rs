//! Booking store: last-known booking per `(platform, reference)` and the
//! change-detection gate in front of the coordination workflow.
//!
//! ```text
//! parsed Booking ─→ claim()  ── BEGIN IMMEDIATE ──────────────┐
//!                     │   get → materially_differs? → upsert  │
//!                     └── New | Changed | Unchanged ──────────┘
//! ```
//!
//! A lookup miss is the "new booking" signal, never an error. Storage
//! failures always propagate so a broken disk can't pass for "unchanged".

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Arc;
use turnover_core::types::booking_key;
use turnover_core::{Assignment, Booking, Result, TurnoverError};

use crate::persistence::{TurnoverDb, parse_opt_date, parse_opt_ts, parse_ts, storage_err, ts};

/// A persisted booking with its version and optional assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBooking {
    pub booking: Booking,
    /// Bumped on every write that changes stored data.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub assignment: Option<Assignment>,
}

/// Result of an atomic claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// First sighting; stored at version 1.
    New { version: u64 },
    /// A coordination-relevant field changed; the new data is stored.
    Changed { previous: Box<Booking>, version: u64 },
    /// Nothing that matters changed; the store was not touched.
    Unchanged { version: u64 },
}

impl Claim {
    /// New or changed bookings need (re)coordination.
    pub fn needs_coordination(&self) -> bool {
        !matches!(self, Self::Unchanged { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::New { .. } => "new",
            Self::Changed { .. } => "changed",
            Self::Unchanged { .. } => "unchanged",
        }
    }
}

#[derive(Clone)]
pub struct BookingStore {
    db: Arc<TurnoverDb>,
}

impl BookingStore {
    pub fn new(db: Arc<TurnoverDb>) -> Self {
        Self { db }
    }

    /// Last-known booking, or `None` when never seen.
    pub fn get(&self, platform: &str, reference: &str) -> Result<Option<StoredBooking>> {
        let key = booking_key(platform, reference);
        self.db.with_conn(|c| load(c, &key))
    }

    pub fn get_by_key(&self, key: &str) -> Result<Option<StoredBooking>> {
        self.db.with_conn(|c| load(c, key))
    }

    /// Upsert. Saving identical data is a no-op and keeps the version.
    /// Returns the stored version.
    pub fn save(&self, booking: &Booking) -> Result<u64> {
        booking.validate()?;
        self.db.immediate(|tx| {
            let current = load(tx, &booking.key())?;
            match current {
                Some(stored) if stored.booking == *booking => Ok(stored.version),
                Some(stored) => write(tx, booking, stored.version + 1, Some(&stored.booking)),
                None => write(tx, booking, 1, None),
            }
        })
    }

    /// True when no prior record exists or a coordination-relevant field
    /// (property, dates, guest count, guest name) differs.
    pub fn has_changed(&self, candidate: &Booking) -> Result<bool> {
        Ok(match self.get_by_key(&candidate.key())? {
            Some(stored) => stored.booking.materially_differs(candidate),
            None => true,
        })
    }

    /// Get, compare and save in one `BEGIN IMMEDIATE` transaction, so two
    /// concurrent intake runs can't both see the same booking as new.
    pub fn claim(&self, booking: &Booking) -> Result<Claim> {
        booking.validate()?;
        let key = booking.key();
        let claim = self.db.immediate(|tx| match load(tx, &key)? {
            None => Ok(Claim::New {
                version: write(tx, booking, 1, None)?,
            }),
            Some(stored) if stored.booking.materially_differs(booking) => Ok(Claim::Changed {
                version: write(tx, booking, stored.version + 1, Some(&stored.booking))?,
                previous: Box::new(stored.booking),
            }),
            Some(stored) => Ok(Claim::Unchanged {
                version: stored.version,
            }),
        })?;
        tracing::debug!("🔑 Claimed {key}: {}", claim.label());
        Ok(claim)
    }

    /// Compare-and-swap write: succeeds only if the stored version still
    /// equals `expected` (`None` = must not exist yet). Returns the new
    /// version, or `None` when another writer got there first.
    pub fn save_if_version(&self, booking: &Booking, expected: Option<u64>) -> Result<Option<u64>> {
        booking.validate()?;
        self.db.immediate(|tx| {
            let current = load(tx, &booking.key())?;
            if current.as_ref().map(|s| s.version) != expected {
                return Ok(None);
            }
            let previous = current.map(|s| s.booking);
            write(tx, booking, expected.unwrap_or(0) + 1, previous.as_ref()).map(Some)
        })
    }

    /// Attach the confirmed cleaner to the stored booking.
    pub fn record_assignment(&self, key: &str, assignment: &Assignment) -> Result<()> {
        self.db.with_conn(|c| write_assignment(c, key, assignment))
    }

    /// Number of stored bookings.
    pub fn count(&self) -> Result<usize> {
        self.db.with_conn(|c| {
            c.query_row("SELECT COUNT(*) FROM bookings", [], |r| r.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(storage_err("Count bookings"))
        })
    }
}

// ─── Row mapping ──────────────────────────────────────────────

struct BookingRow {
    platform: String,
    reference: String,
    property_id: String,
    check_in: Option<String>,
    check_out: Option<String>,
    guest_name: String,
    guests: u32,
    source_digest: String,
    version: i64,
    updated_at: String,
    cleaner_name: Option<String>,
    cleaner_email: Option<String>,
    cleaner_phone: Option<String>,
    confirmed_at: Option<String>,
    cleaning_at: Option<String>,
}

impl BookingRow {
    fn into_stored(self) -> Result<StoredBooking> {
        let assignment = match (self.cleaner_name, parse_opt_ts(self.confirmed_at)?) {
            (Some(cleaner_name), Some(confirmed_at)) => Some(Assignment {
                cleaner_name,
                cleaner_email: self.cleaner_email.unwrap_or_default(),
                cleaner_phone: self.cleaner_phone.unwrap_or_default(),
                confirmed_at,
                cleaning_at: parse_opt_ts(self.cleaning_at)?.unwrap_or(confirmed_at),
            }),
            _ => None,
        };
        Ok(StoredBooking {
            booking: Booking {
                platform: self.platform,
                reference: self.reference,
                property_id: self.property_id,
                check_in: parse_opt_date(self.check_in)?,
                check_out: parse_opt_date(self.check_out)?,
                guest_name: self.guest_name,
                guests: self.guests,
                source_digest: self.source_digest,
            },
            version: self.version as u64,
            updated_at: parse_ts(&self.updated_at)?,
            assignment,
        })
    }
}

fn load(conn: &Connection, key: &str) -> Result<Option<StoredBooking>> {
    let row = conn
        .query_row(
            "SELECT platform, reference, property_id, check_in, check_out, guest_name, guests,
                    source_digest, version, updated_at, cleaner_name, cleaner_email,
                    cleaner_phone, confirmed_at, cleaning_at
             FROM bookings WHERE key=?1",
            params![key],
            |row| {
                Ok(BookingRow {
                    platform: row.get(0)?,
                    reference: row.get(1)?,
                    property_id: row.get(2)?,
                    check_in: row.get(3)?,
                    check_out: row.get(4)?,
                    guest_name: row.get(5)?,
                    guests: row.get(6)?,
                    source_digest: row.get(7)?,
                    version: row.get(8)?,
                    updated_at: row.get(9)?,
                    cleaner_name: row.get(10)?,
                    cleaner_email: row.get(11)?,
                    cleaner_phone: row.get(12)?,
                    confirmed_at: row.get(13)?,
                    cleaning_at: row.get(14)?,
                })
            },
        )
        .optional()
        .map_err(storage_err("Load booking"))?;
    row.map(BookingRow::into_stored).transpose()
}

/// Upsert booking fields at `version`. Assignment columns survive a write
/// that only touches non-material fields and are cleared by one that moves
/// the booking, since the old cleaner was confirmed for the old data.
fn write(conn: &Connection, booking: &Booking, version: u64, previous: Option<&Booking>) -> Result<u64> {
    let reassign = previous.is_some_and(|p| p.materially_differs(booking));
    conn.execute(
        "INSERT INTO bookings (key, platform, reference, property_id, check_in, check_out,
                               guest_name, guests, source_digest, version, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(key) DO UPDATE SET
             property_id=excluded.property_id, check_in=excluded.check_in,
             check_out=excluded.check_out, guest_name=excluded.guest_name,
             guests=excluded.guests, source_digest=excluded.source_digest,
             version=excluded.version, updated_at=excluded.updated_at,
             cleaner_name=CASE WHEN ?12 THEN NULL ELSE cleaner_name END,
             cleaner_email=CASE WHEN ?12 THEN NULL ELSE cleaner_email END,
             cleaner_phone=CASE WHEN ?12 THEN NULL ELSE cleaner_phone END,
             confirmed_at=CASE WHEN ?12 THEN NULL ELSE confirmed_at END,
             cleaning_at=CASE WHEN ?12 THEN NULL ELSE cleaning_at END",
        params![
            booking.key(),
            booking.platform,
            booking.reference,
            booking.property_id,
            booking.check_in.map(|d| d.to_string()),
            booking.check_out.map(|d| d.to_string()),
            booking.guest_name,
            booking.guests,
            booking.source_digest,
            version as i64,
            ts(Utc::now()),
            reassign,
        ],
    )
    .map_err(storage_err("Save booking"))?;
    if reassign {
        tracing::debug!("🧽 Cleared assignment on {}", booking.key());
    }
    Ok(version)
}

pub(crate) fn write_assignment(conn: &Connection, key: &str, assignment: &Assignment) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE bookings SET cleaner_name=?2, cleaner_email=?3, cleaner_phone=?4,
                    confirmed_at=?5, cleaning_at=?6, version=version+1, updated_at=?7
             WHERE key=?1",
            params![
                key,
                assignment.cleaner_name,
                assignment.cleaner_email,
                assignment.cleaner_phone,
                ts(assignment.confirmed_at),
                ts(assignment.cleaning_at),
                ts(Utc::now()),
            ],
        )
        .map_err(storage_err("Record assignment"))?;
    if updated == 0 {
        return Err(TurnoverError::Storage(format!(
            "Cannot record assignment: booking {key} not stored"
        )));
    }
    tracing::info!("📌 Assigned {} to {key}", assignment.cleaner_name);
    Ok(())
}

/// Record the assignment for the booking a run was confirmed on, storing the
/// booking first if intake never did. Returns `false` when the stored booking
/// has since moved on, leaving the newer data unassigned.
pub(crate) fn assign_confirmed(conn: &Connection, booking: &Booking, assignment: &Assignment) -> Result<bool> {
    let key = booking.key();
    match load(conn, &key)? {
        None => {
            write(conn, booking, 1, None)?;
        }
        Some(stored) if stored.booking.materially_differs(booking) => return Ok(false),
        Some(_) => {}
    }
    write_assignment(conn, &key, assignment)?;
    Ok(true)
}
