//! SQLite-backed persistence for bookings, workflow executions and tokens.
//! Survives restarts: every suspended workflow lives here, never in memory.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use turnover_core::{Result, TurnoverError};

/// Turnover database handle, shared by the store and the workflow.
pub struct TurnoverDb {
    conn: Mutex<Connection>,
}

impl TurnoverDb {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err("DB open"))?;
        // WAL lets a second process (CLI sweep) read while the server writes
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(storage_err("busy timeout"))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        tracing::debug!("🗄️ Opened database {}", path.display());
        Ok(db)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err("DB open"))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Last-known booking per (platform, reference)
            CREATE TABLE IF NOT EXISTS bookings (
                key TEXT PRIMARY KEY,             -- sanitized 'platform:reference'
                platform TEXT NOT NULL,
                reference TEXT NOT NULL,
                property_id TEXT NOT NULL,
                check_in TEXT,                    -- YYYY-MM-DD
                check_out TEXT,
                guest_name TEXT NOT NULL DEFAULT '',
                guests INTEGER NOT NULL DEFAULT 0,
                source_digest TEXT NOT NULL DEFAULT '',
                version INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL,
                cleaner_name TEXT,                -- assignment, once confirmed
                cleaner_email TEXT,
                cleaner_phone TEXT,
                confirmed_at TEXT,
                cleaning_at TEXT
            );

            -- Coordination state machine, one row per triggered booking occurrence
            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                booking_key TEXT NOT NULL,
                booking TEXT NOT NULL,            -- JSON snapshot
                property TEXT NOT NULL,           -- JSON snapshot
                cleaning_at TEXT NOT NULL,
                cursor INTEGER NOT NULL DEFAULT 0,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                attempts TEXT NOT NULL DEFAULT '[]',
                deadline TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_key
                ON workflow_executions(booking_key);
            -- At most one open execution per booking
            CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_open
                ON workflow_executions(booking_key)
                WHERE status IN ('pending', 'awaiting_response', 'escalated');

            -- Single-use resumption tokens
            CREATE TABLE IF NOT EXISTS workflow_tokens (
                token TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL REFERENCES workflow_executions(id),
                cursor INTEGER NOT NULL,
                cleaner_email TEXT NOT NULL,
                issued_at TEXT NOT NULL,
                consumed_at TEXT,
                outcome TEXT                      -- accepted, declined, timed_out, unreachable, revoked
            );
            CREATE INDEX IF NOT EXISTS idx_tokens_execution
                ON workflow_tokens(execution_id);
            ",
        )
        .map_err(storage_err("Migration"))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TurnoverError::Storage(format!("Lock: {e}")))
    }

    /// Run `f` against the connection. The lock is released before returning,
    /// so callers never hold it across an `.await`.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction: the write lock is taken
    /// up front, so a read-compare-write inside `f` is linearizable across
    /// processes. Any error rolls back.
    pub fn immediate<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err("Begin"))?;
        let value = f(&tx)?;
        tx.commit().map_err(storage_err("Commit"))?;
        Ok(value)
    }
}

/// Map a rusqlite error into a storage error with context.
pub(crate) fn storage_err(context: &'static str) -> impl Fn(rusqlite::Error) -> TurnoverError {
    move |e| TurnoverError::Storage(format!("{context}: {e}"))
}

/// Fixed-width UTC timestamp, so text comparison in SQL is chronological.
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TurnoverError::Storage(format!("Bad timestamp '{s}': {e}")))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

pub(crate) fn parse_opt_date(s: Option<String>) -> Result<Option<NaiveDate>> {
    s.as_deref()
        .map(|d| {
            NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|e| TurnoverError::Storage(format!("Bad date '{d}': {e}")))
        })
        .transpose()
}
