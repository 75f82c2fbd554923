//! Workflow execution records and resumption tokens: the persisted side of
//! the coordination state machine.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use turnover_core::{
    AttemptOutcome, AttemptRecord, Booking, CleanerContact, Property, Result, TurnoverError,
};

use crate::persistence::{parse_opt_ts, parse_ts, storage_err, ts};

/// Coordination status.
///
/// ```text
/// Pending → AwaitingResponse → Escalated* → Confirmed | Exhausted
///                 └──────────────────────→ Superseded (booking changed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    /// Waiting on the first-ranked reachable cleaner.
    AwaitingResponse,
    /// Waiting on a cleaner after at least one advance.
    Escalated,
    Confirmed,
    Exhausted,
    Superseded,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingResponse => "awaiting_response",
            Self::Escalated => "escalated",
            Self::Confirmed => "confirmed",
            Self::Exhausted => "exhausted",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "awaiting_response" => Self::AwaitingResponse,
            "escalated" => Self::Escalated,
            "confirmed" => Self::Confirmed,
            "exhausted" => Self::Exhausted,
            "superseded" => Self::Superseded,
            _ => return None,
        })
    }

    /// Terminal executions are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Exhausted | Self::Superseded)
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingResponse | Self::Escalated)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One coordination run for one booking occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub booking_key: String,
    pub booking: Booking,
    /// Property snapshot taken when the run started.
    pub property: Property,
    pub cleaning_at: DateTime<Utc>,
    /// Index into the rank-sorted cleaner list. Only increases.
    pub cursor: u32,
    pub attempt_count: u32,
    pub status: ExecutionStatus,
    pub attempts: Vec<AttemptRecord>,
    /// When the active cleaner's wait expires.
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn new(booking: &Booking, property: &Property, cleaning_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            booking_key: booking.key(),
            booking: booking.clone(),
            property: property.clone(),
            cleaning_at,
            cursor: 0,
            attempt_count: 0,
            status: ExecutionStatus::Pending,
            attempts: Vec::new(),
            deadline: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The cleaner at the cursor, if any remain.
    pub fn active_cleaner(&self) -> Option<CleanerContact> {
        self.property
            .ranked_cleaners()
            .into_iter()
            .nth(self.cursor as usize)
    }

    /// Close the active cleaner's turn and move the cursor on.
    pub fn record_attempt(&mut self, cleaner: &CleanerContact, outcome: AttemptOutcome) {
        self.attempts.push(AttemptRecord {
            cleaner_name: cleaner.name.clone(),
            cleaner_email: cleaner.email.clone(),
            outcome,
        });
        self.cursor += 1;
        self.attempt_count += 1;
    }
}

/// A cleaner's answer on an action link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanerResponse {
    Yes,
    No,
}

impl FromStr for CleanerResponse {
    type Err = TurnoverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "yes" | "y" | "accept" => Ok(Self::Yes),
            "no" | "n" | "decline" => Ok(Self::No),
            other => Err(TurnoverError::InvalidResponse(format!(
                "expected 'yes' or 'no', got '{other}'"
            ))),
        }
    }
}

/// What a callback or timeout did to its execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Confirmed,
    /// Moved on to the next cleaner.
    Advanced,
    Exhausted,
    /// Token already consumed, superseded or stale. Nothing changed.
    AlreadyHandled,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Advanced => "advanced",
            Self::Exhausted => "exhausted",
            Self::AlreadyHandled => "already_handled",
        }
    }
}

/// Single-use resumption token bound to `(execution, cursor)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub execution_id: String,
    pub cursor: u32,
    pub cleaner_email: String,
    pub issued_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
}

// ─── Executions ───────────────────────────────────────────────

const EXECUTION_COLUMNS: &str = "id, booking_key, booking, property, cleaning_at, cursor, \
    attempt_count, status, attempts, deadline, created_at, updated_at";

struct ExecutionRow {
    id: String,
    booking_key: String,
    booking: String,
    property: String,
    cleaning_at: String,
    cursor: u32,
    attempt_count: u32,
    status: String,
    attempts: String,
    deadline: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ExecutionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            booking_key: row.get(1)?,
            booking: row.get(2)?,
            property: row.get(3)?,
            cleaning_at: row.get(4)?,
            cursor: row.get(5)?,
            attempt_count: row.get(6)?,
            status: row.get(7)?,
            attempts: row.get(8)?,
            deadline: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution> {
        let status = ExecutionStatus::parse(&self.status).ok_or_else(|| {
            TurnoverError::Storage(format!("Unknown status '{}' on {}", self.status, self.id))
        })?;
        Ok(WorkflowExecution {
            booking: serde_json::from_str(&self.booking)?,
            property: serde_json::from_str(&self.property)?,
            attempts: serde_json::from_str(&self.attempts)?,
            cleaning_at: parse_ts(&self.cleaning_at)?,
            deadline: parse_opt_ts(self.deadline)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
            booking_key: self.booking_key,
            cursor: self.cursor,
            attempt_count: self.attempt_count,
            status,
        })
    }
}

fn query_executions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<WorkflowExecution>> {
    let mut stmt = conn.prepare(sql).map_err(storage_err("Prepare"))?;
    let rows = stmt
        .query_map(params, ExecutionRow::from_row)
        .map_err(storage_err("Query executions"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(storage_err("Read execution"))?;
    rows.into_iter().map(ExecutionRow::into_execution).collect()
}

pub fn insert_execution(conn: &Connection, exec: &WorkflowExecution) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO workflow_executions ({EXECUTION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            exec.id,
            exec.booking_key,
            serde_json::to_string(&exec.booking)?,
            serde_json::to_string(&exec.property)?,
            ts(exec.cleaning_at),
            exec.cursor,
            exec.attempt_count,
            exec.status.as_str(),
            serde_json::to_string(&exec.attempts)?,
            exec.deadline.map(ts),
            ts(exec.created_at),
            ts(exec.updated_at),
        ],
    )
    .map_err(storage_err("Insert execution"))?;
    Ok(())
}

/// Persist the mutable part of an execution. Refused (returns `false`) once
/// the stored row is terminal or its cursor is already further along.
pub fn update_execution(conn: &Connection, exec: &WorkflowExecution) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE workflow_executions
             SET cursor=?2, attempt_count=?3, status=?4, attempts=?5, deadline=?6, updated_at=?7
             WHERE id=?1 AND cursor <= ?2
               AND status NOT IN ('confirmed', 'exhausted', 'superseded')",
            params![
                exec.id,
                exec.cursor,
                exec.attempt_count,
                exec.status.as_str(),
                serde_json::to_string(&exec.attempts)?,
                exec.deadline.map(ts),
                ts(Utc::now()),
            ],
        )
        .map_err(storage_err("Update execution"))?;
    Ok(changed == 1)
}

pub fn mark_superseded(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE workflow_executions SET status='superseded', deadline=NULL, updated_at=?2
             WHERE id=?1 AND status IN ('pending', 'awaiting_response', 'escalated')",
            params![id, ts(Utc::now())],
        )
        .map_err(storage_err("Supersede execution"))?;
    Ok(changed == 1)
}

pub fn load_execution(conn: &Connection, id: &str) -> Result<Option<WorkflowExecution>> {
    let sql = format!("SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id=?1");
    Ok(query_executions(conn, &sql, params![id])?.into_iter().next())
}

/// The open (non-terminal) execution for a booking, if any.
pub fn open_execution_for(conn: &Connection, booking_key: &str) -> Result<Option<WorkflowExecution>> {
    let sql = format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions
         WHERE booking_key=?1 AND status IN ('pending', 'awaiting_response', 'escalated')"
    );
    Ok(query_executions(conn, &sql, params![booking_key])?
        .into_iter()
        .next())
}

/// Every execution ever started for a booking, newest first.
pub fn executions_for(conn: &Connection, booking_key: &str) -> Result<Vec<WorkflowExecution>> {
    let sql = format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions
         WHERE booking_key=?1 ORDER BY created_at DESC"
    );
    query_executions(conn, &sql, params![booking_key])
}

pub fn open_executions(conn: &Connection) -> Result<Vec<WorkflowExecution>> {
    let sql = format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions
         WHERE status IN ('pending', 'awaiting_response', 'escalated') ORDER BY cleaning_at"
    );
    query_executions(conn, &sql, [])
}

/// Open executions whose deadline is at or before `now`. For a pending row
/// the deadline is the dispatch grace, so a run whose first send never
/// happened comes back here too.
pub fn overdue_executions(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<WorkflowExecution>> {
    let sql = format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions
         WHERE status IN ('pending', 'awaiting_response', 'escalated')
           AND deadline IS NOT NULL AND deadline <= ?1
         ORDER BY deadline"
    );
    query_executions(conn, &sql, params![ts(now)])
}

// ─── Tokens ───────────────────────────────────────────────────

pub fn insert_token(conn: &Connection, token: &TokenRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO workflow_tokens (token, execution_id, cursor, cleaner_email, issued_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            token.token,
            token.execution_id,
            token.cursor,
            token.cleaner_email,
            ts(token.issued_at),
        ],
    )
    .map_err(storage_err("Insert token"))?;
    Ok(())
}

fn token_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(TokenRecord, String, Option<String>)> {
    Ok((
        TokenRecord {
            token: row.get(0)?,
            execution_id: row.get(1)?,
            cursor: row.get(2)?,
            cleaner_email: row.get(3)?,
            issued_at: Utc::now(),
            consumed_at: None,
            outcome: row.get(6)?,
        },
        row.get(4)?,
        row.get(5)?,
    ))
}

fn finish_token(
    raw: Option<(TokenRecord, String, Option<String>)>,
) -> Result<Option<TokenRecord>> {
    raw.map(|(mut token, issued_at, consumed_at)| -> Result<TokenRecord> {
        token.issued_at = parse_ts(&issued_at)?;
        token.consumed_at = parse_opt_ts(consumed_at)?;
        Ok(token)
    })
    .transpose()
}

pub fn load_token(conn: &Connection, token: &str) -> Result<Option<TokenRecord>> {
    let raw = conn
        .query_row(
            "SELECT token, execution_id, cursor, cleaner_email, issued_at, consumed_at, outcome
             FROM workflow_tokens WHERE token=?1",
            params![token],
            token_from_row,
        )
        .optional()
        .map_err(storage_err("Load token"))?;
    finish_token(raw)
}

/// The unconsumed token for an execution's current cursor.
pub fn active_token(conn: &Connection, execution_id: &str, cursor: u32) -> Result<Option<TokenRecord>> {
    let raw = conn
        .query_row(
            "SELECT token, execution_id, cursor, cleaner_email, issued_at, consumed_at, outcome
             FROM workflow_tokens
             WHERE execution_id=?1 AND cursor=?2 AND consumed_at IS NULL
             ORDER BY issued_at DESC LIMIT 1",
            params![execution_id, cursor],
            token_from_row,
        )
        .optional()
        .map_err(storage_err("Load active token"))?;
    finish_token(raw)
}

/// The most recent token issued at a cursor, consumed or not.
pub fn latest_token(conn: &Connection, execution_id: &str, cursor: u32) -> Result<Option<TokenRecord>> {
    let raw = conn
        .query_row(
            "SELECT token, execution_id, cursor, cleaner_email, issued_at, consumed_at, outcome
             FROM workflow_tokens
             WHERE execution_id=?1 AND cursor=?2
             ORDER BY issued_at DESC LIMIT 1",
            params![execution_id, cursor],
            token_from_row,
        )
        .optional()
        .map_err(storage_err("Load latest token"))?;
    finish_token(raw)
}

/// Consume a token exactly once. `false` means someone else already did.
pub fn consume_token(conn: &Connection, token: &str, outcome: &str) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE workflow_tokens SET consumed_at=?2, outcome=?3
             WHERE token=?1 AND consumed_at IS NULL",
            params![token, ts(Utc::now()), outcome],
        )
        .map_err(storage_err("Consume token"))?;
    Ok(changed == 1)
}

/// Consume every outstanding token of an execution.
pub fn revoke_tokens(conn: &Connection, execution_id: &str, outcome: &str) -> Result<usize> {
    conn.execute(
        "UPDATE workflow_tokens SET consumed_at=?2, outcome=?3
         WHERE execution_id=?1 AND consumed_at IS NULL",
        params![execution_id, ts(Utc::now()), outcome],
    )
    .map_err(storage_err("Revoke tokens"))
}
