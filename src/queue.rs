//! Durable offline check-in queue.
//!
//! Check-ins taken while disconnected land here and survive process
//! restarts. Rows are keyed by a generated uuid; the sync engine is the
//! only mutator besides `enqueue`, and every mutation goes through this
//! module so the pending count can never drift from the stored rows
//! (`count` is always a COUNT over pending/syncing, never a separate
//! counter).

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::EngineError;

/// Default retry budget for a queued check-in.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Syncing,
    Failed,
    Synced,
}

impl QueueItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Syncing => "syncing",
            QueueItemStatus::Failed => "failed",
            QueueItemStatus::Synced => "synced",
        }
    }

    fn parse(s: &str) -> QueueItemStatus {
        match s {
            "syncing" => QueueItemStatus::Syncing,
            "failed" => QueueItemStatus::Failed,
            "synced" => QueueItemStatus::Synced,
            _ => QueueItemStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub qr_code_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Enqueue time in unix milliseconds.
    pub timestamp: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: QueueItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<String>,
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        id: row.get(0)?,
        qr_code_hash: row.get(1)?,
        event_id: row.get(2)?,
        timestamp: row.get(3)?,
        retry_count: row.get::<_, i64>(4)? as u32,
        max_retries: row.get::<_, i64>(5)? as u32,
        status: QueueItemStatus::parse(&row.get::<_, String>(6)?),
        last_error: row.get(7)?,
        next_retry_at: row.get(8)?,
    })
}

const ITEM_COLUMNS: &str = "id, qr_code_hash, event_id, timestamp, retry_count, max_retries,
     status, last_error, next_retry_at";

/// Queue a check-in for later synchronization.
pub fn enqueue(
    db: &DbState,
    qr_code_hash: &str,
    event_id: Option<&str>,
) -> Result<QueueItem, EngineError> {
    let item = QueueItem {
        id: Uuid::new_v4().to_string(),
        qr_code_hash: qr_code_hash.to_string(),
        event_id: event_id.map(str::to_string),
        timestamp: Utc::now().timestamp_millis(),
        retry_count: 0,
        max_retries: DEFAULT_MAX_RETRIES,
        status: QueueItemStatus::Pending,
        last_error: None,
        next_retry_at: None,
    };

    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    conn.execute(
        "INSERT INTO checkin_queue (id, qr_code_hash, event_id, timestamp, retry_count, max_retries, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
        params![
            item.id,
            item.qr_code_hash,
            item.event_id,
            item.timestamp,
            item.retry_count,
            item.max_retries,
        ],
    )
    .map_err(|e| EngineError::storage(format!("enqueue check-in: {e}")))?;

    info!(item_id = %item.id, qr_code_hash, "Check-in queued for sync");
    Ok(item)
}

/// Delete an item from the queue. Missing ids are a no-op so that a stale
/// drain resolving after a manual clear cannot fail.
pub fn remove(db: &DbState, id: &str) -> Result<bool, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let deleted = conn
        .execute("DELETE FROM checkin_queue WHERE id = ?1", [id])
        .map_err(|e| EngineError::storage(format!("delete queue item: {e}")))?;
    if deleted > 0 {
        debug!(item_id = %id, "Queue item removed");
    }
    Ok(deleted > 0)
}

/// Fetch a single item, if it still exists.
pub fn get(db: &DbState, id: &str) -> Result<Option<QueueItem>, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM checkin_queue WHERE id = ?1"),
        [id],
        item_from_row,
    )
    .optional()
    .map_err(|e| EngineError::storage(format!("get queue item: {e}")))
}

/// All items in enqueue order, any status.
pub fn list(db: &DbState) -> Result<Vec<QueueItem>, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM checkin_queue ORDER BY timestamp ASC, id ASC"
        ))
        .map_err(|e| EngineError::storage(format!("prepare queue list: {e}")))?;
    let items = stmt
        .query_map([], item_from_row)
        .map_err(|e| EngineError::storage(format!("query queue list: {e}")))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(items)
}

/// Number of items still awaiting sync (pending or syncing).
pub fn count(db: &DbState) -> Result<u64, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM checkin_queue WHERE status IN ('pending', 'syncing')",
            [],
            |row| row.get(0),
        )
        .map_err(|e| EngineError::storage(format!("count queue items: {e}")))?;
    Ok(n as u64)
}

/// Items that used up their retries or were rejected by the authority.
pub fn failed_items(db: &DbState) -> Result<Vec<QueueItem>, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM checkin_queue
             WHERE status = 'failed'
             ORDER BY timestamp ASC, id ASC"
        ))
        .map_err(|e| EngineError::storage(format!("prepare failed list: {e}")))?;
    let items = stmt
        .query_map([], item_from_row)
        .map_err(|e| EngineError::storage(format!("query failed list: {e}")))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(items)
}

/// Put failed items back into rotation with a fresh retry budget.
/// Returns the number of items reset.
pub fn retry_failed(db: &DbState) -> Result<usize, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let reset = conn
        .execute(
            "UPDATE checkin_queue
             SET status = 'pending',
                 retry_count = 0,
                 last_error = NULL,
                 next_retry_at = NULL,
                 updated_at = datetime('now')
             WHERE status = 'failed'",
            [],
        )
        .map_err(|e| EngineError::storage(format!("retry failed items: {e}")))?;
    if reset > 0 {
        info!(reset, "Failed queue items reset to pending");
    }
    Ok(reset)
}

/// Drop everything, any status. Returns the number of rows removed.
pub fn clear(db: &DbState) -> Result<usize, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let removed = conn
        .execute("DELETE FROM checkin_queue", [])
        .map_err(|e| EngineError::storage(format!("clear queue: {e}")))?;
    if removed > 0 {
        info!(removed, "Offline queue cleared");
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Sync-engine mutations
// ---------------------------------------------------------------------------

/// Mark an item as in-flight. Returns false when the row no longer exists
/// or is not pending (another drain got there first).
pub fn mark_syncing(db: &DbState, id: &str) -> Result<bool, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let updated = conn
        .execute(
            "UPDATE checkin_queue
             SET status = 'syncing', updated_at = datetime('now')
             WHERE id = ?1 AND status = 'pending'",
            [id],
        )
        .map_err(|e| EngineError::storage(format!("mark syncing: {e}")))?;
    Ok(updated > 0)
}

/// Record a transient failure: bump the retry count and schedule the next
/// attempt. The item goes back to pending.
pub fn schedule_retry(
    db: &DbState,
    id: &str,
    retry_count: u32,
    next_retry_at: &str,
    error: &str,
) -> Result<bool, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let updated = conn
        .execute(
            "UPDATE checkin_queue
             SET status = 'pending',
                 retry_count = ?2,
                 next_retry_at = ?3,
                 last_error = ?4,
                 updated_at = datetime('now')
             WHERE id = ?1",
            params![id, retry_count, next_retry_at, error],
        )
        .map_err(|e| EngineError::storage(format!("schedule retry: {e}")))?;
    Ok(updated > 0)
}

/// Hand a claimed item back without burning a retry. Used by a drain that
/// discovers it has been superseded while its remote call was in flight.
pub fn release_syncing(db: &DbState, id: &str) -> Result<bool, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let updated = conn
        .execute(
            "UPDATE checkin_queue
             SET status = 'pending', updated_at = datetime('now')
             WHERE id = ?1 AND status = 'syncing'",
            [id],
        )
        .map_err(|e| EngineError::storage(format!("release syncing: {e}")))?;
    Ok(updated > 0)
}

/// Park an item as failed (business rejection or exhausted retries). The
/// row is kept so the failure stays visible and manually retryable.
pub fn mark_failed(db: &DbState, id: &str, error: &str) -> Result<bool, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let updated = conn
        .execute(
            "UPDATE checkin_queue
             SET status = 'failed',
                 next_retry_at = NULL,
                 last_error = ?2,
                 updated_at = datetime('now')
             WHERE id = ?1",
            params![id, error],
        )
        .map_err(|e| EngineError::storage(format!("mark failed: {e}")))?;
    Ok(updated > 0)
}

/// Pending items whose backoff window has elapsed, in enqueue order.
pub fn due_pending(db: &DbState, now_rfc3339: &str) -> Result<Vec<QueueItem>, EngineError> {
    let conn = db.conn.lock().map_err(|e| EngineError::storage(e.to_string()))?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM checkin_queue
             WHERE status = 'pending'
               AND (
                    next_retry_at IS NULL
                    OR julianday(next_retry_at) <= julianday(?1)
               )
             ORDER BY timestamp ASC, id ASC"
        ))
        .map_err(|e| EngineError::storage(format!("prepare due items: {e}")))?;
    let items = stmt
        .query_map([now_rfc3339], item_from_row)
        .map_err(|e| EngineError::storage(format!("query due items: {e}")))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(items)
}
