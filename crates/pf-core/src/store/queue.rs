use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{QueueItem, QueueStatus};

use super::{enum_from_sql, enum_to_sql, map_constraint, opt_ts_from_sql, ts_from_sql, ts_to_sql, Store};

/// Queue counts grouped by status and platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub by_status: HashMap<String, u64>,
    pub by_platform: HashMap<String, u64>,
    pub total: u64,
}

impl Store {
    pub async fn insert_queue_item(&self, item: &QueueItem) -> Result<(), StoreError> {
        let p = queue_item_params(item);
        self.conn()
            .call(move |conn| {
                conn.execute(
                    INSERT_QUEUE_ITEM_SQL,
                    rusqlite::params![
                        p.0, p.1, p.2, p.3, p.4, p.5, p.6, p.7, p.8, p.9, p.10, p.11, p.12, p.13,
                        p.14, p.15, p.16,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| map_constraint(e, "open queue item already exists for variant+platform"))
    }

    pub async fn get_queue_item(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        let id_str = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM queue_items WHERE id = ?1",
                    QUEUE_COLS
                ))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_queue_item(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    // -----------------------------------------------------------------------
    // Leasing protocol
    // -----------------------------------------------------------------------

    /// Claim up to `limit` due items for this worker.
    ///
    /// One write transaction selects due `queued` rows ordered by
    /// `(priority DESC, scheduled_for ASC, id ASC)` and flips them to
    /// `leased` with a fresh `lease_expires_at`. SQLite's single-writer
    /// guarantee makes the claim exclusive across workers.
    pub async fn lease_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let now_str = ts_to_sql(&now);
        let expires_str = ts_to_sql(&(now + lease_ttl));
        self.conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM queue_items
                         WHERE status = 'queued' AND scheduled_for <= ?1
                         ORDER BY priority DESC, scheduled_for ASC, id ASC
                         LIMIT ?2",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![now_str, limit as i64])?;
                    let mut ids = Vec::new();
                    while let Some(row) = rows.next()? {
                        ids.push(row.get::<_, String>(0)?);
                    }
                    ids
                };

                let mut leased = Vec::with_capacity(ids.len());
                for id in &ids {
                    tx.execute(
                        "UPDATE queue_items
                         SET status = 'leased', lease_expires_at = ?1, updated_at = ?2
                         WHERE id = ?3 AND status = 'queued'",
                        rusqlite::params![expires_str, now_str, id],
                    )?;
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {} FROM queue_items WHERE id = ?1",
                        QUEUE_COLS
                    ))?;
                    let mut rows = stmt.query(rusqlite::params![id])?;
                    if let Some(row) = rows.next()? {
                        leased.push(row_to_queue_item(row)?);
                    }
                }
                tx.commit()?;
                Ok(leased)
            })
            .await
            .map_err(StoreError::from)
    }

    /// CAS `leased -> publishing`. Fails with `Conflict` when the item was
    /// cancelled or reaped in the meantime.
    pub async fn begin_publish(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.cas_status(id, "leased", "publishing", now).await
    }

    /// CAS `publishing -> published`, recording the publish outcome. The
    /// partial unique index on published variants enforces at-most-once.
    pub async fn mark_published(
        &self,
        id: Uuid,
        published_at: DateTime<Utc>,
        platform_post_id: String,
        platform_url: Option<String>,
        attempt_count: u32,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let published_str = ts_to_sql(&published_at);
        let now_str = ts_to_sql(&now);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE queue_items
                     SET status = 'published', published_at = ?1, platform_post_id = ?2,
                         platform_url = ?3, attempt_count = ?4, lease_expires_at = NULL,
                         updated_at = ?5
                     WHERE id = ?6 AND status = 'publishing'",
                    rusqlite::params![
                        published_str, platform_post_id, platform_url, attempt_count, now_str,
                        id_str
                    ],
                )?;
                Ok(n)
            })
            .await
            .map_err(|e| map_constraint(e, "variant already published"))?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("queue item {} not publishing", id)));
        }
        Ok(())
    }

    /// CAS `publishing -> retry` with the backoff-derived next attempt time.
    pub async fn mark_retry(
        &self,
        id: Uuid,
        attempt_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let next_str = ts_to_sql(&next_attempt_at);
        let now_str = ts_to_sql(&now);
        let error = error.to_string();
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE queue_items
                     SET status = 'retry', attempt_count = ?1, scheduled_for = ?2,
                         last_error = ?3, lease_expires_at = NULL, updated_at = ?4
                     WHERE id = ?5 AND status = 'publishing'",
                    rusqlite::params![attempt_count, next_str, error, now_str, id_str],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("queue item {} not publishing", id)));
        }
        Ok(())
    }

    /// CAS `publishing -> failed` (terminal).
    pub async fn mark_failed(
        &self,
        id: Uuid,
        attempt_count: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let now_str = ts_to_sql(&now);
        let error = error.to_string();
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE queue_items
                     SET status = 'failed', attempt_count = ?1, last_error = ?2,
                         lease_expires_at = NULL, updated_at = ?3
                     WHERE id = ?4 AND status = 'publishing'",
                    rusqlite::params![attempt_count, error, now_str, id_str],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("queue item {} not publishing", id)));
        }
        Ok(())
    }

    /// Give a lease back without an attempt: the item returns to `queued`
    /// with its next consideration at `next_at`. Used when the worker parks
    /// an item (rate limit, disabled adapter) before any publish attempt.
    pub async fn unlease(
        &self,
        id: Uuid,
        next_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let next_str = ts_to_sql(&next_at);
        let now_str = ts_to_sql(&now);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE queue_items
                     SET status = 'queued', lease_expires_at = NULL,
                         scheduled_for = MAX(scheduled_for, ?1), updated_at = ?2
                     WHERE id = ?3 AND status = 'leased'",
                    rusqlite::params![next_str, now_str, id_str],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("queue item {} not leased", id)));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Public queue operations
    // -----------------------------------------------------------------------

    /// Cooperative cancel: flips `queued`/`retry` to `cancelled`. Leased and
    /// publishing items finish their in-flight attempt; terminal items are
    /// untouched. Returns whether a row changed.
    pub async fn cancel_queue_item(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let id_str = id.to_string();
        let now_str = ts_to_sql(&now);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE queue_items SET status = 'cancelled', updated_at = ?1
                     WHERE id = ?2 AND status IN ('queued', 'retry')",
                    rusqlite::params![now_str, id_str],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    /// Reschedule a `queued` item. `scheduled_for` only moves forward.
    pub async fn reschedule_queue_item(
        &self,
        id: Uuid,
        new_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let id_str = id.to_string();
        let new_str = ts_to_sql(&new_time);
        let now_str = ts_to_sql(&now);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE queue_items SET scheduled_for = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'queued' AND scheduled_for <= ?1",
                    rusqlite::params![new_str, now_str, id_str],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    /// Operator retry of a `failed` item: back to `queued` with the attempt
    /// counter reset.
    pub async fn retry_queue_item(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let id_str = id.to_string();
        let now_str = ts_to_sql(&now);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE queue_items
                     SET status = 'queued', attempt_count = 0, last_error = NULL,
                         scheduled_for = ?1, updated_at = ?1
                     WHERE id = ?2 AND status = 'failed'",
                    rusqlite::params![now_str, id_str],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Sweeps
    // -----------------------------------------------------------------------

    /// Restore expired leases to `queued`. The lease timed out, not the
    /// work, so the attempt counter is left alone.
    pub async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let now_str = ts_to_sql(&now);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE queue_items
                     SET status = 'queued', lease_expires_at = NULL, updated_at = ?1
                     WHERE status = 'leased' AND lease_expires_at < ?1",
                    rusqlite::params![now_str],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed as u64)
    }

    /// Promote `retry` items whose backoff has elapsed back to `queued`.
    pub async fn promote_due_retries(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let now_str = ts_to_sql(&now);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE queue_items SET status = 'queued', updated_at = ?1
                     WHERE status = 'retry' AND scheduled_for <= ?1",
                    rusqlite::params![now_str],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed as u64)
    }

    // -----------------------------------------------------------------------
    // Read-only queries
    // -----------------------------------------------------------------------

    /// Peek at due items without claiming them.
    pub async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        platform: Option<&str>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let now_str = ts_to_sql(&now);
        let platform = platform.map(|p| p.to_string());
        self.conn()
            .call(move |conn| {
                let sql = match &platform {
                    Some(_) => format!(
                        "SELECT {} FROM queue_items
                         WHERE status = 'queued' AND scheduled_for <= ?1 AND platform = ?3
                         ORDER BY priority DESC, scheduled_for ASC, id ASC LIMIT ?2",
                        QUEUE_COLS
                    ),
                    None => format!(
                        "SELECT {} FROM queue_items
                         WHERE status = 'queued' AND scheduled_for <= ?1
                         ORDER BY priority DESC, scheduled_for ASC, id ASC LIMIT ?2",
                        QUEUE_COLS
                    ),
                };
                let mut stmt = conn.prepare(&sql)?;
                let mut out = Vec::new();
                match platform {
                    Some(p) => {
                        let mut rows =
                            stmt.query(rusqlite::params![now_str, limit as i64, p])?;
                        while let Some(row) = rows.next()? {
                            out.push(row_to_queue_item(row)?);
                        }
                    }
                    None => {
                        let mut rows = stmt.query(rusqlite::params![now_str, limit as i64])?;
                        while let Some(row) = rows.next()? {
                            out.push(row_to_queue_item(row)?);
                        }
                    }
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Calendar-style view: all items scheduled inside `[start, end]`.
    pub async fn list_window(
        &self,
        workspace: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let workspace = workspace.to_string();
        let start_str = ts_to_sql(&start);
        let end_str = ts_to_sql(&end);
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM queue_items
                     WHERE workspace = ?1 AND scheduled_for >= ?2 AND scheduled_for <= ?3
                     ORDER BY scheduled_for ASC",
                    QUEUE_COLS
                ))?;
                let mut rows = stmt.query(rusqlite::params![workspace, start_str, end_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_queue_item(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Whether a non-terminal item already exists for `(variant, platform)`.
    pub async fn open_item_exists(
        &self,
        variant_id: Uuid,
        platform: &str,
    ) -> Result<bool, StoreError> {
        let variant_str = variant_id.to_string();
        let platform = platform.to_string();
        let count: i64 = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT COUNT(*) FROM queue_items
                     WHERE variant_id = ?1 AND platform = ?2
                       AND status IN ('queued', 'leased', 'publishing', 'retry')",
                )?;
                let n = stmt.query_row(rusqlite::params![variant_str, platform], |r| r.get(0))?;
                Ok(n)
            })
            .await?;
        Ok(count > 0)
    }

    pub async fn queue_stats(&self, workspace: &str) -> Result<QueueStats, StoreError> {
        let workspace = workspace.to_string();
        self.conn()
            .call(move |conn| {
                let mut by_status = HashMap::new();
                let mut by_platform = HashMap::new();
                let mut total = 0u64;

                let mut stmt = conn.prepare(
                    "SELECT status, platform, COUNT(*) FROM queue_items
                     WHERE workspace = ?1 GROUP BY status, platform",
                )?;
                let mut rows = stmt.query(rusqlite::params![workspace])?;
                while let Some(row) = rows.next()? {
                    let status: String = row.get(0)?;
                    let platform: String = row.get(1)?;
                    let count: i64 = row.get(2)?;
                    *by_status.entry(status).or_insert(0) += count as u64;
                    *by_platform.entry(platform).or_insert(0) += count as u64;
                    total += count as u64;
                }

                Ok(QueueStats {
                    by_status,
                    by_platform,
                    total,
                })
            })
            .await
            .map_err(StoreError::from)
    }

    // -----------------------------------------------------------------------
    // Internal CAS helper
    // -----------------------------------------------------------------------

    async fn cas_status(
        &self,
        id: Uuid,
        from: &'static str,
        to: &'static str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let now_str = ts_to_sql(&now);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE queue_items SET status = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = ?4",
                    rusqlite::params![to, now_str, id_str, from],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "queue item {} not in {}",
                id, from
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

pub(crate) const QUEUE_COLS: &str = "id, workspace, variant_id, platform, scheduled_for, priority, \
     status, attempt_count, max_attempts, platform_metadata, last_error, lease_expires_at, \
     published_at, platform_post_id, platform_url, created_at, updated_at";

pub(crate) const INSERT_QUEUE_ITEM_SQL: &str = "INSERT INTO queue_items
        (id, workspace, variant_id, platform, scheduled_for, priority, status,
         attempt_count, max_attempts, platform_metadata, last_error, lease_expires_at,
         published_at, platform_post_id, platform_url, created_at, updated_at)
     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)";

type QueueItemParams = (
    String,
    String,
    String,
    String,
    String,
    i32,
    String,
    u32,
    u32,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
);

pub(crate) fn queue_item_params(item: &QueueItem) -> QueueItemParams {
    (
        item.id.to_string(),
        item.workspace.clone(),
        item.variant_id.to_string(),
        item.platform.clone(),
        ts_to_sql(&item.scheduled_for),
        item.priority,
        enum_to_sql(&item.status),
        item.attempt_count,
        item.max_attempts,
        item.platform_metadata.as_ref().map(|v| v.to_string()),
        item.last_error.clone(),
        item.lease_expires_at.as_ref().map(ts_to_sql),
        item.published_at.as_ref().map(ts_to_sql),
        item.platform_post_id.clone(),
        item.platform_url.clone(),
        ts_to_sql(&item.created_at),
        ts_to_sql(&item.updated_at),
    )
}

pub(crate) fn row_to_queue_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let id: String = row.get(0)?;
    let variant_id: String = row.get(2)?;
    let scheduled_for: String = row.get(4)?;
    let status: String = row.get(6)?;
    let metadata: Option<String> = row.get(9)?;
    let lease_expires_at: Option<String> = row.get(11)?;
    let published_at: Option<String> = row.get(12)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    let status: QueueStatus = enum_from_sql(&status);
    Ok(QueueItem {
        id: Uuid::parse_str(&id).expect("valid uuid"),
        workspace: row.get(1)?,
        variant_id: Uuid::parse_str(&variant_id).expect("valid uuid"),
        platform: row.get(3)?,
        scheduled_for: ts_from_sql(&scheduled_for),
        priority: row.get(5)?,
        status,
        attempt_count: row.get(7)?,
        max_attempts: row.get(8)?,
        platform_metadata: metadata.map(|s| serde_json::from_str(&s).expect("valid json")),
        last_error: row.get(10)?,
        lease_expires_at: opt_ts_from_sql(lease_expires_at),
        published_at: opt_ts_from_sql(published_at),
        platform_post_id: row.get(13)?,
        platform_url: row.get(14)?,
        created_at: ts_from_sql(&created_at),
        updated_at: ts_from_sql(&updated_at),
    })
}
