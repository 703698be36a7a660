use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{CheckbackJob, CheckbackStatus};

use super::{enum_from_sql, enum_to_sql, ts_from_sql, ts_to_sql, Store};

impl Store {
    /// Insert checkback jobs, ignoring any `(variant_id, offset_hours)` pair
    /// that already exists. Returns the number actually inserted.
    pub async fn insert_checkback_jobs(&self, jobs: &[CheckbackJob]) -> Result<u64, StoreError> {
        let rows: Vec<_> = jobs
            .iter()
            .map(|j| {
                (
                    j.id.to_string(),
                    j.variant_id.to_string(),
                    j.platform.clone(),
                    j.offset_hours,
                    ts_to_sql(&j.fire_at),
                    enum_to_sql(&j.status),
                    ts_to_sql(&j.created_at),
                )
            })
            .collect();

        let inserted = self
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0u64;
                for r in &rows {
                    let n = tx.execute(
                        "INSERT OR IGNORE INTO checkback_jobs
                            (id, variant_id, platform, offset_hours, fire_at, status, created_at)
                         VALUES (?1,?2,?3,?4,?5,?6,?7)",
                        rusqlite::params![r.0, r.1, r.2, r.3, r.4, r.5, r.6],
                    )?;
                    inserted += n as u64;
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    /// Claim up to `limit` due jobs: `pending` rows with `fire_at <= now`
    /// flip to `fired` inside one write transaction, mirroring the queue's
    /// lease protocol.
    pub async fn claim_due_checkbacks(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CheckbackJob>, StoreError> {
        let now_str = ts_to_sql(&now);
        self.conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM checkback_jobs
                         WHERE status = 'pending' AND fire_at <= ?1
                         ORDER BY fire_at ASC, id ASC LIMIT ?2",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![now_str, limit as i64])?;
                    let mut ids = Vec::new();
                    while let Some(row) = rows.next()? {
                        ids.push(row.get::<_, String>(0)?);
                    }
                    ids
                };

                let mut claimed = Vec::with_capacity(ids.len());
                for id in &ids {
                    tx.execute(
                        "UPDATE checkback_jobs SET status = 'fired'
                         WHERE id = ?1 AND status = 'pending'",
                        rusqlite::params![id],
                    )?;
                    let mut stmt = tx.prepare(
                        "SELECT id, variant_id, platform, offset_hours, fire_at, status, created_at
                         FROM checkback_jobs WHERE id = ?1",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![id])?;
                    if let Some(row) = rows.next()? {
                        claimed.push(row_to_checkback(row)?);
                    }
                }
                tx.commit()?;
                Ok(claimed)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Record the outcome of a fired job.
    pub async fn finish_checkback(
        &self,
        id: Uuid,
        outcome: CheckbackStatus,
    ) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let outcome_str = enum_to_sql(&outcome);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE checkback_jobs SET status = ?1
                     WHERE id = ?2 AND status = 'fired'",
                    rusqlite::params![outcome_str, id_str],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("checkback {} not fired", id)));
        }
        Ok(())
    }

    /// Skip all still-pending checkbacks of a variant (e.g. after a cancel).
    pub async fn skip_checkbacks_for_variant(&self, variant_id: Uuid) -> Result<u64, StoreError> {
        let variant_str = variant_id.to_string();
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE checkback_jobs SET status = 'skipped'
                     WHERE variant_id = ?1 AND status = 'pending'",
                    rusqlite::params![variant_str],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed as u64)
    }

    /// Earliest pending fire time for a variant, if any.
    pub async fn next_checkback_at(
        &self,
        variant_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let variant_str = variant_id.to_string();
        let fire_at: Option<String> = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT MIN(fire_at) FROM checkback_jobs
                     WHERE variant_id = ?1 AND status = 'pending'",
                )?;
                let v: Option<String> = stmt.query_row(rusqlite::params![variant_str], |r| r.get(0))?;
                Ok(v)
            })
            .await?;
        Ok(fire_at.map(|s| ts_from_sql(&s)))
    }

    pub async fn checkbacks_for_variant(
        &self,
        variant_id: Uuid,
    ) -> Result<Vec<CheckbackJob>, StoreError> {
        let variant_str = variant_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, variant_id, platform, offset_hours, fire_at, status, created_at
                     FROM checkback_jobs WHERE variant_id = ?1 ORDER BY offset_hours",
                )?;
                let mut rows = stmt.query(rusqlite::params![variant_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_checkback(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_checkback(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckbackJob> {
    let id: String = row.get(0)?;
    let variant_id: String = row.get(1)?;
    let fire_at: String = row.get(4)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(CheckbackJob {
        id: Uuid::parse_str(&id).expect("valid uuid"),
        variant_id: Uuid::parse_str(&variant_id).expect("valid uuid"),
        platform: row.get(2)?,
        offset_hours: row.get(3)?,
        fire_at: ts_from_sql(&fire_at),
        status: enum_from_sql(&status),
        created_at: ts_from_sql(&created_at),
    })
}
