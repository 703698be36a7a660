use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{ContentRollup, MetricSnapshot, Platform};

use super::{enum_from_sql, enum_to_sql, ts_from_sql, ts_to_sql, Store};

impl Store {
    pub async fn insert_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        let id = snapshot.id.to_string();
        let variant_id = snapshot.variant_id.to_string();
        let snapshot_at = ts_to_sql(&snapshot.snapshot_at);
        let offset_hours = snapshot.offset_hours;
        let views = snapshot.views as i64;
        let impressions = snapshot.impressions.map(|v| v as i64);
        let likes = snapshot.likes as i64;
        let comments = snapshot.comments as i64;
        let shares = snapshot.shares as i64;
        let saves = snapshot.saves.map(|v| v as i64);
        let clicks = snapshot.clicks.map(|v| v as i64);
        let watch_time_s = snapshot.watch_time_s;
        let traffic_type = enum_to_sql(&snapshot.traffic_type);
        let raw = snapshot.raw.as_ref().map(|v| v.to_string());

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO metric_snapshots
                        (id, variant_id, snapshot_at, offset_hours, views, impressions, likes,
                         comments, shares, saves, clicks, watch_time_s, traffic_type, raw)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                    rusqlite::params![
                        id, variant_id, snapshot_at, offset_hours, views, impressions, likes,
                        comments, shares, saves, clicks, watch_time_s, traffic_type, raw,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn snapshots_for_variant(
        &self,
        variant_id: Uuid,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        let variant_str = variant_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM metric_snapshots
                     WHERE variant_id = ?1 ORDER BY snapshot_at ASC",
                    SNAPSHOT_COLS
                ))?;
                let mut rows = stmt.query(rusqlite::params![variant_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_snapshot(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    /// The most recent snapshot per variant of a content item, paired with
    /// the variant's platform. Variants without snapshots are absent.
    pub async fn latest_snapshots_for_content(
        &self,
        content_id: Uuid,
    ) -> Result<Vec<(Platform, MetricSnapshot)>, StoreError> {
        let content_str = content_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT v.platform, {}
                     FROM metric_snapshots s
                     JOIN content_variants v ON v.id = s.variant_id
                     WHERE v.content_id = ?1
                       AND s.snapshot_at = (
                           SELECT MAX(s2.snapshot_at) FROM metric_snapshots s2
                           WHERE s2.variant_id = s.variant_id
                       )
                     GROUP BY s.variant_id",
                    SNAPSHOT_COLS_PREFIXED
                ))?;
                let mut rows = stmt.query(rusqlite::params![content_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let platform: String = row.get(0)?;
                    out.push((platform, row_to_snapshot_offset(row, 1)?));
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Latest snapshot per published variant on a platform since `since`,
    /// paired with the variant's publish instant. Feeds posting-window
    /// derivation.
    pub async fn latest_snapshots_for_platform(
        &self,
        platform: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, MetricSnapshot)>, StoreError> {
        let platform = platform.to_string();
        let since_str = ts_to_sql(&since);
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT v.published_at, {}
                     FROM metric_snapshots s
                     JOIN content_variants v ON v.id = s.variant_id
                     WHERE v.platform = ?1
                       AND v.published_at IS NOT NULL AND v.published_at >= ?2
                       AND s.snapshot_at = (
                           SELECT MAX(s2.snapshot_at) FROM metric_snapshots s2
                           WHERE s2.variant_id = s.variant_id
                       )
                     GROUP BY s.variant_id",
                    SNAPSHOT_COLS_PREFIXED
                ))?;
                let mut rows = stmt.query(rusqlite::params![platform, since_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let published_at: String = row.get(0)?;
                    out.push((ts_from_sql(&published_at), row_to_snapshot_offset(row, 1)?));
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    // -----------------------------------------------------------------------
    // Rollups
    // -----------------------------------------------------------------------

    pub async fn upsert_rollup(&self, rollup: &ContentRollup) -> Result<(), StoreError> {
        let content_id = rollup.content_id.to_string();
        let views = rollup.total_views as i64;
        let impressions = rollup.total_impressions as i64;
        let likes = rollup.total_likes as i64;
        let comments = rollup.total_comments as i64;
        let shares = rollup.total_shares as i64;
        let saves = rollup.total_saves as i64;
        let clicks = rollup.total_clicks as i64;
        let avg_watch = rollup.avg_watch_time_s;
        let best_platform = rollup.best_platform.clone();
        let updated = ts_to_sql(&rollup.last_updated_at);

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO content_rollups
                        (content_id, total_views, total_impressions, total_likes, total_comments,
                         total_shares, total_saves, total_clicks, avg_watch_time_s, best_platform,
                         last_updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
                     ON CONFLICT(content_id) DO UPDATE SET
                        total_views=excluded.total_views,
                        total_impressions=excluded.total_impressions,
                        total_likes=excluded.total_likes,
                        total_comments=excluded.total_comments,
                        total_shares=excluded.total_shares,
                        total_saves=excluded.total_saves,
                        total_clicks=excluded.total_clicks,
                        avg_watch_time_s=excluded.avg_watch_time_s,
                        best_platform=excluded.best_platform,
                        last_updated_at=excluded.last_updated_at",
                    rusqlite::params![
                        content_id, views, impressions, likes, comments, shares, saves, clicks,
                        avg_watch, best_platform, updated,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn get_rollup(&self, content_id: Uuid) -> Result<Option<ContentRollup>, StoreError> {
        let content_str = content_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT content_id, total_views, total_impressions, total_likes,
                            total_comments, total_shares, total_saves, total_clicks,
                            avg_watch_time_s, best_platform, last_updated_at
                     FROM content_rollups WHERE content_id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![content_str])?;
                match rows.next()? {
                    Some(row) => {
                        let id: String = row.get(0)?;
                        let updated: String = row.get(10)?;
                        Ok(Some(ContentRollup {
                            content_id: Uuid::parse_str(&id).expect("valid uuid"),
                            total_views: row.get::<_, i64>(1)? as u64,
                            total_impressions: row.get::<_, i64>(2)? as u64,
                            total_likes: row.get::<_, i64>(3)? as u64,
                            total_comments: row.get::<_, i64>(4)? as u64,
                            total_shares: row.get::<_, i64>(5)? as u64,
                            total_saves: row.get::<_, i64>(6)? as u64,
                            total_clicks: row.get::<_, i64>(7)? as u64,
                            avg_watch_time_s: row.get(8)?,
                            best_platform: row.get(9)?,
                            last_updated_at: ts_from_sql(&updated),
                        }))
                    }
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const SNAPSHOT_COLS: &str = "id, variant_id, snapshot_at, offset_hours, views, impressions, \
     likes, comments, shares, saves, clicks, watch_time_s, traffic_type, raw";

const SNAPSHOT_COLS_PREFIXED: &str =
    "s.id, s.variant_id, s.snapshot_at, s.offset_hours, s.views, s.impressions, s.likes, \
     s.comments, s.shares, s.saves, s.clicks, s.watch_time_s, s.traffic_type, s.raw";

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricSnapshot> {
    row_to_snapshot_offset(row, 0)
}

fn row_to_snapshot_offset(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<MetricSnapshot> {
    let id: String = row.get(base)?;
    let variant_id: String = row.get(base + 1)?;
    let snapshot_at: String = row.get(base + 2)?;
    let traffic_type: String = row.get(base + 12)?;
    let raw: Option<String> = row.get(base + 13)?;
    Ok(MetricSnapshot {
        id: Uuid::parse_str(&id).expect("valid uuid"),
        variant_id: Uuid::parse_str(&variant_id).expect("valid uuid"),
        snapshot_at: ts_from_sql(&snapshot_at),
        offset_hours: row.get(base + 3)?,
        views: row.get::<_, i64>(base + 4)? as u64,
        impressions: row.get::<_, Option<i64>>(base + 5)?.map(|v| v as u64),
        likes: row.get::<_, i64>(base + 6)? as u64,
        comments: row.get::<_, i64>(base + 7)? as u64,
        shares: row.get::<_, i64>(base + 8)? as u64,
        saves: row.get::<_, Option<i64>>(base + 9)?.map(|v| v as u64),
        clicks: row.get::<_, Option<i64>>(base + 10)?.map(|v| v as u64),
        watch_time_s: row.get(base + 11)?,
        traffic_type: enum_from_sql(&traffic_type),
        raw: raw.map(|s| serde_json::from_str(&s).expect("valid json")),
    })
}
