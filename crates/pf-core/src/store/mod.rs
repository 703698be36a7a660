use std::path::Path;

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;

use crate::error::StoreError;

mod checkback;
mod content;
mod locks;
mod metrics;
mod people;
mod queue;

pub use queue::QueueStats;

/// Async SQLite-backed durable store for every postflow entity.
///
/// SQLite serializes writers, so a lease acquisition expressed as one write
/// transaction (select due rows, flip them to `leased`) observes the same
/// exclusivity as SELECT-FOR-UPDATE-SKIP-LOCKED on a server database: no two
/// workers can claim the same row.
pub struct Store {
    conn: Connection,
}

// ---------------------------------------------------------------------------
// helpers — enum / timestamp <-> SQLite TEXT
// ---------------------------------------------------------------------------

pub(crate) fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).expect("serialize enum");
    s.trim_matches('"').to_string()
}

pub(crate) fn enum_from_sql<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    let quoted = format!("\"{}\"", raw);
    serde_json::from_str(&quoted).expect("deserialize enum")
}

pub(crate) fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn ts_from_sql(raw: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .expect("valid date")
        .with_timezone(&Utc)
}

pub(crate) fn opt_ts_from_sql(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.map(|s| ts_from_sql(&s))
}

/// Map a unique-index violation to `Conflict`; pass everything else through.
pub(crate) fn map_constraint(err: tokio_rusqlite::Error, what: &str) -> StoreError {
    if let tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, _)) = &err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::Conflict(what.to_string());
        }
    }
    StoreError::Db(err)
}

impl Store {
    /// Open (or create) a database at the given file path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA foreign_keys=ON;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS content_items (
                        id           TEXT PRIMARY KEY,
                        workspace    TEXT NOT NULL,
                        content_type TEXT NOT NULL,
                        title        TEXT NOT NULL,
                        created_at   TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_content_workspace ON content_items(workspace);

                    CREATE TABLE IF NOT EXISTS content_variants (
                        id               TEXT PRIMARY KEY,
                        content_id       TEXT NOT NULL REFERENCES content_items(id) ON DELETE CASCADE,
                        platform         TEXT NOT NULL,
                        platform_post_id TEXT,
                        is_paid          INTEGER NOT NULL DEFAULT 0,
                        published_at     TEXT,
                        status           TEXT NOT NULL,
                        created_at       TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_variants_content ON content_variants(content_id);
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_variants_platform_post
                        ON content_variants(platform, platform_post_id)
                        WHERE platform_post_id IS NOT NULL;

                    CREATE TABLE IF NOT EXISTS artifacts (
                        id          TEXT PRIMARY KEY,
                        workspace   TEXT NOT NULL,
                        duration_s  REAL NOT NULL,
                        form        TEXT NOT NULL,
                        ready_at    TEXT NOT NULL,
                        consumed_at TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_artifacts_ready
                        ON artifacts(workspace, ready_at) WHERE consumed_at IS NULL;

                    CREATE TABLE IF NOT EXISTS queue_items (
                        id                TEXT PRIMARY KEY,
                        workspace         TEXT NOT NULL,
                        variant_id        TEXT NOT NULL,
                        platform          TEXT NOT NULL,
                        scheduled_for     TEXT NOT NULL,
                        priority          INTEGER NOT NULL DEFAULT 0,
                        status            TEXT NOT NULL,
                        attempt_count     INTEGER NOT NULL DEFAULT 0,
                        max_attempts      INTEGER NOT NULL DEFAULT 3,
                        platform_metadata TEXT,
                        last_error        TEXT,
                        lease_expires_at  TEXT,
                        published_at      TEXT,
                        platform_post_id  TEXT,
                        platform_url      TEXT,
                        created_at        TEXT NOT NULL,
                        updated_at        TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_queue_due
                        ON queue_items(status, scheduled_for);
                    CREATE INDEX IF NOT EXISTS idx_queue_platform
                        ON queue_items(platform, status);
                    -- At-most-once publish per variant.
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_published_variant
                        ON queue_items(variant_id) WHERE status = 'published';
                    -- No duplicate open schedule per (variant, platform).
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_open_variant_platform
                        ON queue_items(variant_id, platform)
                        WHERE status IN ('queued', 'leased', 'publishing', 'retry');

                    CREATE TABLE IF NOT EXISTS checkback_jobs (
                        id           TEXT PRIMARY KEY,
                        variant_id   TEXT NOT NULL,
                        platform     TEXT NOT NULL,
                        offset_hours INTEGER NOT NULL,
                        fire_at      TEXT NOT NULL,
                        status       TEXT NOT NULL,
                        created_at   TEXT NOT NULL,
                        UNIQUE (variant_id, offset_hours)
                    );

                    CREATE INDEX IF NOT EXISTS idx_checkback_due
                        ON checkback_jobs(status, fire_at);

                    CREATE TABLE IF NOT EXISTS metric_snapshots (
                        id            TEXT PRIMARY KEY,
                        variant_id    TEXT NOT NULL,
                        snapshot_at   TEXT NOT NULL,
                        offset_hours  INTEGER,
                        views         INTEGER NOT NULL DEFAULT 0,
                        impressions   INTEGER,
                        likes         INTEGER NOT NULL DEFAULT 0,
                        comments      INTEGER NOT NULL DEFAULT 0,
                        shares        INTEGER NOT NULL DEFAULT 0,
                        saves         INTEGER,
                        clicks        INTEGER,
                        watch_time_s  REAL,
                        traffic_type  TEXT NOT NULL,
                        raw           TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_snapshots_variant
                        ON metric_snapshots(variant_id, snapshot_at);

                    CREATE TABLE IF NOT EXISTS content_rollups (
                        content_id        TEXT PRIMARY KEY,
                        total_views       INTEGER NOT NULL DEFAULT 0,
                        total_impressions INTEGER NOT NULL DEFAULT 0,
                        total_likes       INTEGER NOT NULL DEFAULT 0,
                        total_comments    INTEGER NOT NULL DEFAULT 0,
                        total_shares      INTEGER NOT NULL DEFAULT 0,
                        total_saves       INTEGER NOT NULL DEFAULT 0,
                        total_clicks      INTEGER NOT NULL DEFAULT 0,
                        avg_watch_time_s  REAL,
                        best_platform     TEXT,
                        last_updated_at   TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS people (
                        id            TEXT PRIMARY KEY,
                        workspace     TEXT NOT NULL,
                        full_name     TEXT,
                        primary_email TEXT,
                        created_at    TEXT NOT NULL,
                        updated_at    TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS identities (
                        id            TEXT PRIMARY KEY,
                        person_id     TEXT NOT NULL REFERENCES people(id) ON DELETE CASCADE,
                        channel       TEXT NOT NULL,
                        handle        TEXT NOT NULL,
                        first_seen_at TEXT NOT NULL,
                        last_seen_at  TEXT NOT NULL,
                        UNIQUE (channel, handle)
                    );

                    CREATE INDEX IF NOT EXISTS idx_identities_person ON identities(person_id);

                    CREATE TABLE IF NOT EXISTS person_events (
                        id              TEXT PRIMARY KEY,
                        person_id       TEXT NOT NULL REFERENCES people(id) ON DELETE CASCADE,
                        channel         TEXT NOT NULL,
                        event_type      TEXT NOT NULL,
                        platform_id     TEXT,
                        content_excerpt TEXT,
                        traffic_type    TEXT NOT NULL,
                        occurred_at     TEXT NOT NULL,
                        metadata        TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_events_person
                        ON person_events(person_id, occurred_at);
                    CREATE INDEX IF NOT EXISTS idx_events_occurred
                        ON person_events(occurred_at);

                    CREATE TABLE IF NOT EXISTS person_insights (
                        person_id           TEXT PRIMARY KEY REFERENCES people(id) ON DELETE CASCADE,
                        interests           TEXT NOT NULL,
                        tone_preferences    TEXT NOT NULL,
                        channel_preferences TEXT NOT NULL,
                        activity_state      TEXT NOT NULL,
                        warmth_score        REAL NOT NULL,
                        last_active_at      TEXT,
                        updated_at          TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS workspace_locks (
                        workspace   TEXT PRIMARY KEY,
                        acquired_at TEXT NOT NULL
                    );
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }
}
