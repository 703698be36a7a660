use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Artifact, ContentItem, ContentVariant, QueueItem, VariantStatus};

use super::{enum_from_sql, enum_to_sql, map_constraint, opt_ts_from_sql, ts_from_sql, ts_to_sql, Store};

impl Store {
    // -----------------------------------------------------------------------
    // Content items
    // -----------------------------------------------------------------------

    pub async fn insert_content_item(&self, item: &ContentItem) -> Result<(), StoreError> {
        let id = item.id.to_string();
        let workspace = item.workspace.clone();
        let content_type = enum_to_sql(&item.content_type);
        let title = item.title.clone();
        let created_at = ts_to_sql(&item.created_at);

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO content_items (id, workspace, content_type, title, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![id, workspace, content_type, title, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| map_constraint(e, "content item already exists"))
    }

    pub async fn get_content_item(&self, id: Uuid) -> Result<Option<ContentItem>, StoreError> {
        let id_str = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workspace, content_type, title, created_at
                     FROM content_items WHERE id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_content_item(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    // -----------------------------------------------------------------------
    // Variants
    // -----------------------------------------------------------------------

    pub async fn insert_variant(&self, variant: &ContentVariant) -> Result<(), StoreError> {
        let params = variant_params(variant);
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO content_variants
                        (id, content_id, platform, platform_post_id, is_paid,
                         published_at, status, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                    rusqlite::params![
                        params.0, params.1, params.2, params.3, params.4, params.5, params.6,
                        params.7,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| map_constraint(e, "duplicate variant"))
    }

    pub async fn get_variant(&self, id: Uuid) -> Result<Option<ContentVariant>, StoreError> {
        let id_str = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM content_variants WHERE id = ?1",
                    VARIANT_COLS
                ))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_variant(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn variants_for_content(
        &self,
        content_id: Uuid,
    ) -> Result<Vec<ContentVariant>, StoreError> {
        let id_str = content_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM content_variants WHERE content_id = ?1 ORDER BY created_at",
                    VARIANT_COLS
                ))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_variant(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Compare-and-set variant status transition. Fails with `Conflict` when
    /// the variant is no longer in `from`.
    pub async fn update_variant_status(
        &self,
        id: Uuid,
        from: VariantStatus,
        to: VariantStatus,
    ) -> Result<(), StoreError> {
        if !from.can_transition_to(&to) {
            return Err(StoreError::Conflict(format!(
                "variant transition {:?} -> {:?} not allowed",
                from, to
            )));
        }
        let id_str = id.to_string();
        let from_str = enum_to_sql(&from);
        let to_str = enum_to_sql(&to);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE content_variants SET status = ?1 WHERE id = ?2 AND status = ?3",
                    rusqlite::params![to_str, id_str, from_str],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("variant {} not in {:?}", id, from)));
        }
        Ok(())
    }

    /// Record a successful publish on the variant: post id, url-agnostic
    /// publish instant, and the `published` status.
    pub async fn mark_variant_published(
        &self,
        id: Uuid,
        platform_post_id: String,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let published_str = ts_to_sql(&published_at);
        let published_status = enum_to_sql(&VariantStatus::Published);
        let changed = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE content_variants
                     SET status = ?1, platform_post_id = ?2, published_at = ?3
                     WHERE id = ?4 AND status IN ('queued', 'publishing')",
                    rusqlite::params![published_status, platform_post_id, published_str, id_str],
                )?;
                Ok(n)
            })
            .await
            .map_err(|e| map_constraint(e, "platform post id already recorded"))?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("variant {} not publishable", id)));
        }
        Ok(())
    }

    pub async fn mark_variant_failed(&self, id: Uuid) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let failed = enum_to_sql(&VariantStatus::Failed);
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE content_variants SET status = ?1
                     WHERE id = ?2 AND status IN ('queued', 'publishing')",
                    rusqlite::params![failed, id_str],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    /// Distinct content ids with a variant published since `since`.
    pub async fn content_ids_published_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let since_str = ts_to_sql(&since);
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT content_id FROM content_variants
                     WHERE published_at IS NOT NULL AND published_at >= ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![since_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let id: String = row.get(0)?;
                    out.push(Uuid::parse_str(&id).expect("valid uuid"));
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    pub async fn insert_artifact(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let id = artifact.id.to_string();
        let workspace = artifact.workspace.clone();
        let duration_s = artifact.duration_s;
        let form = enum_to_sql(&artifact.form);
        let ready_at = ts_to_sql(&artifact.ready_at);
        let consumed_at = artifact.consumed_at.as_ref().map(ts_to_sql);

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO artifacts (id, workspace, duration_s, form, ready_at, consumed_at)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    rusqlite::params![id, workspace, duration_s, form, ready_at, consumed_at],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| map_constraint(e, "artifact already exists"))
    }

    /// Unconsumed artifacts for a workspace, FIFO by `ready_at`.
    pub async fn list_ready_artifacts(&self, workspace: &str) -> Result<Vec<Artifact>, StoreError> {
        let workspace = workspace.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workspace, duration_s, form, ready_at, consumed_at
                     FROM artifacts
                     WHERE workspace = ?1 AND consumed_at IS NULL
                     ORDER BY ready_at ASC, id ASC",
                )?;
                let mut rows = stmt.query(rusqlite::params![workspace])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_artifact(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>, StoreError> {
        let id_str = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workspace, duration_s, form, ready_at, consumed_at
                     FROM artifacts WHERE id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_artifact(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    /// Return an evicted artifact to inventory.
    pub async fn release_artifact(&self, id: Uuid) -> Result<(), StoreError> {
        let id_str = id.to_string();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE artifacts SET consumed_at = NULL WHERE id = ?1",
                    rusqlite::params![id_str],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    /// Atomically consume an artifact and materialize its content item,
    /// scheduled variant, and queue item. One transaction: a concurrent
    /// planner that consumed the artifact first makes this fail with
    /// `Conflict` and nothing is written.
    pub async fn materialize_scheduled(
        &self,
        artifact_id: Uuid,
        content: &ContentItem,
        variant: &ContentVariant,
        item: &QueueItem,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let artifact_str = artifact_id.to_string();
        let now_str = ts_to_sql(&now);
        let cp = (
            content.id.to_string(),
            content.workspace.clone(),
            enum_to_sql(&content.content_type),
            content.title.clone(),
            ts_to_sql(&content.created_at),
        );
        let vp = variant_params(variant);
        let qp = super::queue::queue_item_params(item);

        self.conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let consumed = tx.execute(
                    "UPDATE artifacts SET consumed_at = ?1
                     WHERE id = ?2 AND consumed_at IS NULL",
                    rusqlite::params![now_str, artifact_str],
                )?;
                if consumed == 0 {
                    // Roll back by dropping the transaction.
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO content_items (id, workspace, content_type, title, created_at)
                     VALUES (?1,?2,?3,?4,?5)",
                    rusqlite::params![cp.0, cp.1, cp.2, cp.3, cp.4],
                )?;
                tx.execute(
                    "INSERT INTO content_variants
                        (id, content_id, platform, platform_post_id, is_paid,
                         published_at, status, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                    rusqlite::params![vp.0, vp.1, vp.2, vp.3, vp.4, vp.5, vp.6, vp.7],
                )?;
                tx.execute(
                    super::queue::INSERT_QUEUE_ITEM_SQL,
                    rusqlite::params![
                        qp.0, qp.1, qp.2, qp.3, qp.4, qp.5, qp.6, qp.7, qp.8, qp.9, qp.10, qp.11,
                        qp.12, qp.13, qp.14, qp.15, qp.16,
                    ],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await
            .map_err(|e| map_constraint(e, "schedule materialization collided"))
            .and_then(|ok| {
                if ok {
                    Ok(())
                } else {
                    Err(StoreError::Conflict(format!(
                        "artifact {} already consumed",
                        artifact_id
                    )))
                }
            })
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

pub(crate) const VARIANT_COLS: &str =
    "id, content_id, platform, platform_post_id, is_paid, published_at, status, created_at";

type VariantParams = (
    String,
    String,
    String,
    Option<String>,
    bool,
    Option<String>,
    String,
    String,
);

fn variant_params(v: &ContentVariant) -> VariantParams {
    (
        v.id.to_string(),
        v.content_id.to_string(),
        v.platform.clone(),
        v.platform_post_id.clone(),
        v.is_paid,
        v.published_at.as_ref().map(ts_to_sql),
        enum_to_sql(&v.status),
        ts_to_sql(&v.created_at),
    )
}

fn row_to_content_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentItem> {
    let id: String = row.get(0)?;
    let content_type: String = row.get(2)?;
    let created_at: String = row.get(4)?;
    Ok(ContentItem {
        id: Uuid::parse_str(&id).expect("valid uuid"),
        workspace: row.get(1)?,
        content_type: enum_from_sql(&content_type),
        title: row.get(3)?,
        created_at: ts_from_sql(&created_at),
    })
}

pub(crate) fn row_to_variant(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentVariant> {
    let id: String = row.get(0)?;
    let content_id: String = row.get(1)?;
    let published_at: Option<String> = row.get(5)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    Ok(ContentVariant {
        id: Uuid::parse_str(&id).expect("valid uuid"),
        content_id: Uuid::parse_str(&content_id).expect("valid uuid"),
        platform: row.get(2)?,
        platform_post_id: row.get(3)?,
        is_paid: row.get(4)?,
        published_at: opt_ts_from_sql(published_at),
        status: enum_from_sql(&status),
        created_at: ts_from_sql(&created_at),
    })
}

fn row_to_artifact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Artifact> {
    let id: String = row.get(0)?;
    let form: String = row.get(3)?;
    let ready_at: String = row.get(4)?;
    let consumed_at: Option<String> = row.get(5)?;
    Ok(Artifact {
        id: Uuid::parse_str(&id).expect("valid uuid"),
        workspace: row.get(1)?,
        duration_s: row.get(2)?,
        form: enum_from_sql(&form),
        ready_at: ts_from_sql(&ready_at),
        consumed_at: opt_ts_from_sql(consumed_at),
    })
}
