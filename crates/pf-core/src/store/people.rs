use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Identity, Person, PersonEvent, PersonInsight};

use super::{enum_from_sql, enum_to_sql, map_constraint, opt_ts_from_sql, ts_from_sql, ts_to_sql, Store};

impl Store {
    // -----------------------------------------------------------------------
    // People & identities
    // -----------------------------------------------------------------------

    pub async fn get_identity(
        &self,
        channel: &str,
        handle: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let channel = channel.to_string();
        let handle = handle.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, person_id, channel, handle, first_seen_at, last_seen_at
                     FROM identities WHERE channel = ?1 AND handle = ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![channel, handle])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_identity(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    /// Create a person together with their first identity and an initial
    /// insight, in one transaction. A concurrent insert of the same
    /// `(channel, handle)` loses on the unique index and surfaces as
    /// `Conflict`; the caller re-reads and reuses the winner's person.
    pub async fn create_person_with_identity(
        &self,
        person: &Person,
        identity: &Identity,
        insight: &PersonInsight,
    ) -> Result<(), StoreError> {
        let p = (
            person.id.to_string(),
            person.workspace.clone(),
            person.full_name.clone(),
            person.primary_email.clone(),
            ts_to_sql(&person.created_at),
            ts_to_sql(&person.updated_at),
        );
        let i = (
            identity.id.to_string(),
            identity.person_id.to_string(),
            identity.channel.clone(),
            identity.handle.clone(),
            ts_to_sql(&identity.first_seen_at),
            ts_to_sql(&identity.last_seen_at),
        );
        let ins = insight_params(insight);

        self.conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO people (id, workspace, full_name, primary_email, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    rusqlite::params![p.0, p.1, p.2, p.3, p.4, p.5],
                )?;
                tx.execute(
                    "INSERT INTO identities (id, person_id, channel, handle, first_seen_at, last_seen_at)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    rusqlite::params![i.0, i.1, i.2, i.3, i.4, i.5],
                )?;
                tx.execute(
                    INSERT_INSIGHT_SQL,
                    rusqlite::params![ins.0, ins.1, ins.2, ins.3, ins.4, ins.5, ins.6, ins.7],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|e| map_constraint(e, "identity already exists"))
    }

    pub async fn touch_identity(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let now_str = ts_to_sql(&now);
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE identities SET last_seen_at = ?1 WHERE id = ?2",
                    rusqlite::params![now_str, id_str],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn get_person(&self, id: Uuid) -> Result<Option<Person>, StoreError> {
        let id_str = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workspace, full_name, primary_email, created_at, updated_at
                     FROM people WHERE id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_person(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn identities_for_person(&self, person_id: Uuid) -> Result<Vec<Identity>, StoreError> {
        let person_str = person_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, person_id, channel, handle, first_seen_at, last_seen_at
                     FROM identities WHERE person_id = ?1 ORDER BY first_seen_at",
                )?;
                let mut rows = stmt.query(rusqlite::params![person_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_identity(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub async fn insert_person_event(&self, event: &PersonEvent) -> Result<(), StoreError> {
        let id = event.id.to_string();
        let person_id = event.person_id.to_string();
        let channel = event.channel.clone();
        let event_type = enum_to_sql(&event.event_type);
        let platform_id = event.platform_id.clone();
        let excerpt = event.content_excerpt.clone();
        let traffic_type = enum_to_sql(&event.traffic_type);
        let occurred_at = ts_to_sql(&event.occurred_at);
        let metadata = event.metadata.as_ref().map(|v| v.to_string());

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO person_events
                        (id, person_id, channel, event_type, platform_id, content_excerpt,
                         traffic_type, occurred_at, metadata)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                    rusqlite::params![
                        id, person_id, channel, event_type, platform_id, excerpt, traffic_type,
                        occurred_at, metadata,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    /// Events for a person since `since`, newest first.
    pub async fn events_for_person_since(
        &self,
        person_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<PersonEvent>, StoreError> {
        let person_str = person_id.to_string();
        let since_str = ts_to_sql(&since);
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, person_id, channel, event_type, platform_id, content_excerpt,
                            traffic_type, occurred_at, metadata
                     FROM person_events
                     WHERE person_id = ?1 AND occurred_at >= ?2
                     ORDER BY occurred_at DESC",
                )?;
                let mut rows = stmt.query(rusqlite::params![person_str, since_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_event(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Distinct person ids with events since `since`.
    pub async fn active_person_ids_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let since_str = ts_to_sql(&since);
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT person_id FROM person_events WHERE occurred_at >= ?1",
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
    // Insights
    // -----------------------------------------------------------------------

    pub async fn upsert_insight(&self, insight: &PersonInsight) -> Result<(), StoreError> {
        let p = insight_params(insight);
        self.conn()
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "{} ON CONFLICT(person_id) DO UPDATE SET
                            interests=excluded.interests,
                            tone_preferences=excluded.tone_preferences,
                            channel_preferences=excluded.channel_preferences,
                            activity_state=excluded.activity_state,
                            warmth_score=excluded.warmth_score,
                            last_active_at=excluded.last_active_at,
                            updated_at=excluded.updated_at",
                        INSERT_INSIGHT_SQL
                    ),
                    rusqlite::params![p.0, p.1, p.2, p.3, p.4, p.5, p.6, p.7],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn get_insight(&self, person_id: Uuid) -> Result<Option<PersonInsight>, StoreError> {
        let person_str = person_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT person_id, interests, tone_preferences, channel_preferences,
                            activity_state, warmth_score, last_active_at, updated_at
                     FROM person_insights WHERE person_id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![person_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_insight(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    /// Nudge the insight after a fresh event: person is `active` as of now.
    pub async fn touch_insight_activity(
        &self,
        person_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let person_str = person_id.to_string();
        let now_str = ts_to_sql(&now);
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE person_insights
                     SET last_active_at = ?1, activity_state = 'active', updated_at = ?1
                     WHERE person_id = ?2",
                    rusqlite::params![now_str, person_str],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const INSERT_INSIGHT_SQL: &str = "INSERT INTO person_insights
        (person_id, interests, tone_preferences, channel_preferences, activity_state,
         warmth_score, last_active_at, updated_at)
     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)";

type InsightParams = (
    String,
    String,
    String,
    String,
    String,
    f64,
    Option<String>,
    String,
);

fn insight_params(insight: &PersonInsight) -> InsightParams {
    (
        insight.person_id.to_string(),
        serde_json::to_string(&insight.interests).expect("serialize interests"),
        serde_json::to_string(&insight.tone_preferences).expect("serialize tones"),
        serde_json::to_string(&insight.channel_preferences).expect("serialize channels"),
        enum_to_sql(&insight.activity_state),
        insight.warmth_score,
        insight.last_active_at.as_ref().map(ts_to_sql),
        ts_to_sql(&insight.updated_at),
    )
}

fn row_to_person(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Person {
        id: Uuid::parse_str(&id).expect("valid uuid"),
        workspace: row.get(1)?,
        full_name: row.get(2)?,
        primary_email: row.get(3)?,
        created_at: ts_from_sql(&created_at),
        updated_at: ts_from_sql(&updated_at),
    })
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    let id: String = row.get(0)?;
    let person_id: String = row.get(1)?;
    let first_seen: String = row.get(4)?;
    let last_seen: String = row.get(5)?;
    Ok(Identity {
        id: Uuid::parse_str(&id).expect("valid uuid"),
        person_id: Uuid::parse_str(&person_id).expect("valid uuid"),
        channel: row.get(2)?,
        handle: row.get(3)?,
        first_seen_at: ts_from_sql(&first_seen),
        last_seen_at: ts_from_sql(&last_seen),
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersonEvent> {
    let id: String = row.get(0)?;
    let person_id: String = row.get(1)?;
    let event_type: String = row.get(3)?;
    let traffic_type: String = row.get(6)?;
    let occurred_at: String = row.get(7)?;
    let metadata: Option<String> = row.get(8)?;
    Ok(PersonEvent {
        id: Uuid::parse_str(&id).expect("valid uuid"),
        person_id: Uuid::parse_str(&person_id).expect("valid uuid"),
        channel: row.get(2)?,
        event_type: enum_from_sql(&event_type),
        platform_id: row.get(4)?,
        content_excerpt: row.get(5)?,
        traffic_type: enum_from_sql(&traffic_type),
        occurred_at: ts_from_sql(&occurred_at),
        metadata: metadata.map(|s| serde_json::from_str(&s).expect("valid json")),
    })
}

fn row_to_insight(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersonInsight> {
    let person_id: String = row.get(0)?;
    let interests: String = row.get(1)?;
    let tones: String = row.get(2)?;
    let channels: String = row.get(3)?;
    let state: String = row.get(4)?;
    let last_active: Option<String> = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(PersonInsight {
        person_id: Uuid::parse_str(&person_id).expect("valid uuid"),
        interests: serde_json::from_str(&interests).expect("valid json"),
        tone_preferences: serde_json::from_str(&tones).expect("valid json"),
        channel_preferences: serde_json::from_str(&channels).expect("valid json"),
        activity_state: enum_from_sql(&state),
        warmth_score: row.get(5)?,
        last_active_at: opt_ts_from_sql(last_active),
        updated_at: ts_from_sql(&updated_at),
    })
}
