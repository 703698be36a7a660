use std::sync::Arc;

use pf_core::clock::SharedClock;
use pf_core::error::StoreError;
use pf_core::store::Store;
use pf_core::types::{
    Identity, Person, PersonEvent, PersonEventType, PersonInsight, TrafficType,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PeopleError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub channel: String,
    pub handle: String,
    pub event_type: PersonEventType,
    pub platform_id: Option<String>,
    pub content_excerpt: Option<String>,
    pub traffic_type: Option<TrafficType>,
    pub full_name: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl IngestRequest {
    pub fn new(
        channel: impl Into<String>,
        handle: impl Into<String>,
        event_type: PersonEventType,
    ) -> Self {
        Self {
            channel: channel.into(),
            handle: handle.into(),
            event_type,
            platform_id: None,
            content_excerpt: None,
            traffic_type: None,
            full_name: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub person_id: Uuid,
    pub event_id: Uuid,
}

// ---------------------------------------------------------------------------
// PeopleService
// ---------------------------------------------------------------------------

/// Ingests engagement events, unifying platform handles under stable person
/// identities. `(channel, handle)` resolves to exactly one person; a race
/// between concurrent first-sights is settled by the unique index and the
/// loser adopts the winner's person.
pub struct PeopleService {
    store: Arc<Store>,
    clock: SharedClock,
    workspace: String,
}

impl PeopleService {
    pub fn new(store: Arc<Store>, clock: SharedClock, workspace: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            workspace: workspace.into(),
        }
    }

    /// Record one engagement event, creating the person on first sight.
    pub async fn ingest_event(&self, request: IngestRequest) -> Result<IngestOutcome, PeopleError> {
        if request.channel.is_empty() || request.handle.is_empty() {
            return Err(PeopleError::InvalidRequest(
                "channel and handle must not be empty".into(),
            ));
        }

        let now = self.clock.now();
        let person_id = self
            .resolve_person(&request.channel, &request.handle, request.full_name.clone())
            .await?;

        let event = PersonEvent {
            id: Uuid::new_v4(),
            person_id,
            channel: request.channel.clone(),
            event_type: request.event_type,
            platform_id: request.platform_id,
            content_excerpt: request.content_excerpt,
            traffic_type: request.traffic_type.unwrap_or(TrafficType::Organic),
            occurred_at: now,
            metadata: request.metadata,
        };
        self.store.insert_person_event(&event).await?;
        self.store.touch_insight_activity(person_id, now).await?;

        debug!(
            person_id = %person_id,
            channel = %request.channel,
            event_type = ?request.event_type,
            "event ingested"
        );
        Ok(IngestOutcome {
            person_id,
            event_id: event.id,
        })
    }

    /// Comment convenience wrapper used by the comment-polling path.
    pub async fn ingest_comment(
        &self,
        channel: &str,
        handle: &str,
        platform_post_id: &str,
        comment_text: &str,
        comment_id: &str,
        full_name: Option<String>,
    ) -> Result<IngestOutcome, PeopleError> {
        let mut request = IngestRequest::new(channel, handle, PersonEventType::Commented);
        request.platform_id = Some(platform_post_id.to_string());
        request.content_excerpt = Some(comment_text.to_string());
        request.full_name = full_name;
        request.metadata = Some(serde_json::json!({ "comment_id": comment_id }));
        self.ingest_event(request).await
    }

    pub async fn ingest_like(
        &self,
        channel: &str,
        handle: &str,
        platform_post_id: &str,
    ) -> Result<IngestOutcome, PeopleError> {
        let mut request = IngestRequest::new(channel, handle, PersonEventType::Liked);
        request.platform_id = Some(platform_post_id.to_string());
        self.ingest_event(request).await
    }

    pub async fn ingest_share(
        &self,
        channel: &str,
        handle: &str,
        platform_post_id: &str,
    ) -> Result<IngestOutcome, PeopleError> {
        let mut request = IngestRequest::new(channel, handle, PersonEventType::Shared);
        request.platform_id = Some(platform_post_id.to_string());
        self.ingest_event(request).await
    }

    /// A person with all their identities.
    pub async fn get_person(&self, id: Uuid) -> Result<(Person, Vec<Identity>), PeopleError> {
        let person = self
            .store
            .get_person(id)
            .await?
            .ok_or_else(|| PeopleError::NotFound(format!("person {}", id)))?;
        let identities = self.store.identities_for_person(id).await?;
        Ok((person, identities))
    }

    pub async fn get_insights(&self, person_id: Uuid) -> Result<PersonInsight, PeopleError> {
        self.store
            .get_insight(person_id)
            .await?
            .ok_or_else(|| PeopleError::NotFound(format!("insights for person {}", person_id)))
    }

    // -----------------------------------------------------------------------
    // Identity resolution
    // -----------------------------------------------------------------------

    async fn resolve_person(
        &self,
        channel: &str,
        handle: &str,
        full_name: Option<String>,
    ) -> Result<Uuid, PeopleError> {
        let now = self.clock.now();
        if let Some(identity) = self.store.get_identity(channel, handle).await? {
            self.store.touch_identity(identity.id, now).await?;
            return Ok(identity.person_id);
        }

        let person = Person::new(&self.workspace, full_name);
        let identity = Identity {
            id: Uuid::new_v4(),
            person_id: person.id,
            channel: channel.to_string(),
            handle: handle.to_string(),
            first_seen_at: now,
            last_seen_at: now,
        };
        let insight = PersonInsight::initial(person.id, now);

        match self
            .store
            .create_person_with_identity(&person, &identity, &insight)
            .await
        {
            Ok(()) => {
                info!(person_id = %person.id, channel, handle, "person created");
                Ok(person.id)
            }
            Err(StoreError::Conflict(_)) => {
                // A concurrent ingest won the race; adopt its person.
                let winner = self
                    .store
                    .get_identity(channel, handle)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Conflict(format!("identity {}:{} vanished", channel, handle))
                    })?;
                self.store.touch_identity(winner.id, now).await?;
                Ok(winner.person_id)
            }
            Err(e) => Err(e.into()),
        }
    }
}
