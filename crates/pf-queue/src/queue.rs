use std::sync::Arc;

use chrono::{DateTime, Utc};
use pf_core::clock::SharedClock;
use pf_core::error::StoreError;
use pf_core::store::{QueueStats, Store};
use pf_core::types::{Platform, QueueItem};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => QueueError::Conflict(msg),
            StoreError::NotFound(msg) => QueueError::NotFound(msg),
            other => QueueError::Store(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests / outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub workspace: String,
    pub variant_id: Uuid,
    pub platform: Platform,
    pub scheduled_for: DateTime<Utc>,
    pub priority: Option<i32>,
    pub platform_metadata: Option<serde_json::Value>,
}

/// Result of a batch enqueue. Succeeded items are never rolled back by
/// later failures; each failure carries its input index and diagnostic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<(usize, String)>,
}

// ---------------------------------------------------------------------------
// QueueService — the public queue surface
// ---------------------------------------------------------------------------

/// Caller-facing queue operations. Dispatch, leasing, and retries live in
/// the dispatcher; this type only exposes what API consumers may do.
pub struct QueueService {
    store: Arc<Store>,
    clock: SharedClock,
}

impl QueueService {
    pub fn new(store: Arc<Store>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Enqueue a publish for an existing variant.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Uuid, QueueError> {
        if request.platform.is_empty() {
            return Err(QueueError::InvalidRequest("platform must not be empty".into()));
        }
        let variant = self
            .store
            .get_variant(request.variant_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("variant {}", request.variant_id)))?;

        let mut item = QueueItem::new(
            request.workspace,
            variant.id,
            request.platform,
            request.scheduled_for,
        );
        item.priority = request.priority.unwrap_or(0);
        item.platform_metadata = request.platform_metadata;

        self.store.insert_queue_item(&item).await?;
        info!(item_id = %item.id, variant_id = %variant.id, platform = %item.platform, "enqueued");
        Ok(item.id)
    }

    /// Enqueue many publishes; partial failure never rolls back successes.
    pub async fn bulk_schedule(&self, requests: Vec<EnqueueRequest>) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for (index, request) in requests.into_iter().enumerate() {
            match self.enqueue(request).await {
                Ok(id) => outcome.succeeded.push(id),
                Err(e) => outcome.failed.push((index, e.to_string())),
            }
        }
        outcome
    }

    /// Cooperative cancel. `true` when the item moved to `cancelled`;
    /// `false` for leased/publishing/terminal items.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, QueueError> {
        Ok(self.store.cancel_queue_item(id, self.clock.now()).await?)
    }

    /// Move a `queued` item to a later time. Monotonic: earlier times are
    /// refused.
    pub async fn reschedule(&self, id: Uuid, new_time: DateTime<Utc>) -> Result<bool, QueueError> {
        Ok(self
            .store
            .reschedule_queue_item(id, new_time, self.clock.now())
            .await?)
    }

    /// Operator retry of a terminally `failed` item; resets the attempt
    /// counter.
    pub async fn retry(&self, id: Uuid) -> Result<bool, QueueError> {
        Ok(self.store.retry_queue_item(id, self.clock.now()).await?)
    }

    /// Read-only peek at due items.
    pub async fn list_due(
        &self,
        limit: usize,
        platform: Option<&str>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        Ok(self.store.list_due(self.clock.now(), limit, platform).await?)
    }

    /// Calendar window of scheduled items.
    pub async fn list_window(
        &self,
        workspace: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        Ok(self.store.list_window(workspace, start, end).await?)
    }

    pub async fn stats(&self, workspace: &str) -> Result<QueueStats, QueueError> {
        Ok(self.store.queue_stats(workspace).await?)
    }
}
