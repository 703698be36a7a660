use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pf_core::error::StoreError;
use pf_core::store::Store;
use pf_core::types::{CheckbackJob, CHECKBACK_OFFSETS_HOURS};
use pf_queue::PublishListener;
use tracing::{error, info};
use uuid::Uuid;

/// Materializes the standard checkback rows for every publish.
///
/// Jobs are durable and deduplicated on `(variant_id, offset_hours)`, so a
/// replayed publish event is harmless and checkbacks survive restarts
/// without any in-process timer state.
pub struct CheckbackScheduler {
    store: Arc<Store>,
}

impl CheckbackScheduler {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Insert the five standard checkbacks for a publish. Returns how many
    /// were newly created (zero on replay).
    pub async fn schedule_for_publish(
        &self,
        variant_id: Uuid,
        platform: &str,
        published_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let jobs: Vec<CheckbackJob> = CHECKBACK_OFFSETS_HOURS
            .iter()
            .map(|hours| CheckbackJob::new(variant_id, platform, published_at, *hours))
            .collect();
        let created = self.store.insert_checkback_jobs(&jobs).await?;
        info!(variant_id = %variant_id, platform, created, "checkbacks scheduled");
        Ok(created)
    }

    /// Skip all still-pending checkbacks of a variant (used when a variant
    /// is withdrawn). Returns the number skipped.
    pub async fn cancel_for_variant(&self, variant_id: Uuid) -> Result<u64, StoreError> {
        self.store.skip_checkbacks_for_variant(variant_id).await
    }

    /// Earliest pending checkback fire time for a variant.
    pub async fn next_fire_at(&self, variant_id: Uuid) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.store.next_checkback_at(variant_id).await
    }
}

#[async_trait]
impl PublishListener for CheckbackScheduler {
    async fn on_published(&self, variant_id: Uuid, platform: &str, published_at: DateTime<Utc>) {
        if let Err(e) = self
            .schedule_for_publish(variant_id, platform, published_at)
            .await
        {
            // The worker cannot pull what was never scheduled; loud failure,
            // next publish replay or an operator backfill repairs it.
            error!(variant_id = %variant_id, error = %e, "failed to schedule checkbacks");
        }
    }
}
