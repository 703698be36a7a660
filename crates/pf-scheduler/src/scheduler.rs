use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pf_core::clock::SharedClock;
use pf_core::config::SchedulerConfig;
use pf_core::error::StoreError;
use pf_core::store::Store;
use pf_core::types::{
    ContentItem, ContentType, ContentVariant, QueueItem, QueueStatus, VariantStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::inventory::{Inventory, InventoryScanner};
use crate::plan::{compute_plan, SchedulePlan};
use crate::windows::derive_posting_hours;

/// A crashed planner's lock is taken over after this long.
const LOCK_STALE_AFTER_MINS: i64 = 10;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("inventory unavailable: {0}")]
    InventoryUnavailable(String),
    /// A plan run is already in flight for this workspace.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// SchedulerService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    pub created: u32,
    pub skipped: u32,
    pub evicted: u32,
}

/// Options for one `auto_schedule` invocation; `None` fields fall back to
/// the service configuration.
#[derive(Debug, Clone, Default)]
pub struct ScheduleRequest {
    pub force_reschedule: Option<bool>,
    pub config: Option<SchedulerConfig>,
}

/// Plans and materializes the publish schedule for a workspace.
///
/// One plan run at a time per workspace, guarded by an advisory lock row;
/// dispatchers keep running concurrently since they only touch leased state.
pub struct SchedulerService {
    store: Arc<Store>,
    clock: SharedClock,
    config: SchedulerConfig,
}

impl SchedulerService {
    pub fn new(store: Arc<Store>, clock: SharedClock, config: SchedulerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Current inventory, classified by form.
    pub async fn get_inventory(&self, workspace: &str) -> Result<Inventory, ScheduleError> {
        InventoryScanner::scan(&self.store, workspace).await
    }

    /// Compute the plan for the current inventory without writing anything.
    pub async fn get_plan(&self, workspace: &str) -> Result<SchedulePlan, ScheduleError> {
        self.config
            .validate()
            .map_err(|e| ScheduleError::InvalidConfig(e.to_string()))?;
        let inventory = InventoryScanner::scan(&self.store, workspace).await?;
        Ok(compute_plan(
            inventory.short_count(),
            inventory.long_count(),
            &self.config,
        ))
    }

    /// Plan and materialize queue items for everything the cadence admits.
    pub async fn auto_schedule(
        &self,
        workspace: &str,
        request: ScheduleRequest,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let config = request.config.unwrap_or_else(|| self.config.clone());
        config
            .validate()
            .map_err(|e| ScheduleError::InvalidConfig(e.to_string()))?;
        if config.platforms.is_empty() {
            return Err(ScheduleError::InvalidConfig(
                "no target platforms configured".into(),
            ));
        }
        let force = request.force_reschedule.unwrap_or(config.force_reschedule);

        let now = self.clock.now();
        let acquired = self
            .store
            .acquire_workspace_lock(workspace, now, Duration::minutes(LOCK_STALE_AFTER_MINS))
            .await?;
        if !acquired {
            return Err(ScheduleError::Conflict(format!(
                "scheduler already running for workspace {}",
                workspace
            )));
        }

        let result = self.plan_and_materialize(workspace, &config, force, now).await;

        if let Err(e) = self.store.release_workspace_lock(workspace).await {
            warn!(workspace, error = %e, "failed to release workspace lock");
        }
        result
    }

    /// Gap-filling re-run after new content arrives: plans whatever the
    /// existing schedule is missing, never evicting anything.
    pub async fn update_on_new_content(&self, workspace: &str) -> Result<u32, ScheduleError> {
        let outcome = self
            .auto_schedule(
                workspace,
                ScheduleRequest {
                    force_reschedule: Some(false),
                    config: None,
                },
            )
            .await?;
        Ok(outcome.created)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn plan_and_materialize(
        &self,
        workspace: &str,
        config: &SchedulerConfig,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        let mut outcome = ScheduleOutcome::default();

        let window_start = day_start(now + Duration::days(1));
        let window_end = window_start + Duration::days(config.horizon_days() as i64);

        if force {
            outcome.evicted = self
                .evict_window(workspace, window_start, window_end, now)
                .await?;
        }

        let mut inventory = InventoryScanner::scan(&self.store, workspace).await?;
        let plan = compute_plan(inventory.short_count(), inventory.long_count(), config);
        info!(
            workspace,
            total_short = plan.total_short,
            total_long = plan.total_long,
            can_extend_horizon = plan.can_extend_horizon,
            "schedule plan computed"
        );
        if plan.is_empty() {
            return Ok(outcome);
        }

        // Platform-preferred hours win over the configured defaults where
        // enough history exists.
        let mut hours_by_platform: HashMap<String, Vec<u32>> = HashMap::new();
        for platform in &config.platforms {
            let hours = match derive_posting_hours(&self.store, platform, now).await {
                Ok(Some(derived)) if !derived.is_empty() => derived,
                Ok(_) => config.preferred_hours.clone(),
                Err(e) => {
                    warn!(platform = %platform, error = %e, "posting-window derivation failed");
                    config.preferred_hours.clone()
                }
            };
            hours_by_platform.insert(platform.clone(), hours);
        }

        let mut rr = 0usize;
        for day in &plan.days {
            let mut slot_in_day = 0usize;
            for form_is_short in slot_order(day.short, day.long) {
                let artifact = if form_is_short {
                    inventory.short.remove(0)
                } else {
                    inventory.long.remove(0)
                };

                let platform = &config.platforms[rr % config.platforms.len()];
                rr += 1;

                let hours = &hours_by_platform[platform];
                let hour = hours[slot_in_day % hours.len()];
                let mut scheduled_for =
                    window_start + Duration::days(day.day as i64) + Duration::hours(hour as i64);
                // A horizon shift can land a slot in the past; round up.
                if scheduled_for <= now {
                    scheduled_for = now + Duration::minutes(1);
                }
                slot_in_day += 1;

                match self
                    .materialize(workspace, &artifact.id, platform, scheduled_for, now)
                    .await
                {
                    Ok(()) => outcome.created += 1,
                    Err(StoreError::Conflict(reason)) => {
                        // Concurrent plan got here first; fill the gap and
                        // move on rather than duplicating the slot.
                        debug!(artifact = %artifact.id, %reason, "slot skipped");
                        outcome.skipped += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!(
            workspace,
            created = outcome.created,
            skipped = outcome.skipped,
            evicted = outcome.evicted,
            "schedule materialized"
        );
        Ok(outcome)
    }

    async fn materialize(
        &self,
        workspace: &str,
        artifact_id: &Uuid,
        platform: &str,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let content = ContentItem::new(
            workspace,
            ContentType::Video,
            format!("clip-{}", &artifact_id.to_string()[..8]),
        );
        let mut variant = ContentVariant::new(content.id, platform);
        variant.status = VariantStatus::Queued;

        let mut item = QueueItem::new(workspace, variant.id, platform, scheduled_for);
        item.platform_metadata = Some(serde_json::json!({ "artifact_id": artifact_id }));

        self.store
            .materialize_scheduled(*artifact_id, &content, &variant, &item, now)
            .await
    }

    /// Cancel still-queued items in the window and return their artifacts
    /// to inventory. Terminal and in-flight items are never touched.
    async fn evict_window(
        &self,
        workspace: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u32, ScheduleError> {
        let items = self.store.list_window(workspace, start, end).await?;
        let mut evicted = 0u32;
        for item in items {
            if item.status != QueueStatus::Queued {
                continue;
            }
            if !self.store.cancel_queue_item(item.id, now).await? {
                continue;
            }
            evicted += 1;
            if let Some(artifact_id) = item
                .platform_metadata
                .as_ref()
                .and_then(|m| m.get("artifact_id"))
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                self.store.release_artifact(artifact_id).await?;
            }
        }
        debug!(workspace, evicted, "window evicted for replan");
        Ok(evicted)
    }
}

/// Interleave a day's slots shorts-first. Returns a bool per slot: `true`
/// for a short slot.
fn slot_order(short: u32, long: u32) -> Vec<bool> {
    let mut order = Vec::with_capacity((short + long) as usize);
    order.extend(std::iter::repeat(true).take(short as usize));
    order.extend(std::iter::repeat(false).take(long as usize));
    order
}

/// Midnight UTC of the instant's calendar day.
fn day_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let date = ts.date_naive();
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight exists"))
}
