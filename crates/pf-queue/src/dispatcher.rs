use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pf_adapters::{AdapterError, AdapterRegistry, PublishRequest, PublishResult, RateQuota};
use pf_core::clock::SharedClock;
use pf_core::config::QueueConfig;
use pf_core::error::StoreError;
use pf_core::store::Store;
use pf_core::types::QueueItem;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::rate_limit::PublishRateLimiter;

/// How long an item parks when its adapter is missing, disabled, or over
/// its rate limit.
const PARK_MINS: i64 = 5;

// ---------------------------------------------------------------------------
// PublishListener
// ---------------------------------------------------------------------------

/// Observer of successful publishes. The checkback scheduler registers one
/// to materialize metric-pull jobs; the daemon registers one to fan events
/// out to its bus. Listeners own their failure handling.
#[async_trait]
pub trait PublishListener: Send + Sync {
    async fn on_published(&self, variant_id: Uuid, platform: &str, published_at: DateTime<Utc>);
}

// ---------------------------------------------------------------------------
// BatchReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub leased: usize,
    pub published: usize,
    pub retried: usize,
    pub failed: usize,
    /// Returned to the queue without an attempt (rate limit, adapter
    /// disabled or absent, expired credentials).
    pub parked: usize,
    /// Results thrown away because the item was no longer ours to complete
    /// (cancelled mid-flight, duplicate publish).
    pub discarded: usize,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// One dispatcher worker: leases due queue items, drives the platform
/// adapter for each, and routes outcomes through the queue state machine.
///
/// Multiple dispatchers may run concurrently against the same store; the
/// lease protocol keeps them from ever holding the same item.
pub struct Dispatcher {
    store: Arc<Store>,
    registry: Arc<AdapterRegistry>,
    clock: SharedClock,
    config: QueueConfig,
    backoff: BackoffPolicy,
    limiter: PublishRateLimiter,
    listeners: Vec<Arc<dyn PublishListener>>,
    /// Adaptive batch size: halves when a batch runs slow, doubles on idle
    /// polls, clamped to `[1, max_batch_size]`.
    batch_size: AtomicUsize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<AdapterRegistry>,
        clock: SharedClock,
        config: QueueConfig,
    ) -> Self {
        let backoff = BackoffPolicy::from_secs(config.backoff_base_secs, config.backoff_cap_secs);
        let batch_size = AtomicUsize::new(config.batch_size.max(1));
        Self {
            store,
            registry,
            clock,
            config,
            backoff,
            limiter: PublishRateLimiter::new(),
            listeners: Vec::new(),
            batch_size,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn PublishListener>) {
        self.listeners.push(listener);
    }

    pub fn current_batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    /// Run one lease-dispatch cycle. Returns what happened to each leased
    /// item; store errors abort the batch (leased items will be reaped).
    pub async fn run_batch(&self) -> Result<BatchReport, StoreError> {
        let now = self.clock.now();
        self.store.promote_due_retries(now).await?;

        let batch = self.batch_size.load(Ordering::Relaxed);
        let items = self
            .store
            .lease_due(batch, now, Duration::seconds(self.config.lease_ttl_secs as i64))
            .await?;

        let mut report = BatchReport {
            leased: items.len(),
            ..BatchReport::default()
        };

        if items.is_empty() {
            // Idle poll: widen the next batch up to the cap.
            let next = (batch * 2).min(self.config.max_batch_size.max(1));
            self.batch_size.store(next, Ordering::Relaxed);
            return Ok(report);
        }

        let started = Instant::now();
        for item in items {
            self.dispatch(item, &mut report).await;
        }

        let avg_ms = started.elapsed().as_millis() as u64 / report.leased.max(1) as u64;
        if avg_ms > self.config.target_batch_latency_ms {
            let next = (batch / 2).max(1);
            self.batch_size.store(next, Ordering::Relaxed);
            debug!(avg_ms, next, "slow batch, shrinking");
        }

        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Per-item dispatch
    // -----------------------------------------------------------------------

    async fn dispatch(&self, item: QueueItem, report: &mut BatchReport) {
        let now = self.clock.now();
        let platform = item.platform.clone();

        let Some(adapter) = self.registry.get(&platform) else {
            // Absent or disabled adapter preserves the queue: park and move on.
            self.park(&item, now + Duration::minutes(PARK_MINS), now, report)
                .await;
            return;
        };

        let quota = adapter
            .rate_limits()
            .get("publish")
            .copied()
            .unwrap_or_else(|| RateQuota::per_day(100));
        if let Err(retry_after) = self.limiter.check(&platform, quota) {
            let next = now + Duration::seconds(retry_after.as_secs().max(1) as i64);
            self.park(&item, next, now, report).await;
            return;
        }

        if let Err(e) = self.store.begin_publish(item.id, now).await {
            // Cancelled or reaped between lease and dispatch.
            debug!(item_id = %item.id, error = %e, "item no longer leased, skipping");
            report.discarded += 1;
            return;
        }

        let request = self.build_request(&item).await;
        let attempt = item.attempt_count + 1;
        let timeout_secs = self.config.publish_timeout_secs;
        let outcome = match tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            adapter.publish(&platform, &request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AdapterError::timeout("publish", timeout_secs)),
        };

        match outcome {
            Ok(result) => {
                self.complete_publish(&item, result, attempt, report).await;
            }
            Err(e) if e.is_auth_expired() => {
                // Disable the adapter, alert, and give the attempt back.
                error!(platform = %platform, error = %e, "adapter credentials expired");
                self.registry.disable(&platform);
                let next = now + Duration::minutes(PARK_MINS);
                match self
                    .store
                    .mark_retry(item.id, item.attempt_count, next, &e.to_string(), now)
                    .await
                {
                    Ok(()) => report.parked += 1,
                    Err(err) => {
                        debug!(item_id = %item.id, error = %err, "park after auth failure lost a race");
                        report.discarded += 1;
                    }
                }
            }
            Err(e) if e.is_transient() => {
                if attempt < item.max_attempts {
                    let delay = self.backoff.delay(attempt);
                    let next = now + Duration::seconds(delay.as_secs().max(1) as i64);
                    match self
                        .store
                        .mark_retry(item.id, attempt, next, &e.to_string(), now)
                        .await
                    {
                        Ok(()) => {
                            info!(
                                item_id = %item.id,
                                attempt,
                                next = %next,
                                error = %e,
                                "transient publish failure, backing off"
                            );
                            report.retried += 1;
                        }
                        Err(err) => {
                            debug!(item_id = %item.id, error = %err, "retry transition lost a race");
                            report.discarded += 1;
                        }
                    }
                } else {
                    // Attempts exhausted on an ambiguous error: the publish
                    // may have landed. Ask the adapter before giving up.
                    if adapter.supports_lookup_recent() {
                        if let Ok(Some(post_id)) =
                            adapter.lookup_recent(&platform, item.variant_id).await
                        {
                            info!(item_id = %item.id, post_id, "recovered publish via lookup_recent");
                            let result = PublishResult {
                                platform_post_id: post_id,
                                platform_url: None,
                                published_at: now,
                            };
                            self.complete_publish(&item, result, attempt, report).await;
                            return;
                        }
                    }
                    self.fail_terminal(&item, attempt, &e.to_string(), now, report)
                        .await;
                }
            }
            Err(e) => {
                // Permanent: no retry.
                self.fail_terminal(&item, attempt, &e.to_string(), now, report)
                    .await;
            }
        }
    }

    async fn complete_publish(
        &self,
        item: &QueueItem,
        result: PublishResult,
        attempt: u32,
        report: &mut BatchReport,
    ) {
        // The queue's publish instant is our clock, not the adapter's; the
        // adapter-reported timestamp stays available in its raw payload.
        let now = self.clock.now();
        match self
            .store
            .mark_published(
                item.id,
                now,
                result.platform_post_id.clone(),
                result.platform_url.clone(),
                attempt,
                now,
            )
            .await
        {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .mark_variant_published(item.variant_id, result.platform_post_id.clone(), now)
                    .await
                {
                    warn!(variant_id = %item.variant_id, error = %e, "variant publish mark failed");
                }
                info!(
                    item_id = %item.id,
                    variant_id = %item.variant_id,
                    platform = %item.platform,
                    post_id = %result.platform_post_id,
                    "published"
                );
                for listener in &self.listeners {
                    listener
                        .on_published(item.variant_id, &item.platform, now)
                        .await;
                }
                report.published += 1;
            }
            Err(StoreError::Conflict(reason)) => {
                // Cancelled mid-flight or a duplicate publish: the result is
                // discarded, the terminal state already written wins.
                warn!(item_id = %item.id, %reason, "publish result discarded");
                report.discarded += 1;
            }
            Err(e) => {
                error!(item_id = %item.id, error = %e, "failed to record publish");
                report.discarded += 1;
            }
        }
    }

    async fn fail_terminal(
        &self,
        item: &QueueItem,
        attempt: u32,
        reason: &str,
        now: DateTime<Utc>,
        report: &mut BatchReport,
    ) {
        match self.store.mark_failed(item.id, attempt, reason, now).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_variant_failed(item.variant_id).await {
                    warn!(variant_id = %item.variant_id, error = %e, "variant fail mark failed");
                }
                warn!(item_id = %item.id, attempt, reason, "publish failed terminally");
                report.failed += 1;
            }
            Err(e) => {
                debug!(item_id = %item.id, error = %e, "fail transition lost a race");
                report.discarded += 1;
            }
        }
    }

    async fn park(
        &self,
        item: &QueueItem,
        next_at: DateTime<Utc>,
        now: DateTime<Utc>,
        report: &mut BatchReport,
    ) {
        match self.store.unlease(item.id, next_at, now).await {
            Ok(()) => {
                debug!(item_id = %item.id, platform = %item.platform, next = %next_at, "parked");
                report.parked += 1;
            }
            Err(e) => {
                debug!(item_id = %item.id, error = %e, "park lost a race");
                report.discarded += 1;
            }
        }
    }

    /// Assemble the adapter-facing request for a queue item. The caption
    /// falls back to the content title; richer captions arrive through the
    /// item's platform metadata.
    async fn build_request(&self, item: &QueueItem) -> PublishRequest {
        let mut request = PublishRequest::new(item.variant_id);
        request.platform_metadata = item.platform_metadata.clone();

        if let Ok(Some(variant)) = self.store.get_variant(item.variant_id).await {
            if let Ok(Some(content)) = self.store.get_content_item(variant.content_id).await {
                request.caption = content.title;
            }
        }
        if let Some(meta) = &item.platform_metadata {
            if let Some(caption) = meta.get("caption").and_then(|v| v.as_str()) {
                request.caption = caption.to_string();
            }
            if let Some(urls) = meta.get("media_urls").and_then(|v| v.as_array()) {
                request.media_urls = urls
                    .iter()
                    .filter_map(|u| u.as_str().map(String::from))
                    .collect();
            }
            if let Some(tags) = meta.get("hashtags").and_then(|v| v.as_array()) {
                request.hashtags = tags
                    .iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect();
            }
        }
        request
    }
}
