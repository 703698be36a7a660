use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pf_adapters::{AdapterError, AdapterMetrics, AdapterRegistry, CommentRecord};
use pf_core::clock::SharedClock;
use pf_core::config::CheckbackConfig;
use pf_core::error::StoreError;
use pf_core::store::Store;
use pf_core::types::{CheckbackJob, CheckbackStatus, ContentVariant};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::rollup::{snapshot_from_metrics, MetricsService};

/// Jobs claimed per polling pass.
const CLAIM_BATCH: usize = 50;

// ---------------------------------------------------------------------------
// CommentSink — feeds the people graph
// ---------------------------------------------------------------------------

/// Receiver for comments pulled alongside checkback metrics. The people
/// ingestion service sits behind this seam; the worker neither knows nor
/// cares how identities are resolved.
#[async_trait]
pub trait CommentSink: Send + Sync {
    async fn ingest_comment(&self, channel: &str, platform_post_id: &str, comment: &CommentRecord);
}

// ---------------------------------------------------------------------------
// Sync bookkeeping
// ---------------------------------------------------------------------------

/// Worker-local per-platform pull counters. Rebuilt empty on restart; the
/// durable truth lives in the job rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformSyncStats {
    pub sync_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckbackReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// CheckbackWorker
// ---------------------------------------------------------------------------

/// Polls due checkback jobs, pulls metrics through the adapters, records
/// snapshots, and keeps rollups current. Shares the queue's claim protocol:
/// `pending` rows flip to `fired` in one write transaction, so concurrent
/// workers never pull the same job.
pub struct CheckbackWorker {
    store: Arc<Store>,
    registry: Arc<AdapterRegistry>,
    clock: SharedClock,
    config: CheckbackConfig,
    fetch_timeout_secs: u64,
    metrics: Arc<MetricsService>,
    comment_sink: Option<Arc<dyn CommentSink>>,
    stats: Mutex<HashMap<String, PlatformSyncStats>>,
}

impl CheckbackWorker {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<AdapterRegistry>,
        clock: SharedClock,
        config: CheckbackConfig,
        fetch_timeout_secs: u64,
        metrics: Arc<MetricsService>,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            config,
            fetch_timeout_secs,
            metrics,
            comment_sink: None,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the people-graph ingestion path.
    pub fn with_comment_sink(mut self, sink: Arc<dyn CommentSink>) -> Self {
        self.comment_sink = Some(sink);
        self
    }

    /// Snapshot of the worker-local sync counters.
    pub fn sync_stats(&self) -> HashMap<String, PlatformSyncStats> {
        self.stats.lock().expect("stats lock poisoned").clone()
    }

    /// Claim and process one batch of due jobs.
    pub async fn run_batch(&self) -> Result<CheckbackReport, StoreError> {
        let now = self.clock.now();
        let jobs = self.store.claim_due_checkbacks(CLAIM_BATCH, now).await?;

        let mut report = CheckbackReport {
            claimed: jobs.len(),
            ..CheckbackReport::default()
        };
        for job in jobs {
            match self.process(&job, now).await {
                Ok(CheckbackStatus::Succeeded) => report.succeeded += 1,
                Ok(CheckbackStatus::Skipped) => report.skipped += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "checkback bookkeeping failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Per-job processing
    // -----------------------------------------------------------------------

    async fn process(
        &self,
        job: &CheckbackJob,
        now: DateTime<Utc>,
    ) -> Result<CheckbackStatus, StoreError> {
        let lateness = now - job.fire_at;
        if lateness > Duration::seconds(self.config.grace_window_secs as i64) {
            // Late fires are still recorded at the intended offset so the
            // time series stays dense.
            warn!(
                job_id = %job.id,
                offset_hours = job.offset_hours,
                late_mins = lateness.num_minutes(),
                "checkback fired past its grace window"
            );
        }

        let variant = match self.store.get_variant(job.variant_id).await? {
            Some(v) => v,
            None => {
                debug!(job_id = %job.id, "variant vanished, skipping checkback");
                return self.finish(job, CheckbackStatus::Skipped).await;
            }
        };
        let Some(post_id) = variant.platform_post_id.clone() else {
            debug!(job_id = %job.id, "variant has no platform post yet, skipping");
            return self.finish(job, CheckbackStatus::Skipped).await;
        };

        let Some(adapter) = self.registry.get(&job.platform) else {
            self.record_sync(&job.platform, Some("no enabled adapter"), now);
            return self.finish(job, CheckbackStatus::Failed).await;
        };

        // Bounded in-process retries; a job that exhausts them is failed for
        // good and the rollup reflects whichever platforms did report.
        let mut last_error: Option<AdapterError> = None;
        for attempt in 1..=self.config.max_pull_attempts {
            let pulled = tokio::time::timeout(
                std::time::Duration::from_secs(self.fetch_timeout_secs),
                adapter.fetch_metrics(&job.platform, &post_id),
            )
            .await
            .map_err(|_| AdapterError::timeout("fetch_metrics", self.fetch_timeout_secs))
            .and_then(|r| r);

            match pulled {
                Ok(Some(metrics)) => {
                    self.record_snapshot(job, &variant, metrics, now).await?;
                    self.pull_comments(&*adapter, job, &post_id).await;
                    self.record_sync(&job.platform, None, now);
                    return self.finish(job, CheckbackStatus::Succeeded).await;
                }
                Ok(None) => {
                    debug!(job_id = %job.id, "platform still processing, skipping this offset");
                    self.record_sync(&job.platform, None, now);
                    return self.finish(job, CheckbackStatus::Skipped).await;
                }
                Err(e) if e.is_transient() && attempt < self.config.max_pull_attempts => {
                    debug!(job_id = %job.id, attempt, error = %e, "transient pull failure");
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = &last_error {
            if e.is_auth_expired() {
                self.registry.disable(&job.platform);
            }
        }
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "pull attempts exhausted".into());
        warn!(job_id = %job.id, error = %reason, "checkback failed");
        self.record_sync(&job.platform, Some(&reason), now);
        self.finish(job, CheckbackStatus::Failed).await
    }

    async fn record_snapshot(
        &self,
        job: &CheckbackJob,
        variant: &ContentVariant,
        metrics: AdapterMetrics,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let snapshot = snapshot_from_metrics(variant, metrics, Some(job.offset_hours), now);
        self.store.insert_snapshot(&snapshot).await?;
        info!(
            variant_id = %variant.id,
            offset_hours = job.offset_hours,
            views = snapshot.views,
            likes = snapshot.likes,
            "checkback snapshot recorded"
        );

        if let Err(e) = self.metrics.recompute_rollup(variant.content_id).await {
            warn!(content_id = %variant.content_id, error = %e, "rollup recompute failed");
        }
        Ok(())
    }

    /// Pull one page of fresh comments and hand them to the people graph.
    /// Comment failures never fail the checkback; metrics are the contract.
    async fn pull_comments(
        &self,
        adapter: &dyn pf_adapters::Adapter,
        job: &CheckbackJob,
        post_id: &str,
    ) {
        let Some(sink) = &self.comment_sink else {
            return;
        };
        let since = Some(job.fire_at - Duration::hours(job.offset_hours));
        let mut cursor = None;
        loop {
            let page = match tokio::time::timeout(
                std::time::Duration::from_secs(self.fetch_timeout_secs),
                adapter.fetch_comments(&job.platform, post_id, since, cursor.clone()),
            )
            .await
            {
                Ok(Ok(page)) => page,
                Ok(Err(e)) => {
                    debug!(job_id = %job.id, error = %e, "comment pull failed");
                    return;
                }
                Err(_) => {
                    debug!(job_id = %job.id, "comment pull timed out");
                    return;
                }
            };
            for comment in &page.comments {
                sink.ingest_comment(&job.platform, post_id, comment).await;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return,
            }
        }
    }

    async fn finish(
        &self,
        job: &CheckbackJob,
        outcome: CheckbackStatus,
    ) -> Result<CheckbackStatus, StoreError> {
        self.store.finish_checkback(job.id, outcome).await?;
        Ok(outcome)
    }

    fn record_sync(&self, platform: &str, error: Option<&str>, now: DateTime<Utc>) {
        let mut stats = self.stats.lock().expect("stats lock poisoned");
        let entry = stats.entry(platform.to_string()).or_default();
        entry.sync_count += 1;
        entry.last_sync = Some(now);
        match error {
            Some(reason) => {
                entry.error_count += 1;
                entry.last_error = Some(reason.to_string());
            }
            None => entry.last_error = None,
        }
    }
}
