use std::sync::Arc;

use chrono::Duration;
use pf_adapters::{AdapterError, AdapterMetrics, AdapterRegistry};
use pf_core::clock::SharedClock;
use pf_core::error::StoreError;
use pf_core::store::Store;
use pf_core::types::{ContentRollup, ContentVariant, MetricSnapshot, Platform};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AdapterError> for MetricsError {
    fn from(err: AdapterError) -> Self {
        MetricsError::Unavailable(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// MetricsService — aggregator + ad-hoc polling surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PollRecentReport {
    pub content_items: usize,
    pub metrics_collected: usize,
    pub rollups_updated: usize,
}

/// Recomputes per-content rollups from the latest snapshot of each variant
/// and offers forced metric pulls outside the checkback cadence.
pub struct MetricsService {
    store: Arc<Store>,
    registry: Arc<AdapterRegistry>,
    clock: SharedClock,
    fetch_timeout_secs: u64,
}

impl MetricsService {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<AdapterRegistry>,
        clock: SharedClock,
        fetch_timeout_secs: u64,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            fetch_timeout_secs,
        }
    }

    /// Rebuild the rollup for a content item from the most recent snapshot
    /// of each of its variants. Pure derived state: recomputing without new
    /// snapshots yields identical counters.
    pub async fn recompute_rollup(
        &self,
        content_id: Uuid,
    ) -> Result<Option<ContentRollup>, MetricsError> {
        let latest = self.store.latest_snapshots_for_content(content_id).await?;
        if latest.is_empty() {
            debug!(content_id = %content_id, "no snapshots to aggregate");
            return Ok(None);
        }

        let rollup = aggregate(content_id, &latest, self.clock.now());
        self.store.upsert_rollup(&rollup).await?;
        info!(
            content_id = %content_id,
            total_views = rollup.total_views,
            variants = latest.len(),
            best_platform = rollup.best_platform.as_deref().unwrap_or("-"),
            "rollup recomputed"
        );
        Ok(Some(rollup))
    }

    pub async fn get_rollup(&self, content_id: Uuid) -> Result<ContentRollup, MetricsError> {
        self.store
            .get_rollup(content_id)
            .await?
            .ok_or_else(|| MetricsError::NotFound(format!("rollup for content {}", content_id)))
    }

    /// Force a metric pull for one variant, outside the checkback cadence.
    /// Returns `None` when the variant has no post yet or the platform is
    /// still processing.
    pub async fn poll_variant(
        &self,
        variant_id: Uuid,
    ) -> Result<Option<MetricSnapshot>, MetricsError> {
        let variant = self
            .store
            .get_variant(variant_id)
            .await?
            .ok_or_else(|| MetricsError::NotFound(format!("variant {}", variant_id)))?;

        let Some(post_id) = variant.platform_post_id.clone() else {
            debug!(variant_id = %variant_id, "variant not yet published, nothing to poll");
            return Ok(None);
        };
        let Some(adapter) = self.registry.get(&variant.platform) else {
            return Err(MetricsError::Unavailable(format!(
                "no enabled adapter for platform {}",
                variant.platform
            )));
        };

        let fetched = tokio::time::timeout(
            std::time::Duration::from_secs(self.fetch_timeout_secs),
            adapter.fetch_metrics(&variant.platform, &post_id),
        )
        .await
        .map_err(|_| AdapterError::timeout("fetch_metrics", self.fetch_timeout_secs))??;

        let Some(metrics) = fetched else {
            return Ok(None);
        };

        let snapshot = snapshot_from_metrics(&variant, metrics, None, self.clock.now());
        self.store.insert_snapshot(&snapshot).await?;
        self.recompute_rollup(variant.content_id).await?;
        Ok(Some(snapshot))
    }

    /// Poll every variant of every content item published in the last
    /// `hours` hours. Per-item failures are logged and skipped; the sweep
    /// itself keeps going.
    pub async fn poll_recent(&self, hours: u32) -> Result<PollRecentReport, MetricsError> {
        let since = self.clock.now() - Duration::hours(hours as i64);
        let content_ids = self.store.content_ids_published_since(since).await?;

        let mut report = PollRecentReport {
            content_items: content_ids.len(),
            ..PollRecentReport::default()
        };

        for content_id in content_ids {
            let variants = self.store.variants_for_content(content_id).await?;
            let mut collected_here = 0usize;
            for variant in variants.iter().filter(|v| v.published_at.is_some()) {
                match self.poll_variant(variant.id).await {
                    Ok(Some(_)) => collected_here += 1,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(variant_id = %variant.id, error = %e, "poll failed, continuing sweep");
                    }
                }
            }
            if collected_here > 0 {
                report.metrics_collected += collected_here;
                report.rollups_updated += 1;
            }
        }

        info!(
            content_items = report.content_items,
            metrics_collected = report.metrics_collected,
            rollups_updated = report.rollups_updated,
            "recent-content poll complete"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Sum counters across the latest snapshot per variant, average watch time
/// over variants that report it, and pick the best platform by views with a
/// lexicographic tie-break.
pub(crate) fn aggregate(
    content_id: Uuid,
    latest: &[(Platform, MetricSnapshot)],
    now: chrono::DateTime<chrono::Utc>,
) -> ContentRollup {
    let mut rollup = ContentRollup {
        content_id,
        total_views: 0,
        total_impressions: 0,
        total_likes: 0,
        total_comments: 0,
        total_shares: 0,
        total_saves: 0,
        total_clicks: 0,
        avg_watch_time_s: None,
        best_platform: None,
        last_updated_at: now,
    };

    let mut watch_times = Vec::new();
    let mut views_by_platform: std::collections::HashMap<&str, u64> = std::collections::HashMap::new();

    for (platform, snapshot) in latest {
        rollup.total_views += snapshot.views;
        rollup.total_impressions += snapshot.impressions.unwrap_or(0);
        rollup.total_likes += snapshot.likes;
        rollup.total_comments += snapshot.comments;
        rollup.total_shares += snapshot.shares;
        rollup.total_saves += snapshot.saves.unwrap_or(0);
        rollup.total_clicks += snapshot.clicks.unwrap_or(0);
        if let Some(watch) = snapshot.watch_time_s {
            watch_times.push(watch);
        }
        *views_by_platform.entry(platform.as_str()).or_insert(0) += snapshot.views;
    }

    if !watch_times.is_empty() {
        rollup.avg_watch_time_s = Some(watch_times.iter().sum::<f64>() / watch_times.len() as f64);
    }

    rollup.best_platform = views_by_platform
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(platform, _)| platform.to_string());

    rollup
}

/// Bind adapter-reported metrics to a variant as an append-only snapshot.
pub(crate) fn snapshot_from_metrics(
    variant: &ContentVariant,
    metrics: AdapterMetrics,
    offset_hours: Option<i64>,
    now: chrono::DateTime<chrono::Utc>,
) -> MetricSnapshot {
    MetricSnapshot {
        id: Uuid::new_v4(),
        variant_id: variant.id,
        snapshot_at: now,
        offset_hours,
        views: metrics.views,
        impressions: metrics.impressions,
        likes: metrics.likes,
        comments: metrics.comments,
        shares: metrics.shares,
        saves: metrics.saves,
        clicks: metrics.clicks,
        watch_time_s: metrics.watch_time_s,
        traffic_type: variant.traffic_type(),
        raw: metrics.raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap(views: u64, watch: Option<f64>) -> MetricSnapshot {
        let mut s = MetricSnapshot::empty(Uuid::new_v4(), Utc::now());
        s.views = views;
        s.likes = views / 10;
        s.watch_time_s = watch;
        s
    }

    #[test]
    fn counters_sum_across_platforms() {
        let latest = vec![
            ("tiktok".to_string(), snap(1000, Some(10.0))),
            ("instagram".to_string(), snap(500, None)),
        ];
        let rollup = aggregate(Uuid::new_v4(), &latest, Utc::now());
        assert_eq!(rollup.total_views, 1500);
        assert_eq!(rollup.total_likes, 150);
        assert_eq!(rollup.avg_watch_time_s, Some(10.0), "only reporting variants count");
        assert_eq!(rollup.best_platform.as_deref(), Some("tiktok"));
    }

    #[test]
    fn best_platform_tie_breaks_lexicographically() {
        let latest = vec![
            ("youtube".to_string(), snap(500, None)),
            ("instagram".to_string(), snap(500, None)),
        ];
        let rollup = aggregate(Uuid::new_v4(), &latest, Utc::now());
        assert_eq!(rollup.best_platform.as_deref(), Some("instagram"));
    }

    #[test]
    fn watch_time_averages_over_reporters() {
        let latest = vec![
            ("a".to_string(), snap(1, Some(10.0))),
            ("b".to_string(), snap(1, Some(20.0))),
            ("c".to_string(), snap(1, None)),
        ];
        let rollup = aggregate(Uuid::new_v4(), &latest, Utc::now());
        assert_eq!(rollup.avg_watch_time_s, Some(15.0));
    }
}
