use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use pf_core::error::StoreError;
use pf_core::store::Store;
use pf_core::types::MetricSnapshot;
use tracing::debug;

/// How far back publish history informs the posting windows.
const HISTORY_DAYS: i64 = 90;

/// Minimum observations before derived hours override the configured
/// defaults.
const MIN_SAMPLES: usize = 5;

/// Historically strong posting hours for one platform, best first.
///
/// Derived from the latest snapshot of each post published in the lookback
/// window: posts are grouped by hour-of-day of their publish instant and
/// each hour scored by `0.6 * engagement_rate + 0.4 * views/1000`. Platforms
/// without enough history return `None` and the caller falls back to the
/// configured `preferred_hours`.
pub async fn derive_posting_hours(
    store: &Store,
    platform: &str,
    now: DateTime<Utc>,
) -> Result<Option<Vec<u32>>, StoreError> {
    let since = now - chrono::Duration::days(HISTORY_DAYS);
    let history = store.latest_snapshots_for_platform(platform, since).await?;
    if history.len() < MIN_SAMPLES {
        return Ok(None);
    }
    Ok(Some(rank_hours(&history)))
}

fn rank_hours(history: &[(DateTime<Utc>, MetricSnapshot)]) -> Vec<u32> {
    #[derive(Default)]
    struct HourAccum {
        count: u32,
        engagement: f64,
        views: u64,
    }

    let mut by_hour: HashMap<u32, HourAccum> = HashMap::new();
    for (published_at, snapshot) in history {
        let accum = by_hour.entry(published_at.hour()).or_default();
        accum.count += 1;
        accum.engagement += engagement_rate(snapshot);
        accum.views += snapshot.views;
    }

    let mut scored: Vec<(u32, f64)> = by_hour
        .into_iter()
        .map(|(hour, accum)| {
            let avg_engagement = accum.engagement / accum.count as f64;
            let avg_views = accum.views as f64 / accum.count as f64;
            (hour, avg_engagement * 0.6 + avg_views / 1000.0 * 0.4)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let hours: Vec<u32> = scored.into_iter().map(|(hour, _)| hour).collect();
    debug!(?hours, "posting hours ranked from history");
    hours
}

/// Interactions per view; zero-view posts contribute nothing.
fn engagement_rate(snapshot: &MetricSnapshot) -> f64 {
    if snapshot.views == 0 {
        return 0.0;
    }
    let interactions = snapshot.likes
        + snapshot.comments
        + snapshot.shares
        + snapshot.saves.unwrap_or(0)
        + snapshot.clicks.unwrap_or(0);
    interactions as f64 / snapshot.views as f64
}
