use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pf_adapters::{
    AdapterError, AdapterMetrics, AdapterRegistry, CommentRecord, MockAdapter,
};
use pf_core::clock::{Clock, ManualClock, SharedClock};
use pf_core::config::CheckbackConfig;
use pf_core::store::Store;
use pf_core::types::{
    CheckbackStatus, ContentItem, ContentType, ContentVariant, VariantStatus,
};
use pf_metrics::{CheckbackScheduler, CheckbackWorker, CommentSink, MetricsService};
use pf_queue::PublishListener;
use uuid::Uuid;

struct World {
    store: Arc<Store>,
    registry: Arc<AdapterRegistry>,
    clock: ManualClock,
    scheduler: CheckbackScheduler,
    metrics: Arc<MetricsService>,
}

fn shared(clock: &ManualClock) -> SharedClock {
    Arc::new(clock.clone())
}

async fn world_with(adapters: Vec<Arc<MockAdapter>>) -> World {
    let store = Arc::new(Store::new_in_memory().await.expect("store"));
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry
            .register(adapter as Arc<dyn pf_adapters::Adapter>)
            .expect("register");
    }
    let registry = Arc::new(registry);
    let clock = ManualClock::new(Utc::now());
    let metrics = Arc::new(MetricsService::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        shared(&clock),
        30,
    ));
    World {
        scheduler: CheckbackScheduler::new(Arc::clone(&store)),
        store,
        registry,
        clock,
        metrics,
    }
}

fn worker_for(world: &World) -> CheckbackWorker {
    CheckbackWorker::new(
        Arc::clone(&world.store),
        Arc::clone(&world.registry),
        shared(&world.clock),
        CheckbackConfig::default(),
        30,
        Arc::clone(&world.metrics),
    )
}

/// Insert a published variant and return it with its post id.
async fn published_variant(
    store: &Store,
    content_id: Uuid,
    platform: &str,
    post_id: &str,
    published_at: DateTime<Utc>,
) -> ContentVariant {
    let mut variant = ContentVariant::new(content_id, platform);
    variant.status = VariantStatus::Queued;
    store.insert_variant(&variant).await.expect("variant");
    store
        .mark_variant_published(variant.id, post_id.to_string(), published_at)
        .await
        .expect("publish variant");
    store.get_variant(variant.id).await.expect("get").expect("exists")
}

fn canned(views: u64, likes: u64) -> AdapterMetrics {
    AdapterMetrics {
        views,
        likes,
        comments: likes / 10,
        ..AdapterMetrics::default()
    }
}

#[tokio::test]
async fn publish_event_creates_exactly_five_jobs() {
    let world = world_with(vec![Arc::new(MockAdapter::new(["tiktok"]))]).await;
    let content = ContentItem::new("default", ContentType::Video, "clip");
    world.store.insert_content_item(&content).await.expect("content");
    let published_at = world.clock.now();
    let variant =
        published_variant(&world.store, content.id, "tiktok", "post_1", published_at).await;

    world
        .scheduler
        .on_published(variant.id, "tiktok", published_at)
        .await;
    // Replayed event: still five.
    world
        .scheduler
        .on_published(variant.id, "tiktok", published_at)
        .await;

    let jobs = world
        .store
        .checkbacks_for_variant(variant.id)
        .await
        .expect("jobs");
    assert_eq!(jobs.len(), 5);
    let offsets: Vec<i64> = jobs.iter().map(|j| j.offset_hours).collect();
    assert_eq!(offsets, vec![1, 6, 24, 72, 168]);
    for job in &jobs {
        assert_eq!(job.fire_at, published_at + Duration::hours(job.offset_hours));
        assert_eq!(job.status, CheckbackStatus::Pending);
    }

    let next = world
        .scheduler
        .next_fire_at(variant.id)
        .await
        .expect("next")
        .expect("pending");
    assert_eq!(next, published_at + Duration::hours(1));
}

#[tokio::test]
async fn due_checkback_records_snapshot_and_rollup() {
    let adapter = Arc::new(MockAdapter::new(["tiktok"]));
    adapter.set_metrics("post_1", canned(1200, 300));
    let world = world_with(vec![Arc::clone(&adapter)]).await;

    let content = ContentItem::new("default", ContentType::Video, "clip");
    world.store.insert_content_item(&content).await.expect("content");
    let published_at = world.clock.now() - Duration::hours(2);
    let variant =
        published_variant(&world.store, content.id, "tiktok", "post_1", published_at).await;
    world
        .scheduler
        .schedule_for_publish(variant.id, "tiktok", published_at)
        .await
        .expect("schedule");

    let worker = worker_for(&world);
    let report = worker.run_batch().await.expect("batch");
    assert_eq!(report.claimed, 1, "only the 1h offset is due");
    assert_eq!(report.succeeded, 1);

    let snapshots = world
        .store
        .snapshots_for_variant(variant.id)
        .await
        .expect("snapshots");
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].views, 1200);
    assert_eq!(snapshots[0].offset_hours, Some(1));

    let rollup = world
        .metrics
        .get_rollup(content.id)
        .await
        .expect("rollup exists");
    assert_eq!(rollup.total_views, 1200);
    assert_eq!(rollup.best_platform.as_deref(), Some("tiktok"));

    let stats = worker.sync_stats();
    assert_eq!(stats.get("tiktok").expect("stats").sync_count, 1);
    assert_eq!(stats.get("tiktok").expect("stats").error_count, 0);
}

#[tokio::test]
async fn rollup_with_one_platform_down_then_recovered() {
    // Scenario: variants on x and y; x reports 1000 views, y's adapter
    // errors out. The rollup reflects x alone; after y recovers, its counts
    // join without double-counting x.
    let adapter_x = Arc::new(MockAdapter::new(["x"]));
    let adapter_y = Arc::new(MockAdapter::new(["y"]));
    adapter_x.set_metrics("post_x", canned(1000, 100));
    adapter_y.script_metrics([
        Err(AdapterError::transient("y down")),
        Err(AdapterError::transient("y down")),
        Err(AdapterError::transient("y down")),
    ]);
    let world = world_with(vec![Arc::clone(&adapter_x), Arc::clone(&adapter_y)]).await;

    let content = ContentItem::new("default", ContentType::Video, "clip");
    world.store.insert_content_item(&content).await.expect("content");
    let published_at = world.clock.now() - Duration::hours(2);
    let variant_x = published_variant(&world.store, content.id, "x", "post_x", published_at).await;
    let variant_y = published_variant(&world.store, content.id, "y", "post_y", published_at).await;
    for v in [&variant_x, &variant_y] {
        world
            .scheduler
            .schedule_for_publish(v.id, &v.platform, published_at)
            .await
            .expect("schedule");
    }

    let worker = worker_for(&world);
    let report = worker.run_batch().await.expect("batch");
    assert_eq!(report.claimed, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1, "three transient pulls exhaust the job");

    let rollup = world.metrics.get_rollup(content.id).await.expect("rollup");
    assert_eq!(rollup.total_views, 1000);
    assert_eq!(rollup.best_platform.as_deref(), Some("x"));

    let stats = worker.sync_stats();
    assert_eq!(stats.get("y").expect("y stats").error_count, 1);

    // y recovers; the 6h offsets fire.
    adapter_y.set_metrics("post_y", canned(400, 40));
    adapter_x.set_metrics("post_x", canned(1000, 100));
    world.clock.advance(Duration::hours(5));
    let report = worker.run_batch().await.expect("batch 2");
    assert_eq!(report.succeeded, 2);

    let rollup = world.metrics.get_rollup(content.id).await.expect("rollup");
    assert_eq!(rollup.total_views, 1400, "y joins without double-counting x");
    assert_eq!(rollup.best_platform.as_deref(), Some("x"));
}

#[tokio::test]
async fn variant_without_post_id_is_skipped() {
    let world = world_with(vec![Arc::new(MockAdapter::new(["tiktok"]))]).await;
    let content = ContentItem::new("default", ContentType::Video, "clip");
    world.store.insert_content_item(&content).await.expect("content");

    let mut variant = ContentVariant::new(content.id, "tiktok");
    variant.status = VariantStatus::Queued;
    world.store.insert_variant(&variant).await.expect("variant");

    // Jobs exist (e.g. scheduled manually) but the variant never got a post.
    world
        .scheduler
        .schedule_for_publish(variant.id, "tiktok", world.clock.now() - Duration::hours(2))
        .await
        .expect("schedule");

    let worker = worker_for(&world);
    let report = worker.run_batch().await.expect("batch");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.succeeded, 0);
}

#[tokio::test]
async fn rollup_recompute_is_idempotent() {
    let adapter = Arc::new(MockAdapter::new(["tiktok"]));
    adapter.set_metrics("post_1", canned(777, 77));
    let world = world_with(vec![Arc::clone(&adapter)]).await;

    let content = ContentItem::new("default", ContentType::Video, "clip");
    world.store.insert_content_item(&content).await.expect("content");
    let published_at = world.clock.now() - Duration::hours(2);
    let variant =
        published_variant(&world.store, content.id, "tiktok", "post_1", published_at).await;

    world.metrics.poll_variant(variant.id).await.expect("poll");

    let first = world.metrics.recompute_rollup(content.id).await.expect("r1").expect("some");
    let second = world.metrics.recompute_rollup(content.id).await.expect("r2").expect("some");
    assert_eq!(first.total_views, second.total_views);
    assert_eq!(first.total_likes, second.total_likes);
    assert_eq!(first.total_comments, second.total_comments);
    assert_eq!(first.best_platform, second.best_platform);
    assert_eq!(first.avg_watch_time_s, second.avg_watch_time_s);
}

#[tokio::test]
async fn poll_variant_before_publish_returns_none() {
    let world = world_with(vec![Arc::new(MockAdapter::new(["tiktok"]))]).await;
    let content = ContentItem::new("default", ContentType::Video, "clip");
    world.store.insert_content_item(&content).await.expect("content");
    let variant = ContentVariant::new(content.id, "tiktok");
    world.store.insert_variant(&variant).await.expect("variant");

    let polled = world.metrics.poll_variant(variant.id).await.expect("poll");
    assert!(polled.is_none());
}

#[tokio::test]
async fn poll_recent_sweeps_published_content() {
    let adapter = Arc::new(MockAdapter::new(["tiktok"]));
    adapter.set_metrics("post_1", canned(100, 10));
    adapter.set_metrics("post_2", canned(200, 20));
    let world = world_with(vec![Arc::clone(&adapter)]).await;

    let published_at = world.clock.now() - Duration::hours(3);
    for post in ["post_1", "post_2"] {
        let content = ContentItem::new("default", ContentType::Video, "clip");
        world.store.insert_content_item(&content).await.expect("content");
        published_variant(&world.store, content.id, "tiktok", post, published_at).await;
    }

    let report = world.metrics.poll_recent(48).await.expect("poll recent");
    assert_eq!(report.content_items, 2);
    assert_eq!(report.metrics_collected, 2);
    assert_eq!(report.rollups_updated, 2);

    // Content published outside the window is ignored.
    let report = world.metrics.poll_recent(1).await.expect("poll recent");
    assert_eq!(report.content_items, 0);
}

// ---------------------------------------------------------------------------
// Comment ingestion path
// ---------------------------------------------------------------------------

struct RecordingSink {
    comments: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl CommentSink for RecordingSink {
    async fn ingest_comment(&self, channel: &str, platform_post_id: &str, comment: &CommentRecord) {
        self.comments.lock().expect("sink lock").push((
            channel.to_string(),
            platform_post_id.to_string(),
            comment.author_handle.clone(),
        ));
    }
}

#[tokio::test]
async fn checkback_feeds_comments_to_the_sink() {
    let adapter = Arc::new(MockAdapter::new(["tiktok"]));
    adapter.set_metrics("post_1", canned(100, 10));
    adapter.set_comments(
        "post_1",
        vec![
            CommentRecord {
                comment_id: "c1".into(),
                author_handle: "@alice".into(),
                author_name: Some("Alice".into()),
                text: "love this".into(),
                created_at: Utc::now(),
            },
            CommentRecord {
                comment_id: "c2".into(),
                author_handle: "@bob".into(),
                author_name: None,
                text: "nice".into(),
                created_at: Utc::now(),
            },
        ],
    );
    let world = world_with(vec![Arc::clone(&adapter)]).await;

    let content = ContentItem::new("default", ContentType::Video, "clip");
    world.store.insert_content_item(&content).await.expect("content");
    let published_at = world.clock.now() - Duration::hours(2);
    let variant =
        published_variant(&world.store, content.id, "tiktok", "post_1", published_at).await;
    world
        .scheduler
        .schedule_for_publish(variant.id, "tiktok", published_at)
        .await
        .expect("schedule");

    let sink = Arc::new(RecordingSink {
        comments: Mutex::new(Vec::new()),
    });
    let worker = worker_for(&world).with_comment_sink(Arc::clone(&sink) as Arc<dyn CommentSink>);
    worker.run_batch().await.expect("batch");

    let seen = sink.comments.lock().expect("sink lock").clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "tiktok");
    assert_eq!(seen[0].1, "post_1");
    assert_eq!(seen[0].2, "@alice");
}
