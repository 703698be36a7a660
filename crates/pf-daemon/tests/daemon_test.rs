use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use pf_adapters::{AdapterMetrics, AdapterRegistry, CommentRecord, MockAdapter};
use pf_core::clock::{Clock, ManualClock, SharedClock};
use pf_core::config::Config;
use pf_core::store::Store;
use pf_core::types::{Artifact, QueueStatus};
use pf_daemon::{Daemon, PostEvent};
use pf_scheduler::ScheduleRequest;

fn test_config() -> Config {
    let mut config = Config::default();
    config.scheduler.horizon_months = 1;
    config.scheduler.platforms = vec!["tiktok".into()];
    config
}

async fn build_world() -> (Daemon, Arc<MockAdapter>, ManualClock) {
    let store = Arc::new(Store::new_in_memory().await.expect("store"));
    let adapter = Arc::new(MockAdapter::new(["tiktok"]));
    let mut registry = AdapterRegistry::new();
    registry
        .register(Arc::clone(&adapter) as Arc<dyn pf_adapters::Adapter>)
        .expect("register");

    let clock = ManualClock::new(Utc::now());
    let shared: SharedClock = Arc::new(clock.clone());
    let daemon = Daemon::with_parts(test_config(), store, Arc::new(registry), shared);
    (daemon, adapter, clock)
}

#[tokio::test]
async fn full_lifecycle_schedule_publish_checkback_rollup_people() {
    let (daemon, adapter, clock) = build_world().await;
    let events = daemon.event_bus().subscribe();

    // Inventory: two short clips.
    for duration in [20.0, 30.0] {
        let mut artifact = Artifact::new("default", duration);
        artifact.ready_at = clock.now() - Duration::hours(1);
        daemon.store().insert_artifact(&artifact).await.expect("artifact");
    }

    // Plan and materialize.
    let outcome = daemon
        .scheduler()
        .auto_schedule("default", ScheduleRequest::default())
        .await
        .expect("schedule");
    assert_eq!(outcome.created, 2);

    // Jump past the horizon so everything is due, then dispatch.
    clock.advance(Duration::days(32));
    let dispatcher = daemon.build_dispatcher();
    let report = dispatcher.run_batch().await.expect("dispatch");
    assert_eq!(report.published, 2);

    // The bus saw both publishes.
    let mut published_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PostEvent::Published { .. }) {
            published_events += 1;
        }
    }
    assert_eq!(published_events, 2);

    // Every published variant got its five checkbacks.
    let window = daemon
        .store()
        .list_window("default", clock.now() - Duration::days(33), clock.now() + Duration::days(1))
        .await
        .expect("window");
    assert_eq!(window.len(), 2);
    for item in &window {
        assert_eq!(item.status, QueueStatus::Published);
        let jobs = daemon
            .store()
            .checkbacks_for_variant(item.variant_id)
            .await
            .expect("jobs");
        assert_eq!(jobs.len(), 5);
    }

    // Can the metrics and a comment the adapter will report at checkback.
    for item in &window {
        let variant = daemon
            .store()
            .get_variant(item.variant_id)
            .await
            .expect("get")
            .expect("exists");
        let post_id = variant.platform_post_id.expect("post id");
        adapter.set_metrics(
            &post_id,
            AdapterMetrics {
                views: 1000,
                likes: 100,
                comments: 10,
                shares: 5,
                ..AdapterMetrics::default()
            },
        );
        adapter.set_comments(
            &post_id,
            vec![CommentRecord {
                comment_id: format!("c_{}", post_id),
                author_handle: "@superfan".into(),
                author_name: Some("Super Fan".into()),
                text: "love this clip".into(),
                created_at: clock.now() + Duration::minutes(30),
            }],
        );
    }

    // 90 minutes later the 1h checkbacks are due.
    clock.advance(Duration::minutes(90));
    let worker = daemon.build_checkback_worker();
    let report = worker.run_batch().await.expect("checkbacks");
    assert_eq!(report.claimed, 2);
    assert_eq!(report.succeeded, 2);

    // Rollups reflect exactly what the adapter reported.
    for item in &window {
        let variant = daemon
            .store()
            .get_variant(item.variant_id)
            .await
            .expect("get")
            .expect("exists");
        let rollup = daemon
            .metrics()
            .get_rollup(variant.content_id)
            .await
            .expect("rollup");
        assert_eq!(rollup.total_views, 1000);
        assert_eq!(rollup.total_likes, 100);
        assert_eq!(rollup.best_platform.as_deref(), Some("tiktok"));
    }

    // The comment flowed into the people graph: one person despite two
    // posts (same handle, same channel), two comment events.
    let since = clock.now() - Duration::days(1);
    let active = daemon
        .store()
        .active_person_ids_since(since)
        .await
        .expect("active");
    assert_eq!(active.len(), 1, "one unified person for @superfan");
    let (person, identities) = daemon.people().get_person(active[0]).await.expect("person");
    assert_eq!(person.full_name.as_deref(), Some("Super Fan"));
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].handle, "@superfan");

    // Lens refresh sees the fresh engagement.
    let updated = daemon.lens().recompute_all_active().await.expect("lens");
    assert_eq!(updated, 1);
    let insight = daemon.people().get_insights(active[0]).await.expect("insight");
    assert!(insight.warmth_score > 0.0);
}

#[tokio::test]
async fn daemon_run_stops_on_shutdown() {
    let (daemon, _adapter, _clock) = build_world().await;
    let shutdown = daemon.shutdown_handle();

    let runner = tokio::spawn(async move { daemon.run().await });

    // Give the loops a beat to start, then stop them.
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    shutdown.trigger();

    let joined = tokio::time::timeout(StdDuration::from_secs(5), runner)
        .await
        .expect("daemon stopped in time")
        .expect("no panic");
    assert!(joined.is_ok());
}
