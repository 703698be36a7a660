use std::sync::Arc;

use chrono::{Duration, Utc};
use pf_core::clock::{ManualClock, SharedClock};
use pf_core::store::Store;
use pf_core::types::{ContentItem, ContentType, ContentVariant, QueueStatus};
use pf_queue::{EnqueueRequest, QueueError, QueueService};
use uuid::Uuid;

async fn setup() -> (Arc<Store>, QueueService, ContentVariant) {
    let store = Arc::new(Store::new_in_memory().await.expect("store"));
    let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
    let service = QueueService::new(Arc::clone(&store), clock);

    let content = ContentItem::new("default", ContentType::Video, "clip");
    store.insert_content_item(&content).await.expect("content");
    let variant = ContentVariant::new(content.id, "tiktok");
    store.insert_variant(&variant).await.expect("variant");

    (store, service, variant)
}

fn request(variant_id: Uuid) -> EnqueueRequest {
    EnqueueRequest {
        workspace: "default".into(),
        variant_id,
        platform: "tiktok".into(),
        scheduled_for: Utc::now() + Duration::hours(1),
        priority: None,
        platform_metadata: None,
    }
}

#[tokio::test]
async fn enqueue_creates_a_queued_item() {
    let (store, service, variant) = setup().await;

    let id = service.enqueue(request(variant.id)).await.expect("enqueue");
    let item = store.get_queue_item(id).await.expect("get").expect("exists");
    assert_eq!(item.status, QueueStatus::Queued);
    assert_eq!(item.variant_id, variant.id);
    assert_eq!(item.priority, 0);
}

#[tokio::test]
async fn enqueue_unknown_variant_is_not_found() {
    let (_store, service, _variant) = setup().await;

    let err = service
        .enqueue(request(Uuid::new_v4()))
        .await
        .expect_err("missing variant");
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn enqueue_empty_platform_is_invalid() {
    let (_store, service, variant) = setup().await;

    let mut bad = request(variant.id);
    bad.platform = String::new();
    let err = service.enqueue(bad).await.expect_err("empty platform");
    assert!(matches!(err, QueueError::InvalidRequest(_)));
}

#[tokio::test]
async fn duplicate_open_enqueue_conflicts() {
    let (_store, service, variant) = setup().await;

    service.enqueue(request(variant.id)).await.expect("first");
    let err = service
        .enqueue(request(variant.id))
        .await
        .expect_err("duplicate open item");
    assert!(matches!(err, QueueError::Conflict(_)));
}

#[tokio::test]
async fn bulk_schedule_reports_partial_failures() {
    let (store, service, variant) = setup().await;

    // A second valid variant on another platform.
    let other = ContentVariant::new(variant.content_id, "instagram");
    store.insert_variant(&other).await.expect("variant");
    let mut other_request = request(other.id);
    other_request.platform = "instagram".into();

    let outcome = service
        .bulk_schedule(vec![
            request(variant.id),
            request(Uuid::new_v4()), // unknown variant
            other_request,
        ])
        .await;

    assert_eq!(outcome.succeeded.len(), 2, "successes are not rolled back");
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, 1, "failure carries its input index");
}

#[tokio::test]
async fn cancel_reschedule_retry_surface() {
    let (store, service, variant) = setup().await;
    let id = service.enqueue(request(variant.id)).await.expect("enqueue");

    // Reschedule forward works, backward does not.
    let item = store.get_queue_item(id).await.expect("get").expect("exists");
    assert!(service
        .reschedule(id, item.scheduled_for + Duration::hours(2))
        .await
        .expect("reschedule"));
    assert!(!service
        .reschedule(id, item.scheduled_for - Duration::hours(2))
        .await
        .expect("reschedule"));

    // Cancel a queued item succeeds; retry only applies to failed items.
    assert!(!service.retry(id).await.expect("retry on queued is a no-op"));
    assert!(service.cancel(id).await.expect("cancel"));
    assert!(!service.cancel(id).await.expect("cancel is not repeatable"));
}

#[tokio::test]
async fn list_due_peeks_without_claiming() {
    let (_store, service, variant) = setup().await;

    let mut due_now = request(variant.id);
    due_now.scheduled_for = Utc::now() - Duration::minutes(5);
    service.enqueue(due_now).await.expect("enqueue");

    let due = service.list_due(10, None).await.expect("list");
    assert_eq!(due.len(), 1);
    // Peeking twice returns the same item; nothing was leased.
    let due = service.list_due(10, Some("tiktok")).await.expect("list");
    assert_eq!(due.len(), 1);
    let none = service.list_due(10, Some("instagram")).await.expect("list");
    assert!(none.is_empty());
}

#[tokio::test]
async fn stats_reflect_queue_shape() {
    let (store, service, variant) = setup().await;
    service.enqueue(request(variant.id)).await.expect("enqueue");

    let other = ContentVariant::new(variant.content_id, "instagram");
    store.insert_variant(&other).await.expect("variant");
    let mut other_request = request(other.id);
    other_request.platform = "instagram".into();
    service.enqueue(other_request).await.expect("enqueue");

    let stats = service.stats("default").await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status.get("queued"), Some(&2));
    assert_eq!(stats.by_platform.get("tiktok"), Some(&1));
    assert_eq!(stats.by_platform.get("instagram"), Some(&1));
}
