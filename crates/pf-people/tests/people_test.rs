use std::sync::Arc;

use chrono::{Duration, Utc};
use pf_core::clock::{ManualClock, SharedClock};
use pf_core::store::Store;
use pf_core::types::{ActivityState, PersonEvent, PersonEventType, TrafficType};
use pf_people::{IngestRequest, LensComputer, PeopleError, PeopleService};
use uuid::Uuid;

async fn build() -> (Arc<Store>, ManualClock, PeopleService) {
    let store = Arc::new(Store::new_in_memory().await.expect("store"));
    let clock = ManualClock::new(Utc::now());
    let shared: SharedClock = Arc::new(clock.clone());
    let service = PeopleService::new(Arc::clone(&store), shared, "default");
    (store, clock, service)
}

#[tokio::test]
async fn first_event_creates_person_identity_and_insight() {
    let (store, _clock, service) = build().await;

    let mut request = IngestRequest::new("instagram", "@alice", PersonEventType::Commented);
    request.content_excerpt = Some("love the espresso content".into());
    request.full_name = Some("Alice Example".into());

    let outcome = service.ingest_event(request).await.expect("ingest");

    let (person, identities) = service.get_person(outcome.person_id).await.expect("person");
    assert_eq!(person.full_name.as_deref(), Some("Alice Example"));
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].channel, "instagram");
    assert_eq!(identities[0].handle, "@alice");

    let insight = service.get_insights(outcome.person_id).await.expect("insight");
    assert_eq!(insight.activity_state, ActivityState::Active);
    assert_eq!(insight.warmth_score, 0.5, "fresh people start lukewarm");

    let events = store
        .events_for_person_since(outcome.person_id, Utc::now() - Duration::days(1))
        .await
        .expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, PersonEventType::Commented);
}

#[tokio::test]
async fn same_handle_resolves_to_same_person() {
    // Scenario: two comment events for instagram/@alice. One person, one
    // identity, two events.
    let (store, _clock, service) = build().await;

    let first = service
        .ingest_event(IngestRequest::new("instagram", "@alice", PersonEventType::Commented))
        .await
        .expect("first");
    let second = service
        .ingest_event(IngestRequest::new("instagram", "@alice", PersonEventType::Commented))
        .await
        .expect("second");

    assert_eq!(first.person_id, second.person_id);
    assert_ne!(first.event_id, second.event_id);

    let (_, identities) = service.get_person(first.person_id).await.expect("person");
    assert_eq!(identities.len(), 1);

    let events = store
        .events_for_person_since(first.person_id, Utc::now() - Duration::days(1))
        .await
        .expect("events");
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn same_handle_on_other_channel_is_another_person() {
    let (_store, _clock, service) = build().await;

    let insta = service
        .ingest_event(IngestRequest::new("instagram", "@alice", PersonEventType::Liked))
        .await
        .expect("insta");
    let tiktok = service
        .ingest_event(IngestRequest::new("tiktok", "@alice", PersonEventType::Liked))
        .await
        .expect("tiktok");

    assert_ne!(insta.person_id, tiktok.person_id);
}

#[tokio::test]
async fn convenience_wrappers_record_the_right_event_types() {
    let (store, _clock, service) = build().await;

    let comment = service
        .ingest_comment("tiktok", "@bob", "post_1", "great video!", "c_1", None)
        .await
        .expect("comment");
    service
        .ingest_like("tiktok", "@bob", "post_1")
        .await
        .expect("like");
    service
        .ingest_share("tiktok", "@bob", "post_1")
        .await
        .expect("share");

    let events = store
        .events_for_person_since(comment.person_id, Utc::now() - Duration::days(1))
        .await
        .expect("events");
    let mut types: Vec<PersonEventType> = events.iter().map(|e| e.event_type).collect();
    types.sort_by_key(|t| format!("{:?}", t));
    assert_eq!(
        types,
        vec![
            PersonEventType::Commented,
            PersonEventType::Liked,
            PersonEventType::Shared
        ]
    );

    let commented = events
        .iter()
        .find(|e| e.event_type == PersonEventType::Commented)
        .expect("comment event");
    assert_eq!(commented.content_excerpt.as_deref(), Some("great video!"));
    assert_eq!(
        commented
            .metadata
            .as_ref()
            .and_then(|m| m.get("comment_id"))
            .and_then(|v| v.as_str()),
        Some("c_1")
    );
}

#[tokio::test]
async fn empty_channel_is_invalid() {
    let (_store, _clock, service) = build().await;
    let err = service
        .ingest_event(IngestRequest::new("", "@x", PersonEventType::Liked))
        .await
        .expect_err("invalid");
    assert!(matches!(err, PeopleError::InvalidRequest(_)));
}

#[tokio::test]
async fn unknown_person_is_not_found() {
    let (_store, _clock, service) = build().await;
    let err = service.get_person(Uuid::new_v4()).await.expect_err("missing");
    assert!(matches!(err, PeopleError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Lens end-to-end
// ---------------------------------------------------------------------------

async fn backdated_event(
    store: &Store,
    person_id: Uuid,
    event_type: PersonEventType,
    days_ago: i64,
    excerpt: Option<&str>,
) {
    let event = PersonEvent {
        id: Uuid::new_v4(),
        person_id,
        channel: "instagram".into(),
        event_type,
        platform_id: None,
        content_excerpt: excerpt.map(String::from),
        traffic_type: TrafficType::Organic,
        occurred_at: Utc::now() - Duration::days(days_ago),
        metadata: None,
    };
    store.insert_person_event(&event).await.expect("event");
}

#[tokio::test]
async fn lens_computes_warmth_and_state_from_history() {
    let (store, clock, service) = build().await;

    // Seed the person through the normal ingest path, then backdate the
    // history the scenario describes: liked 60d ago, commented 10d ago,
    // commented 1d ago.
    let seeded = service
        .ingest_event(IngestRequest::new("instagram", "@warm", PersonEventType::Viewed))
        .await
        .expect("seed");

    backdated_event(&store, seeded.person_id, PersonEventType::Liked, 60, None).await;
    backdated_event(
        &store,
        seeded.person_id,
        PersonEventType::Commented,
        10,
        Some("really love the espresso series"),
    )
    .await;
    backdated_event(
        &store,
        seeded.person_id,
        PersonEventType::Commented,
        1,
        Some("more espresso content please"),
    )
    .await;

    let shared: SharedClock = Arc::new(clock.clone());
    let lens = LensComputer::new(Arc::clone(&store), shared, 90);
    let insight = lens
        .compute_for_person(seeded.person_id)
        .await
        .expect("compute")
        .expect("has events");

    assert_eq!(insight.activity_state, ActivityState::Active);
    // Four events now (the seed view plus the three backdated ones); warmth
    // stays within the unit interval and well above a cold start.
    assert!(insight.warmth_score > 0.5 && insight.warmth_score <= 1.0);
    assert!(insight.interests.iter().any(|w| w == "espresso"));
    assert!(insight.channel_preferences.contains_key("instagram"));

    let stored = service.get_insights(seeded.person_id).await.expect("stored");
    assert_eq!(stored.warmth_score, insight.warmth_score);
    assert_eq!(stored.activity_state, ActivityState::Active);
}

#[tokio::test]
async fn recompute_all_active_counts_updated_people() {
    let (store, clock, service) = build().await;

    for handle in ["@a", "@b", "@c"] {
        service
            .ingest_event(IngestRequest::new("instagram", handle, PersonEventType::Commented))
            .await
            .expect("ingest");
    }
    // One person with only ancient history.
    let dormant = service
        .ingest_event(IngestRequest::new("instagram", "@old", PersonEventType::Liked))
        .await
        .expect("ingest");
    drop(dormant);

    let shared: SharedClock = Arc::new(clock.clone());
    let lens = LensComputer::new(Arc::clone(&store), shared, 90);
    let updated = lens.recompute_all_active().await.expect("recompute");
    assert_eq!(updated, 4, "everyone with events in the window is updated");
}
