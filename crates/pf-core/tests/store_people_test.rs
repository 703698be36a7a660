use chrono::{Duration, Utc};
use pf_core::store::Store;
use pf_core::types::{
    Identity, Person, PersonEvent, PersonEventType, PersonInsight, TrafficType,
};
use uuid::Uuid;

fn identity_for(person: &Person, channel: &str, handle: &str) -> Identity {
    let now = Utc::now();
    Identity {
        id: Uuid::new_v4(),
        person_id: person.id,
        channel: channel.into(),
        handle: handle.into(),
        first_seen_at: now,
        last_seen_at: now,
    }
}

fn event_for(person: &Person, event_type: PersonEventType) -> PersonEvent {
    PersonEvent {
        id: Uuid::new_v4(),
        person_id: person.id,
        channel: "instagram".into(),
        event_type,
        platform_id: Some("post_1".into()),
        content_excerpt: None,
        traffic_type: TrafficType::Organic,
        occurred_at: Utc::now(),
        metadata: None,
    }
}

#[tokio::test]
async fn create_person_with_identity_roundtrip() {
    let store = Store::new_in_memory().await.expect("store");
    let person = Person::new("default", Some("Alice Example".into()));
    let identity = identity_for(&person, "instagram", "@alice");
    let insight = PersonInsight::initial(person.id, Utc::now());

    store
        .create_person_with_identity(&person, &identity, &insight)
        .await
        .expect("create");

    let loaded = store.get_person(person.id).await.expect("get").expect("exists");
    assert_eq!(loaded.full_name.as_deref(), Some("Alice Example"));

    let identities = store.identities_for_person(person.id).await.expect("identities");
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].handle, "@alice");

    let insight = store.get_insight(person.id).await.expect("get").expect("exists");
    assert_eq!(insight.warmth_score, 0.5);
}

#[tokio::test]
async fn identity_is_unique_per_channel_handle() {
    let store = Store::new_in_memory().await.expect("store");
    let alice = Person::new("default", None);
    store
        .create_person_with_identity(
            &alice,
            &identity_for(&alice, "instagram", "@alice"),
            &PersonInsight::initial(alice.id, Utc::now()),
        )
        .await
        .expect("first");

    // The loser of a concurrent ingest race hits the unique index; nothing
    // from its transaction survives.
    let dupe = Person::new("default", None);
    let err = store
        .create_person_with_identity(
            &dupe,
            &identity_for(&dupe, "instagram", "@alice"),
            &PersonInsight::initial(dupe.id, Utc::now()),
        )
        .await
        .expect_err("duplicate identity");
    assert!(err.is_conflict());
    assert!(store.get_person(dupe.id).await.expect("get").is_none());

    // Same handle on a different channel is a different identity.
    let bob = Person::new("default", None);
    store
        .create_person_with_identity(
            &bob,
            &identity_for(&bob, "tiktok", "@alice"),
            &PersonInsight::initial(bob.id, Utc::now()),
        )
        .await
        .expect("other channel");
}

#[tokio::test]
async fn events_query_respects_window_and_order() {
    let store = Store::new_in_memory().await.expect("store");
    let person = Person::new("default", None);
    store
        .create_person_with_identity(
            &person,
            &identity_for(&person, "instagram", "@p"),
            &PersonInsight::initial(person.id, Utc::now()),
        )
        .await
        .expect("create");

    let now = Utc::now();
    let mut old = event_for(&person, PersonEventType::Liked);
    old.occurred_at = now - Duration::days(120);
    let mut recent = event_for(&person, PersonEventType::Commented);
    recent.occurred_at = now - Duration::days(1);
    let mut newest = event_for(&person, PersonEventType::Shared);
    newest.occurred_at = now - Duration::hours(1);

    for e in [&old, &recent, &newest] {
        store.insert_person_event(e).await.expect("insert");
    }

    let events = store
        .events_for_person_since(person.id, now - Duration::days(90))
        .await
        .expect("events");
    assert_eq!(events.len(), 2, "events outside the window are excluded");
    assert_eq!(events[0].id, newest.id, "newest first");
    assert_eq!(events[1].id, recent.id);
}

#[tokio::test]
async fn active_person_ids_are_distinct() {
    let store = Store::new_in_memory().await.expect("store");
    let person = Person::new("default", None);
    store
        .create_person_with_identity(
            &person,
            &identity_for(&person, "instagram", "@p"),
            &PersonInsight::initial(person.id, Utc::now()),
        )
        .await
        .expect("create");

    for _ in 0..3 {
        store
            .insert_person_event(&event_for(&person, PersonEventType::Liked))
            .await
            .expect("insert");
    }

    let active = store
        .active_person_ids_since(Utc::now() - Duration::days(90))
        .await
        .expect("active");
    assert_eq!(active, vec![person.id]);
}

#[tokio::test]
async fn touch_insight_marks_person_active() {
    let store = Store::new_in_memory().await.expect("store");
    let person = Person::new("default", None);
    let mut insight = PersonInsight::initial(person.id, Utc::now());
    insight.activity_state = pf_core::types::ActivityState::Dormant;
    insight.last_active_at = None;
    store
        .create_person_with_identity(&person, &identity_for(&person, "x", "@p"), &insight)
        .await
        .expect("create");

    let now = Utc::now();
    store.touch_insight_activity(person.id, now).await.expect("touch");

    let loaded = store.get_insight(person.id).await.expect("get").expect("exists");
    assert_eq!(loaded.activity_state, pf_core::types::ActivityState::Active);
    assert!(loaded.last_active_at.is_some());
}

#[tokio::test]
async fn upsert_insight_overwrites_previous() {
    let store = Store::new_in_memory().await.expect("store");
    let person = Person::new("default", None);
    store
        .create_person_with_identity(
            &person,
            &identity_for(&person, "x", "@p"),
            &PersonInsight::initial(person.id, Utc::now()),
        )
        .await
        .expect("create");

    let mut updated = PersonInsight::initial(person.id, Utc::now());
    updated.interests = vec!["coffee".into(), "rust".into()];
    updated.warmth_score = 0.9;
    store.upsert_insight(&updated).await.expect("upsert");

    let loaded = store.get_insight(person.id).await.expect("get").expect("exists");
    assert_eq!(loaded.interests, vec!["coffee", "rust"]);
    assert_eq!(loaded.warmth_score, 0.9);
}
