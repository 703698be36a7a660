use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use pf_core::clock::SharedClock;
use pf_core::store::Store;
use pf_core::types::{ActivityState, PersonEvent, PersonInsight};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ingestion::PeopleError;

const TOP_INTERESTS: usize = 10;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "this", "that", "is", "it", "to", "and", "or", "of", "in", "on", "for",
    "with", "was", "are", "you", "your",
];

const ENTHUSIASM_MARKERS: &[&str] = &["lol", "!", "love", "awesome", "amazing"];
const TECHNICAL_MARKERS: &[&str] = &["api", "code", "function", "system", "data", "bug"];

/// Derives per-person insights from the sliding event window.
pub struct LensComputer {
    store: Arc<Store>,
    clock: SharedClock,
    window_days: u32,
}

impl LensComputer {
    pub fn new(store: Arc<Store>, clock: SharedClock, window_days: u32) -> Self {
        Self {
            store,
            clock,
            window_days,
        }
    }

    /// Recompute the lens for one person. Returns `None` when the person
    /// has no events inside the window (the stored insight is left as-is).
    pub async fn compute_for_person(
        &self,
        person_id: Uuid,
    ) -> Result<Option<PersonInsight>, PeopleError> {
        let now = self.clock.now();
        let since = now - Duration::days(self.window_days as i64);
        let events = self.store.events_for_person_since(person_id, since).await?;
        if events.is_empty() {
            debug!(person_id = %person_id, "no recent events, lens unchanged");
            return Ok(None);
        }

        let insight = PersonInsight {
            person_id,
            interests: extract_interests(&events),
            tone_preferences: analyze_tone(&events),
            channel_preferences: channel_preferences(&events),
            activity_state: activity_state(events[0].occurred_at, now),
            warmth_score: warmth_score(&events, now, self.window_days),
            last_active_at: Some(events[0].occurred_at),
            updated_at: now,
        };
        self.store.upsert_insight(&insight).await?;
        info!(
            person_id = %person_id,
            activity_state = ?insight.activity_state,
            warmth = insight.warmth_score,
            "lens updated"
        );
        Ok(Some(insight))
    }

    /// Recompute the lens for everyone with events inside the window.
    /// Per-person failures are logged and skipped; returns the updated
    /// count.
    pub async fn recompute_all_active(&self) -> Result<u32, PeopleError> {
        let since = self.clock.now() - Duration::days(self.window_days as i64);
        let person_ids = self.store.active_person_ids_since(since).await?;
        info!(count = person_ids.len(), "recomputing lenses for active people");

        let mut updated = 0u32;
        for person_id in person_ids {
            match self.compute_for_person(person_id).await {
                Ok(Some(_)) => updated += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(person_id = %person_id, error = %e, "lens recompute failed");
                }
            }
        }
        Ok(updated)
    }
}

// ---------------------------------------------------------------------------
// Lens components (pure)
// ---------------------------------------------------------------------------

/// Top interests: tokenize excerpts, drop short words and stopwords, count.
/// Ties break alphabetically so recomputation is stable.
fn extract_interests(events: &[PersonEvent]) -> Vec<String> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for event in events {
        let Some(excerpt) = &event.content_excerpt else {
            continue;
        };
        for raw in excerpt.to_lowercase().split_whitespace() {
            let word: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
            if word.len() > 3 && !STOPWORDS.contains(&word.as_str()) {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
    }

    let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(TOP_INTERESTS)
        .map(|(word, _)| word)
        .collect()
}

/// Marker-based tone buckets, normalized to a distribution summing to 1.
/// One event can feed several buckets (an exclamatory API question is both
/// enthusiastic and technical).
fn analyze_tone(events: &[PersonEvent]) -> HashMap<String, f64> {
    let mut tones: HashMap<String, f64> = [
        ("casual".to_string(), 0.0),
        ("formal".to_string(), 0.0),
        ("enthusiastic".to_string(), 0.0),
        ("technical".to_string(), 0.0),
    ]
    .into_iter()
    .collect();

    for event in events {
        let Some(excerpt) = &event.content_excerpt else {
            continue;
        };
        let text = excerpt.to_lowercase();

        if ENTHUSIASM_MARKERS.iter().any(|m| text.contains(m)) {
            *tones.get_mut("enthusiastic").expect("bucket") += 1.0;
        }
        if TECHNICAL_MARKERS.iter().any(|m| text.contains(m)) {
            *tones.get_mut("technical").expect("bucket") += 1.0;
        }
        if text.len() > 100 && text.contains('.') {
            *tones.get_mut("formal").expect("bucket") += 1.0;
        } else {
            *tones.get_mut("casual").expect("bucket") += 1.0;
        }
    }

    let total: f64 = tones.values().sum();
    if total > 0.0 {
        for value in tones.values_mut() {
            *value /= total;
        }
    }
    tones
}

/// Frequency distribution over channels.
fn channel_preferences(events: &[PersonEvent]) -> HashMap<String, f64> {
    let mut counts: HashMap<String, f64> = HashMap::new();
    for event in events {
        *counts.entry(event.channel.clone()).or_insert(0.0) += 1.0;
    }
    let total: f64 = counts.values().sum();
    if total > 0.0 {
        for value in counts.values_mut() {
            *value /= total;
        }
    }
    counts
}

fn activity_state(last_event: DateTime<Utc>, now: DateTime<Utc>) -> ActivityState {
    let days = (now - last_event).num_days();
    if days <= 7 {
        ActivityState::Active
    } else if days <= 30 {
        ActivityState::Warming
    } else if days <= 90 {
        ActivityState::Cool
    } else {
        ActivityState::Dormant
    }
}

/// RFM-style warmth: `0.4 * recency + 0.3 * frequency + 0.3 * depth`,
/// rounded to 3 decimals.
///
/// - recency decays linearly over the window,
/// - frequency saturates at five events per full window,
/// - depth averages the per-event engagement weight.
fn warmth_score(events: &[PersonEvent], now: DateTime<Utc>, window_days: u32) -> f64 {
    if events.is_empty() {
        return 0.0;
    }
    let window = window_days.max(1) as f64;

    let days_since_last = (now - events[0].occurred_at).num_days().max(0) as f64;
    let recency = (1.0 - days_since_last / window).max(0.0);

    let window_fraction = window / 90.0;
    let frequency = (events.len() as f64 / 5.0).min(1.0) * window_fraction.min(1.0);

    let total_depth: f64 = events.iter().map(|e| e.event_type.depth_weight()).sum();
    let depth = total_depth / events.len() as f64;

    let warmth = 0.4 * recency + 0.3 * frequency + 0.3 * depth;
    (warmth * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::types::{PersonEventType, TrafficType};

    fn event(
        event_type: PersonEventType,
        excerpt: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> PersonEvent {
        PersonEvent {
            id: Uuid::new_v4(),
            person_id: Uuid::new_v4(),
            channel: "instagram".into(),
            event_type,
            platform_id: None,
            content_excerpt: excerpt.map(String::from),
            traffic_type: TrafficType::Organic,
            occurred_at,
            metadata: None,
        }
    }

    #[test]
    fn warmth_matches_hand_computed_example() {
        // liked 60 days ago, commented 10 days ago, commented yesterday.
        let now = Utc::now();
        let events = vec![
            event(PersonEventType::Commented, None, now - Duration::days(1)),
            event(PersonEventType::Commented, None, now - Duration::days(10)),
            event(PersonEventType::Liked, None, now - Duration::days(60)),
        ];

        let expected = 0.4 * (1.0 - 1.0 / 90.0)
            + 0.3 * (3.0f64 / 5.0).min(1.0)
            + 0.3 * ((1.0 + 1.0 + 0.3) / 3.0);
        let warmth = warmth_score(&events, now, 90);
        assert!((warmth - expected).abs() < 0.001, "got {}, want {}", warmth, expected);
        assert_eq!(activity_state(events[0].occurred_at, now), ActivityState::Active);
    }

    #[test]
    fn warmth_is_monotonic_in_engagement_depth() {
        let now = Utc::now();
        let mut events = vec![
            event(PersonEventType::Liked, None, now - Duration::days(5)),
            event(PersonEventType::Viewed, None, now - Duration::days(8)),
        ];
        let before = warmth_score(&events, now, 90);

        // A new comment (highest depth) at the same recency never lowers
        // the score.
        events.insert(0, event(PersonEventType::Commented, None, now - Duration::days(5)));
        let after = warmth_score(&events, now, 90);
        assert!(after >= before, "warmth dropped from {} to {}", before, after);
    }

    #[test]
    fn activity_state_thresholds() {
        let now = Utc::now();
        assert_eq!(activity_state(now - Duration::days(3), now), ActivityState::Active);
        assert_eq!(activity_state(now - Duration::days(20), now), ActivityState::Warming);
        assert_eq!(activity_state(now - Duration::days(60), now), ActivityState::Cool);
        assert_eq!(activity_state(now - Duration::days(120), now), ActivityState::Dormant);
    }

    #[test]
    fn interests_drop_stopwords_and_short_words(){
        let now = Utc::now();
        let events = vec![
            event(
                PersonEventType::Commented,
                Some("the espresso machine is amazing, espresso forever"),
                now,
            ),
            event(PersonEventType::Commented, Some("espresso and latte art!"), now),
        ];
        let interests = extract_interests(&events);
        assert_eq!(interests[0], "espresso");
        assert!(!interests.iter().any(|w| w == "the" || w == "and" || w == "is"));
        assert!(!interests.iter().any(|w| w == "art"), "short words are dropped");
    }

    #[test]
    fn tone_distribution_sums_to_one() {
        let now = Utc::now();
        let events = vec![
            event(PersonEventType::Commented, Some("lol this is amazing!"), now),
            event(PersonEventType::Commented, Some("the api has a bug in the code"), now),
            event(
                PersonEventType::Commented,
                Some("I have carefully reviewed the proposal and believe it addresses the requirements we discussed last quarter. Thank you."),
                now,
            ),
        ];
        let tones = analyze_tone(&events);
        let total: f64 = tones.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(tones["enthusiastic"] > 0.0);
        assert!(tones["technical"] > 0.0);
        assert!(tones["formal"] > 0.0);
    }

    #[test]
    fn channel_preferences_are_frequencies() {
        let now = Utc::now();
        let mut events = vec![
            event(PersonEventType::Liked, None, now),
            event(PersonEventType::Liked, None, now),
        ];
        events[1].channel = "tiktok".into();
        let mut third = event(PersonEventType::Liked, None, now);
        third.channel = "tiktok".into();
        events.push(third);

        let prefs = channel_preferences(&events);
        assert!((prefs["instagram"] - 1.0 / 3.0).abs() < 1e-9);
        assert!((prefs["tiktok"] - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_events_score_zero() {
        assert_eq!(warmth_score(&[], Utc::now(), 90), 0.0);
    }
}
