use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Platform identifier ("instagram", "tiktok", ...). Adapters register under
/// these ids; the core never interprets them beyond equality.
pub type Platform = String;

/// The standard checkback offsets, in hours after `published_at`.
pub const CHECKBACK_OFFSETS_HOURS: [i64; 5] = [1, 6, 24, 72, 168];

// ---------------------------------------------------------------------------
// ContentItem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Video,
    Image,
    Carousel,
    Blog,
}

/// A logical piece of content, independent of any platform. Owns its
/// variants; deleting a content item cascades to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub workspace: String,
    pub content_type: ContentType,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(workspace: impl Into<String>, content_type: ContentType, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace: workspace.into(),
            content_type,
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ContentVariant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantStatus {
    Draft,
    Ready,
    Queued,
    Publishing,
    Published,
    Failed,
}

impl VariantStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &VariantStatus) -> bool {
        matches!(
            (self, target),
            (VariantStatus::Draft, VariantStatus::Ready)
                | (VariantStatus::Ready, VariantStatus::Queued)
                | (VariantStatus::Queued, VariantStatus::Publishing)
                | (VariantStatus::Queued, VariantStatus::Ready)
                | (VariantStatus::Publishing, VariantStatus::Published)
                | (VariantStatus::Publishing, VariantStatus::Failed)
                | (VariantStatus::Failed, VariantStatus::Queued)
        )
    }
}

/// A platform-bound instance of a content item. `(platform,
/// platform_post_id)` is unique once the post id is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentVariant {
    pub id: Uuid,
    pub content_id: Uuid,
    pub platform: Platform,
    pub platform_post_id: Option<String>,
    pub is_paid: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub status: VariantStatus,
    pub created_at: DateTime<Utc>,
}

impl ContentVariant {
    pub fn new(content_id: Uuid, platform: impl Into<Platform>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_id,
            platform: platform.into(),
            platform_post_id: None,
            is_paid: false,
            published_at: None,
            status: VariantStatus::Draft,
            created_at: Utc::now(),
        }
    }

    pub fn traffic_type(&self) -> TrafficType {
        if self.is_paid {
            TrafficType::Paid
        } else {
            TrafficType::Organic
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact (inventory row)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactForm {
    Short,
    Long,
}

impl ArtifactForm {
    /// Short iff duration is at most 60 seconds.
    pub fn from_duration_s(duration_s: f64) -> Self {
        if duration_s <= 60.0 {
            ArtifactForm::Short
        } else {
            ArtifactForm::Long
        }
    }
}

/// A ready-to-publish media unit from inventory, not yet bound to a
/// platform. A consumed artifact may never be re-scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub workspace: String,
    pub duration_s: f64,
    pub form: ArtifactForm,
    pub ready_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Artifact {
    pub fn new(workspace: impl Into<String>, duration_s: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace: workspace.into(),
            duration_s,
            form: ArtifactForm::from_duration_s(duration_s),
            ready_at: Utc::now(),
            consumed_at: None,
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// QueueItem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Leased,
    Publishing,
    Published,
    Failed,
    Cancelled,
    Retry,
}

impl QueueStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Published | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }

    /// Valid transitions:
    /// - Queued     -> Leased | Cancelled
    /// - Leased     -> Publishing | Queued (lease expiry) | Cancelled
    /// - Publishing -> Published | Retry | Failed | Cancelled
    /// - Retry      -> Queued (backoff elapsed) | Cancelled
    /// - Failed     -> Queued (operator retry)
    pub fn can_transition_to(&self, target: &QueueStatus) -> bool {
        matches!(
            (self, target),
            (QueueStatus::Queued, QueueStatus::Leased)
                | (QueueStatus::Queued, QueueStatus::Cancelled)
                | (QueueStatus::Leased, QueueStatus::Publishing)
                | (QueueStatus::Leased, QueueStatus::Queued)
                | (QueueStatus::Leased, QueueStatus::Cancelled)
                | (QueueStatus::Publishing, QueueStatus::Published)
                | (QueueStatus::Publishing, QueueStatus::Retry)
                | (QueueStatus::Publishing, QueueStatus::Failed)
                | (QueueStatus::Publishing, QueueStatus::Cancelled)
                | (QueueStatus::Retry, QueueStatus::Queued)
                | (QueueStatus::Retry, QueueStatus::Cancelled)
                | (QueueStatus::Failed, QueueStatus::Queued)
        )
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Leased => "leased",
            QueueStatus::Publishing => "publishing",
            QueueStatus::Published => "published",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
            QueueStatus::Retry => "retry",
        };
        write!(f, "{}", label)
    }
}

/// A materialized scheduled publish. Exactly one terminal transition per
/// item; while leased, `lease_expires_at` is in the future.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub workspace: String,
    pub variant_id: Uuid,
    pub platform: Platform,
    pub scheduled_for: DateTime<Utc>,
    pub priority: i32,
    pub status: QueueStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub platform_metadata: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub platform_post_id: Option<String>,
    pub platform_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(
        workspace: impl Into<String>,
        variant_id: Uuid,
        platform: impl Into<Platform>,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace: workspace.into(),
            variant_id,
            platform: platform.into(),
            scheduled_for,
            priority: 0,
            status: QueueStatus::Queued,
            attempt_count: 0,
            max_attempts: 3,
            platform_metadata: None,
            last_error: None,
            lease_expires_at: None,
            published_at: None,
            platform_post_id: None,
            platform_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// CheckbackJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckbackStatus {
    Pending,
    Fired,
    Succeeded,
    Failed,
    Skipped,
}

/// A metric-pull trigger at a fixed offset after a variant's publish.
/// Unique on `(variant_id, offset_hours)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckbackJob {
    pub id: Uuid,
    pub variant_id: Uuid,
    pub platform: Platform,
    pub offset_hours: i64,
    pub fire_at: DateTime<Utc>,
    pub status: CheckbackStatus,
    pub created_at: DateTime<Utc>,
}

impl CheckbackJob {
    pub fn new(
        variant_id: Uuid,
        platform: impl Into<Platform>,
        published_at: DateTime<Utc>,
        offset_hours: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            variant_id,
            platform: platform.into(),
            offset_hours,
            fire_at: published_at + chrono::Duration::hours(offset_hours),
            status: CheckbackStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficType {
    Organic,
    Paid,
}

/// A point-in-time metrics observation for one variant. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub id: Uuid,
    pub variant_id: Uuid,
    pub snapshot_at: DateTime<Utc>,
    /// The checkback offset this snapshot was collected for, when pulled by
    /// the checkback worker; `None` for ad-hoc polls.
    pub offset_hours: Option<i64>,
    pub views: u64,
    pub impressions: Option<u64>,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub saves: Option<u64>,
    pub clicks: Option<u64>,
    pub watch_time_s: Option<f64>,
    pub traffic_type: TrafficType,
    pub raw: Option<serde_json::Value>,
}

impl MetricSnapshot {
    pub fn empty(variant_id: Uuid, snapshot_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            variant_id,
            snapshot_at,
            offset_hours: None,
            views: 0,
            impressions: None,
            likes: 0,
            comments: 0,
            shares: 0,
            saves: None,
            clicks: None,
            watch_time_s: None,
            traffic_type: TrafficType::Organic,
            raw: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ContentRollup
// ---------------------------------------------------------------------------

/// Latest aggregate across the variants of a content item. Derived state:
/// recomputable at any time from snapshots, never mutated by user input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRollup {
    pub content_id: Uuid,
    pub total_views: u64,
    pub total_impressions: u64,
    pub total_likes: u64,
    pub total_comments: u64,
    pub total_shares: u64,
    pub total_saves: u64,
    pub total_clicks: u64,
    pub avg_watch_time_s: Option<f64>,
    pub best_platform: Option<Platform>,
    pub last_updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// People graph
// ---------------------------------------------------------------------------

/// A stable identity spanning platforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub workspace: String,
    pub full_name: Option<String>,
    pub primary_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Person {
    pub fn new(workspace: impl Into<String>, full_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace: workspace.into(),
            full_name,
            primary_email: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A per-platform handle, unique on `(channel, handle)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub person_id: Uuid,
    pub channel: Platform,
    pub handle: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonEventType {
    Commented,
    Liked,
    Shared,
    Saved,
    Viewed,
}

impl PersonEventType {
    /// Engagement depth weight used by warmth scoring.
    pub fn depth_weight(&self) -> f64 {
        match self {
            PersonEventType::Commented => 1.0,
            PersonEventType::Shared => 0.8,
            PersonEventType::Saved => 0.6,
            PersonEventType::Liked => 0.3,
            PersonEventType::Viewed => 0.1,
        }
    }
}

/// One engagement observation for a person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonEvent {
    pub id: Uuid,
    pub person_id: Uuid,
    pub channel: Platform,
    pub event_type: PersonEventType,
    pub platform_id: Option<String>,
    pub content_excerpt: Option<String>,
    pub traffic_type: TrafficType,
    pub occurred_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Active,
    Warming,
    Cool,
    Dormant,
}

/// Derived per-person lens. Rebuilt from the event history; safe to discard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonInsight {
    pub person_id: Uuid,
    pub interests: Vec<String>,
    pub tone_preferences: HashMap<String, f64>,
    pub channel_preferences: HashMap<String, f64>,
    pub activity_state: ActivityState,
    pub warmth_score: f64,
    pub last_active_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PersonInsight {
    /// Fresh insight for a person first seen now.
    pub fn initial(person_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            person_id,
            interests: Vec::new(),
            tone_preferences: HashMap::new(),
            channel_preferences: HashMap::new(),
            activity_state: ActivityState::Active,
            warmth_score: 0.5,
            last_active_at: Some(now),
            updated_at: now,
        }
    }
}
