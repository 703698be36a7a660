use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pf_core::types::Platform;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AdapterError;

// ---------------------------------------------------------------------------
// Request / result payloads
// ---------------------------------------------------------------------------

/// Everything an adapter needs to publish one variant.
///
/// `platform_metadata` is the single opaque escape hatch for
/// platform-specific options; the core never looks inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub variant_id: Uuid,
    pub media_urls: Vec<String>,
    pub caption: String,
    pub hashtags: Vec<String>,
    pub platform_metadata: Option<serde_json::Value>,
}

impl PublishRequest {
    pub fn new(variant_id: Uuid) -> Self {
        Self {
            variant_id,
            media_urls: Vec::new(),
            caption: String::new(),
            hashtags: Vec::new(),
            platform_metadata: None,
        }
    }

    /// Idempotency key, when the caller supplied one in the metadata.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.platform_metadata
            .as_ref()
            .and_then(|m| m.get("idempotency_key"))
            .and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResult {
    pub platform_post_id: String,
    pub platform_url: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Raw metrics as reported by a platform, not yet bound to a variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterMetrics {
    pub views: u64,
    pub impressions: Option<u64>,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub saves: Option<u64>,
    pub clicks: Option<u64>,
    pub watch_time_s: Option<f64>,
    pub raw: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    pub comment_id: String,
    pub author_handle: String,
    pub author_name: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One page of comments; `next_cursor` drives the caller's pagination loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentsPage {
    pub comments: Vec<CommentRecord>,
    pub next_cursor: Option<String>,
}

/// A rate-limit descriptor: `limit` operations per `window_secs`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateQuota {
    pub limit: u64,
    pub window_secs: u64,
}

impl RateQuota {
    pub fn per_hour(limit: u64) -> Self {
        Self {
            limit,
            window_secs: 3600,
        }
    }

    pub fn per_day(limit: u64) -> Self {
        Self {
            limit,
            window_secs: 86_400,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter — the platform capability interface
// ---------------------------------------------------------------------------

/// A platform plugin. One adapter may serve several platform ids; the
/// registry enforces at most one enabled adapter per platform.
///
/// Optional capabilities (`lookup_recent`) are advertised through their
/// `supports_*` flag rather than probed; the default implementations are
/// honest no-ops.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable adapter id, e.g. `"blotato"`.
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Platform ids this adapter can serve.
    fn platforms(&self) -> Vec<Platform>;

    /// Publish a variant. Must be idempotent when the request carries an
    /// `idempotency_key` in its platform metadata.
    async fn publish(
        &self,
        platform: &str,
        request: &PublishRequest,
    ) -> Result<PublishResult, AdapterError>;

    /// Fetch the current metrics for a post. `Ok(None)` means the platform
    /// is still processing the post; the caller records nothing.
    async fn fetch_metrics(
        &self,
        platform: &str,
        platform_post_id: &str,
    ) -> Result<Option<AdapterMetrics>, AdapterError>;

    /// Fetch one page of comments on a post.
    async fn fetch_comments(
        &self,
        platform: &str,
        platform_post_id: &str,
        since: Option<DateTime<Utc>>,
        cursor: Option<String>,
    ) -> Result<CommentsPage, AdapterError>;

    /// Whether `lookup_recent` is implemented.
    fn supports_lookup_recent(&self) -> bool {
        false
    }

    /// Find the post id of a recent publish for this variant, if the
    /// platform exposes enough to tell. Used to resolve ambiguous publish
    /// failures before declaring them terminal.
    async fn lookup_recent(
        &self,
        _platform: &str,
        _variant_id: Uuid,
    ) -> Result<Option<String>, AdapterError> {
        Ok(None)
    }

    /// Informational only; the core never relies on native scheduling.
    fn supports_scheduling(&self) -> bool {
        false
    }

    /// Rate limits honored by the dispatcher via per-adapter token buckets.
    /// Keys are operation names; `"publish"` is the one the dispatcher
    /// consults.
    fn rate_limits(&self) -> HashMap<String, RateQuota> {
        let mut limits = HashMap::new();
        limits.insert("publish".to_string(), RateQuota::per_day(100));
        limits.insert("api_calls".to_string(), RateQuota::per_hour(1000));
        limits
    }
}
