use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pf_core::types::Platform;
use uuid::Uuid;

use crate::adapter::{
    Adapter, AdapterMetrics, CommentRecord, CommentsPage, PublishRequest, PublishResult,
};
use crate::error::AdapterError;

/// Scripted in-memory adapter for tests and credential-free local runs.
///
/// By default every publish succeeds with a generated post id. Failure
/// sequences can be scripted per operation; scripted outcomes are consumed
/// front-to-back, after which the default behavior resumes.
pub struct MockAdapter {
    platforms: Vec<Platform>,
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    publish_attempts: usize,
    publish_script: VecDeque<Result<(), AdapterError>>,
    metrics_script: VecDeque<Result<(), AdapterError>>,
    published: Vec<(Platform, PublishRequest, String)>,
    post_by_variant: HashMap<Uuid, String>,
    post_by_idempotency_key: HashMap<String, PublishResult>,
    metrics: HashMap<String, AdapterMetrics>,
    comments: HashMap<String, Vec<CommentRecord>>,
    comments_page_size: usize,
}

impl MockAdapter {
    pub fn new<I, S>(platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            platforms: platforms.into_iter().map(Into::into).collect(),
            state: Mutex::new(MockState {
                comments_page_size: 50,
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Script the outcomes of the next publish calls. `Err` entries fail
    /// with that error; `Ok(())` entries succeed.
    pub fn script_publish(&self, outcomes: impl IntoIterator<Item = Result<(), AdapterError>>) {
        self.lock().publish_script.extend(outcomes);
    }

    /// Script the outcomes of the next metric pulls.
    pub fn script_metrics(&self, outcomes: impl IntoIterator<Item = Result<(), AdapterError>>) {
        self.lock().metrics_script.extend(outcomes);
    }

    /// Can the canned metrics a post reports.
    pub fn set_metrics(&self, platform_post_id: impl Into<String>, metrics: AdapterMetrics) {
        self.lock().metrics.insert(platform_post_id.into(), metrics);
    }

    /// Can comments returned for a post.
    pub fn set_comments(&self, platform_post_id: impl Into<String>, comments: Vec<CommentRecord>) {
        self.lock().comments.insert(platform_post_id.into(), comments);
    }

    pub fn set_comments_page_size(&self, size: usize) {
        self.lock().comments_page_size = size.max(1);
    }

    /// Number of publish attempts observed (including scripted failures).
    pub fn publish_calls(&self) -> usize {
        self.lock().publish_attempts
    }

    /// Successfully published requests, in call order.
    pub fn published(&self) -> Vec<(Platform, String)> {
        self.lock()
            .published
            .iter()
            .map(|(p, _, id)| (p.clone(), id.clone()))
            .collect()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn id(&self) -> &str {
        "mock"
    }

    fn display_name(&self) -> &str {
        "Mock Adapter"
    }

    fn platforms(&self) -> Vec<Platform> {
        self.platforms.clone()
    }

    async fn publish(
        &self,
        platform: &str,
        request: &PublishRequest,
    ) -> Result<PublishResult, AdapterError> {
        let mut state = self.lock();
        state.publish_attempts += 1;

        if let Some(key) = request.idempotency_key() {
            if let Some(previous) = state.post_by_idempotency_key.get(key) {
                return Ok(previous.clone());
            }
        }

        if let Some(outcome) = state.publish_script.pop_front() {
            outcome?;
        }

        let post_id = format!("{}_{}", platform, &Uuid::new_v4().simple().to_string()[..8]);
        let result = PublishResult {
            platform_post_id: post_id.clone(),
            platform_url: Some(format!("https://{}.example.com/post/{}", platform, post_id)),
            published_at: Utc::now(),
        };

        state
            .published
            .push((platform.to_string(), request.clone(), post_id.clone()));
        state.post_by_variant.insert(request.variant_id, post_id);
        if let Some(key) = request.idempotency_key() {
            state
                .post_by_idempotency_key
                .insert(key.to_string(), result.clone());
        }
        Ok(result)
    }

    async fn fetch_metrics(
        &self,
        _platform: &str,
        platform_post_id: &str,
    ) -> Result<Option<AdapterMetrics>, AdapterError> {
        let mut state = self.lock();
        if let Some(outcome) = state.metrics_script.pop_front() {
            outcome?;
        }
        Ok(state.metrics.get(platform_post_id).cloned())
    }

    async fn fetch_comments(
        &self,
        _platform: &str,
        platform_post_id: &str,
        since: Option<DateTime<Utc>>,
        cursor: Option<String>,
    ) -> Result<CommentsPage, AdapterError> {
        let state = self.lock();
        let all = state
            .comments
            .get(platform_post_id)
            .cloned()
            .unwrap_or_default();
        let filtered: Vec<CommentRecord> = all
            .into_iter()
            .filter(|c| since.map(|s| c.created_at > s).unwrap_or(true))
            .collect();

        let start: usize = cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0)
            .min(filtered.len());
        let end = (start + state.comments_page_size).min(filtered.len());
        let next_cursor = if end < filtered.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(CommentsPage {
            comments: filtered[start..end].to_vec(),
            next_cursor,
        })
    }

    fn supports_lookup_recent(&self) -> bool {
        true
    }

    async fn lookup_recent(
        &self,
        _platform: &str,
        variant_id: Uuid,
    ) -> Result<Option<String>, AdapterError> {
        Ok(self.lock().post_by_variant.get(&variant_id).cloned())
    }
}
