//! Persistence contracts for the curation pipeline.
//!
//! Every component reaches queued content, slots, alerts and scan history
//! through these traits only, so the uniqueness and posted-immutability
//! rules live in the implementations and nowhere else.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::error::StoreResult;
use crate::models::{
    AlertType, AlertWrite, ContentItem, ContentStats, ContentStatus, ContentType, ContentUpdate,
    NewContent, NewPostedContent, NewSlot, Platform, PlatformDepth, PostedContent, QueueAlert,
    ScanRecord, ScanResult, ScheduledSlot, Severity, SlotUpsert,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Alerts of the same type younger than this are refreshed instead of duplicated.
pub const ALERT_DEDUP_WINDOW_MINUTES: i64 = 60;

/// Narrows `list_approved_unposted`. Results are ordered by confidence
/// (highest first), then creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentFilter {
    pub platform: Option<Platform>,
    pub content_types: Option<Vec<ContentType>>,
    pub unscheduled_only: bool,
    pub exclude_ids: Vec<i64>,
}

impl ContentFilter {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &ContentItem) -> bool {
        if let Some(platform) = self.platform {
            if item.source_platform != platform {
                return false;
            }
        }
        if let Some(types) = &self.content_types {
            if !types.contains(&item.content_type) {
                return false;
            }
        }
        if self.unscheduled_only && item.scheduled_for.is_some() {
            return false;
        }
        !self.exclude_ids.contains(&item.id)
    }
}

/// Narrows `list_unapproved`: undecided, unposted content at or above a
/// confidence floor, optionally created before a cutoff.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFilter {
    pub min_confidence: f64,
    pub created_before: Option<DateTime<Utc>>,
    pub platform: Option<Platform>,
}

impl PendingFilter {
    pub fn matches(&self, item: &ContentItem) -> bool {
        if item.is_approved || item.is_rejected || item.is_posted {
            return false;
        }
        if item.confidence_score < self.min_confidence {
            return false;
        }
        if let Some(cutoff) = self.created_before {
            if item.created_at > cutoff {
                return false;
            }
        }
        self.platform
            .map_or(true, |platform| item.source_platform == platform)
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    /// Fails with `StoreError::Duplicate` when the content hash already exists.
    async fn create(&self, item: NewContent) -> StoreResult<ContentItem>;

    async fn get(&self, id: i64) -> StoreResult<Option<ContentItem>>;

    async fn find_by_hash(&self, hash: &str) -> StoreResult<Option<ContentItem>>;

    /// Matches on the original (source page) URL.
    async fn find_by_url(&self, url: &str) -> StoreResult<Option<ContentItem>>;

    async fn find_by_image_url(&self, url: &str) -> StoreResult<Option<ContentItem>>;

    /// Items whose normalized text starts with `normalized_prefix`.
    async fn find_by_text_prefix(
        &self,
        normalized_prefix: &str,
        limit: usize,
    ) -> StoreResult<Vec<ContentItem>>;

    async fn list_approved_unposted(
        &self,
        filter: &ContentFilter,
        limit: usize,
    ) -> StoreResult<Vec<ContentItem>>;

    async fn list_unapproved(
        &self,
        filter: &PendingFilter,
        limit: usize,
    ) -> StoreResult<Vec<ContentItem>>;

    /// Newest first.
    async fn list_by_status(
        &self,
        status: ContentStatus,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<ContentItem>>;

    async fn mark_approved(&self, id: i64, notes: Option<&str>) -> StoreResult<ContentItem>;

    async fn mark_rejected(&self, id: i64, reason: &str) -> StoreResult<ContentItem>;

    async fn mark_scheduled(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    /// Refuses content that was never approved.
    async fn mark_posted(&self, id: i64, posted_at: DateTime<Utc>) -> StoreResult<()>;

    /// Only `admin_notes` may change once an item is posted.
    async fn update(&self, id: i64, update: ContentUpdate) -> StoreResult<ContentItem>;

    /// Refuses posted content.
    async fn delete(&self, id: i64) -> StoreResult<()>;

    async fn stats(&self) -> StoreResult<ContentStats>;

    async fn platform_depth(&self) -> StoreResult<Vec<PlatformDepth>>;

    /// Fails with `StoreError::Conflict` when the content already has a post row.
    async fn record_post(&self, post: NewPostedContent) -> StoreResult<PostedContent>;

    async fn find_post(&self, content_id: i64) -> StoreResult<Option<PostedContent>>;

    /// Source platform of every post since `since`, one entry per post.
    async fn posted_platforms_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Platform>>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync + 'static {
    /// Inserts missing `(day, slot_index)` rows and assigns content only to
    /// slots whose `content_id` is still null. Filled slots are never touched.
    async fn upsert_slots(&self, day: NaiveDate, slots: &[NewSlot]) -> StoreResult<SlotUpsert>;

    async fn get_slots(&self, day: NaiveDate) -> StoreResult<Vec<ScheduledSlot>>;

    /// Stamps the slot as posted with the content that actually went out.
    /// `reasoning`, when given, replaces the slot's selection reasoning.
    async fn mark_slot_posted(
        &self,
        day: NaiveDate,
        slot_index: i32,
        content_id: i64,
        posted_at: DateTime<Utc>,
        reasoning: Option<String>,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait AlertStore: Send + Sync + 'static {
    /// Refreshes an unacknowledged alert of the same type created within
    /// the dedup window, otherwise inserts a new one.
    async fn upsert(
        &self,
        alert_type: AlertType,
        message: &str,
        severity: Severity,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> StoreResult<(QueueAlert, AlertWrite)>;

    async fn list_unacknowledged(&self) -> StoreResult<Vec<QueueAlert>>;

    async fn list_recent(&self, limit: usize) -> StoreResult<Vec<QueueAlert>>;

    async fn acknowledge(&self, id: i64, now: DateTime<Utc>) -> StoreResult<QueueAlert>;
}

#[async_trait]
pub trait ScanHistoryStore: Send + Sync + 'static {
    async fn record(&self, result: &ScanResult) -> StoreResult<ScanRecord>;

    async fn last_scan(&self, platform: Platform) -> StoreResult<Option<ScanRecord>>;

    async fn recent(&self, limit: usize) -> StoreResult<Vec<ScanRecord>>;
}

/// Sort key shared by implementations: confidence desc, then oldest first.
pub(crate) fn rank_by_confidence(items: &mut [ContentItem]) {
    items.sort_by(|a, b| {
        b.confidence_score
            .total_cmp(&a.confidence_score)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}
