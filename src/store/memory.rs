use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{
    rank_by_confidence, AlertStore, ContentFilter, ContentStore, PendingFilter, ScanHistoryStore,
    ScheduleStore, ALERT_DEDUP_WINDOW_MINUTES,
};
use crate::{
    clock::{system_clock, Clock},
    error::{StoreError, StoreResult},
    hashing::normalize_text,
    models::{
        AlertType, AlertWrite, ContentItem, ContentStats, ContentStatus, ContentUpdate,
        NewContent, NewPostedContent, NewSlot, Platform, PlatformDepth, PostedContent, QueueAlert,
        ScanRecord, ScanResult, ScheduledSlot, Severity, SlotUpsert,
    },
};

#[derive(Default)]
struct Inner {
    next_id: i64,
    content: BTreeMap<i64, ContentItem>,
    hashes: HashMap<String, i64>,
    posts: BTreeMap<i64, PostedContent>,
    slots: BTreeMap<(NaiveDate, i32), ScheduledSlot>,
    alerts: BTreeMap<i64, QueueAlert>,
    scans: Vec<ScanRecord>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn content_mut(&mut self, id: i64) -> StoreResult<&mut ContentItem> {
        self.content.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

/// Process-local store implementing every persistence contract. Backs the
/// test suite and `STORE_BACKEND=memory` deployments.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(system_clock())
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    pub async fn content_count(&self) -> usize {
        self.inner.lock().await.content.len()
    }

    pub async fn post_count(&self) -> usize {
        self.inner.lock().await.posts.len()
    }

    pub async fn alert_count(&self) -> usize {
        self.inner.lock().await.alerts.len()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn create(&self, item: NewContent) -> StoreResult<ContentItem> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        if inner.hashes.contains_key(&item.content_hash) {
            return Err(StoreError::Duplicate {
                hash: item.content_hash,
            });
        }

        let id = inner.next_id();
        let stored = ContentItem {
            id,
            content_hash: item.content_hash,
            similarity_key: item.similarity_key,
            text: item.text,
            image_url: item.image_url,
            video_url: item.video_url,
            content_type: item.content_type,
            source_platform: item.source_platform,
            original_url: item.original_url,
            original_author: item.original_author,
            scraped_at: item.scraped_at,
            is_approved: item.is_approved,
            is_posted: false,
            is_rejected: item.is_rejected,
            confidence_score: item.confidence_score,
            rejection_reason: item.rejection_reason,
            admin_notes: item.admin_notes,
            flagged_patterns: item.flagged_patterns,
            engagement: item.engagement,
            created_at: now,
            updated_at: now,
            posted_at: None,
            scheduled_for: None,
        };
        inner.hashes.insert(stored.content_hash.clone(), id);
        inner.content.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<ContentItem>> {
        Ok(self.inner.lock().await.content.get(&id).cloned())
    }

    async fn find_by_hash(&self, hash: &str) -> StoreResult<Option<ContentItem>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .hashes
            .get(hash)
            .and_then(|id| inner.content.get(id))
            .cloned())
    }

    async fn find_by_url(&self, url: &str) -> StoreResult<Option<ContentItem>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .content
            .values()
            .find(|item| item.original_url == url)
            .cloned())
    }

    async fn find_by_image_url(&self, url: &str) -> StoreResult<Option<ContentItem>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .content
            .values()
            .find(|item| item.image_url.as_deref() == Some(url))
            .cloned())
    }

    async fn find_by_text_prefix(
        &self,
        normalized_prefix: &str,
        limit: usize,
    ) -> StoreResult<Vec<ContentItem>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .content
            .values()
            .filter(|item| {
                item.text
                    .as_deref()
                    .map(normalize_text)
                    .is_some_and(|text| text.starts_with(normalized_prefix))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_approved_unposted(
        &self,
        filter: &ContentFilter,
        limit: usize,
    ) -> StoreResult<Vec<ContentItem>> {
        let inner = self.inner.lock().await;
        let mut items: Vec<ContentItem> = inner
            .content
            .values()
            .filter(|item| item.is_ready_to_post() && filter.matches(item))
            .cloned()
            .collect();
        rank_by_confidence(&mut items);
        items.truncate(limit);
        Ok(items)
    }

    async fn list_unapproved(
        &self,
        filter: &PendingFilter,
        limit: usize,
    ) -> StoreResult<Vec<ContentItem>> {
        let inner = self.inner.lock().await;
        let mut items: Vec<ContentItem> = inner
            .content
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        rank_by_confidence(&mut items);
        items.truncate(limit);
        Ok(items)
    }

    async fn list_by_status(
        &self,
        status: ContentStatus,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<ContentItem>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .content
            .values()
            .rev()
            .filter(|item| item.status() == status)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_approved(&self, id: i64, notes: Option<&str>) -> StoreResult<ContentItem> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let item = inner.content_mut(id)?;
        if item.is_posted {
            return Err(StoreError::PostedImmutable(id));
        }
        item.is_approved = true;
        item.is_rejected = false;
        item.rejection_reason = None;
        if let Some(notes) = notes {
            item.admin_notes = Some(notes.to_string());
        }
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn mark_rejected(&self, id: i64, reason: &str) -> StoreResult<ContentItem> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let item = inner.content_mut(id)?;
        if item.is_posted {
            return Err(StoreError::PostedImmutable(id));
        }
        item.is_approved = false;
        item.is_rejected = true;
        item.rejection_reason = Some(reason.to_string());
        item.scheduled_for = None;
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn mark_scheduled(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let item = inner.content_mut(id)?;
        if item.is_posted {
            return Err(StoreError::PostedImmutable(id));
        }
        item.scheduled_for = Some(at);
        item.updated_at = now;
        Ok(())
    }

    async fn mark_posted(&self, id: i64, posted_at: DateTime<Utc>) -> StoreResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let item = inner.content_mut(id)?;
        if !item.is_approved {
            return Err(StoreError::Conflict(format!(
                "content {id} cannot be posted without approval"
            )));
        }
        if item.is_posted {
            return Ok(());
        }
        item.is_posted = true;
        item.posted_at = Some(posted_at);
        item.updated_at = now;
        Ok(())
    }

    async fn update(&self, id: i64, update: ContentUpdate) -> StoreResult<ContentItem> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let item = inner.content_mut(id)?;
        if item.is_posted && update.text.is_some() {
            return Err(StoreError::PostedImmutable(id));
        }
        if let Some(text) = update.text {
            item.text = Some(text);
        }
        if let Some(notes) = update.admin_notes {
            item.admin_notes = Some(notes);
        }
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let item = inner.content.get(&id).ok_or(StoreError::NotFound(id))?;
        if item.is_posted {
            return Err(StoreError::PostedImmutable(id));
        }
        let hash = item.content_hash.clone();
        inner.content.remove(&id);
        inner.hashes.remove(&hash);
        for slot in inner.slots.values_mut() {
            if slot.content_id == Some(id) && slot.actual_posted_at.is_none() {
                slot.content_id = None;
            }
        }
        Ok(())
    }

    async fn stats(&self) -> StoreResult<ContentStats> {
        let start_of_day = self
            .clock
            .now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc());
        let inner = self.inner.lock().await;
        let mut stats = ContentStats::default();
        for item in inner.content.values() {
            stats.total += 1;
            if item.is_posted {
                stats.posted += 1;
            } else if item.is_rejected {
                stats.rejected += 1;
            } else if item.is_approved {
                stats.approved += 1;
            } else {
                stats.queued += 1;
            }
            if start_of_day.is_some_and(|start| item.created_at >= start) {
                stats.today += 1;
            }
        }
        Ok(stats)
    }

    async fn platform_depth(&self) -> StoreResult<Vec<PlatformDepth>> {
        let inner = self.inner.lock().await;
        let mut depth: BTreeMap<Platform, PlatformDepth> = BTreeMap::new();
        for item in inner.content.values() {
            if item.is_posted || item.is_rejected {
                continue;
            }
            let entry = depth
                .entry(item.source_platform)
                .or_insert_with(|| PlatformDepth {
                    platform: item.source_platform,
                    approved: 0,
                    pending: 0,
                });
            if item.is_approved {
                entry.approved += 1;
            } else {
                entry.pending += 1;
            }
        }
        Ok(depth.into_values().collect())
    }

    async fn record_post(&self, post: NewPostedContent) -> StoreResult<PostedContent> {
        let mut inner = self.inner.lock().await;
        if inner
            .posts
            .values()
            .any(|existing| existing.content_queue_id == post.content_queue_id)
        {
            return Err(StoreError::Conflict(format!(
                "content {} already has a post record",
                post.content_queue_id
            )));
        }
        let post_order = inner.posts.len() as i64 + 1;
        let id = inner.next_id();
        let record = PostedContent {
            id,
            content_queue_id: post.content_queue_id,
            scheduled_time: post.scheduled_time,
            posted_at: post.posted_at,
            post_order,
        };
        inner.posts.insert(id, record.clone());
        Ok(record)
    }

    async fn find_post(&self, content_id: i64) -> StoreResult<Option<PostedContent>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .posts
            .values()
            .find(|post| post.content_queue_id == content_id)
            .cloned())
    }

    async fn posted_platforms_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Platform>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .posts
            .values()
            .filter(|post| post.posted_at >= since)
            .filter_map(|post| inner.content.get(&post.content_queue_id))
            .map(|item| item.source_platform)
            .collect())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn upsert_slots(&self, day: NaiveDate, slots: &[NewSlot]) -> StoreResult<SlotUpsert> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let mut outcome = SlotUpsert::default();

        for slot in slots {
            let key = (day, slot.slot_index);
            if let Some(existing) = inner.slots.get_mut(&key) {
                if existing.content_id.is_none() {
                    if let Some(content_id) = slot.content_id {
                        existing.content_id = Some(content_id);
                        existing.reasoning = slot.reasoning.clone();
                        existing.updated_at = now;
                        outcome.filled.push((slot.slot_index, content_id));
                    }
                }
                continue;
            }

            let id = inner.next_id();
            inner.slots.insert(
                key,
                ScheduledSlot {
                    id,
                    day,
                    slot_index: slot.slot_index,
                    meal: slot.meal.clone(),
                    content_id: slot.content_id,
                    scheduled_post_time: slot.scheduled_post_time,
                    actual_posted_at: None,
                    reasoning: slot.reasoning.clone(),
                    created_at: now,
                    updated_at: now,
                },
            );
            outcome.created.push(slot.slot_index);
            if let Some(content_id) = slot.content_id {
                outcome.filled.push((slot.slot_index, content_id));
            }
        }

        Ok(outcome)
    }

    async fn get_slots(&self, day: NaiveDate) -> StoreResult<Vec<ScheduledSlot>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .slots
            .range((day, i32::MIN)..=(day, i32::MAX))
            .map(|(_, slot)| slot.clone())
            .collect())
    }

    async fn mark_slot_posted(
        &self,
        day: NaiveDate,
        slot_index: i32,
        content_id: i64,
        posted_at: DateTime<Utc>,
        reasoning: Option<String>,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let Some(slot) = inner.slots.get_mut(&(day, slot_index)) else {
            return Ok(());
        };
        slot.content_id = Some(content_id);
        if reasoning.is_some() {
            slot.reasoning = reasoning;
        }
        slot.actual_posted_at = Some(posted_at);
        slot.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn upsert(
        &self,
        alert_type: AlertType,
        message: &str,
        severity: Severity,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> StoreResult<(QueueAlert, AlertWrite)> {
        let window_start = now - Duration::minutes(ALERT_DEDUP_WINDOW_MINUTES);
        let mut inner = self.inner.lock().await;

        let recent = inner
            .alerts
            .values_mut()
            .rev()
            .find(|alert| {
                alert.alert_type == alert_type
                    && !alert.acknowledged
                    && alert.created_at >= window_start
            });
        if let Some(alert) = recent {
            alert.created_at = now;
            alert.message = message.to_string();
            alert.severity = severity;
            alert.metadata = metadata;
            return Ok((alert.clone(), AlertWrite::Refreshed));
        }

        let id = inner.next_id();
        let alert = QueueAlert {
            id,
            alert_type,
            severity,
            message: message.to_string(),
            metadata,
            acknowledged: false,
            created_at: now,
            acknowledged_at: None,
        };
        inner.alerts.insert(id, alert.clone());
        Ok((alert, AlertWrite::Created))
    }

    async fn list_unacknowledged(&self) -> StoreResult<Vec<QueueAlert>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .alerts
            .values()
            .rev()
            .filter(|alert| !alert.acknowledged)
            .cloned()
            .collect())
    }

    async fn list_recent(&self, limit: usize) -> StoreResult<Vec<QueueAlert>> {
        let inner = self.inner.lock().await;
        let mut alerts: Vec<QueueAlert> = inner.alerts.values().cloned().collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        alerts.truncate(limit);
        Ok(alerts)
    }

    async fn acknowledge(&self, id: i64, now: DateTime<Utc>) -> StoreResult<QueueAlert> {
        let mut inner = self.inner.lock().await;
        let alert = inner.alerts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !alert.acknowledged {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(now);
        }
        Ok(alert.clone())
    }
}

#[async_trait]
impl ScanHistoryStore for MemoryStore {
    async fn record(&self, result: &ScanResult) -> StoreResult<ScanRecord> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        let record = ScanRecord {
            id,
            result: result.clone(),
        };
        inner.scans.push(record.clone());
        Ok(record)
    }

    async fn last_scan(&self, platform: Platform) -> StoreResult<Option<ScanRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .scans
            .iter()
            .rev()
            .find(|record| record.result.platform == platform)
            .cloned())
    }

    async fn recent(&self, limit: usize) -> StoreResult<Vec<ScanRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.scans.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::ContentType;
    use chrono::TimeZone;
    use serde_json::json;

    fn store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    fn new_content(hash: &str, approved: bool) -> NewContent {
        NewContent {
            content_hash: hash.to_string(),
            similarity_key: format!("sim-{hash}"),
            text: Some("hotdog".into()),
            image_url: None,
            video_url: None,
            content_type: ContentType::Text,
            source_platform: Platform::Reddit,
            original_url: format!("https://reddit.com/{hash}"),
            original_author: None,
            scraped_at: Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
            is_approved: approved,
            is_rejected: false,
            confidence_score: 0.7,
            rejection_reason: None,
            admin_notes: None,
            flagged_patterns: Vec::new(),
            engagement: None,
        }
    }

    #[tokio::test]
    async fn rejects_second_insert_with_same_hash() {
        let (store, _) = store();
        store.create(new_content("abc", false)).await.unwrap();
        let err = store.create(new_content("abc", false)).await.unwrap_err();
        assert_eq!(err, StoreError::Duplicate { hash: "abc".into() });
        assert_eq!(store.content_count().await, 1);
    }

    #[tokio::test]
    async fn posting_requires_approval_and_freezes_content() {
        let (store, clock) = store();
        let pending = store.create(new_content("p", false)).await.unwrap();
        assert!(matches!(
            store.mark_posted(pending.id, clock.now()).await,
            Err(StoreError::Conflict(_))
        ));

        let approved = store.create(new_content("a", true)).await.unwrap();
        store.mark_posted(approved.id, clock.now()).await.unwrap();
        assert_eq!(
            store.delete(approved.id).await,
            Err(StoreError::PostedImmutable(approved.id))
        );
        let edit = ContentUpdate {
            text: Some("changed".into()),
            admin_notes: None,
        };
        assert_eq!(
            store.update(approved.id, edit).await,
            Err(StoreError::PostedImmutable(approved.id))
        );
        let notes = ContentUpdate {
            text: None,
            admin_notes: Some("went viral".into()),
        };
        let updated = store.update(approved.id, notes).await.unwrap();
        assert_eq!(updated.admin_notes.as_deref(), Some("went viral"));
    }

    #[tokio::test]
    async fn one_post_record_per_content() {
        let (store, clock) = store();
        let item = store.create(new_content("x", true)).await.unwrap();
        let post = NewPostedContent {
            content_queue_id: item.id,
            scheduled_time: "lunch".into(),
            posted_at: clock.now(),
        };
        let first = store.record_post(post.clone()).await.unwrap();
        assert_eq!(first.post_order, 1);
        assert!(matches!(
            store.record_post(post).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.post_count().await, 1);
    }

    #[tokio::test]
    async fn alerts_refresh_within_window_and_split_after() {
        let (store, clock) = store();
        let (first, write) = store
            .upsert(AlertType::LowQueue, "low", Severity::Medium, json!({}), clock.now())
            .await
            .unwrap();
        assert_eq!(write, AlertWrite::Created);

        clock.advance(Duration::minutes(30));
        let (second, write) = store
            .upsert(AlertType::LowQueue, "lower", Severity::Critical, json!({"n": 1}), clock.now())
            .await
            .unwrap();
        assert_eq!(write, AlertWrite::Refreshed);
        assert_eq!(second.id, first.id);
        assert_eq!(second.severity, Severity::Critical);

        clock.advance(Duration::minutes(61));
        let (_, write) = store
            .upsert(AlertType::LowQueue, "still low", Severity::Medium, json!({}), clock.now())
            .await
            .unwrap();
        assert_eq!(write, AlertWrite::Created);
        assert_eq!(store.alert_count().await, 2);
    }

    #[tokio::test]
    async fn acknowledged_alerts_are_not_refreshed() {
        let (store, clock) = store();
        let (alert, _) = store
            .upsert(AlertType::EmptyQueue, "empty", Severity::Critical, json!({}), clock.now())
            .await
            .unwrap();
        store.acknowledge(alert.id, clock.now()).await.unwrap();
        let (_, write) = store
            .upsert(AlertType::EmptyQueue, "empty", Severity::Critical, json!({}), clock.now())
            .await
            .unwrap();
        assert_eq!(write, AlertWrite::Created);
        assert_eq!(store.list_unacknowledged().await.unwrap().len(), 1);
    }
}
