use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::{
    dsl::{count_star, not},
    pg::PgConnection,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
};
use serde_json::Value;
use tokio::task;

use super::{
    AlertStore, ContentFilter, ContentStore, PendingFilter, ScanHistoryStore, ScheduleStore,
    ALERT_DEDUP_WINDOW_MINUTES,
};
use crate::{
    clock::Clock,
    db::PgPool,
    error::{StoreError, StoreResult},
    hashing::normalize_text,
    models::{
        AlertType, AlertWrite, ContentItem, ContentStats, ContentStatus, ContentUpdate,
        EngagementHighlight, NewContent, NewPostedContent, NewSlot, Platform, PlatformDepth,
        PostedContent, QueueAlert, ScanRecord, ScanResult, ScheduledSlot, Severity, SlotUpsert,
        TermError,
    },
    schema::{content_queue, posted_content, queue_alerts, scan_history, schedule_slots},
};

const CONTENT_HASH_CONSTRAINT: &str = "content_queue_content_hash_key";

#[derive(Debug, Clone, Queryable)]
struct ContentRow {
    id: i64,
    content_hash: String,
    similarity_key: String,
    content_text: Option<String>,
    normalized_text: Option<String>,
    content_image_url: Option<String>,
    content_video_url: Option<String>,
    content_type: String,
    source_platform: String,
    original_url: String,
    original_author: Option<String>,
    scraped_at: DateTime<Utc>,
    is_approved: bool,
    is_posted: bool,
    is_rejected: bool,
    confidence_score: f64,
    rejection_reason: Option<String>,
    admin_notes: Option<String>,
    flagged_patterns: Vec<String>,
    engagement: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    posted_at: Option<DateTime<Utc>>,
    scheduled_for: Option<DateTime<Utc>>,
}

impl TryFrom<ContentRow> for ContentItem {
    type Error = StoreError;

    fn try_from(row: ContentRow) -> Result<Self, Self::Error> {
        Ok(ContentItem {
            id: row.id,
            content_hash: row.content_hash,
            similarity_key: row.similarity_key,
            text: row.content_text,
            image_url: row.content_image_url,
            video_url: row.content_video_url,
            content_type: row.content_type.parse().map_err(StoreError::Persistence)?,
            source_platform: row.source_platform.parse().map_err(StoreError::Persistence)?,
            original_url: row.original_url,
            original_author: row.original_author,
            scraped_at: row.scraped_at,
            is_approved: row.is_approved,
            is_posted: row.is_posted,
            is_rejected: row.is_rejected,
            confidence_score: row.confidence_score,
            rejection_reason: row.rejection_reason,
            admin_notes: row.admin_notes,
            flagged_patterns: row.flagged_patterns,
            engagement: row.engagement,
            created_at: row.created_at,
            updated_at: row.updated_at,
            posted_at: row.posted_at,
            scheduled_for: row.scheduled_for,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = content_queue)]
struct NewContentRow {
    content_hash: String,
    similarity_key: String,
    content_text: Option<String>,
    normalized_text: Option<String>,
    content_image_url: Option<String>,
    content_video_url: Option<String>,
    content_type: String,
    source_platform: String,
    original_url: String,
    original_author: Option<String>,
    scraped_at: DateTime<Utc>,
    is_approved: bool,
    is_rejected: bool,
    confidence_score: f64,
    rejection_reason: Option<String>,
    admin_notes: Option<String>,
    flagged_patterns: Vec<String>,
    engagement: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NewContentRow {
    fn new(item: NewContent, now: DateTime<Utc>) -> Self {
        let normalized_text = item.text.as_deref().map(normalize_text);
        Self {
            content_hash: item.content_hash,
            similarity_key: item.similarity_key,
            content_text: item.text,
            normalized_text,
            content_image_url: item.image_url,
            content_video_url: item.video_url,
            content_type: item.content_type.as_str().to_string(),
            source_platform: item.source_platform.as_str().to_string(),
            original_url: item.original_url,
            original_author: item.original_author,
            scraped_at: item.scraped_at,
            is_approved: item.is_approved,
            is_rejected: item.is_rejected,
            confidence_score: item.confidence_score,
            rejection_reason: item.rejection_reason,
            admin_notes: item.admin_notes,
            flagged_patterns: item.flagged_patterns,
            engagement: item.engagement,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Queryable)]
struct PostedRow {
    id: i64,
    content_queue_id: i64,
    scheduled_time: String,
    posted_at: DateTime<Utc>,
    post_order: i64,
}

impl From<PostedRow> for PostedContent {
    fn from(row: PostedRow) -> Self {
        PostedContent {
            id: row.id,
            content_queue_id: row.content_queue_id,
            scheduled_time: row.scheduled_time,
            posted_at: row.posted_at,
            post_order: row.post_order,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = posted_content)]
struct NewPostedRow {
    content_queue_id: i64,
    scheduled_time: String,
    posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
struct SlotRow {
    id: i64,
    day: NaiveDate,
    slot_index: i32,
    meal: String,
    content_id: Option<i64>,
    scheduled_post_time: DateTime<Utc>,
    actual_posted_at: Option<DateTime<Utc>>,
    reasoning: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SlotRow> for ScheduledSlot {
    fn from(row: SlotRow) -> Self {
        ScheduledSlot {
            id: row.id,
            day: row.day,
            slot_index: row.slot_index,
            meal: row.meal,
            content_id: row.content_id,
            scheduled_post_time: row.scheduled_post_time,
            actual_posted_at: row.actual_posted_at,
            reasoning: row.reasoning,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schedule_slots)]
struct NewSlotRow {
    day: NaiveDate,
    slot_index: i32,
    meal: String,
    content_id: Option<i64>,
    scheduled_post_time: DateTime<Utc>,
    reasoning: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
struct AlertRow {
    id: i64,
    alert_type: String,
    severity: String,
    message: String,
    metadata: Value,
    acknowledged: bool,
    created_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
}

impl TryFrom<AlertRow> for QueueAlert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(QueueAlert {
            id: row.id,
            alert_type: row.alert_type.parse().map_err(StoreError::Persistence)?,
            severity: row.severity.parse().map_err(StoreError::Persistence)?,
            message: row.message,
            metadata: row.metadata,
            acknowledged: row.acknowledged,
            created_at: row.created_at,
            acknowledged_at: row.acknowledged_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = queue_alerts)]
struct NewAlertRow {
    alert_type: String,
    severity: String,
    message: String,
    metadata: Value,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
struct ScanRow {
    id: i64,
    platform: String,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    posts_found: i32,
    posts_processed: i32,
    posts_approved: i32,
    posts_rejected: i32,
    posts_flagged: i32,
    duplicates_found: i32,
    errors: Value,
    rate_limit_hit: bool,
    terms_scanned: Value,
    highest_engagement: Option<Value>,
}

impl TryFrom<ScanRow> for ScanRecord {
    type Error = StoreError;

    fn try_from(row: ScanRow) -> Result<Self, Self::Error> {
        let errors: Vec<TermError> =
            serde_json::from_value(row.errors).map_err(StoreError::persistence)?;
        let terms_scanned: Vec<String> =
            serde_json::from_value(row.terms_scanned).map_err(StoreError::persistence)?;
        let highest_engagement: Option<EngagementHighlight> = row
            .highest_engagement
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::persistence)?;

        Ok(ScanRecord {
            id: row.id,
            result: ScanResult {
                platform: row.platform.parse().map_err(StoreError::Persistence)?,
                started_at: row.started_at,
                completed_at: row.completed_at,
                posts_found: to_count(row.posts_found),
                posts_processed: to_count(row.posts_processed),
                posts_approved: to_count(row.posts_approved),
                posts_rejected: to_count(row.posts_rejected),
                posts_flagged: to_count(row.posts_flagged),
                duplicates_found: to_count(row.duplicates_found),
                errors,
                rate_limit_hit: row.rate_limit_hit,
                terms_scanned,
                highest_engagement,
            },
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = scan_history)]
struct NewScanRow {
    platform: String,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    posts_found: i32,
    posts_processed: i32,
    posts_approved: i32,
    posts_rejected: i32,
    posts_flagged: i32,
    duplicates_found: i32,
    errors: Value,
    rate_limit_hit: bool,
    terms_scanned: Value,
    highest_engagement: Option<Value>,
}

fn to_count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

fn to_column(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Diesel-backed store. Queries run on the blocking pool, one pooled
/// connection per call.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Persistence(format!("database pool error: {err}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Persistence(format!("database task panicked: {err}")))?
    }
}

fn load_content(conn: &mut PgConnection, id: i64) -> StoreResult<ContentRow> {
    content_queue::table
        .find(id)
        .first::<ContentRow>(conn)
        .optional()?
        .ok_or(StoreError::NotFound(id))
}

fn into_item(row: Option<ContentRow>) -> StoreResult<Option<ContentItem>> {
    row.map(ContentItem::try_from).transpose()
}

#[async_trait]
impl ContentStore for PgStore {
    async fn create(&self, item: NewContent) -> StoreResult<ContentItem> {
        let hash = item.content_hash.clone();
        let row = NewContentRow::new(item, self.clock.now());
        self.with_conn(move |conn| {
            let inserted = diesel::insert_into(content_queue::table)
                .values(&row)
                .get_result::<ContentRow>(conn);
            match inserted {
                Ok(row) => ContentItem::try_from(row),
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info))
                    if info.constraint_name() == Some(CONTENT_HASH_CONSTRAINT) =>
                {
                    Err(StoreError::Duplicate { hash })
                }
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    async fn get(&self, id: i64) -> StoreResult<Option<ContentItem>> {
        self.with_conn(move |conn| {
            let row = content_queue::table
                .find(id)
                .first::<ContentRow>(conn)
                .optional()?;
            into_item(row)
        })
        .await
    }

    async fn find_by_hash(&self, hash: &str) -> StoreResult<Option<ContentItem>> {
        let hash = hash.to_string();
        self.with_conn(move |conn| {
            let row = content_queue::table
                .filter(content_queue::content_hash.eq(hash))
                .first::<ContentRow>(conn)
                .optional()?;
            into_item(row)
        })
        .await
    }

    async fn find_by_url(&self, url: &str) -> StoreResult<Option<ContentItem>> {
        let url = url.to_string();
        self.with_conn(move |conn| {
            let row = content_queue::table
                .filter(content_queue::original_url.eq(url))
                .order(content_queue::id.asc())
                .first::<ContentRow>(conn)
                .optional()?;
            into_item(row)
        })
        .await
    }

    async fn find_by_image_url(&self, url: &str) -> StoreResult<Option<ContentItem>> {
        let url = url.to_string();
        self.with_conn(move |conn| {
            let row = content_queue::table
                .filter(content_queue::content_image_url.eq(url))
                .order(content_queue::id.asc())
                .first::<ContentRow>(conn)
                .optional()?;
            into_item(row)
        })
        .await
    }

    async fn find_by_text_prefix(
        &self,
        normalized_prefix: &str,
        limit: usize,
    ) -> StoreResult<Vec<ContentItem>> {
        let pattern = format!("{}%", escape_like(normalized_prefix));
        self.with_conn(move |conn| {
            let rows = content_queue::table
                .filter(content_queue::normalized_text.like(pattern))
                .order(content_queue::id.asc())
                .limit(limit as i64)
                .load::<ContentRow>(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn list_approved_unposted(
        &self,
        filter: &ContentFilter,
        limit: usize,
    ) -> StoreResult<Vec<ContentItem>> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut query = content_queue::table
                .filter(content_queue::is_approved.eq(true))
                .filter(content_queue::is_posted.eq(false))
                .filter(content_queue::is_rejected.eq(false))
                .into_boxed();
            if let Some(platform) = filter.platform {
                query = query.filter(content_queue::source_platform.eq(platform.as_str()));
            }
            if let Some(types) = &filter.content_types {
                let names: Vec<&str> = types.iter().map(|ty| ty.as_str()).collect();
                query = query.filter(content_queue::content_type.eq_any(names));
            }
            if filter.unscheduled_only {
                query = query.filter(content_queue::scheduled_for.is_null());
            }
            if !filter.exclude_ids.is_empty() {
                query = query.filter(not(content_queue::id.eq_any(filter.exclude_ids.clone())));
            }
            let rows = query
                .order((
                    content_queue::confidence_score.desc(),
                    content_queue::created_at.asc(),
                    content_queue::id.asc(),
                ))
                .limit(limit as i64)
                .load::<ContentRow>(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn list_unapproved(
        &self,
        filter: &PendingFilter,
        limit: usize,
    ) -> StoreResult<Vec<ContentItem>> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut query = content_queue::table
                .filter(content_queue::is_approved.eq(false))
                .filter(content_queue::is_posted.eq(false))
                .filter(content_queue::is_rejected.eq(false))
                .filter(content_queue::confidence_score.ge(filter.min_confidence))
                .into_boxed();
            if let Some(cutoff) = filter.created_before {
                query = query.filter(content_queue::created_at.le(cutoff));
            }
            if let Some(platform) = filter.platform {
                query = query.filter(content_queue::source_platform.eq(platform.as_str()));
            }
            let rows = query
                .order((
                    content_queue::confidence_score.desc(),
                    content_queue::created_at.asc(),
                    content_queue::id.asc(),
                ))
                .limit(limit as i64)
                .load::<ContentRow>(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn list_by_status(
        &self,
        status: ContentStatus,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<ContentItem>> {
        self.with_conn(move |conn| {
            let mut query = content_queue::table.into_boxed();
            query = match status {
                ContentStatus::Posted => query.filter(content_queue::is_posted.eq(true)),
                ContentStatus::Rejected => query
                    .filter(content_queue::is_posted.eq(false))
                    .filter(content_queue::is_rejected.eq(true)),
                ContentStatus::Pending => query
                    .filter(content_queue::is_posted.eq(false))
                    .filter(content_queue::is_rejected.eq(false))
                    .filter(content_queue::is_approved.eq(false)),
                ContentStatus::Approved => query
                    .filter(content_queue::is_posted.eq(false))
                    .filter(content_queue::is_rejected.eq(false))
                    .filter(content_queue::is_approved.eq(true))
                    .filter(content_queue::scheduled_for.is_null()),
                ContentStatus::Scheduled => query
                    .filter(content_queue::is_posted.eq(false))
                    .filter(content_queue::is_rejected.eq(false))
                    .filter(content_queue::is_approved.eq(true))
                    .filter(content_queue::scheduled_for.is_not_null()),
            };
            let rows = query
                .order(content_queue::id.desc())
                .limit(limit as i64)
                .offset(offset as i64)
                .load::<ContentRow>(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn mark_approved(&self, id: i64, notes: Option<&str>) -> StoreResult<ContentItem> {
        let notes = notes.map(str::to_string);
        let now = self.clock.now();
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                let current = load_content(conn, id)?;
                if current.is_posted {
                    return Err(StoreError::PostedImmutable(id));
                }
                let admin_notes = notes.or(current.admin_notes);
                let row = diesel::update(content_queue::table.find(id))
                    .set((
                        content_queue::is_approved.eq(true),
                        content_queue::is_rejected.eq(false),
                        content_queue::rejection_reason.eq::<Option<String>>(None),
                        content_queue::admin_notes.eq(admin_notes),
                        content_queue::updated_at.eq(now),
                    ))
                    .get_result::<ContentRow>(conn)?;
                ContentItem::try_from(row)
            })
        })
        .await
    }

    async fn mark_rejected(&self, id: i64, reason: &str) -> StoreResult<ContentItem> {
        let reason = reason.to_string();
        let now = self.clock.now();
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                let current = load_content(conn, id)?;
                if current.is_posted {
                    return Err(StoreError::PostedImmutable(id));
                }
                let row = diesel::update(content_queue::table.find(id))
                    .set((
                        content_queue::is_approved.eq(false),
                        content_queue::is_rejected.eq(true),
                        content_queue::rejection_reason.eq(Some(reason)),
                        content_queue::scheduled_for.eq::<Option<DateTime<Utc>>>(None),
                        content_queue::updated_at.eq(now),
                    ))
                    .get_result::<ContentRow>(conn)?;
                ContentItem::try_from(row)
            })
        })
        .await
    }

    async fn mark_scheduled(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let now = self.clock.now();
        self.with_conn(move |conn| {
            let updated = diesel::update(
                content_queue::table
                    .find(id)
                    .filter(content_queue::is_posted.eq(false)),
            )
            .set((
                content_queue::scheduled_for.eq(Some(at)),
                content_queue::updated_at.eq(now),
            ))
            .execute(conn)?;
            if updated == 0 {
                let current = load_content(conn, id)?;
                if current.is_posted {
                    return Err(StoreError::PostedImmutable(id));
                }
            }
            Ok(())
        })
        .await
    }

    async fn mark_posted(&self, id: i64, posted_at: DateTime<Utc>) -> StoreResult<()> {
        let now = self.clock.now();
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                let current = load_content(conn, id)?;
                if !current.is_approved {
                    return Err(StoreError::Conflict(format!(
                        "content {id} cannot be posted without approval"
                    )));
                }
                if current.is_posted {
                    return Ok(());
                }
                diesel::update(content_queue::table.find(id))
                    .set((
                        content_queue::is_posted.eq(true),
                        content_queue::posted_at.eq(Some(posted_at)),
                        content_queue::updated_at.eq(now),
                    ))
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
    }

    async fn update(&self, id: i64, update: ContentUpdate) -> StoreResult<ContentItem> {
        let now = self.clock.now();
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                let current = load_content(conn, id)?;
                if current.is_posted && update.text.is_some() {
                    return Err(StoreError::PostedImmutable(id));
                }
                let normalized = update.text.as_deref().map(normalize_text);
                let text = update.text.or(current.content_text);
                let normalized = normalized.or(current.normalized_text);
                let notes = update.admin_notes.or(current.admin_notes);
                let row = diesel::update(content_queue::table.find(id))
                    .set((
                        content_queue::content_text.eq(text),
                        content_queue::normalized_text.eq(normalized),
                        content_queue::admin_notes.eq(notes),
                        content_queue::updated_at.eq(now),
                    ))
                    .get_result::<ContentRow>(conn)?;
                ContentItem::try_from(row)
            })
        })
        .await
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                let current = load_content(conn, id)?;
                if current.is_posted {
                    return Err(StoreError::PostedImmutable(id));
                }
                diesel::update(
                    schedule_slots::table
                        .filter(schedule_slots::content_id.eq(id))
                        .filter(schedule_slots::actual_posted_at.is_null()),
                )
                .set(schedule_slots::content_id.eq::<Option<i64>>(None))
                .execute(conn)?;
                diesel::delete(content_queue::table.find(id)).execute(conn)?;
                Ok(())
            })
        })
        .await
    }

    async fn stats(&self) -> StoreResult<ContentStats> {
        let start_of_day = self
            .clock
            .now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or_else(|| StoreError::Persistence("invalid start of day".into()))?;
        self.with_conn(move |conn| {
            let total: i64 = content_queue::table.select(count_star()).first(conn)?;
            let posted: i64 = content_queue::table
                .filter(content_queue::is_posted.eq(true))
                .select(count_star())
                .first(conn)?;
            let rejected: i64 = content_queue::table
                .filter(content_queue::is_posted.eq(false))
                .filter(content_queue::is_rejected.eq(true))
                .select(count_star())
                .first(conn)?;
            let approved: i64 = content_queue::table
                .filter(content_queue::is_posted.eq(false))
                .filter(content_queue::is_rejected.eq(false))
                .filter(content_queue::is_approved.eq(true))
                .select(count_star())
                .first(conn)?;
            let today: i64 = content_queue::table
                .filter(content_queue::created_at.ge(start_of_day))
                .select(count_star())
                .first(conn)?;
            let queued = total - posted - rejected - approved;
            Ok(ContentStats {
                total: total as u64,
                queued: queued.max(0) as u64,
                approved: approved as u64,
                posted: posted as u64,
                rejected: rejected as u64,
                today: today as u64,
            })
        })
        .await
    }

    async fn platform_depth(&self) -> StoreResult<Vec<PlatformDepth>> {
        self.with_conn(move |conn| {
            let rows: Vec<(String, bool, i64)> = content_queue::table
                .filter(content_queue::is_posted.eq(false))
                .filter(content_queue::is_rejected.eq(false))
                .group_by((content_queue::source_platform, content_queue::is_approved))
                .select((
                    content_queue::source_platform,
                    content_queue::is_approved,
                    count_star(),
                ))
                .order(content_queue::source_platform.asc())
                .load(conn)?;

            let mut depth: Vec<PlatformDepth> = Vec::new();
            for (platform, approved, count) in rows {
                let platform: Platform = platform.parse().map_err(StoreError::Persistence)?;
                let index = match depth.iter().position(|entry| entry.platform == platform) {
                    Some(index) => index,
                    None => {
                        depth.push(PlatformDepth {
                            platform,
                            approved: 0,
                            pending: 0,
                        });
                        depth.len() - 1
                    }
                };
                if approved {
                    depth[index].approved = count as u64;
                } else {
                    depth[index].pending = count as u64;
                }
            }
            depth.sort_by_key(|entry| entry.platform);
            Ok(depth)
        })
        .await
    }

    async fn record_post(&self, post: NewPostedContent) -> StoreResult<PostedContent> {
        let row = NewPostedRow {
            content_queue_id: post.content_queue_id,
            scheduled_time: post.scheduled_time,
            posted_at: post.posted_at,
        };
        self.with_conn(move |conn| {
            let inserted = diesel::insert_into(posted_content::table)
                .values(&row)
                .get_result::<PostedRow>(conn);
            match inserted {
                Ok(row) => Ok(row.into()),
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    Err(StoreError::Conflict(format!(
                        "content {} already has a post record",
                        row.content_queue_id
                    )))
                }
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    async fn find_post(&self, content_id: i64) -> StoreResult<Option<PostedContent>> {
        self.with_conn(move |conn| {
            let row = posted_content::table
                .filter(posted_content::content_queue_id.eq(content_id))
                .first::<PostedRow>(conn)
                .optional()?;
            Ok(row.map(PostedContent::from))
        })
        .await
    }

    async fn posted_platforms_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Platform>> {
        self.with_conn(move |conn| {
            let names: Vec<String> = posted_content::table
                .inner_join(content_queue::table)
                .filter(posted_content::posted_at.ge(since))
                .select(content_queue::source_platform)
                .load(conn)?;
            names
                .into_iter()
                .map(|name| name.parse().map_err(StoreError::Persistence))
                .collect()
        })
        .await
    }
}

#[async_trait]
impl ScheduleStore for PgStore {
    async fn upsert_slots(&self, day: NaiveDate, slots: &[NewSlot]) -> StoreResult<SlotUpsert> {
        let slots = slots.to_vec();
        let now = self.clock.now();
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                let mut outcome = SlotUpsert::default();
                for slot in slots {
                    let row = NewSlotRow {
                        day,
                        slot_index: slot.slot_index,
                        meal: slot.meal.clone(),
                        content_id: slot.content_id,
                        scheduled_post_time: slot.scheduled_post_time,
                        reasoning: slot.reasoning.clone(),
                        created_at: now,
                        updated_at: now,
                    };
                    let inserted = diesel::insert_into(schedule_slots::table)
                        .values(&row)
                        .on_conflict((schedule_slots::day, schedule_slots::slot_index))
                        .do_nothing()
                        .execute(conn)?;
                    if inserted == 1 {
                        outcome.created.push(slot.slot_index);
                        if let Some(content_id) = slot.content_id {
                            outcome.filled.push((slot.slot_index, content_id));
                        }
                        continue;
                    }

                    let Some(content_id) = slot.content_id else {
                        continue;
                    };
                    let filled = diesel::update(
                        schedule_slots::table
                            .filter(schedule_slots::day.eq(day))
                            .filter(schedule_slots::slot_index.eq(slot.slot_index))
                            .filter(schedule_slots::content_id.is_null()),
                    )
                    .set((
                        schedule_slots::content_id.eq(Some(content_id)),
                        schedule_slots::reasoning.eq(slot.reasoning.clone()),
                        schedule_slots::updated_at.eq(now),
                    ))
                    .execute(conn)?;
                    if filled == 1 {
                        outcome.filled.push((slot.slot_index, content_id));
                    }
                }
                Ok(outcome)
            })
        })
        .await
    }

    async fn get_slots(&self, day: NaiveDate) -> StoreResult<Vec<ScheduledSlot>> {
        self.with_conn(move |conn| {
            let rows = schedule_slots::table
                .filter(schedule_slots::day.eq(day))
                .order(schedule_slots::slot_index.asc())
                .load::<SlotRow>(conn)?;
            Ok(rows.into_iter().map(ScheduledSlot::from).collect())
        })
        .await
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
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                let target = || {
                    schedule_slots::table
                        .filter(schedule_slots::day.eq(day))
                        .filter(schedule_slots::slot_index.eq(slot_index))
                };
                diesel::update(target())
                    .set((
                        schedule_slots::content_id.eq(Some(content_id)),
                        schedule_slots::actual_posted_at.eq(Some(posted_at)),
                        schedule_slots::updated_at.eq(now),
                    ))
                    .execute(conn)?;
                if let Some(reasoning) = reasoning {
                    diesel::update(target())
                        .set(schedule_slots::reasoning.eq(Some(reasoning)))
                        .execute(conn)?;
                }
                Ok(())
            })
        })
        .await
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn upsert(
        &self,
        alert_type: AlertType,
        message: &str,
        severity: Severity,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> StoreResult<(QueueAlert, AlertWrite)> {
        let message = message.to_string();
        let window_start = now - Duration::minutes(ALERT_DEDUP_WINDOW_MINUTES);
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                let existing = queue_alerts::table
                    .filter(queue_alerts::alert_type.eq(alert_type.as_str()))
                    .filter(queue_alerts::acknowledged.eq(false))
                    .filter(queue_alerts::created_at.ge(window_start))
                    .order(queue_alerts::created_at.desc())
                    .for_update()
                    .first::<AlertRow>(conn)
                    .optional()?;

                if let Some(existing) = existing {
                    let row = diesel::update(queue_alerts::table.find(existing.id))
                        .set((
                            queue_alerts::created_at.eq(now),
                            queue_alerts::message.eq(message.as_str()),
                            queue_alerts::severity.eq(severity.as_str()),
                            queue_alerts::metadata.eq(metadata.clone()),
                        ))
                        .get_result::<AlertRow>(conn)?;
                    return Ok((QueueAlert::try_from(row)?, AlertWrite::Refreshed));
                }

                let row = diesel::insert_into(queue_alerts::table)
                    .values(&NewAlertRow {
                        alert_type: alert_type.as_str().to_string(),
                        severity: severity.as_str().to_string(),
                        message: message.clone(),
                        metadata: metadata.clone(),
                        created_at: now,
                    })
                    .get_result::<AlertRow>(conn)?;
                Ok((QueueAlert::try_from(row)?, AlertWrite::Created))
            })
        })
        .await
    }

    async fn list_unacknowledged(&self) -> StoreResult<Vec<QueueAlert>> {
        self.with_conn(move |conn| {
            let rows = queue_alerts::table
                .filter(queue_alerts::acknowledged.eq(false))
                .order(queue_alerts::created_at.desc())
                .load::<AlertRow>(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn list_recent(&self, limit: usize) -> StoreResult<Vec<QueueAlert>> {
        self.with_conn(move |conn| {
            let rows = queue_alerts::table
                .order((queue_alerts::created_at.desc(), queue_alerts::id.desc()))
                .limit(limit as i64)
                .load::<AlertRow>(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn acknowledge(&self, id: i64, now: DateTime<Utc>) -> StoreResult<QueueAlert> {
        self.with_conn(move |conn| {
            diesel::update(
                queue_alerts::table
                    .find(id)
                    .filter(queue_alerts::acknowledged.eq(false)),
            )
            .set((
                queue_alerts::acknowledged.eq(true),
                queue_alerts::acknowledged_at.eq(Some(now)),
            ))
            .execute(conn)?;
            let row = queue_alerts::table
                .find(id)
                .first::<AlertRow>(conn)
                .optional()?
                .ok_or(StoreError::NotFound(id))?;
            QueueAlert::try_from(row)
        })
        .await
    }
}

#[async_trait]
impl ScanHistoryStore for PgStore {
    async fn record(&self, result: &ScanResult) -> StoreResult<ScanRecord> {
        let row = NewScanRow {
            platform: result.platform.as_str().to_string(),
            started_at: result.started_at,
            completed_at: result.completed_at,
            posts_found: to_column(result.posts_found),
            posts_processed: to_column(result.posts_processed),
            posts_approved: to_column(result.posts_approved),
            posts_rejected: to_column(result.posts_rejected),
            posts_flagged: to_column(result.posts_flagged),
            duplicates_found: to_column(result.duplicates_found),
            errors: serde_json::to_value(&result.errors).map_err(StoreError::persistence)?,
            rate_limit_hit: result.rate_limit_hit,
            terms_scanned: serde_json::to_value(&result.terms_scanned)
                .map_err(StoreError::persistence)?,
            highest_engagement: result
                .highest_engagement
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(StoreError::persistence)?,
        };
        self.with_conn(move |conn| {
            let row = diesel::insert_into(scan_history::table)
                .values(&row)
                .get_result::<ScanRow>(conn)?;
            ScanRecord::try_from(row)
        })
        .await
    }

    async fn last_scan(&self, platform: Platform) -> StoreResult<Option<ScanRecord>> {
        self.with_conn(move |conn| {
            scan_history::table
                .filter(scan_history::platform.eq(platform.as_str()))
                .order(scan_history::completed_at.desc())
                .first::<ScanRow>(conn)
                .optional()?
                .map(ScanRecord::try_from)
                .transpose()
        })
        .await
    }

    async fn recent(&self, limit: usize) -> StoreResult<Vec<ScanRecord>> {
        self.with_conn(move |conn| {
            let rows = scan_history::table
                .order(scan_history::completed_at.desc())
                .limit(limit as i64)
                .load::<ScanRow>(conn)?;
            convert_all(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like("50% off_now"), "50\\% off\\_now");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain text"), "plain text");
    }
}
