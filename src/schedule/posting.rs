use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::{due_meal, named_meal, DueMeal};
use crate::clock::Clock;
use crate::config::{PipelineConfig, SelectionStrategy};
use crate::error::{PipelineError, PipelineResult, StoreError, StoreResult};
use crate::models::{
    AlertType, ContentItem, NewPostedContent, NewSlot, Platform, PostedContent, Severity,
};
use crate::store::{AlertStore, ContentFilter, ContentStore, ScheduleStore};

/// Upper bound on approved items considered for one selection.
const SELECTION_POOL: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PostOutcome {
    Posted {
        content_id: i64,
        meal: String,
        slot_index: i32,
        post: PostedContent,
    },
    /// A post row already existed; the item was force-marked posted instead.
    AlreadyPosted { content_id: i64 },
    SlotAlreadyPosted { meal: String },
    NothingToPost { meal: String },
    NotDue,
}

#[derive(Clone)]
pub struct PostingScheduler {
    content: Arc<dyn ContentStore>,
    schedule: Arc<dyn ScheduleStore>,
    alerts: Arc<dyn AlertStore>,
    config: Arc<PipelineConfig>,
    clock: Arc<dyn Clock>,
}

impl PostingScheduler {
    pub fn new(
        content: Arc<dyn ContentStore>,
        schedule: Arc<dyn ScheduleStore>,
        alerts: Arc<dyn AlertStore>,
        config: Arc<PipelineConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            content,
            schedule,
            alerts,
            config,
            clock,
        }
    }

    /// Posts for the meal time whose window contains now, if any.
    pub async fn tick(&self) -> StoreResult<PostOutcome> {
        match due_meal(&self.config, self.clock.now()) {
            Some(due) => self.post_meal(&due).await,
            None => Ok(PostOutcome::NotDue),
        }
    }

    /// Posts for a meal by name on today's local date, ignoring the window.
    pub async fn post_named(&self, meal: &str) -> PipelineResult<PostOutcome> {
        let due = named_meal(&self.config, self.clock.now(), meal)
            .ok_or_else(|| PipelineError::Invalid(format!("unknown meal time {meal}")))?;
        Ok(self.post_meal(&due).await?)
    }

    pub async fn post_meal(&self, due: &DueMeal) -> StoreResult<PostOutcome> {
        let slot = self
            .schedule
            .get_slots(due.day)
            .await?
            .into_iter()
            .find(|slot| slot.slot_index == due.slot_index);

        if slot.as_ref().is_some_and(|slot| slot.actual_posted_at.is_some()) {
            return Ok(PostOutcome::SlotAlreadyPosted {
                meal: due.meal.clone(),
            });
        }

        let reserved = slot.as_ref().and_then(|slot| slot.content_id);
        let mut chosen = None;
        if let Some(content_id) = reserved {
            match self.content.get(content_id).await? {
                Some(item) if item.is_ready_to_post() => chosen = Some(item),
                _ => warn!(content_id, meal = %due.meal, "scheduled content no longer eligible"),
            }
        }
        // Recorded on an existing slot when its content changes at posting time.
        let note = match (&chosen, reserved) {
            _ if slot.is_none() => None,
            (Some(_), _) => None,
            (None, Some(content_id)) => Some(format!(
                "replaced at posting time: content {content_id} no longer eligible"
            )),
            (None, None) => Some("selected at posting time".to_string()),
        };
        if chosen.is_none() {
            let exclude: Vec<i64> = reserved.into_iter().collect();
            chosen = self.select_excluding(&exclude).await?;
        }

        let Some(item) = chosen else {
            let message = format!("No eligible content to post for {}", due.meal);
            let (alert, _) = self
                .alerts
                .upsert(
                    AlertType::PostingFailure,
                    &message,
                    Severity::High,
                    json!({ "meal": due.meal, "day": due.day, "slot_index": due.slot_index }),
                    self.clock.now(),
                )
                .await?;
            warn!(alert_id = alert.id, meal = %due.meal, "nothing to post");
            return Ok(PostOutcome::NothingToPost {
                meal: due.meal.clone(),
            });
        };

        if slot.is_none() {
            self.schedule
                .upsert_slots(
                    due.day,
                    &[NewSlot {
                        slot_index: due.slot_index,
                        meal: due.meal.clone(),
                        scheduled_post_time: due.scheduled_at,
                        content_id: Some(item.id),
                        reasoning: Some("selected at posting time".to_string()),
                    }],
                )
                .await?;
        }

        self.commit_to_slot(&item, due, note).await
    }

    /// Marks the item posted, then appends its post record. A pre-existing
    /// record aborts the post but still flags the item as posted.
    pub async fn commit(&self, item: &ContentItem, due: &DueMeal) -> StoreResult<PostOutcome> {
        self.commit_to_slot(item, due, None).await
    }

    /// Like `commit`, but `note` replaces the slot's reasoning once posted.
    async fn commit_to_slot(
        &self,
        item: &ContentItem,
        due: &DueMeal,
        note: Option<String>,
    ) -> StoreResult<PostOutcome> {
        let now = self.clock.now();

        if let Some(existing) = self.content.find_post(item.id).await? {
            warn!(
                content_id = item.id,
                post_id = existing.id,
                "content already has a post record, skipping"
            );
            self.content.mark_posted(item.id, existing.posted_at).await?;
            return Ok(PostOutcome::AlreadyPosted {
                content_id: item.id,
            });
        }

        self.content.mark_posted(item.id, now).await?;
        let post = match self
            .content
            .record_post(NewPostedContent {
                content_queue_id: item.id,
                scheduled_time: due.meal.clone(),
                posted_at: now,
            })
            .await
        {
            Ok(post) => post,
            Err(StoreError::Conflict(reason)) => {
                warn!(content_id = item.id, %reason, "lost posting race");
                return Ok(PostOutcome::AlreadyPosted {
                    content_id: item.id,
                });
            }
            Err(err) => return Err(err),
        };
        self.schedule
            .mark_slot_posted(due.day, due.slot_index, item.id, now, note)
            .await?;

        info!(
            content_id = item.id,
            platform = %item.source_platform,
            content_type = %item.content_type,
            meal = %due.meal,
            post_order = post.post_order,
            "content posted"
        );
        Ok(PostOutcome::Posted {
            content_id: item.id,
            meal: due.meal.clone(),
            slot_index: due.slot_index,
            post,
        })
    }

    pub async fn select_next(&self) -> StoreResult<Option<ContentItem>> {
        self.select_excluding(&[]).await
    }

    /// Picks from unscheduled content first. Items reserved for other slots
    /// are only taken when nothing unscheduled is eligible.
    async fn select_excluding(&self, exclude: &[i64]) -> StoreResult<Option<ContentItem>> {
        let now = self.clock.now();
        let unscheduled = ContentFilter {
            unscheduled_only: true,
            exclude_ids: exclude.to_vec(),
            ..ContentFilter::default()
        };
        let mut pool = self
            .content
            .list_approved_unposted(&unscheduled, SELECTION_POOL)
            .await?;
        if pool.is_empty() {
            let any = ContentFilter {
                exclude_ids: exclude.to_vec(),
                ..ContentFilter::default()
            };
            pool = self
                .content
                .list_approved_unposted(&any, SELECTION_POOL)
                .await?;
        }
        if pool.is_empty() {
            return Ok(None);
        }

        let recent: HashSet<Platform> = self
            .content
            .posted_platforms_since(now - Duration::hours(24))
            .await?
            .into_iter()
            .collect();

        let weekly_counts = match self.config.selection_strategy {
            SelectionStrategy::PlatformBalanced => Some(
                self.content
                    .posted_platforms_since(now - Duration::days(7))
                    .await?
                    .into_iter()
                    .fold(HashMap::new(), |mut counts, platform| {
                        *counts.entry(platform).or_insert(0usize) += 1;
                        counts
                    }),
            ),
            SelectionStrategy::TypePriority => None,
        };

        let mut rng = rand::thread_rng();
        let ranked = rank_type_priority(pool, &recent, &mut rng);
        Ok(match weekly_counts {
            Some(counts) => pick_platform_balanced(&ranked, &self.config, &counts)
                .or_else(|| ranked.first().cloned()),
            None => ranked.into_iter().next(),
        })
    }
}

/// Orders by content-type priority, then platforms not posted from in the
/// last day, then confidence. Ties keep a random order.
pub fn rank_type_priority<R: Rng + ?Sized>(
    mut items: Vec<ContentItem>,
    recent: &HashSet<Platform>,
    rng: &mut R,
) -> Vec<ContentItem> {
    items.shuffle(rng);
    items.sort_by(|a, b| {
        b.content_type
            .posting_priority()
            .cmp(&a.content_type.posting_priority())
            .then_with(|| {
                recent
                    .contains(&a.source_platform)
                    .cmp(&recent.contains(&b.source_platform))
            })
            .then_with(|| b.confidence_score.total_cmp(&a.confidence_score))
    });
    items
}

/// Best-ranked item from the platform furthest below its configured weight
/// over the last week's posts.
pub fn pick_platform_balanced(
    ranked: &[ContentItem],
    config: &PipelineConfig,
    weekly_counts: &HashMap<Platform, usize>,
) -> Option<ContentItem> {
    let total = weekly_counts.values().sum::<usize>().max(1) as f64;
    let mut deficits: Vec<(Platform, f64)> = config
        .platform_weights
        .iter()
        .filter(|(_, weight)| **weight > 0.0)
        .map(|(platform, weight)| {
            let share = weekly_counts.get(platform).copied().unwrap_or(0) as f64 / total;
            (*platform, weight - share)
        })
        .collect();
    deficits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    deficits.into_iter().find_map(|(platform, _)| {
        ranked
            .iter()
            .find(|item| item.source_platform == platform)
            .cloned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use chrono::{TimeZone, Utc};
    use rand::{rngs::StdRng, SeedableRng};

    fn item(
        id: i64,
        platform: Platform,
        content_type: ContentType,
        confidence: f64,
    ) -> ContentItem {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        ContentItem {
            id,
            content_hash: format!("hash-{id}"),
            similarity_key: format!("sim-{id}"),
            text: Some("hotdog".into()),
            image_url: None,
            video_url: None,
            content_type,
            source_platform: platform,
            original_url: format!("https://example.com/{id}"),
            original_author: None,
            scraped_at: at,
            is_approved: true,
            is_posted: false,
            is_rejected: false,
            confidence_score: confidence,
            rejection_reason: None,
            admin_notes: None,
            flagged_patterns: Vec::new(),
            engagement: None,
            created_at: at,
            updated_at: at,
            posted_at: None,
            scheduled_for: None,
        }
    }

    #[test]
    fn visual_content_outranks_confident_text() {
        let items = vec![
            item(1, Platform::Reddit, ContentType::Text, 0.99),
            item(2, Platform::Imgur, ContentType::Image, 0.6),
            item(3, Platform::Youtube, ContentType::Video, 0.5),
        ];
        let ranked = rank_type_priority(items, &HashSet::new(), &mut StdRng::seed_from_u64(7));
        let ids: Vec<i64> = ranked.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn recently_posted_platforms_are_deprioritized() {
        let items = vec![
            item(1, Platform::Reddit, ContentType::Image, 0.95),
            item(2, Platform::Pixabay, ContentType::Image, 0.7),
        ];
        let recent = HashSet::from([Platform::Reddit]);
        let ranked = rank_type_priority(items, &recent, &mut StdRng::seed_from_u64(7));
        assert_eq!(ranked[0].id, 2);
    }

    #[test]
    fn balanced_pick_favours_underserved_platform() {
        let config = PipelineConfig::default();
        let ranked = vec![
            item(1, Platform::Reddit, ContentType::Image, 0.9),
            item(2, Platform::Youtube, ContentType::Video, 0.8),
        ];
        // Reddit already took every post this week.
        let counts = HashMap::from([(Platform::Reddit, 10)]);
        let picked = pick_platform_balanced(&ranked, &config, &counts).unwrap();
        assert_eq!(picked.id, 2);
    }
}
