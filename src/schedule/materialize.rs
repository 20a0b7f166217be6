use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use super::{slot_time, AWAITING_REFILL};
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::{NewSlot, ScheduledSlot, SlotUpsert};
use crate::store::{ContentFilter, ContentStore, ScheduleStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializeOutcome {
    pub day: NaiveDate,
    pub rows_created: usize,
    pub rows_filled: usize,
    pub rows_empty: usize,
    pub slots: Vec<ScheduledSlot>,
}

/// Builds a day's posting slots and refills the empty ones. Safe to re-run:
/// slot identity is `(day, slot_index)` and filled slots are never touched.
#[derive(Clone)]
pub struct ScheduleMaterializer {
    content: Arc<dyn ContentStore>,
    schedule: Arc<dyn ScheduleStore>,
    config: Arc<PipelineConfig>,
    clock: Arc<dyn Clock>,
}

impl ScheduleMaterializer {
    pub fn new(
        content: Arc<dyn ContentStore>,
        schedule: Arc<dyn ScheduleStore>,
        config: Arc<PipelineConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            content,
            schedule,
            config,
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        super::local_day(&self.config, self.clock.now())
    }

    pub async fn materialize_day(&self, day: NaiveDate) -> StoreResult<MaterializeOutcome> {
        let existing: HashMap<i32, ScheduledSlot> = self
            .schedule
            .get_slots(day)
            .await?
            .into_iter()
            .map(|slot| (slot.slot_index, slot))
            .collect();

        let mut open_indices = Vec::new();
        for index in 0..self.config.meal_times.len() as i32 {
            match existing.get(&index) {
                Some(slot) if slot.content_id.is_some() => {}
                _ => open_indices.push(index),
            }
        }

        let filter = ContentFilter {
            unscheduled_only: true,
            exclude_ids: existing.values().filter_map(|slot| slot.content_id).collect(),
            ..ContentFilter::default()
        };
        let ranked = if open_indices.is_empty() {
            Vec::new()
        } else {
            self.content
                .list_approved_unposted(&filter, open_indices.len())
                .await?
        };
        let mut candidates = ranked.into_iter();

        let mut slots = Vec::with_capacity(open_indices.len());
        for index in open_indices {
            let meal = &self.config.meal_times[index as usize];
            let scheduled_post_time = slot_time(&self.config, day, meal).ok_or_else(|| {
                StoreError::Persistence(format!("meal time {} has no valid instant", meal.name))
            })?;
            let exists = existing.contains_key(&index);
            let (content_id, reasoning) = match candidates.next() {
                Some(item) => (
                    Some(item.id),
                    format!(
                        "{} {} from {} (confidence {:.2})",
                        meal.name, item.content_type, item.source_platform, item.confidence_score
                    ),
                ),
                // Existing empty slots with nothing to offer stay as they are.
                None if exists => continue,
                None => (None, AWAITING_REFILL.to_string()),
            };
            slots.push(NewSlot {
                slot_index: index,
                meal: meal.name.clone(),
                scheduled_post_time,
                content_id,
                reasoning: Some(reasoning),
            });
        }

        let upsert = if slots.is_empty() {
            SlotUpsert::default()
        } else {
            self.schedule.upsert_slots(day, &slots).await?
        };

        for (index, content_id) in &upsert.filled {
            let Some(slot) = slots.iter().find(|slot| slot.slot_index == *index) else {
                continue;
            };
            self.content
                .mark_scheduled(*content_id, slot.scheduled_post_time)
                .await?;
        }

        let final_slots = self.schedule.get_slots(day).await?;
        let rows_empty = final_slots
            .iter()
            .filter(|slot| slot.content_id.is_none())
            .count();
        let outcome = MaterializeOutcome {
            day,
            rows_created: upsert.created.len(),
            rows_filled: upsert.filled.len(),
            rows_empty,
            slots: final_slots,
        };
        info!(
            %day,
            created = outcome.rows_created,
            filled = outcome.rows_filled,
            empty = outcome.rows_empty,
            "schedule materialized"
        );
        Ok(outcome)
    }
}
