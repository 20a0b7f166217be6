//! Meal-time slot arithmetic shared by materialization and posting.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::config::{MealTime, PipelineConfig};

pub mod materialize;
pub mod posting;

pub use materialize::{MaterializeOutcome, ScheduleMaterializer};
pub use posting::{PostOutcome, PostingScheduler};

pub const AWAITING_REFILL: &str = "awaiting_refill";

/// UTC instant of `meal` on the local calendar `day`. Meals that fall in a
/// DST gap move forward by an hour.
pub fn slot_time(
    config: &PipelineConfig,
    day: NaiveDate,
    meal: &MealTime,
) -> Option<DateTime<Utc>> {
    let local = day.and_time(meal.local_time()?);
    config
        .timezone
        .from_local_datetime(&local)
        .earliest()
        .or_else(|| {
            config
                .timezone
                .from_local_datetime(&(local + Duration::hours(1)))
                .earliest()
        })
        .map(|at| at.with_timezone(&Utc))
}

/// Calendar day in the configured timezone.
pub fn local_day(config: &PipelineConfig, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&config.timezone).date_naive()
}

/// A meal slot whose posting window contains some instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueMeal {
    pub day: NaiveDate,
    pub slot_index: i32,
    pub meal: String,
    pub scheduled_at: DateTime<Utc>,
}

/// The meal time within `posting_tolerance_minutes` of `now`, if any.
pub fn due_meal(config: &PipelineConfig, now: DateTime<Utc>) -> Option<DueMeal> {
    let tolerance = Duration::minutes(config.posting_tolerance_minutes);
    let today = local_day(config, now);
    let days = [today.pred_opt(), Some(today), today.succ_opt()];

    days.into_iter().flatten().find_map(|day| {
        config
            .meal_times
            .iter()
            .enumerate()
            .find_map(|(index, meal)| {
                let scheduled_at = slot_time(config, day, meal)?;
                let offset = now - scheduled_at;
                (offset <= tolerance && offset >= -tolerance).then(|| DueMeal {
                    day,
                    slot_index: index as i32,
                    meal: meal.name.clone(),
                    scheduled_at,
                })
            })
    })
}

/// The named meal on the local day containing `now`.
pub fn named_meal(config: &PipelineConfig, now: DateTime<Utc>, name: &str) -> Option<DueMeal> {
    let day = local_day(config, now);
    config
        .meal_times
        .iter()
        .enumerate()
        .find(|(_, meal)| meal.name.eq_ignore_ascii_case(name))
        .and_then(|(index, meal)| {
            Some(DueMeal {
                day,
                slot_index: index as i32,
                meal: meal.name.clone(),
                scheduled_at: slot_time(config, day, meal)?,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_times_follow_configured_timezone() {
        let config = PipelineConfig::default();
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let breakfast = &config.meal_times[0];
        let at = slot_time(&config, day, breakfast).unwrap();
        // New York is UTC-5 in January.
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap());

        let summer = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        let at = slot_time(&config, summer, breakfast).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap());
    }

    #[test]
    fn due_meal_respects_tolerance() {
        let config = PipelineConfig::default();
        // 12:04 local lunch in January.
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 17, 4, 0).unwrap();
        let due = due_meal(&config, now).unwrap();
        assert_eq!(due.meal, "lunch");
        assert_eq!(due.slot_index, 1);

        let late = Utc.with_ymd_and_hms(2024, 1, 15, 17, 6, 0).unwrap();
        assert!(due_meal(&config, late).is_none());
    }

    #[test]
    fn late_night_meal_maps_to_local_day() {
        let config = PipelineConfig::default();
        // 22:00 New York on Jan 15 is 03:00 UTC on Jan 16.
        let now = Utc.with_ymd_and_hms(2024, 1, 16, 3, 2, 0).unwrap();
        let due = due_meal(&config, now).unwrap();
        assert_eq!(due.meal, "late_night");
        assert_eq!(due.day, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }
}
