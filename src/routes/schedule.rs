use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::ScheduledSlot;
use crate::schedule::{MaterializeOutcome, PostOutcome};
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct MaterializeQuery {
    pub day: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct PostingQuery {
    pub meal: Option<String>,
}

#[derive(Serialize)]
pub struct DaySchedule {
    pub day: NaiveDate,
    pub slots: Vec<ScheduledSlot>,
}

fn resolve_day(state: &AppState, raw: Option<&str>) -> AppResult<NaiveDate> {
    let today = state.pipeline.today();
    match raw.map(str::trim) {
        None | Some("") | Some("today") => Ok(today),
        Some("tomorrow") => today
            .succ_opt()
            .ok_or_else(|| AppError::bad_request("date out of range")),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|_| {
                AppError::bad_request(format!("invalid day {value}, expected YYYY-MM-DD"))
            }),
    }
}

pub async fn materialize(
    State(state): State<AppState>,
    Query(query): Query<MaterializeQuery>,
) -> AppResult<Json<MaterializeOutcome>> {
    let day = resolve_day(&state, query.day.as_deref())?;
    Ok(Json(state.pipeline.materializer.materialize_day(day).await?))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path(day): Path<String>,
) -> AppResult<Json<DaySchedule>> {
    let day = resolve_day(&state, Some(&day))?;
    let slots = state.pipeline.stores.schedule.get_slots(day).await?;
    Ok(Json(DaySchedule { day, slots }))
}

pub async fn posting_tick(
    State(state): State<AppState>,
    Query(query): Query<PostingQuery>,
) -> AppResult<Json<PostOutcome>> {
    let outcome = match query.meal.as_deref() {
        Some(meal) => state.pipeline.poster.post_named(meal).await?,
        None => state.pipeline.poster.tick().await?,
    };
    Ok(Json(outcome))
}
