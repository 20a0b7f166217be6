use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::models::QueueAlert;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct ListAlertsQuery {
    #[serde(default)]
    pub all: bool,
    pub limit: Option<usize>,
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> AppResult<Json<Vec<QueueAlert>>> {
    let alerts = &state.pipeline.stores.alerts;
    let list = if query.all {
        alerts
            .list_recent(query.limit.unwrap_or(50).clamp(1, 500))
            .await?
    } else {
        alerts.list_unacknowledged().await?
    };
    Ok(Json(list))
}

pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
) -> AppResult<Json<QueueAlert>> {
    let now = state.now();
    let alert = state
        .pipeline
        .stores
        .alerts
        .acknowledge(alert_id, now)
        .await?;
    Ok(Json(alert))
}
