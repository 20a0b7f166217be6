use axum::{extract::State, Json};
use serde::Serialize;

use crate::approval::ApprovalReport;
use crate::error::AppResult;
use crate::models::QueueAlert;
use crate::monitor::{QueueHealth, QueueStatus};
use crate::pipeline::DailyReport;
use crate::state::AppState;

#[derive(Serialize)]
pub struct QueueReport {
    #[serde(flatten)]
    pub status: QueueStatus,
    pub alerts: Vec<QueueAlert>,
}

/// Read-only; never raises alerts.
pub async fn queue_status(State(state): State<AppState>) -> AppResult<Json<QueueReport>> {
    let status = state.pipeline.monitor.status().await?;
    let alerts = state.pipeline.stores.alerts.list_unacknowledged().await?;
    Ok(Json(QueueReport { status, alerts }))
}

pub async fn check_queue(State(state): State<AppState>) -> AppResult<Json<QueueHealth>> {
    Ok(Json(state.pipeline.monitor.check().await?))
}

pub async fn run_progressive_approval(
    State(state): State<AppState>,
) -> AppResult<Json<ApprovalReport>> {
    Ok(Json(state.pipeline.approver.run().await?))
}

pub async fn run_daily(State(state): State<AppState>) -> AppResult<Json<DailyReport>> {
    Ok(Json(state.pipeline.run_daily().await?))
}
