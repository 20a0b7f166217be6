use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{Platform, ScanRecord, ScanResult};
use crate::scanning::PlatformScanStatus;
use crate::state::AppState;

const RECENT_SCANS: usize = 20;

#[derive(Serialize)]
pub struct ScanStatusResponse {
    pub platforms: Vec<PlatformScanStatus>,
    pub recent: Vec<ScanRecord>,
}

pub async fn trigger_scan(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> AppResult<Json<ScanResult>> {
    let platform: Platform = platform.parse().map_err(AppError::bad_request)?;
    let result = state.pipeline.scans.scan(platform).await?;
    Ok(Json(result))
}

pub async fn scan_status(State(state): State<AppState>) -> AppResult<Json<ScanStatusResponse>> {
    let platforms = state.pipeline.scans.status();
    let recent = state.pipeline.stores.history.recent(RECENT_SCANS).await?;
    Ok(Json(ScanStatusResponse { platforms, recent }))
}
