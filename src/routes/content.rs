use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{ContentItem, ContentStats, ContentStatus, ContentUpdate, PlatformDepth};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

#[derive(Deserialize, Default)]
pub struct ListContentQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Serialize)]
pub struct ContentPage {
    pub status: ContentStatus,
    pub items: Vec<ContentItem>,
    pub stats: ContentStats,
    pub platforms: Vec<PlatformDepth>,
}

#[derive(Deserialize, Default)]
pub struct ApproveRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

pub async fn list_content(
    State(state): State<AppState>,
    Query(query): Query<ListContentQuery>,
) -> AppResult<Json<ContentPage>> {
    let status = match query.status.as_deref() {
        Some(raw) => raw.parse::<ContentStatus>().map_err(AppError::bad_request)?,
        None => ContentStatus::Pending,
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let content = &state.pipeline.stores.content;
    let items = content.list_by_status(status, limit, offset).await?;
    let stats = content.stats().await?;
    let platforms = content.platform_depth().await?;
    Ok(Json(ContentPage {
        status,
        items,
        stats,
        platforms,
    }))
}

pub async fn get_content(
    State(state): State<AppState>,
    Path(content_id): Path<i64>,
) -> AppResult<Json<ContentItem>> {
    state
        .pipeline
        .stores
        .content
        .get(content_id)
        .await?
        .map(Json)
        .ok_or_else(AppError::not_found)
}

pub async fn update_content(
    State(state): State<AppState>,
    Path(content_id): Path<i64>,
    Json(payload): Json<ContentUpdate>,
) -> AppResult<Json<ContentItem>> {
    if payload.text.is_none() && payload.admin_notes.is_none() {
        return Err(AppError::bad_request("nothing to update"));
    }
    let item = state
        .pipeline
        .stores
        .content
        .update(content_id, payload)
        .await?;
    Ok(Json(item))
}

pub async fn delete_content(
    State(state): State<AppState>,
    Path(content_id): Path<i64>,
) -> AppResult<StatusCode> {
    state.pipeline.stores.content.delete(content_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn approve_content(
    State(state): State<AppState>,
    Path(content_id): Path<i64>,
    Json(payload): Json<ApproveRequest>,
) -> AppResult<Json<ContentItem>> {
    let notes = payload
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty());
    let item = state
        .pipeline
        .stores
        .content
        .mark_approved(content_id, notes)
        .await?;
    Ok(Json(item))
}

pub async fn reject_content(
    State(state): State<AppState>,
    Path(content_id): Path<i64>,
    Json(payload): Json<RejectRequest>,
) -> AppResult<Json<ContentItem>> {
    let reason = payload.reason.trim();
    if reason.is_empty() {
        return Err(AppError::bad_request("reason must not be empty"));
    }
    let item = state
        .pipeline
        .stores
        .content
        .mark_rejected(content_id, reason)
        .await?;
    Ok(Json(item))
}
