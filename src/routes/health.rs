use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let store = if state.pool.is_some() { "postgres" } else { "memory" };
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "store": store })),
    )
}
