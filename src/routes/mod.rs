use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod alerts;
pub mod content;
pub mod health;
pub mod queue;
pub mod scans;
pub mod schedule;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = trimmed, "ignoring invalid CORS origin");
                        None
                    }
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let queue_routes = Router::new()
        .route("/status", get(queue::queue_status))
        .route("/check", post(queue::check_queue));

    let scan_routes = Router::new()
        .route("/status", get(scans::scan_status))
        .route("/:platform", post(scans::trigger_scan));

    let schedule_routes = Router::new()
        .route("/materialize", post(schedule::materialize))
        .route("/:day", get(schedule::get_schedule));

    let content_routes = Router::new()
        .route("/", get(content::list_content))
        .route(
            "/:id",
            get(content::get_content)
                .patch(content::update_content)
                .delete(content::delete_content),
        )
        .route("/:id/approve", post(content::approve_content))
        .route("/:id/reject", post(content::reject_content));

    let alert_routes = Router::new()
        .route("/", get(alerts::list_alerts))
        .route("/:id/acknowledge", post(alerts::acknowledge_alert));

    Router::new()
        .nest("/api/queue", queue_routes)
        .nest("/api/scans", scan_routes)
        .nest("/api/schedule", schedule_routes)
        .nest("/api/content", content_routes)
        .nest("/api/alerts", alert_routes)
        .route(
            "/api/approvals/progressive",
            post(queue::run_progressive_approval),
        )
        .route("/api/pipeline/daily", post(queue::run_daily))
        .route("/api/posting/tick", post(schedule::posting_tick))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
