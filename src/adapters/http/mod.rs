pub mod routes;
pub mod state;
pub mod ws;

use axum::extract::DefaultBodyLimit;
use axum::{routing::{get, post}, Router};
use tower_http::trace::TraceLayer;

use crate::adapters::http::state::HttpState;
use crate::adapters::http::ws::ws_handler;

pub fn router(state: HttpState) -> Router {
    let max_upload = state.detection.config().server.max_upload_mb.max(1) * 1024 * 1024;
    Router::new()
        .route("/api/config", get(routes::get_config))
        .route("/api/detect/image", post(routes::detect_image))
        .route("/api/detect/video", post(routes::detect_video))
        .route("/api/jobs/:id", get(routes::job_status))
        .route("/api/jobs/:id/download", get(routes::job_download))
        .route("/ws/live", get(ws_handler))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
