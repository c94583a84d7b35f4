use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::communication::{send_bulk_communication, send_communication};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Communication endpoints
        .nest(
            "/api/v1",
            Router::new()
                .route("/communications/send", post(send_communication))
                .route("/communications/bulk", post(send_bulk_communication)),
        )
}
