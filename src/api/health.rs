//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::BulkFailureMode;
use crate::dispatch::EngineStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub broker: BrokerHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct BrokerHealthResponse {
    pub backend: String,
    pub pending_deliveries: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub communications: EngineStatsSnapshot,
    pub dispatch: DispatchStats,
}

#[derive(Debug, Serialize)]
pub struct DispatchStats {
    pub pending_deliveries: usize,
    pub delivery_timeout_ms: u64,
    pub bulk_failure_mode: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        broker: BrokerHealthResponse {
            backend: state.broker.name().to_string(),
            pending_deliveries: state.pending.len(),
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let bulk_failure_mode = match state.engine.bulk_mode() {
        BulkFailureMode::FailFast => "fail_fast",
        BulkFailureMode::Partial => "partial",
    };

    Json(StatsResponse {
        communications: state.engine.stats(),
        dispatch: DispatchStats {
            pending_deliveries: state.pending.len(),
            delivery_timeout_ms: state.engine.bridge().delivery_timeout().as_millis() as u64,
            bulk_failure_mode: bulk_failure_mode.to_string(),
        },
    })
}
