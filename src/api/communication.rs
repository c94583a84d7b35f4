//! Communication intake endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};

use crate::communication::{
    BulkCommunicationEvent, BulkCommunicationResponse, CommunicationEvent, CommunicationResponse,
};
use crate::error::{AppError, Result};
use crate::server::AppState;

/// POST /api/v1/communications/send
///
/// Responds only after every requested channel has been confirmed by the broker.
pub async fn send_communication(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CommunicationEvent>, JsonRejection>,
) -> Result<Json<CommunicationResponse>> {
    let Json(event) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let response = state.engine.send_one(event).await?;
    Ok(Json(response))
}

/// POST /api/v1/communications/bulk
pub async fn send_bulk_communication(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BulkCommunicationEvent>, JsonRejection>,
) -> Result<Json<BulkCommunicationResponse>> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    tracing::info!(
        events = request.communication_events.len(),
        "Bulk communication request"
    );

    let response = state.engine.send_bulk(request).await?;
    Ok(Json(response))
}
