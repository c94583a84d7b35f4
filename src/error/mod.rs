use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::dispatch::DispatchError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Malformed request body
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

fn redacted(log_msg: &str, public: &str) -> String {
    if is_production() {
        public.to_string()
    } else {
        log_msg.to_string()
    }
}

fn dispatch_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::InvalidEvent(_) => StatusCode::BAD_REQUEST,
        DispatchError::Serialization(_) | DispatchError::ListenerClosed => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        DispatchError::Publish(_) => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::DeliveryFailed { .. } => StatusCode::BAD_GATEWAY,
        DispatchError::DeliveryTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Dispatch(e) => dispatch_status(e),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Validation(_) => "INVALID_EVENT",
            AppError::Dispatch(e) => e.code(),
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let log_message = self.to_string();

        let client_message = match &self {
            AppError::Config(_) => redacted(&log_message, "Configuration error"),
            AppError::Internal(_) => redacted(&log_message, "Internal server error"),
            AppError::Dispatch(DispatchError::Serialization(_) | DispatchError::ListenerClosed) => {
                redacted(&log_message, "Internal server error")
            }
            AppError::Dispatch(DispatchError::Publish(_)) => {
                redacted(&log_message, "Message broker unavailable")
            }
            _ => log_message.clone(),
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
