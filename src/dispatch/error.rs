use thiserror::Error;

use crate::broker::BrokerError;

/// Errors surfaced by a dispatch or by request intake
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The event cannot be dispatched as given
    #[error("Invalid communication event: {0}")]
    InvalidEvent(String),

    /// The event or its receiver key could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The broker refused the record at submission time
    #[error("Publish error: {0}")]
    Publish(#[from] BrokerError),

    /// The broker reported that the message was not delivered
    #[error("Delivery to topic '{topic}' failed: {reason}")]
    DeliveryFailed { topic: String, reason: String },

    /// No delivery report arrived in time; the message may still be delivered
    #[error("No delivery report for topic '{topic}' within {timeout_ms}ms")]
    DeliveryTimeout { topic: String, timeout_ms: u64 },

    /// The delivery listener stopped before reporting
    #[error("Delivery listener closed before a report arrived")]
    ListenerClosed,
}

impl DispatchError {
    /// Stable error code for API responses and bulk failure descriptors
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEvent(_) => "INVALID_EVENT",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Publish(_) => "PUBLISH_ERROR",
            Self::DeliveryFailed { .. } => "DELIVERY_FAILED",
            Self::DeliveryTimeout { .. } => "DELIVERY_TIMEOUT",
            Self::ListenerClosed => "INTERNAL_ERROR",
        }
    }
}
