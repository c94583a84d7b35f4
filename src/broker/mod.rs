//! Message broker abstraction.
//!
//! Publishing is split into two halves, mirroring how Kafka producers work:
//!
//! - [`MessageBroker::publish`] hands a record to the client's asynchronous
//!   send path and returns as soon as the record is accepted (or rejected).
//! - The eventual outcome arrives later as a [`BrokerEvent::Delivery`] on a
//!   single shared, ordered stream created by [`broker_event_channel`].
//!
//! Every record carries a correlation token that the backend echoes back in
//! its delivery report, so consumers of the stream can match reports to
//! publishes without relying on stream order.
//!
//! # Backends
//!
//! - `MemoryBroker`: in-process broker with scriptable delivery (default)
//! - `KafkaBroker`: rdkafka threaded producer (`kafka` feature)

mod factory;
#[cfg(feature = "kafka")]
mod kafka_backend;
mod memory_backend;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use factory::create_broker;
#[cfg(feature = "kafka")]
pub use kafka_backend::{KafkaBroker, KafkaBrokerConfig};
pub use memory_backend::{MemoryBroker, MemoryDeliveryMode, PublishedMessage};

/// Errors raised synchronously by a broker backend
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The client could not be created or connected
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// The client refused the record (queue full, unknown topic, ...)
    #[error("Broker rejected message for topic '{topic}': {reason}")]
    Rejected { topic: String, reason: String },

    /// The client has been shut down
    #[error("Broker client is closed")]
    Closed,

    #[error("Broker flush failed: {0}")]
    Flush(String),
}

/// A single message ready to be handed to the broker
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    /// Correlation token echoed back in the delivery report
    pub token: Uuid,
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Outcome of one publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { partition: i32, offset: i64 },
    Failed { reason: String },
}

/// Broker-supplied outcome of a single publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub token: Uuid,
    pub topic: String,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    pub fn delivered(token: Uuid, topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            token,
            topic: topic.into(),
            outcome: DeliveryOutcome::Delivered { partition, offset },
        }
    }

    pub fn failed(token: Uuid, topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            token,
            topic: topic.into(),
            outcome: DeliveryOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }
}

/// Anything the broker client emits on its event stream
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// Delivery report for a previously published record
    Delivery(DeliveryReport),
    /// Client-level error not tied to a specific record
    Error { reason: String },
    /// Any other client notification (statistics, throttling, ...)
    Unrecognized(String),
}

impl fmt::Display for BrokerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivery(report) => write!(f, "delivery report for {} on {}", report.token, report.topic),
            Self::Error { reason } => write!(f, "client error: {}", reason),
            Self::Unrecognized(kind) => write!(f, "unrecognized event: {}", kind),
        }
    }
}

pub type BrokerEventSender = mpsc::UnboundedSender<BrokerEvent>;
pub type BrokerEventReceiver = mpsc::UnboundedReceiver<BrokerEvent>;

/// Create the shared event stream a broker backend reports on
pub fn broker_event_channel() -> (BrokerEventSender, BrokerEventReceiver) {
    mpsc::unbounded_channel()
}

/// Broker client used by the dispatch bridge.
///
/// Implementations must be thread-safe (`Send + Sync`); one instance is shared
/// by every in-flight dispatch for the lifetime of the process.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Backend identifier for logs and stats
    fn name(&self) -> &'static str;

    /// Submit a record to the asynchronous send path.
    ///
    /// Partition selection is left to the broker. The delivery outcome is
    /// reported later on the event stream, tagged with `record.token`.
    async fn publish(&self, record: OutboundRecord) -> Result<(), BrokerError>;

    /// Wait until every accepted record has produced a delivery report
    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;
}
