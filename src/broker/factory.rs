//! Broker backend factory

use std::sync::Arc;

use crate::config::BrokerConfig;

use super::memory_backend::MemoryBroker;
use super::{BrokerError, BrokerEventSender, MessageBroker};

/// Create a broker backend based on configuration.
///
/// - `"kafka"`: rdkafka producer (requires the `kafka` feature)
/// - `"memory"`: in-process broker
///
/// Unlike the optional storage backends, there is no fallback: an unknown or
/// unavailable backend is an initialization failure.
pub fn create_broker(
    settings: &BrokerConfig,
    events: BrokerEventSender,
) -> Result<Arc<dyn MessageBroker>, BrokerError> {
    match settings.backend.as_str() {
        "kafka" => create_kafka(settings, events),
        "memory" => {
            tracing::info!(backend = "memory", "Creating memory broker backend");
            Ok(Arc::new(MemoryBroker::new(events)))
        }
        other => Err(BrokerError::Connection(format!(
            "unknown broker backend '{}'",
            other
        ))),
    }
}

#[cfg(feature = "kafka")]
fn create_kafka(
    settings: &BrokerConfig,
    events: BrokerEventSender,
) -> Result<Arc<dyn MessageBroker>, BrokerError> {
    use super::kafka_backend::{KafkaBroker, KafkaBrokerConfig};

    tracing::info!(
        backend = "kafka",
        bootstrap_servers = %settings.bootstrap_servers,
        "Creating Kafka broker backend"
    );
    let broker = KafkaBroker::new(KafkaBrokerConfig::from_settings(settings), events)?;
    Ok(Arc::new(broker))
}

#[cfg(not(feature = "kafka"))]
fn create_kafka(
    _settings: &BrokerConfig,
    _events: BrokerEventSender,
) -> Result<Arc<dyn MessageBroker>, BrokerError> {
    Err(BrokerError::Connection(
        "kafka backend requested but the service was built without the `kafka` feature"
            .to_string(),
    ))
}
