//! Kafka broker backend.
//!
//! Uses an rdkafka `ThreadedProducer` whose background thread polls for
//! delivery reports. Each record's correlation token is attached as the
//! per-message delivery opaque, so librdkafka hands it back with the report
//! and no ordering assumption is needed to match reports to publishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, ClientContext};
use uuid::Uuid;

use crate::config::BrokerConfig;

use super::{
    BrokerError, BrokerEvent, BrokerEventSender, DeliveryReport, MessageBroker, OutboundRecord,
};

/// Producer settings for the Kafka backend.
#[derive(Clone, Debug)]
pub struct KafkaBrokerConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Acknowledgment mode ("all", "1", "0").
    pub acks: String,
    /// Compression codec ("none", "gzip", "snappy", "lz4", "zstd").
    pub compression_type: String,
    pub batch_num_messages: u32,
    pub queue_buffering_max_ms: u64,
    pub queue_buffering_max_messages: u32,
    /// Broker-side delivery timeout; a failure report is produced when exceeded.
    pub message_timeout_ms: u64,
}

impl KafkaBrokerConfig {
    pub fn from_settings(settings: &BrokerConfig) -> Self {
        Self {
            bootstrap_servers: settings.bootstrap_servers.clone(),
            acks: settings.acks.clone(),
            compression_type: settings.compression_type.clone(),
            batch_num_messages: settings.batch_num_messages,
            queue_buffering_max_ms: settings.queue_buffering_max_ms,
            queue_buffering_max_messages: settings.queue_buffering_max_messages,
            message_timeout_ms: settings.message_timeout_ms,
        }
    }

    /// Build a ClientConfig for the producer.
    fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("acks", &self.acks);
        config.set("compression.type", &self.compression_type);
        config.set("batch.num.messages", self.batch_num_messages.to_string());
        config.set("queue.buffering.max.ms", self.queue_buffering_max_ms.to_string());
        config.set(
            "queue.buffering.max.messages",
            self.queue_buffering_max_messages.to_string(),
        );
        config.set("message.timeout.ms", self.message_timeout_ms.to_string());
        config
    }
}

/// Forwards librdkafka callbacks onto the shared broker event stream.
pub struct DeliveryContext {
    events: BrokerEventSender,
}

impl DeliveryContext {
    fn forward(&self, event: BrokerEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("Broker event stream closed, dropping Kafka callback");
        }
    }
}

impl ClientContext for DeliveryContext {
    fn error(&self, error: KafkaError, reason: &str) {
        tracing::error!(error = %error, reason = %reason, "Kafka client error");
        self.forward(BrokerEvent::Error {
            reason: format!("{}: {}", error, reason),
        });
    }
}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<Uuid>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, token: Self::DeliveryOpaque) {
        let report = match delivery_result {
            Ok(message) => DeliveryReport::delivered(
                *token,
                message.topic(),
                message.partition(),
                message.offset(),
            ),
            Err((error, message)) => DeliveryReport::failed(*token, message.topic(), error.to_string()),
        };
        self.forward(BrokerEvent::Delivery(report));
    }
}

/// Kafka broker backend.
pub struct KafkaBroker {
    producer: Arc<ThreadedProducer<DeliveryContext>>,
    config: KafkaBrokerConfig,
}

impl KafkaBroker {
    /// Create the producer; failures here are fatal at startup.
    pub fn new(config: KafkaBrokerConfig, events: BrokerEventSender) -> Result<Self, BrokerError> {
        let producer: ThreadedProducer<DeliveryContext> = config
            .build_producer_config()
            .create_with_context(DeliveryContext { events })
            .map_err(|e| BrokerError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        tracing::info!(
            bootstrap_servers = %config.bootstrap_servers,
            acks = %config.acks,
            compression = %config.compression_type,
            "Kafka producer created"
        );

        Ok(Self {
            producer: Arc::new(producer),
            config,
        })
    }

    pub fn config(&self) -> &KafkaBrokerConfig {
        &self.config
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn publish(&self, record: OutboundRecord) -> Result<(), BrokerError> {
        let base = BaseRecord::with_opaque_to(&record.topic, Box::new(record.token))
            .key(&record.key)
            .payload(&record.value);

        self.producer.send(base).map_err(|(e, _)| BrokerError::Rejected {
            topic: record.topic.clone(),
            reason: e.to_string(),
        })
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::Flush(e.to_string()))?
            .map_err(|e| BrokerError::Flush(e.to_string()))
    }
}
