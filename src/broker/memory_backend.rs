//! In-memory broker backend.
//!
//! Records are kept in memory and delivery reports are emitted on the shared
//! event stream. Nothing leaves the process, which makes this backend suitable
//! for local development and for exercising the dispatch path in tests.
//!
//! Delivery behaviour can be scripted per topic: fail, stay silent (no report
//! ever arrives) or reject synchronously. In [`MemoryDeliveryMode::Manual`]
//! reports are held until released, which lets callers reorder them.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    BrokerError, BrokerEvent, BrokerEventSender, DeliveryReport, MessageBroker, OutboundRecord,
};

/// When delivery reports are emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDeliveryMode {
    /// Report as soon as the record is accepted
    Immediate,
    /// Hold reports until released
    Manual,
}

/// A record accepted by the memory broker
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub token: Uuid,
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

impl PublishedMessage {
    pub fn value_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.value)
    }

    pub fn key_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.key)
    }
}

pub struct MemoryBroker {
    events: BrokerEventSender,
    mode: MemoryDeliveryMode,
    published: Mutex<Vec<PublishedMessage>>,
    held: Mutex<Vec<DeliveryReport>>,
    offsets: DashMap<String, i64>,
    /// topic -> failure reason
    failing_topics: DashMap<String, String>,
    /// topic -> rejection reason
    rejecting_topics: DashMap<String, String>,
    silent_topics: DashMap<String, ()>,
}

impl MemoryBroker {
    /// Broker that reports every delivery immediately
    pub fn new(events: BrokerEventSender) -> Self {
        Self::with_mode(events, MemoryDeliveryMode::Immediate)
    }

    /// Broker that holds delivery reports until released
    pub fn manual(events: BrokerEventSender) -> Self {
        Self::with_mode(events, MemoryDeliveryMode::Manual)
    }

    pub fn with_mode(events: BrokerEventSender, mode: MemoryDeliveryMode) -> Self {
        Self {
            events,
            mode,
            published: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            offsets: DashMap::new(),
            failing_topics: DashMap::new(),
            rejecting_topics: DashMap::new(),
            silent_topics: DashMap::new(),
        }
    }

    pub fn mode(&self) -> MemoryDeliveryMode {
        self.mode
    }

    /// Report delivery failure for every record sent to `topic`
    pub fn fail_topic(&self, topic: impl Into<String>, reason: impl Into<String>) {
        self.failing_topics.insert(topic.into(), reason.into());
    }

    /// Accept records for `topic` but never report on them
    pub fn silence_topic(&self, topic: impl Into<String>) {
        self.silent_topics.insert(topic.into(), ());
    }

    /// Refuse records for `topic` at submission time
    pub fn reject_topic(&self, topic: impl Into<String>, reason: impl Into<String>) {
        self.rejecting_topics.insert(topic.into(), reason.into());
    }

    /// Push an arbitrary event onto the shared stream
    pub fn emit(&self, event: BrokerEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("Broker event stream closed, dropping event");
        }
    }

    /// All accepted records, in submission order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of reports waiting for release
    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Release held reports in the order their records were accepted
    pub fn release_all(&self) -> usize {
        let reports = self.take_held();
        let count = reports.len();
        for report in reports {
            self.emit(BrokerEvent::Delivery(report));
        }
        count
    }

    /// Release held reports newest-first
    pub fn release_reversed(&self) -> usize {
        let reports = self.take_held();
        let count = reports.len();
        for report in reports.into_iter().rev() {
            self.emit(BrokerEvent::Delivery(report));
        }
        count
    }

    fn take_held(&self) -> Vec<DeliveryReport> {
        std::mem::take(&mut *self.held.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn next_offset(&self, topic: &str) -> i64 {
        let mut entry = self.offsets.entry(topic.to_string()).or_insert(0);
        let offset = *entry;
        *entry += 1;
        offset
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, record: OutboundRecord) -> Result<(), BrokerError> {
        if self.events.is_closed() {
            return Err(BrokerError::Closed);
        }

        if let Some(reason) = self.rejecting_topics.get(&record.topic) {
            return Err(BrokerError::Rejected {
                topic: record.topic,
                reason: reason.value().clone(),
            });
        }

        let offset = self.next_offset(&record.topic);
        let report = match self.failing_topics.get(&record.topic) {
            Some(reason) => DeliveryReport::failed(record.token, &record.topic, reason.value().clone()),
            None => DeliveryReport::delivered(record.token, &record.topic, 0, offset),
        };
        let silent = self.silent_topics.contains_key(&record.topic);

        tracing::debug!(
            token = %record.token,
            topic = %record.topic,
            offset = offset,
            "Memory broker accepted message"
        );

        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage {
                token: record.token,
                topic: record.topic,
                key: record.key,
                value: record.value,
                partition: 0,
                offset,
            });

        if silent {
            return Ok(());
        }

        match self.mode {
            MemoryDeliveryMode::Immediate => self.emit(BrokerEvent::Delivery(report)),
            MemoryDeliveryMode::Manual => self
                .held
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(report),
        }

        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        let released = self.release_all();
        if released > 0 {
            tracing::debug!(released = released, "Memory broker flushed held reports");
        }
        Ok(())
    }
}
