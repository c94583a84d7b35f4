use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::broker::{DeliveryOutcome, MessageBroker, OutboundRecord};
use crate::communication::{classify, CommunicationEvent, PriorityTier, TopicRouter};
use crate::metrics::{DispatchMetrics, SendTimer};

use super::error::DispatchError;
use super::pending::PendingDeliveries;

/// Broker acknowledgment of one channel dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryConfirmation {
    pub token: Uuid,
    pub topic: String,
    pub tier: PriorityTier,
    pub partition: i32,
    pub offset: i64,
}

/// Removes a registration on drop unless a report was received for it.
///
/// Covers every early exit, including the caller's future being dropped
/// mid-wait.
struct Registration<'a> {
    pending: &'a PendingDeliveries,
    token: Uuid,
    armed: bool,
}

impl<'a> Registration<'a> {
    fn new(pending: &'a PendingDeliveries, token: Uuid) -> Self {
        Self {
            pending,
            token,
            armed: true,
        }
    }

    /// The listener already removed the entry when it forwarded the report
    fn received(mut self) {
        self.armed = false;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.armed && self.pending.cancel(&self.token) {
            tracing::debug!(token = %self.token, "Pending dispatch withdrawn");
        }
    }
}

/// Publishes single-channel events and waits for their delivery reports
pub struct DispatchBridge {
    broker: Arc<dyn MessageBroker>,
    router: Arc<TopicRouter>,
    pending: Arc<PendingDeliveries>,
    delivery_timeout: Duration,
}

impl DispatchBridge {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        router: Arc<TopicRouter>,
        pending: Arc<PendingDeliveries>,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            router,
            pending,
            delivery_timeout,
        }
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    pub fn pending(&self) -> &Arc<PendingDeliveries> {
        &self.pending
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Publish one single-channel event and wait for the broker's verdict.
    ///
    /// Returns only once the delivery report for this exact publish has
    /// arrived, or the delivery timeout has elapsed.
    #[tracing::instrument(
        name = "dispatch_one",
        skip(self, event),
        fields(
            reference_id = %event.reference_id,
            channel = tracing::field::Empty,
            tier = tracing::field::Empty,
            topic = tracing::field::Empty,
            token = tracing::field::Empty,
        )
    )]
    pub async fn dispatch_one(
        &self,
        event: &CommunicationEvent,
    ) -> Result<DeliveryConfirmation, DispatchError> {
        let channel = event.single_channel().ok_or_else(|| {
            DispatchError::InvalidEvent(format!(
                "expected exactly one channel, got {}",
                event.channels.len()
            ))
        })?;

        let tier = classify(event.expiry, Utc::now());
        let topic = self.router.route(channel, tier).to_string();

        let span = tracing::Span::current();
        span.record("channel", channel.as_str());
        span.record("tier", tier.as_str());
        span.record("topic", topic.as_str());

        let value = serde_json::to_vec(event)?;
        let key = event
            .receiver_identity()
            .ok_or_else(|| {
                DispatchError::InvalidEvent(
                    "event has neither receiver_actor nor receiver_actor_details".to_string(),
                )
            })?
            .to_key_bytes()?;

        let token = Uuid::new_v4();
        span.record("token", tracing::field::display(token));

        if self.pending.is_closed() {
            tracing::error!("Delivery listener is gone, refusing to publish");
            return Err(DispatchError::ListenerClosed);
        }

        let timer = SendTimer::start();
        let receiver = self.pending.register(token, &topic);
        let registration = Registration::new(&self.pending, token);

        let record = OutboundRecord {
            token,
            topic: topic.clone(),
            key,
            value,
        };
        if let Err(e) = self.broker.publish(record).await {
            timer.finish(false);
            tracing::error!(error = %e, "Broker rejected message");
            return Err(DispatchError::Publish(e));
        }
        DispatchMetrics::record_dispatch(channel.as_str(), tier.as_str());

        let report = match tokio::time::timeout(self.delivery_timeout, receiver).await {
            Ok(Ok(report)) => {
                registration.received();
                report
            }
            Ok(Err(_)) => {
                timer.finish(false);
                tracing::error!("Delivery listener dropped pending dispatch");
                return Err(DispatchError::ListenerClosed);
            }
            Err(_) => {
                timer.finish(false);
                DispatchMetrics::record_timeout();
                let timeout_ms = self.delivery_timeout.as_millis() as u64;
                tracing::warn!(
                    timeout_ms,
                    "No delivery report in time; message may still be delivered"
                );
                return Err(DispatchError::DeliveryTimeout { topic, timeout_ms });
            }
        };

        match report.outcome {
            DeliveryOutcome::Delivered { partition, offset } => {
                let elapsed_ms = timer.finish(true);
                tracing::debug!(partition, offset, elapsed_ms, "Message delivered");
                Ok(DeliveryConfirmation {
                    token,
                    topic,
                    tier,
                    partition,
                    offset,
                })
            }
            DeliveryOutcome::Failed { reason } => {
                let elapsed_ms = timer.finish(false);
                DispatchMetrics::record_delivery_failure(&topic);
                tracing::error!(reason = %reason, elapsed_ms, "Message delivery failed");
                Err(DispatchError::DeliveryFailed { topic, reason })
            }
        }
    }
}
