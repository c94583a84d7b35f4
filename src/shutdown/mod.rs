//! Graceful shutdown handling for the communication engine.
//!
//! Runs after the HTTP server has stopped accepting requests:
//! 1. Waits for in-flight dispatches to receive their delivery reports
//! 2. Flushes the broker client so queued records produce reports
//! 3. Stops the delivery listener once the event stream is drained

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broker::MessageBroker;
use crate::config::Settings;
use crate::dispatch::{DeliveryListener, ListenerSummary, PendingDeliveries};

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for pending dispatches to resolve (default: 15 seconds)
    pub drain_timeout: Duration,
    /// Time allowed for the broker flush (default: 10 seconds)
    pub flush_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(15),
            flush_timeout: Duration::from_secs(10),
        }
    }
}

impl ShutdownConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            drain_timeout: settings.dispatch.drain_timeout(),
            flush_timeout: settings.broker.flush_timeout(),
        }
    }
}

/// Handles graceful shutdown of the dispatch core
pub struct GracefulShutdown {
    broker: Arc<dyn MessageBroker>,
    pending: Arc<PendingDeliveries>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        pending: Arc<PendingDeliveries>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            broker,
            pending,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self, listener),
        fields(pending = self.pending.len(), broker = self.broker.name())
    )]
    pub async fn execute(&self, listener: DeliveryListener) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        // Phase 1: the flush below is what forces outstanding reports out, so
        // start it while dispatches drain
        tracing::info!("Starting graceful shutdown - Phase 1: Draining pending dispatches");
        let flush = self.broker.flush(self.config.flush_timeout);
        let drain = self.pending.wait_until_empty(self.config.drain_timeout);
        let (flush_result, drained) = tokio::join!(flush, drain);

        result.pending_drained = drained;
        if !drained {
            result.pending_abandoned = self.pending.clear();
            tracing::warn!(
                abandoned = result.pending_abandoned,
                "Drain timeout, abandoning dispatches still awaiting a delivery report"
            );
        }

        // Phase 2
        tracing::info!("Phase 2: Broker flush");
        result.broker_flushed = match flush_result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Broker flush did not complete");
                false
            }
        };

        // Phase 3
        tracing::info!("Phase 3: Stopping delivery listener");
        result.listener = listener.stop().await;

        result.duration = start.elapsed();
        result.success = result.pending_drained && result.broker_flushed;

        tracing::info!(
            pending_drained = result.pending_drained,
            pending_abandoned = result.pending_abandoned,
            broker_flushed = result.broker_flushed,
            resolved = result.listener.resolved,
            unmatched = result.listener.unmatched,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether every phase completed within its bound
    pub success: bool,
    /// Whether every pending dispatch received its report
    pub pending_drained: bool,
    /// Dispatches dropped after the drain timeout
    pub pending_abandoned: usize,
    pub broker_flushed: bool,
    pub listener: ListenerSummary,
    /// Total time taken for shutdown
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{broker_event_channel, MemoryBroker};

    #[tokio::test]
    async fn test_shutdown_with_nothing_pending() {
        let (tx, rx) = broker_event_channel();
        let broker = Arc::new(MemoryBroker::new(tx));
        let pending = Arc::new(PendingDeliveries::new());
        let listener = DeliveryListener::spawn(pending.clone(), rx);

        let shutdown = GracefulShutdown::new(broker, pending, ShutdownConfig::default());
        let result = shutdown.execute(listener).await;

        assert!(result.success);
        assert!(result.pending_drained);
        assert_eq!(result.pending_abandoned, 0);
    }

    #[tokio::test]
    async fn test_flush_releases_held_reports_before_listener_stops() {
        use crate::broker::{MessageBroker, OutboundRecord};
        use uuid::Uuid;

        let (tx, rx) = broker_event_channel();
        let broker = Arc::new(MemoryBroker::manual(tx));
        let pending = Arc::new(PendingDeliveries::new());
        let listener = DeliveryListener::spawn(pending.clone(), rx);

        let token = Uuid::new_v4();
        let waiter = pending.register(token, "sms-high");
        broker
            .publish(OutboundRecord {
                token,
                topic: "sms-high".to_string(),
                key: b"{}".to_vec(),
                value: b"{}".to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(broker.held_count(), 1);

        let shutdown = GracefulShutdown::new(broker, pending, ShutdownConfig::default());
        let result = shutdown.execute(listener).await;

        assert!(result.success);
        assert_eq!(result.listener.resolved, 1);
        assert!(waiter.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_drain_timeout_abandons_waiters() {
        let (tx, rx) = broker_event_channel();
        let broker = Arc::new(MemoryBroker::new(tx));
        let pending = Arc::new(PendingDeliveries::new());
        let listener = DeliveryListener::spawn(pending.clone(), rx);

        let waiter = pending.register(uuid::Uuid::new_v4(), "sms-high");

        let config = ShutdownConfig {
            drain_timeout: Duration::from_millis(20),
            flush_timeout: Duration::from_millis(20),
        };
        let shutdown = GracefulShutdown::new(broker, pending.clone(), config);
        let result = shutdown.execute(listener).await;

        assert!(!result.success);
        assert_eq!(result.pending_abandoned, 1);
        assert!(pending.is_empty());
        assert!(waiter.await.is_err());
    }

    #[test]
    fn test_shutdown_config_defaults() {
        let config = ShutdownConfig::default();
        assert_eq!(config.drain_timeout, Duration::from_secs(15));
        assert_eq!(config.flush_timeout, Duration::from_secs(10));
    }
}
