//! Correlation of delivery reports with the dispatches waiting on them.
//!
//! Every dispatch registers a one-shot signal under its correlation token
//! before publishing. A single long-lived [`DeliveryListener`] drains the
//! broker's shared event stream and completes the signal whose token matches
//! each report. Reports can therefore arrive in any order relative to their
//! publishes without a dispatch ever receiving another dispatch's outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::{BrokerEvent, BrokerEventReceiver, DeliveryReport};
use crate::metrics::{DispatchMetrics, ListenerMetrics};

/// What happened to a delivery report handed to [`PendingDeliveries::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Forwarded to the waiting dispatch
    Resolved,
    /// No dispatch registered this token (late report after a timeout, or a stray)
    Unmatched,
    /// The dispatch registered but stopped waiting before the report arrived
    Abandoned,
}

struct Waiter {
    topic: String,
    registered_at: Instant,
    sender: oneshot::Sender<DeliveryReport>,
}

/// Dispatches awaiting a delivery report, keyed by correlation token
#[derive(Default)]
pub struct PendingDeliveries {
    waiters: DashMap<Uuid, Waiter>,
    drained: Notify,
    closed: AtomicBool,
}

impl PendingDeliveries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the report for `token`.
    ///
    /// Must be called before the record is published so that an immediate
    /// report cannot race ahead of the registration. Once the registry is
    /// closed the returned receiver is already disconnected.
    pub fn register(&self, token: Uuid, topic: &str) -> oneshot::Receiver<DeliveryReport> {
        let (sender, receiver) = oneshot::channel();
        if self.is_closed() {
            return receiver;
        }
        self.waiters.insert(
            token,
            Waiter {
                topic: topic.to_string(),
                registered_at: Instant::now(),
                sender,
            },
        );
        DispatchMetrics::set_pending(self.waiters.len());
        receiver
    }

    /// Drop the registration for `token`; returns whether one existed
    pub fn cancel(&self, token: &Uuid) -> bool {
        let removed = self.waiters.remove(token).is_some();
        if removed {
            self.after_remove();
        }
        removed
    }

    /// Forward a report to the dispatch registered under its token
    pub fn resolve(&self, report: DeliveryReport) -> ResolveOutcome {
        let Some((token, waiter)) = self.waiters.remove(&report.token) else {
            return ResolveOutcome::Unmatched;
        };
        self.after_remove();

        if waiter.topic != report.topic {
            tracing::warn!(
                token = %token,
                expected_topic = %waiter.topic,
                reported_topic = %report.topic,
                "Delivery report topic differs from published topic"
            );
        }

        tracing::trace!(
            token = %token,
            waited_ms = waiter.registered_at.elapsed().as_millis() as u64,
            "Resolving pending delivery"
        );

        match waiter.sender.send(report) {
            Ok(()) => ResolveOutcome::Resolved,
            Err(_) => ResolveOutcome::Abandoned,
        }
    }

    /// Drop every registration; waiting dispatches observe a closed signal
    pub fn clear(&self) -> usize {
        let dropped = self.waiters.len();
        self.waiters.clear();
        self.after_remove();
        dropped
    }

    /// Refuse further registrations and drop the current ones.
    ///
    /// Called when the listener exits, since nothing would resolve them.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.clear()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn after_remove(&self) {
        let remaining = self.waiters.len();
        DispatchMetrics::set_pending(remaining);
        if remaining == 0 {
            self.drained.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Wait until no dispatch is pending; returns false on timeout
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let drain = async {
            loop {
                // Created before the check so a removal in between still wakes it
                let drained = self.drained.notified();
                if self.is_empty() {
                    break;
                }
                drained.await;
            }
        };
        tokio::time::timeout(timeout, drain).await.is_ok()
    }
}

/// Counters reported when the listener stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerSummary {
    pub resolved: u64,
    pub unmatched: u64,
    pub abandoned: u64,
    pub ignored: u64,
}

/// Background task consuming the broker's event stream.
///
/// Dropping the handle stops the task; use [`DeliveryListener::stop`] to stop
/// it and collect its summary.
pub struct DeliveryListener {
    handle: JoinHandle<ListenerSummary>,
    stop_tx: oneshot::Sender<()>,
}

impl DeliveryListener {
    pub fn spawn(pending: Arc<PendingDeliveries>, events: BrokerEventReceiver) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run(pending, events, stop_rx));
        tracing::info!("Delivery listener started");
        Self { handle, stop_tx }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the listener after draining events already on the stream
    pub async fn stop(self) -> ListenerSummary {
        let _ = self.stop_tx.send(());
        match self.handle.await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(error = %e, "Delivery listener task failed");
                ListenerSummary::default()
            }
        }
    }
}

async fn run(
    pending: Arc<PendingDeliveries>,
    mut events: BrokerEventReceiver,
    mut stop_rx: oneshot::Receiver<()>,
) -> ListenerSummary {
    let mut summary = ListenerSummary::default();

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                while let Ok(event) = events.try_recv() {
                    handle_event(&pending, event, &mut summary);
                }
                break;
            }
            event = events.recv() => match event {
                Some(event) => handle_event(&pending, event, &mut summary),
                None => {
                    tracing::info!("Broker event stream closed");
                    break;
                }
            }
        }
    }

    let dropped = pending.close();
    if dropped > 0 {
        tracing::warn!(dropped, "Listener exiting with dispatches still awaiting reports");
    }

    tracing::info!(
        resolved = summary.resolved,
        unmatched = summary.unmatched,
        abandoned = summary.abandoned,
        ignored = summary.ignored,
        "Delivery listener stopped"
    );
    summary
}

fn handle_event(pending: &PendingDeliveries, event: BrokerEvent, summary: &mut ListenerSummary) {
    match event {
        BrokerEvent::Delivery(report) => {
            let token = report.token;
            let topic = report.topic.clone();
            match pending.resolve(report) {
                ResolveOutcome::Resolved => summary.resolved += 1,
                ResolveOutcome::Unmatched => {
                    summary.unmatched += 1;
                    ListenerMetrics::record_unmatched();
                    tracing::warn!(
                        token = %token,
                        topic = %topic,
                        "Delivery report matched no pending dispatch"
                    );
                }
                ResolveOutcome::Abandoned => {
                    summary.abandoned += 1;
                    ListenerMetrics::record_unmatched();
                    tracing::warn!(
                        token = %token,
                        topic = %topic,
                        "Dispatch stopped waiting before its delivery report arrived"
                    );
                }
            }
        }
        BrokerEvent::Error { reason } => {
            summary.ignored += 1;
            ListenerMetrics::record_ignored("error");
            tracing::error!(reason = %reason, "Broker client error event ignored");
        }
        other @ BrokerEvent::Unrecognized(_) => {
            summary.ignored += 1;
            ListenerMetrics::record_ignored("unrecognized");
            tracing::error!(event = %other, "Ignored broker event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::broker_event_channel;

    #[tokio::test]
    async fn test_resolve_forwards_to_registered_waiter() {
        let pending = PendingDeliveries::new();
        let token = Uuid::new_v4();
        let rx = pending.register(token, "sms-high");
        assert_eq!(pending.len(), 1);

        let outcome = pending.resolve(DeliveryReport::delivered(token, "sms-high", 0, 7));
        assert_eq!(outcome, ResolveOutcome::Resolved);
        assert!(pending.is_empty());

        let report = rx.await.unwrap();
        assert_eq!(report.token, token);
    }

    #[tokio::test]
    async fn test_unknown_and_abandoned_tokens() {
        let pending = PendingDeliveries::new();

        let stray = DeliveryReport::delivered(Uuid::new_v4(), "t", 0, 0);
        assert_eq!(pending.resolve(stray), ResolveOutcome::Unmatched);

        let token = Uuid::new_v4();
        let rx = pending.register(token, "t");
        drop(rx);
        let late = DeliveryReport::delivered(token, "t", 0, 1);
        assert_eq!(pending.resolve(late), ResolveOutcome::Abandoned);
    }

    #[tokio::test]
    async fn test_cancel_removes_registration() {
        let pending = PendingDeliveries::new();
        let token = Uuid::new_v4();
        let _rx = pending.register(token, "t");

        assert!(pending.cancel(&token));
        assert!(!pending.cancel(&token));
        assert!(pending.wait_until_empty(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_listener_matches_out_of_order_reports() {
        let pending = Arc::new(PendingDeliveries::new());
        let (tx, rx) = broker_event_channel();
        let listener = DeliveryListener::spawn(pending.clone(), rx);

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let first_rx = pending.register(first, "t");
        let second_rx = pending.register(second, "t");

        tx.send(BrokerEvent::Delivery(DeliveryReport::delivered(second, "t", 0, 1)))
            .unwrap();
        tx.send(BrokerEvent::Delivery(DeliveryReport::failed(first, "t", "nope")))
            .unwrap();

        assert!(second_rx.await.unwrap().is_success());
        assert!(!first_rx.await.unwrap().is_success());

        let summary = listener.stop().await;
        assert_eq!(summary.resolved, 2);
    }

    #[tokio::test]
    async fn test_listener_ignores_non_delivery_events() {
        let pending = Arc::new(PendingDeliveries::new());
        let (tx, rx) = broker_event_channel();
        let listener = DeliveryListener::spawn(pending.clone(), rx);

        let token = Uuid::new_v4();
        let mut waiter = pending.register(token, "t");

        tx.send(BrokerEvent::Error {
            reason: "all brokers down".to_string(),
        })
        .unwrap();
        tx.send(BrokerEvent::Unrecognized("stats".to_string())).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Still registered and unresolved
        assert_eq!(pending.len(), 1);
        assert!(matches!(
            waiter.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));

        let summary = listener.stop().await;
        assert_eq!(summary.ignored, 2);
        assert_eq!(summary.resolved, 0);
    }

    #[tokio::test]
    async fn test_listener_exit_disconnects_waiters() {
        let pending = Arc::new(PendingDeliveries::new());
        let (tx, rx) = broker_event_channel();
        let listener = DeliveryListener::spawn(pending.clone(), rx);

        let in_flight = pending.register(Uuid::new_v4(), "t");
        drop(tx);
        assert!(in_flight.await.is_err());
        assert!(pending.is_empty());
        assert!(pending.is_closed());

        // Later registrations are refused outright
        let late = pending.register(Uuid::new_v4(), "t");
        assert!(late.await.is_err());
        assert!(pending.is_empty());

        let summary = listener.stop().await;
        assert_eq!(summary, ListenerSummary::default());
    }

    #[tokio::test]
    async fn test_wait_until_empty_wakes_on_resolve() {
        let pending = Arc::new(PendingDeliveries::new());
        let token = Uuid::new_v4();
        let _rx = pending.register(token, "t");

        assert!(!pending.wait_until_empty(Duration::from_millis(20)).await);

        let resolver = {
            let pending = pending.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                pending.resolve(DeliveryReport::delivered(token, "t", 0, 3))
            })
        };
        assert!(pending.wait_until_empty(Duration::from_secs(5)).await);
        assert_eq!(resolver.await.unwrap(), ResolveOutcome::Resolved);
    }
}
