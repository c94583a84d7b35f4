use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use uuid::Uuid;

use crate::communication::{
    BulkCommunicationEvent, BulkCommunicationResponse, BulkFailure, CommunicationEvent,
    CommunicationResponse,
};
use crate::config::BulkFailureMode;
use crate::metrics::BulkMetrics;

use super::bridge::DispatchBridge;
use super::error::DispatchError;

/// Statistics for the communication engine
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Events accepted by `send_one`, including those inside bulk requests
    pub events_received: AtomicU64,
    /// Channel dispatches handed to the bridge
    pub dispatches_attempted: AtomicU64,
    pub delivered: AtomicU64,
    /// Dispatches that ended in any error other than a timeout
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    pub bulk_requests: AtomicU64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            dispatches_attempted: self.dispatches_attempted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            bulk_requests: self.bulk_requests.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatsSnapshot {
    pub events_received: u64,
    pub dispatches_attempted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub bulk_requests: u64,
}

/// Request intake: correlation identifiers, channel fan-out and bulk handling
pub struct CommunicationEngine {
    bridge: DispatchBridge,
    bulk_mode: BulkFailureMode,
    stats: EngineStats,
}

impl CommunicationEngine {
    pub fn new(bridge: DispatchBridge, bulk_mode: BulkFailureMode) -> Self {
        Self {
            bridge,
            bulk_mode,
            stats: EngineStats::default(),
        }
    }

    pub fn bridge(&self) -> &DispatchBridge {
        &self.bridge
    }

    pub fn bulk_mode(&self) -> BulkFailureMode {
        self.bulk_mode
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Dispatch an event on each of its channels, in order.
    ///
    /// Each channel is confirmed before the next is submitted. The first
    /// failure aborts the call and the remaining channels are not attempted.
    pub async fn send_one(
        &self,
        mut event: CommunicationEvent,
    ) -> Result<CommunicationResponse, DispatchError> {
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);

        assign_reference_id(&mut event);
        if event.channels.is_empty() {
            return Err(DispatchError::InvalidEvent(
                "event must request at least one channel".to_string(),
            ));
        }

        tracing::debug!(
            reference_id = %event.reference_id,
            template = %event.template_name,
            channels = event.channels.len(),
            "Dispatching communication event"
        );

        for &channel in &event.channels {
            let narrowed = event.narrowed_to(channel);
            self.stats.dispatches_attempted.fetch_add(1, Ordering::Relaxed);

            match self.bridge.dispatch_one(&narrowed).await {
                Ok(_) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    if matches!(e, DispatchError::DeliveryTimeout { .. }) {
                        self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    tracing::warn!(
                        reference_id = %event.reference_id,
                        channel = %channel,
                        error = %e,
                        "Channel dispatch failed, aborting remaining channels"
                    );
                    return Err(e);
                }
            }
        }

        Ok(CommunicationResponse {
            reference_id: event.reference_id,
        })
    }

    /// Dispatch a batch of events in order, stopping at the first failure.
    ///
    /// In `FailFast` mode the failure fails the call. In `Partial` mode the
    /// responses produced so far are returned along with the failure.
    pub async fn send_bulk(
        &self,
        request: BulkCommunicationEvent,
    ) -> Result<BulkCommunicationResponse, DispatchError> {
        let events = request.communication_events;
        self.stats.bulk_requests.fetch_add(1, Ordering::Relaxed);
        BulkMetrics::record_request(events.len());

        let mut response = BulkCommunicationResponse {
            communication_responses: Vec::with_capacity(events.len()),
            failure: None,
        };

        for (index, mut event) in events.into_iter().enumerate() {
            // Assigned here so a failure reports the id its published channels carry
            assign_reference_id(&mut event);
            let reference_id = event.reference_id.clone();
            match self.send_one(event).await {
                Ok(result) => response.communication_responses.push(result),
                Err(e) => match self.bulk_mode {
                    BulkFailureMode::FailFast => return Err(e),
                    BulkFailureMode::Partial => {
                        tracing::warn!(
                            index,
                            completed = response.communication_responses.len(),
                            error = %e,
                            "Bulk request stopped early"
                        );
                        response.failure = Some(BulkFailure {
                            index,
                            reference_id,
                            code: e.code().to_string(),
                            message: e.to_string(),
                        });
                        break;
                    }
                },
            }
        }

        Ok(response)
    }
}

fn assign_reference_id(event: &mut CommunicationEvent) {
    if event.reference_id.is_empty() {
        event.reference_id = Uuid::new_v4().to_string();
    }
}
