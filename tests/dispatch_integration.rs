//! Cross-component dispatch tests
//!
//! Run the full intake -> bridge -> broker -> listener path against the
//! in-process broker. No Kafka is required.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use communication_engine::broker::{broker_event_channel, BrokerEvent, MemoryBroker};
use communication_engine::communication::{
    BulkCommunicationEvent, CommunicationChannel, CommunicationEvent, TopicRouter,
};
use communication_engine::config::{BulkFailureMode, ChannelTopics, TopicsConfig};
use communication_engine::dispatch::{
    CommunicationEngine, DeliveryListener, DispatchBridge, DispatchError, PendingDeliveries,
};

struct TestEnvironment {
    broker: Arc<MemoryBroker>,
    pending: Arc<PendingDeliveries>,
    engine: Arc<CommunicationEngine>,
    // Held so the listener keeps running for the whole test
    _listener: DeliveryListener,
}

fn topics() -> TopicsConfig {
    TopicsConfig {
        default: "comm-default".to_string(),
        sms: ChannelTopics {
            high_priority: "topic-B".to_string(),
            low_priority: "topic-A".to_string(),
        },
        email: ChannelTopics {
            high_priority: "email-high".to_string(),
            low_priority: "email-low".to_string(),
        },
        pn: ChannelTopics {
            high_priority: "pn-high".to_string(),
            low_priority: "pn-low".to_string(),
        },
        whatsapp: ChannelTopics {
            high_priority: "whatsapp-high".to_string(),
            low_priority: "whatsapp-low".to_string(),
        },
    }
}

fn create_test_environment(
    manual: bool,
    bulk_mode: BulkFailureMode,
    delivery_timeout: Duration,
) -> TestEnvironment {
    let (tx, rx) = broker_event_channel();
    let broker = Arc::new(if manual {
        MemoryBroker::manual(tx)
    } else {
        MemoryBroker::new(tx)
    });
    let pending = Arc::new(PendingDeliveries::new());
    let listener = DeliveryListener::spawn(pending.clone(), rx);

    let router = Arc::new(TopicRouter::from_config(&topics()).unwrap());
    let bridge = DispatchBridge::new(broker.clone(), router, pending.clone(), delivery_timeout);
    let engine = Arc::new(CommunicationEngine::new(bridge, bulk_mode));

    TestEnvironment {
        broker,
        pending,
        engine,
        _listener: listener,
    }
}

fn immediate_environment() -> TestEnvironment {
    create_test_environment(false, BulkFailureMode::FailFast, Duration::from_secs(5))
}

fn sms_event(reference_id: &str) -> CommunicationEvent {
    CommunicationEvent::builder("farmer_booking_reject_eng")
        .reference_id(reference_id)
        .contact("9453849441", "EN_US")
        .channel(CommunicationChannel::Sms)
        .placeholder("farmer_name", "Ravi")
        .build()
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Classification and routing
// ============================================================================

#[tokio::test]
async fn test_far_expiry_sms_goes_to_deferrable_topic() {
    let env = immediate_environment();
    let mut event = sms_event("r-deferrable");
    event.expiry = Some(Utc::now() + chrono::Duration::minutes(10));

    env.engine.send_one(event).await.unwrap();

    let published = env.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "topic-A");
}

#[tokio::test]
async fn test_sms_without_expiry_goes_to_urgent_topic() {
    let env = immediate_environment();

    env.engine.send_one(sms_event("r-urgent")).await.unwrap();

    let published = env.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "topic-B");
}

#[tokio::test]
async fn test_near_expiry_stays_urgent() {
    let env = immediate_environment();
    let mut event = sms_event("r-near");
    event.expiry = Some(Utc::now() + chrono::Duration::minutes(4));

    env.engine.send_one(event).await.unwrap();
    assert_eq!(env.broker.published_to("topic-B").len(), 1);
}

#[tokio::test]
async fn test_published_message_carries_narrowed_event_and_key() {
    let env = immediate_environment();
    let event = CommunicationEvent::builder("kyc_reminder")
        .reference_id("r-key")
        .actor(1001, "FARMER")
        .contact("7086880268", "HI_IN")
        .channel(CommunicationChannel::Email)
        .channel(CommunicationChannel::AppNotification)
        .build();

    env.engine.send_one(event).await.unwrap();

    let published = env.broker.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].topic, "email-high");
    assert_eq!(published[1].topic, "pn-high");

    let value = published[1].value_json().unwrap();
    assert_eq!(value["channels"], serde_json::json!(["APP_NOTIFICATION"]));
    assert_eq!(value["template_name"], "kyc_reminder");
    assert_eq!(
        published[1].key_json().unwrap(),
        serde_json::json!({"actor_id": 1001, "actor_type": "FARMER"})
    );
}

// ============================================================================
// Request intake
// ============================================================================

#[tokio::test]
async fn test_reference_id_generated_once_per_event() {
    let env = immediate_environment();
    let mut event = sms_event("");
    event.channels.push(CommunicationChannel::Whatsapp);

    let response = env.engine.send_one(event).await.unwrap();
    assert!(!response.reference_id.is_empty());

    for message in env.broker.published() {
        assert_eq!(
            message.value_json().unwrap()["reference_id"],
            response.reference_id.as_str()
        );
    }
}

#[tokio::test]
async fn test_channels_dispatched_sequentially() {
    let env = create_test_environment(true, BulkFailureMode::FailFast, Duration::from_secs(5));
    let mut event = sms_event("r-seq");
    event.channels.push(CommunicationChannel::Whatsapp);

    let engine = env.engine.clone();
    let handle = tokio::spawn(async move { engine.send_one(event).await });

    wait_until(|| env.broker.held_count() == 1).await;
    // The second channel must wait for the first confirmation
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(env.broker.published_count(), 1);
    assert_eq!(env.broker.published()[0].topic, "topic-B");

    env.broker.release_all();
    wait_until(|| env.broker.held_count() == 1 && env.broker.published_count() == 2).await;
    assert_eq!(env.broker.published()[1].topic, "whatsapp-high");

    env.broker.release_all();
    let response = handle.await.unwrap().unwrap();
    assert_eq!(response.reference_id, "r-seq");
}

// ============================================================================
// Correlation under concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_receive_their_own_outcome() {
    const CALLS: usize = 24;

    let env = create_test_environment(true, BulkFailureMode::FailFast, Duration::from_secs(5));
    env.broker.fail_topic("email-high", "message too large");

    let mut calls = Vec::new();
    for i in 0..CALLS {
        let channel = if i % 3 == 0 {
            CommunicationChannel::Email
        } else {
            CommunicationChannel::Sms
        };
        let event = CommunicationEvent::builder("otp")
            .reference_id(format!("call-{i}"))
            .contact(format!("90000000{i:02}"), "EN_US")
            .channel(channel)
            .build();

        let engine = env.engine.clone();
        calls.push(tokio::spawn(async move { engine.send_one(event).await }));
    }

    wait_until(|| env.broker.held_count() == CALLS).await;
    assert_eq!(env.pending.len(), CALLS);

    // Reports arrive in the opposite order of submission
    env.broker.release_reversed();

    let results = join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        let result = result.unwrap();
        if i % 3 == 0 {
            match result {
                Err(DispatchError::DeliveryFailed { topic, .. }) => assert_eq!(topic, "email-high"),
                other => panic!("call {i}: expected delivery failure, got {other:?}"),
            }
        } else {
            assert_eq!(assert_ok!(result).reference_id, format!("call-{i}"));
        }
    }
    assert!(env.pending.is_empty());
}

#[tokio::test]
async fn test_unrecognized_events_do_not_resolve_dispatches() {
    let env = create_test_environment(true, BulkFailureMode::FailFast, Duration::from_secs(5));

    let engine = env.engine.clone();
    let handle = tokio::spawn(async move { engine.send_one(sms_event("r-noise")).await });

    wait_until(|| env.broker.held_count() == 1).await;
    env.broker.emit(BrokerEvent::Unrecognized("statistics".to_string()));
    env.broker.emit(BrokerEvent::Error {
        reason: "broker transport failure".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!handle.is_finished());
    assert_eq!(env.pending.len(), 1);

    env.broker.release_all();
    assert_ok!(handle.await.unwrap());
}

// ============================================================================
// Failure modes
// ============================================================================

#[tokio::test]
async fn test_silent_broker_times_out_and_late_report_is_ignored() {
    let env = create_test_environment(true, BulkFailureMode::FailFast, Duration::from_millis(100));

    let err = env.engine.send_one(sms_event("r-late")).await.unwrap_err();
    assert!(matches!(err, DispatchError::DeliveryTimeout { timeout_ms: 100, .. }));
    assert!(env.pending.is_empty());

    // A report arriving after the caller gave up matches nothing
    assert_eq!(env.broker.release_all(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(env.pending.is_empty());

    let stats = env.engine.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.delivered, 0);
}

#[tokio::test]
async fn test_abandoned_caller_leaves_nothing_pending() {
    let env = create_test_environment(false, BulkFailureMode::FailFast, Duration::from_secs(30));
    env.broker.silence_topic("topic-B");

    // The caller goes away while waiting, as with a client disconnect
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), env.engine.send_one(sms_event("r-gone")))
            .await;
    assert!(abandoned.is_err());
    assert_eq!(env.broker.published_count(), 1);

    assert!(env.pending.is_empty());
    assert!(env.pending.wait_until_empty(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_rejected_publish_surfaces_publish_error() {
    let env = immediate_environment();
    env.broker.reject_topic("topic-B", "queue full");

    let err = assert_err!(env.engine.send_one(sms_event("r-reject")).await);
    assert_eq!(err.code(), "PUBLISH_ERROR");
    assert_eq!(env.broker.published_count(), 0);
    assert!(env.pending.is_empty());
}

#[tokio::test]
async fn test_bulk_fail_fast_discards_partial_results() {
    let env = immediate_environment();
    env.broker.fail_topic("whatsapp-high", "broker down");

    let mut failing = sms_event("e2");
    failing.channels = vec![CommunicationChannel::Whatsapp];
    let request = BulkCommunicationEvent {
        communication_events: vec![sms_event("e1"), failing, sms_event("e3")],
    };

    let err = env.engine.send_bulk(request).await.unwrap_err();
    assert_eq!(err.code(), "DELIVERY_FAILED");
    // e3 was never attempted
    assert_eq!(env.broker.published_to("topic-B").len(), 1);
}

#[tokio::test]
async fn test_bulk_partial_returns_completed_prefix() {
    let env = create_test_environment(false, BulkFailureMode::Partial, Duration::from_secs(5));
    env.broker.fail_topic("whatsapp-high", "broker down");

    let mut failing = sms_event("e2");
    failing.channels = vec![CommunicationChannel::Whatsapp];
    let request = BulkCommunicationEvent {
        communication_events: vec![sms_event("e1"), failing, sms_event("e3")],
    };

    let response = env.engine.send_bulk(request).await.unwrap();
    assert_eq!(response.communication_responses.len(), 1);
    assert_eq!(response.communication_responses[0].reference_id, "e1");

    let failure = response.failure.unwrap();
    assert_eq!(failure.index, 1);
    assert_eq!(failure.reference_id, "e2");
    assert_eq!(env.broker.published_to("topic-B").len(), 1);
}
