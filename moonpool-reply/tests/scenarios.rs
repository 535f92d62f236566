//! End-to-end request/reply scenarios on paused tokio time.
//!
//! These tests verify that:
//! - A reply resumes the caller and a later timeout is a no-op
//! - A missing reply resumes the caller with the configured deadline
//! - A mangled correlation id still resolves the original request
//! - Shared-queue routing drops late and unknown replies

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use moonpool_reply::{
    CorrelationId, Delivery, MessageProperties, OutboundRequest, PublishError, ReplyConfig,
    ReplyError, ReplyHandler, ReplyManager, ReplyOutcome, RequestPublisher,
};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
struct Exchange {
    route: &'static str,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn exchange() -> Exchange {
    Exchange { route: "pricing" }
}

#[tokio::test(start_paused = true)]
async fn test_reply_before_deadline_then_timeout_is_noop() {
    init_tracing();
    let manager = ReplyManager::new(ReplyConfig::default().keep_timer_on_reply());
    let registration = manager
        .register(exchange(), CorrelationId::from("R1"), Some(Duration::from_millis(500)))
        .unwrap();

    tokio::time::advance(Duration::from_millis(100)).await;
    let meta = MessageProperties::new()
        .with_correlation_id("R1")
        .with_content_type("text/plain");
    registration
        .handler
        .on_reply(Some(CorrelationId::from("R1")), meta.clone(), b"ok".to_vec());

    let resumption = registration.receiver.recv().await.unwrap();
    assert_eq!(resumption.context, exchange());
    let reply = resumption.into_result().unwrap();
    assert_eq!(reply.properties, meta);
    assert_eq!(reply.payload, b"ok");

    // let the still-running timer fire at t=500ms
    tokio::time::sleep(Duration::from_millis(450)).await;

    let stats = manager.stats();
    assert_eq!(stats.replies, 1);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(manager.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_timeout_after_reply_is_noop() {
    let manager = ReplyManager::new(ReplyConfig::default());
    let registration = manager
        .register(exchange(), CorrelationId::from("R1"), Some(Duration::from_millis(500)))
        .unwrap();
    let handler = registration.handler.clone();

    handler.on_reply(Some(CorrelationId::from("R1")), MessageProperties::new(), b"ok".to_vec());
    handler.on_timeout(CorrelationId::from("R1"));

    let resumption = registration.receiver.recv().await.unwrap();
    assert!(!resumption.is_timeout());
    assert_eq!(manager.stats().duplicates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_reply_times_out_with_deadline() {
    init_tracing();
    let manager = ReplyManager::new(ReplyConfig::default());
    let start = Instant::now();
    let registration = manager
        .register(exchange(), CorrelationId::from("R2"), Some(Duration::from_millis(200)))
        .unwrap();

    let resumption = registration.receiver.recv().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(resumption.context, exchange());
    assert_eq!(
        resumption.outcome,
        ReplyOutcome::TimedOut {
            request_id: CorrelationId::from("R2"),
            timeout: Duration::from_millis(200),
        }
    );
    assert_eq!(manager.stats().timeouts, 1);
    assert!(!manager.is_pending(&CorrelationId::from("R2")));
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_from_config() {
    let manager = ReplyManager::new(ReplyConfig::with_timeout(Duration::from_secs(3)));
    let registration = manager
        .register(exchange(), CorrelationId::from("R8"), None)
        .unwrap();

    let err = registration
        .receiver
        .recv()
        .await
        .unwrap()
        .into_result()
        .unwrap_err();
    assert_eq!(
        err,
        ReplyError::Timeout {
            correlation_id: CorrelationId::from("R8"),
            timeout: Duration::from_secs(3),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_mutated_correlation_id_still_resolves() {
    init_tracing();
    let manager = ReplyManager::new(ReplyConfig::default());
    let registration = manager
        .register(exchange(), CorrelationId::from("R3"), Some(Duration::from_millis(500)))
        .unwrap();

    registration.handler.on_reply(
        Some(CorrelationId::from("R3-mutated")),
        MessageProperties::new().with_correlation_id("R3-mutated"),
        b"payload".to_vec(),
    );

    let reply = registration
        .receiver
        .recv()
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(reply.request_id, CorrelationId::from("R3"));
    assert_eq!(reply.payload, b"payload");
    let mismatch = reply.mismatch().unwrap();
    assert_eq!(mismatch.expected, CorrelationId::from("R3"));
    assert_eq!(mismatch.observed, Some(CorrelationId::from("R3-mutated")));

    let stats = manager.stats();
    assert_eq!(stats.replies, 1);
    assert_eq!(stats.mismatches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shared_queue_routing() {
    let manager = ReplyManager::new(ReplyConfig::default());
    let direct = manager
        .register(exchange(), CorrelationId::from("R4"), Some(Duration::from_secs(1)))
        .unwrap();
    let aliased = manager
        .register_with_correlation(
            Exchange { route: "billing" },
            CorrelationId::from("R5"),
            CorrelationId::from("wire-5"),
            Some(Duration::from_secs(1)),
        )
        .unwrap();

    assert!(manager.on_delivery(Delivery::new(
        MessageProperties::new().with_correlation_id("wire-5"),
        b"billed".to_vec(),
    )));
    assert!(manager.on_delivery(Delivery::new(
        MessageProperties::new().with_correlation_id("R4"),
        b"priced".to_vec(),
    )));
    assert!(!manager.on_delivery(Delivery::new(
        MessageProperties::new().with_correlation_id("nobody"),
        Vec::new(),
    )));
    assert!(!manager.on_delivery(Delivery::new(MessageProperties::new(), Vec::new())));

    let priced = direct.receiver.recv().await.unwrap().into_result().unwrap();
    assert_eq!(priced.payload, b"priced");

    let billed = aliased.receiver.recv().await.unwrap();
    assert_eq!(billed.context.route, "billing");
    let billed = billed.into_result().unwrap();
    assert_eq!(billed.request_id, CorrelationId::from("R5"));
    assert_eq!(billed.mismatch(), None);

    assert_eq!(manager.stats().unknown, 2);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_after_timeout_is_dropped() {
    let manager = ReplyManager::new(ReplyConfig::default());
    let registration = manager
        .register(exchange(), CorrelationId::from("R6"), Some(Duration::from_millis(50)))
        .unwrap();

    let resumption = registration.receiver.recv().await.unwrap();
    assert!(resumption.is_timeout());

    assert!(!manager.on_delivery(Delivery::new(
        MessageProperties::new().with_correlation_id("R6"),
        b"too late".to_vec(),
    )));
    // a consumer still holding the handler gets absorbed as a duplicate
    registration
        .handler
        .on_reply(Some(CorrelationId::from("R6")), MessageProperties::new(), Vec::new());

    let stats = manager.stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.replies, 0);
    assert_eq!(stats.unknown, 1);
    assert_eq!(stats.duplicates, 1);
}

/// Publisher that answers every request through the manager, like a replier
/// on the other end of the broker.
struct LoopbackPublisher {
    manager: Arc<ReplyManager<Exchange>>,
    published: Mutex<Vec<OutboundRequest>>,
}

#[async_trait]
impl RequestPublisher for LoopbackPublisher {
    async fn publish(&self, request: OutboundRequest) -> Result<(), PublishError> {
        self.published.lock().unwrap().push(request.clone());
        let manager = self.manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let mut body = b"echo:".to_vec();
            body.extend_from_slice(&request.payload);
            let properties = MessageProperties {
                correlation_id: request.properties.correlation_id.clone(),
                ..MessageProperties::default()
            };
            manager.on_delivery(Delivery::new(properties, body));
        });
        Ok(())
    }
}

struct ClosedPublisher;

#[async_trait]
impl RequestPublisher for ClosedPublisher {
    async fn publish(&self, _request: OutboundRequest) -> Result<(), PublishError> {
        Err(PublishError::ConnectionClosed)
    }
}

#[tokio::test(start_paused = true)]
async fn test_request_round_trip_through_publisher() {
    init_tracing();
    let manager = ReplyManager::new(
        ReplyConfig::with_timeout(Duration::from_secs(1))
            .reply_to("replies")
            .correlation_prefix("client"),
    );
    let publisher = LoopbackPublisher {
        manager: manager.clone(),
        published: Mutex::new(Vec::new()),
    };

    let first = manager
        .request(&publisher, exchange(), OutboundRequest::new("rpc", "pricing", b"a".to_vec()), None)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(first.request_id, CorrelationId::from("client-1"));
    assert_eq!(first.payload, b"echo:a");

    let preset = OutboundRequest::new("rpc", "pricing", b"b".to_vec()).with_properties(
        MessageProperties::new()
            .with_correlation_id("caller-chosen")
            .with_reply_to("private"),
    );
    let second = manager
        .request(&publisher, exchange(), preset, None)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(second.request_id, CorrelationId::from("caller-chosen"));

    let published = publisher.published.lock().unwrap();
    assert_eq!(published[0].properties.reply_to.as_deref(), Some("replies"));
    assert_eq!(published[1].properties.reply_to.as_deref(), Some("private"));
    assert_eq!(manager.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_withdraws_registration() {
    let manager = ReplyManager::new(ReplyConfig::default().correlation_prefix("c"));

    let err = manager
        .request(&ClosedPublisher, exchange(), OutboundRequest::new("rpc", "x", Vec::new()), None)
        .await
        .unwrap_err();

    assert_eq!(err, ReplyError::Publish(PublishError::ConnectionClosed));
    assert_eq!(manager.pending_count(), 0);
    assert_eq!(manager.stats().abandoned, 1);
}
