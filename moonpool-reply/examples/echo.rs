//! Request/reply against an in-process "broker".
//!
//! A loopback publisher hands each request to a replier task. The replier
//! answers one request promptly, one only after its deadline (the late reply
//! is dropped), and ignores the last so it times out.
//!
//! Run with: `RUST_LOG=debug cargo run -p moonpool-reply --example echo`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moonpool_reply::{
    Delivery, MessageProperties, OutboundRequest, PublishError, ReplyConfig, ReplyManager,
    ReplyOutcome, RequestPublisher,
};
use serde_json::json;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct Job {
    name: String,
}

struct LoopbackPublisher {
    outbox: mpsc::UnboundedSender<OutboundRequest>,
}

#[async_trait]
impl RequestPublisher for LoopbackPublisher {
    async fn publish(&self, request: OutboundRequest) -> Result<(), PublishError> {
        self.outbox
            .send(request)
            .map_err(|_| PublishError::ConnectionClosed)
    }
}

async fn replier(manager: Arc<ReplyManager<Job>>, mut inbox: mpsc::UnboundedReceiver<OutboundRequest>) {
    while let Some(request) = inbox.recv().await {
        let Some(correlation_id) = request.properties.correlation_id.clone() else {
            continue;
        };
        let body: serde_json::Value = serde_json::from_slice(&request.payload).unwrap_or_default();
        let delay = match body["mode"].as_str() {
            Some("silent") => continue,
            Some("late") => Duration::from_millis(500),
            _ => Duration::ZERO,
        };

        let reply = json!({ "echo": body, "queue": request.properties.reply_to });
        let properties = MessageProperties::new()
            .with_correlation_id(correlation_id)
            .with_content_type("application/json");
        let manager = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let routed = manager.on_delivery(Delivery::new(properties, reply.to_string().into_bytes()));
            if !routed {
                println!("late reply dropped");
            }
        });
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let manager = ReplyManager::new(
        ReplyConfig::with_timeout(Duration::from_millis(300))
            .reply_to("echo.replies")
            .correlation_prefix("echo"),
    );
    let (outbox, inbox) = mpsc::unbounded_channel();
    tokio::spawn(replier(manager.clone(), inbox));
    let publisher = LoopbackPublisher { outbox };

    for mode in ["normal", "late", "silent"] {
        let job = Job {
            name: format!("{mode}-job"),
        };
        let payload = json!({ "mode": mode }).to_string().into_bytes();
        let request = OutboundRequest::new("rpc", "echo", payload);

        match manager.request(&publisher, job, request, None).await {
            Ok(resumption) => match resumption.outcome {
                ReplyOutcome::Replied(reply) => {
                    println!(
                        "{}: reply {} (mismatch: {:?})",
                        resumption.context.name,
                        String::from_utf8_lossy(&reply.payload),
                        reply.mismatch()
                    );
                }
                ReplyOutcome::TimedOut { request_id, timeout } => {
                    println!(
                        "{}: {request_id} timed out after {timeout:?}",
                        resumption.context.name
                    );
                }
            },
            Err(err) => println!("request failed: {err}"),
        }
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("{:?}", manager.stats());
}
