//! Seam to the broker's publishing side.
//!
//! Connection management, channel setup, and consumption stay with the
//! transport. Request-reply only needs to publish; replies come back through
//! [`ReplyManager::on_delivery`](crate::ReplyManager::on_delivery) or by
//! calling a [`ReplyHandler`](crate::ReplyHandler) directly.

use async_trait::async_trait;

use crate::error::PublishError;
use crate::message::OutboundRequest;

/// Publishes requests to the broker.
#[async_trait]
pub trait RequestPublisher: Send + Sync {
    /// Publish `request` with its properties as given.
    async fn publish(&self, request: OutboundRequest) -> Result<(), PublishError>;
}
