//! Broker-facing message types.
//!
//! These are already-deserialized views of what the transport publishes and
//! consumes. Payloads stay opaque bytes; their encoding is the application's
//! business.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationId;

/// Transport-level properties carried alongside a payload.
///
/// Mirrors the subset of AMQP basic properties that request-reply needs,
/// plus free-form string headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// Correlation id set by the requester and echoed by the replier.
    pub correlation_id: Option<CorrelationId>,

    /// Queue the replier should publish its reply to.
    pub reply_to: Option<String>,

    /// MIME type of the payload.
    pub content_type: Option<String>,

    /// Broker or application assigned message id.
    pub message_id: Option<String>,

    /// Application headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl MessageProperties {
    /// Empty properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the reply-to queue.
    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    /// Set the payload content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add an application header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A request handed to the [`RequestPublisher`](crate::RequestPublisher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Broker exchange to publish to.
    pub exchange: String,

    /// Routing key used by the exchange.
    pub routing_key: String,

    /// Request properties. `correlation_id` and `reply_to` are filled in by
    /// [`ReplyManager::request`](crate::ReplyManager::request) when absent.
    pub properties: MessageProperties,

    /// Opaque request body.
    pub payload: Vec<u8>,
}

impl OutboundRequest {
    /// Build a request with empty properties.
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            properties: MessageProperties::default(),
            payload: payload.into(),
        }
    }

    /// Replace the request properties.
    pub fn with_properties(mut self, properties: MessageProperties) -> Self {
        self.properties = properties;
        self
    }
}

/// A message consumed from a reply queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Properties as received from the broker.
    pub properties: MessageProperties,

    /// Reply body.
    pub payload: Vec<u8>,
}

impl Delivery {
    /// Build a delivery.
    pub fn new(properties: MessageProperties, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            properties,
            payload: payload.into(),
        }
    }

    /// Correlation id found on the delivery, if the peer set one.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.properties.correlation_id.as_ref()
    }
}
