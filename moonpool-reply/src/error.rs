//! Error types for request-reply correlation.
//!
//! Handler callbacks never fail: a reply or a timeout always produces a
//! [`ReplyHolder`](crate::ReplyHolder). The errors below are raised only by
//! registration, publishing, and waiting for a resumption.

use std::time::Duration;

use thiserror::Error;

use crate::correlation::CorrelationId;

/// Errors surfaced to the caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    /// No reply arrived before the deadline elapsed.
    #[error("no reply for correlation id {correlation_id} within {timeout:?}")]
    Timeout {
        /// The request's original correlation id.
        correlation_id: CorrelationId,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// A request with the same correlation id is already waiting.
    #[error("correlation id already pending: {0}")]
    DuplicateCorrelationId(CorrelationId),

    /// The registration was withdrawn before a reply or timeout resolved it.
    #[error("reply wait abandoned for correlation id {0}")]
    Abandoned(CorrelationId),

    /// Registration happened outside a tokio runtime, so no deadline timer
    /// could be scheduled.
    #[error("no tokio runtime available to schedule reply timeout")]
    NoRuntime,

    /// The request could not be handed to the broker.
    #[error("failed to publish request: {0}")]
    Publish(#[from] PublishError),
}

/// Errors reported by a [`RequestPublisher`](crate::RequestPublisher).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The broker connection or channel is closed.
    #[error("broker connection closed")]
    ConnectionClosed,

    /// The broker refused the message.
    #[error("publish rejected: {message}")]
    Rejected {
        /// Details reported by the broker.
        message: String,
    },
}
