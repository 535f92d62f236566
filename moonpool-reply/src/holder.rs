//! The outcome of one correlation event.

use std::time::Duration;

use crate::correlation::CorrelationId;
use crate::message::MessageProperties;
use crate::resume::{CorrelationMismatch, Reply, ReplyOutcome, ResumeHandle, Resumption};

/// Which event resolved the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A reply arrived on the reply channel.
    Reply {
        /// Transport properties of the reply.
        properties: MessageProperties,
        /// Reply body.
        payload: Vec<u8>,
    },

    /// The deadline elapsed.
    Timeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },
}

/// Immutable record of a reply or timeout, plus what is needed to resume the
/// right caller.
///
/// Built by a [`ReplyHandler`](crate::ReplyHandler) on whichever execution
/// context observed the event and consumed exactly once by
/// [`ReplyManager::process_reply`](crate::ReplyManager::process_reply).
#[derive(Debug)]
pub struct ReplyHolder<C> {
    context: C,
    resume: ResumeHandle<C>,
    request_id: CorrelationId,
    correlation_id: CorrelationId,
    observed_correlation_id: Option<CorrelationId>,
    resolution: Resolution,
}

impl<C> ReplyHolder<C> {
    /// Holder for a delivered reply.
    pub fn reply(
        context: C,
        resume: ResumeHandle<C>,
        request_id: CorrelationId,
        correlation_id: CorrelationId,
        observed_correlation_id: Option<CorrelationId>,
        properties: MessageProperties,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            context,
            resume,
            request_id,
            correlation_id,
            observed_correlation_id,
            resolution: Resolution::Reply {
                properties,
                payload,
            },
        }
    }

    /// Holder for an elapsed deadline. No correlation id is observed.
    pub fn timeout(
        context: C,
        resume: ResumeHandle<C>,
        request_id: CorrelationId,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> Self {
        Self {
            context,
            resume,
            request_id,
            correlation_id,
            observed_correlation_id: None,
            resolution: Resolution::Timeout { timeout },
        }
    }

    /// The request context captured at registration.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Handle to the caller this holder would resume.
    pub fn resume_handle(&self) -> &ResumeHandle<C> {
        &self.resume
    }

    /// Id the request was registered under; used for lookup.
    pub fn request_id(&self) -> &CorrelationId {
        &self.request_id
    }

    /// Id the reply was expected to carry.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Id seen on the reply. Always `None` for a timeout.
    pub fn observed_correlation_id(&self) -> Option<&CorrelationId> {
        self.observed_correlation_id.as_ref()
    }

    /// Which event resolved the request.
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Whether this holder records a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.resolution, Resolution::Timeout { .. })
    }

    /// Reply body, present only for a reply.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.resolution {
            Resolution::Reply { payload, .. } => Some(payload),
            Resolution::Timeout { .. } => None,
        }
    }

    /// Reply properties, present only for a reply.
    pub fn properties(&self) -> Option<&MessageProperties> {
        match &self.resolution {
            Resolution::Reply { properties, .. } => Some(properties),
            Resolution::Timeout { .. } => None,
        }
    }

    /// Elapsed deadline, present only for a timeout.
    pub fn timeout_value(&self) -> Option<Duration> {
        match self.resolution {
            Resolution::Timeout { timeout } => Some(timeout),
            Resolution::Reply { .. } => None,
        }
    }

    /// The tampered correlation id, if this is a reply that did not echo the
    /// expected one.
    pub fn correlation_mismatch(&self) -> Option<CorrelationMismatch> {
        match self.resolution {
            Resolution::Reply { .. }
                if self.observed_correlation_id.as_ref() != Some(&self.correlation_id) =>
            {
                Some(CorrelationMismatch {
                    expected: self.correlation_id.clone(),
                    observed: self.observed_correlation_id.clone(),
                })
            }
            _ => None,
        }
    }

    /// Split into the caller's handle and what it should be resumed with.
    pub fn into_resumption(self) -> (ResumeHandle<C>, Resumption<C>) {
        let outcome = match self.resolution {
            Resolution::Reply {
                properties,
                payload,
            } => ReplyOutcome::Replied(Reply {
                request_id: self.request_id,
                correlation_id: self.correlation_id,
                observed_correlation_id: self.observed_correlation_id,
                properties,
                payload,
            }),
            Resolution::Timeout { timeout } => ReplyOutcome::TimedOut {
                request_id: self.request_id,
                timeout,
            },
        };
        (
            self.resume,
            Resumption {
                context: self.context,
                outcome,
            },
        )
    }
}
